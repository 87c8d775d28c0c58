use std::{ops::Range, sync::Arc};

use log::{debug, warn};

use crate::{
    buffer::{
        buffer_pool::{BufferPool, FlushObserver, Frame, Stats},
        read_ahead::ReadAhead,
    },
    config::{BufferPoolConfig, ReadAheadConfig},
    error::{ErrorKind, SmallError},
    tablespace::Fil,
    types::{Lsn, PageID, PageNo, SmallResult, SpaceID},
};

/// The pool instances of the engine. A page always maps to the same
/// instance, so operations on pages of different instances never
/// contend on one mutex.
pub struct BufferPools {
    pools: Vec<BufferPool>,
    read_ahead: Option<ReadAhead>,
    fil: Arc<Fil>,
}

impl BufferPools {
    pub fn new(config: &BufferPoolConfig, read_ahead: &ReadAheadConfig, fil: Arc<Fil>) -> Self {
        let instances = config.instances.max(1);
        let pools = (0..instances)
            .map(|i| {
                BufferPool::new(
                    i,
                    config.size.max(1),
                    config.page_size,
                    config.old_ratio,
                    fil.clone(),
                )
            })
            .collect();
        Self {
            pools,
            read_ahead: if read_ahead.enabled {
                Some(ReadAhead::new(read_ahead))
            } else {
                None
            },
            fil,
        }
    }

    pub fn n_instances(&self) -> usize {
        self.pools.len()
    }

    pub fn page_size(&self) -> usize {
        self.pools[0].page_size()
    }

    pub fn fil(&self) -> &Arc<Fil> {
        &self.fil
    }

    /// Instance serving the page.
    pub fn pool_index(&self, id: &PageID) -> usize {
        let fold = ((id.space as u64) << 20) ^ (id.page_no as u64).wrapping_mul(0x9E37_79B9);
        (fold % self.pools.len() as u64) as usize
    }

    pub fn pool(&self, index: usize) -> &BufferPool {
        &self.pools[index]
    }

    pub fn pool_for(&self, id: &PageID) -> &BufferPool {
        &self.pools[self.pool_index(id)]
    }

    pub fn set_flush_observer(&self, observer: Arc<dyn FlushObserver>) {
        for pool in &self.pools {
            pool.set_flush_observer(observer.clone());
        }
    }

    pub fn fetch(&self, id: PageID) -> Result<(Arc<Frame>, bool), SmallError> {
        let result = self.pool_for(&id).fetch(id)?;
        if let Some(ra) = &self.read_ahead {
            if let Some(window) = ra.on_access(id.space, id.page_no) {
                self.prefetch(id.space, window);
            }
        }
        Ok(result)
    }

    /// Warm the cache with the pages of the window. Best effort: pages
    /// past the end of the space are skipped and the first error stops
    /// the prefetch.
    pub fn prefetch(&self, space: SpaceID, window: Range<PageNo>) -> usize {
        let size = match self.fil.space_size(space) {
            Ok(s) => s,
            Err(e) => {
                debug!("read-ahead abandoned: {}", e);
                return 0;
            }
        };
        let mut loaded = 0;
        for page_no in window {
            if page_no >= size {
                break;
            }
            let id = PageID::new(space, page_no);
            let pool = self.pool_for(&id);
            if pool.contains(&id) {
                continue;
            }
            match pool.fetch(id) {
                Ok((frame, _)) => {
                    pool.release(&frame);
                    loaded += 1;
                }
                Err(e) => {
                    if !e.is(ErrorKind::NoFreeFrame) {
                        warn!("read-ahead of {:?} abandoned: {}", id, e);
                    }
                    break;
                }
            }
        }
        loaded
    }

    pub fn release(&self, frame: &Frame) {
        self.pool_for(&frame.id()).release(frame)
    }

    pub fn mark_dirty(&self, frame: &Frame, lsn: Lsn) {
        self.pool_for(&frame.id()).mark_dirty(frame, lsn)
    }

    pub fn mark_dirty_range(&self, frame: &Frame, start_lsn: Lsn, end_lsn: Lsn) {
        self.pool_for(&frame.id()).mark_dirty_range(frame, start_lsn, end_lsn)
    }

    pub fn drop_page(&self, id: &PageID) -> SmallResult {
        self.pool_for(id).drop_page(id)
    }

    pub fn drop_space(&self, space: SpaceID) {
        for pool in &self.pools {
            pool.drop_space(space);
        }
        if let Some(ra) = &self.read_ahead {
            ra.reset(space);
        }
    }

    pub fn flush_page(&self, id: &PageID) -> Result<bool, SmallError> {
        self.pool_for(id).flush_page(id)
    }

    pub fn flush_lru(&self, limit: usize) -> Result<usize, SmallError> {
        let mut n = 0;
        for pool in &self.pools {
            n += pool.flush_lru(limit)?;
        }
        Ok(n)
    }

    pub fn flush_list(&self, limit: usize) -> Result<usize, SmallError> {
        let mut n = 0;
        for pool in &self.pools {
            n += pool.flush_list(limit)?;
        }
        Ok(n)
    }

    /// Flush every instance, one thread per instance.
    pub fn flush_all(&self) -> Result<usize, SmallError> {
        if self.pools.len() == 1 {
            return self.pools[0].flush_all();
        }
        let results = crossbeam::scope(|s| {
            let handles: Vec<_> = self
                .pools
                .iter()
                .map(|pool| s.spawn(move |_| pool.flush_all()))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(SmallError::new(ErrorKind::Io, "flush thread panicked"))
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| SmallError::new(ErrorKind::Io, "flush scope panicked"))?;

        let mut n = 0;
        for r in results {
            n += r?;
        }
        Ok(n)
    }

    pub fn invalidate(&self) -> SmallResult {
        for pool in &self.pools {
            pool.invalidate()?;
        }
        Ok(())
    }

    pub fn min_oldest_lsn(&self) -> Option<Lsn> {
        self.pools.iter().filter_map(|p| p.min_oldest_lsn()).min()
    }

    pub fn stats(&self) -> Stats {
        let mut total = Stats::default();
        for pool in &self.pools {
            total.add(&pool.stats());
        }
        total
    }
}
