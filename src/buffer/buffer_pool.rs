use std::{
    collections::{HashMap, VecDeque},
    mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use log::{debug, warn};

use crate::{
    buffer::{
        buddy::{BuddyAllocator, BuddyBlock},
        lru::Lru,
    },
    error::{ErrorKind, SmallError},
    page::{page_lsn, unzip_page, zip_page, ZipPage},
    tablespace::Fil,
    types::{Lsn, PageID, SmallResult, SpaceID},
    utils::{HandyMutex, HandyRwLock},
};

/// Hook the redo log installs so a dirty page is never written before
/// the log records describing it (write-ahead rule).
pub trait FlushObserver: Send + Sync {
    fn before_page_write(&self, page_id: PageID, newest_lsn: Lsn) -> SmallResult;
}

/// A cached page. The bytes are latched by the frame's own rwlock; all
/// bookkeeping (pins, dirty state) lives in the pool.
///
/// `modifiers` counts the mtrs holding uncommitted changes to the page.
/// Such an image is never written out or evicted.
#[derive(Debug)]
pub struct Frame {
    id: PageID,
    page: RwLock<Vec<u8>>,
    modifiers: AtomicUsize,
}

impl Frame {
    fn new(id: PageID, page_size: usize) -> Self {
        Self {
            id,
            page: RwLock::new(vec![0u8; page_size]),
            modifiers: AtomicUsize::new(0),
        }
    }

    /// Announce a change before latching the page for it.
    pub fn begin_modify(&self) {
        self.modifiers.fetch_add(1, Ordering::SeqCst);
    }

    /// The change is committed (page LSN stamped, frame marked dirty)
    /// or rolled back.
    pub fn end_modify(&self) {
        let _ = self
            .modifiers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn is_modifying(&self) -> bool {
        self.modifiers.load(Ordering::SeqCst) > 0
    }

    pub fn id(&self) -> PageID {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.page.rl()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.page.wl()
    }
}

/// Outcome of choosing a frame to make room.
enum Victim {
    /// A clean frame was removed.
    Evicted,
    /// A dirty frame, pinned and with its dirty state taken, that must
    /// be written with the pool unlocked.
    Dirty(Arc<Frame>, Lsn, Lsn),
}

struct FrameMeta {
    frame: Arc<Frame>,
    pin: usize,
    dirty: bool,
    oldest_lsn: Lsn,
    newest_lsn: Lsn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub dirty: usize,
    pub flushes: u64,
    pub zip_hits: u64,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.capacity += other.capacity;
        self.size += other.size;
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.dirty += other.dirty;
        self.flushes += other.flushes;
        self.zip_hits += other.zip_hits;
    }
}

/// Compressed copies of clean pages that were evicted, kept in a buddy
/// arena so a later miss can be served without I/O.
struct ZipCache {
    buddy: BuddyAllocator,
    entries: HashMap<PageID, (BuddyBlock, u32, usize)>,
    order: VecDeque<PageID>,
}

impl ZipCache {
    fn new(page_size: usize, capacity: usize) -> Self {
        let low = (page_size / 16).max(64);
        Self {
            buddy: BuddyAllocator::new(low, page_size * (capacity / 4).max(1)),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn remove(&mut self, id: &PageID) -> Option<ZipPage> {
        let (block, original_size, len) = self.entries.remove(id)?;
        self.order.retain(|x| x != id);
        let data = self.buddy.data(&block)[..len].to_vec();
        if let Err(e) = self.buddy.free(block) {
            warn!("zip cache: {}", e);
        }
        Some(ZipPage {
            original_size,
            data,
        })
    }

    fn insert(&mut self, id: PageID, page: &[u8]) {
        let zip = match zip_page(page) {
            Ok(z) => z,
            Err(e) => {
                warn!("zip cache: cannot compress {:?}: {}", id, e);
                return;
            }
        };
        // pages that barely compress are not worth the arena space
        if zip.compressed_len() > page.len() / 2 {
            return;
        }
        self.remove(&id);
        let block = loop {
            if let Some(b) = self.buddy.alloc(zip.compressed_len()) {
                break b;
            }
            match self.order.front().copied() {
                Some(oldest) => {
                    self.remove(&oldest);
                }
                None => return,
            }
        };
        self.buddy.data_mut(&block)[..zip.compressed_len()].copy_from_slice(&zip.data);
        self.entries
            .insert(id, (block, zip.original_size, zip.compressed_len()));
        self.order.push_back(id);
    }

    fn drop_space(&mut self, space: SpaceID) {
        let ids: Vec<PageID> = self
            .entries
            .keys()
            .filter(|id| id.space == space)
            .copied()
            .collect();
        for id in ids {
            self.remove(&id);
        }
    }
}

struct PoolInner {
    frames: HashMap<PageID, FrameMeta>,
    lru: Lru,
    zip: ZipCache,
    hits: u64,
    misses: u64,
    evictions: u64,
    flushes: u64,
    zip_hits: u64,
}

/// Fixed-capacity page cache over the tablespaces.
///
/// The pool mutex protects the frame map and the LRU list; page bytes
/// are read from disk after the mutex is released, while the new
/// frame's latch is held so concurrent fetchers of the same page wait
/// on the latch instead of reading it twice.
pub struct BufferPool {
    index: usize,
    capacity: usize,
    page_size: usize,
    fil: Arc<Fil>,
    inner: Mutex<PoolInner>,
    observer: RwLock<Option<Arc<dyn FlushObserver>>>,
}

impl BufferPool {
    pub fn new(index: usize, capacity: usize, page_size: usize, old_ratio: usize, fil: Arc<Fil>) -> Self {
        Self {
            index,
            capacity,
            page_size,
            fil,
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                lru: Lru::new(old_ratio),
                zip: ZipCache::new(page_size, capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                flushes: 0,
                zip_hits: 0,
            }),
            observer: RwLock::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_flush_observer(&self, observer: Arc<dyn FlushObserver>) {
        *self.observer.wl() = Some(observer);
    }

    /// Pin the page, reading it in on a miss. The flag tells whether
    /// the page was already cached.
    pub fn fetch(&self, id: PageID) -> Result<(Arc<Frame>, bool), SmallError> {
        let mut guard = loop {
            let mut guard = self.inner.ml();
            let inner = &mut *guard;
            if let Some(meta) = inner.frames.get_mut(&id) {
                meta.pin += 1;
                let frame = meta.frame.clone();
                inner.lru.touch(&id);
                inner.hits += 1;
                return Ok((frame, true));
            }
            if inner.frames.len() < self.capacity {
                break guard;
            }
            // the page may get loaded by someone else while unlocked,
            // so every round starts over with the lookup
            if let Victim::Dirty(frame, oldest, newest) = self.pick_victim(inner)? {
                drop(guard);
                self.write_victim(&frame, oldest, newest)?;
            }
        };
        let inner = &mut *guard;
        inner.misses += 1;
        let zipped = inner.zip.remove(&id);
        if zipped.is_some() {
            inner.zip_hits += 1;
        }

        let frame = Arc::new(Frame::new(id, self.page_size));
        let mut page = frame.page.wl();
        inner.frames.insert(
            id,
            FrameMeta {
                frame: frame.clone(),
                pin: 1,
                dirty: false,
                oldest_lsn: 0,
                newest_lsn: 0,
            },
        );
        inner.lru.add(id);
        drop(guard);

        let loaded = match zipped {
            Some(zip) => unzip_page(&zip),
            None => self.fil.space_read_page(id),
        };
        match loaded.and_then(|data| Self::check_page(&data).map(|_| data)) {
            Ok(data) => {
                page.copy_from_slice(&data);
                drop(page);
                Ok((frame, false))
            }
            Err(e) => {
                drop(page);
                let mut inner = self.inner.ml();
                inner.frames.remove(&id);
                inner.lru.remove(&id);
                Err(e)
            }
        }
    }

    #[cfg(feature = "page_checksum")]
    fn check_page(data: &[u8]) -> SmallResult {
        crate::page::verify_checksum(data)
    }

    #[cfg(not(feature = "page_checksum"))]
    fn check_page(_data: &[u8]) -> SmallResult {
        Ok(())
    }

    /// Choose an unpinned frame nobody is changing. A clean one is
    /// evicted right away; a dirty one is pinned and handed back so the
    /// write happens without the pool mutex.
    fn pick_victim(&self, inner: &mut PoolInner) -> Result<Victim, SmallError> {
        let frames = &inner.frames;
        let victim = inner
            .lru
            .victim(|id| {
                frames
                    .get(id)
                    .map(|m| m.pin > 0 || m.frame.is_modifying())
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                SmallError::new(
                    ErrorKind::NoFreeFrame,
                    &format!("all {} frames of pool {} are pinned", self.capacity, self.index),
                )
            })?;

        match inner.frames.get_mut(&victim) {
            None => {
                inner.lru.remove(&victim);
                return Ok(Victim::Evicted);
            }
            Some(meta) if meta.dirty => {
                meta.pin += 1;
                meta.dirty = false;
                let oldest = mem::take(&mut meta.oldest_lsn);
                return Ok(Victim::Dirty(meta.frame.clone(), oldest, meta.newest_lsn));
            }
            Some(_) => {}
        }
        if let Some(meta) = inner.frames.remove(&victim) {
            inner.lru.remove(&victim);
            inner.evictions += 1;
            let page = meta.frame.read();
            inner.zip.insert(victim, &page);
            debug!("pool {}: evicted {:?}", self.index, victim);
        }
        Ok(Victim::Evicted)
    }

    /// Write a victim taken by `pick_victim` and unpin it. It is evicted
    /// by a later round if it is still clean and unpinned then.
    fn write_victim(&self, frame: &Frame, oldest: Lsn, newest: Lsn) -> SmallResult {
        let result = self.write_frame(frame, newest);
        let mut inner = self.inner.ml();
        if let Some(meta) = inner.frames.get_mut(&frame.id()) {
            meta.pin = meta.pin.saturating_sub(1);
        }
        match result {
            Ok(true) => {
                inner.flushes += 1;
                Ok(())
            }
            Ok(false) => {
                Self::redirty(&mut inner, frame.id(), oldest);
                Ok(())
            }
            Err(e) => {
                Self::redirty(&mut inner, frame.id(), oldest);
                Err(e)
            }
        }
    }

    /// Give back the dirty state of a frame whose write did not happen.
    fn redirty(inner: &mut PoolInner, id: PageID, oldest: Lsn) {
        if let Some(meta) = inner.frames.get_mut(&id) {
            if !meta.dirty {
                meta.dirty = true;
                meta.oldest_lsn = oldest;
            } else {
                meta.oldest_lsn = meta.oldest_lsn.min(oldest);
            }
        }
    }

    /// Write the frame through the tablespace layer, after the log has
    /// been flushed past the image's page LSN. A frame with an mtr in
    /// flight is skipped and `false` returned.
    fn write_frame(&self, frame: &Frame, newest_lsn: Lsn) -> Result<bool, SmallError> {
        let mut copy = {
            let page = frame.read();
            if frame.is_modifying() {
                debug!("pool {}: {:?} is being modified, not written", self.index, frame.id());
                return Ok(false);
            }
            page.clone()
        };
        let lsn = newest_lsn.max(page_lsn(&copy));
        if let Some(observer) = self.observer.rl().as_ref() {
            observer.before_page_write(frame.id(), lsn)?;
        }
        #[cfg(feature = "page_checksum")]
        crate::page::stamp_checksum(&mut copy);
        self.fil.space_write_page(frame.id(), &copy)?;
        Ok(true)
    }

    pub fn release(&self, frame: &Frame) {
        let mut inner = self.inner.ml();
        if let Some(meta) = inner.frames.get_mut(&frame.id()) {
            meta.pin = meta.pin.saturating_sub(1);
        }
    }

    /// Flag the frame modified by a change ending at `lsn`.
    pub fn mark_dirty(&self, frame: &Frame, lsn: Lsn) {
        self.mark_dirty_range(frame, lsn, lsn)
    }

    /// Flag the frame modified by the redo bytes `[start_lsn, end_lsn)`.
    /// The oldest LSN of a dirty frame bounds how far a checkpoint may
    /// advance.
    pub fn mark_dirty_range(&self, frame: &Frame, start_lsn: Lsn, end_lsn: Lsn) {
        let mut inner = self.inner.ml();
        if let Some(meta) = inner.frames.get_mut(&frame.id()) {
            if !meta.dirty {
                meta.dirty = true;
                meta.oldest_lsn = start_lsn;
            }
            meta.newest_lsn = meta.newest_lsn.max(end_lsn);
        }
    }

    pub fn contains(&self, id: &PageID) -> bool {
        self.inner.ml().frames.contains_key(id)
    }

    pub fn pin_count(&self, id: &PageID) -> Option<usize> {
        self.inner.ml().frames.get(id).map(|m| m.pin)
    }

    pub fn is_dirty(&self, id: &PageID) -> bool {
        self.inner
            .ml()
            .frames
            .get(id)
            .map(|m| m.dirty)
            .unwrap_or(false)
    }

    pub fn is_old(&self, id: &PageID) -> bool {
        self.inner.ml().lru.is_old(id)
    }

    /// Cached ids from the young end of the LRU list.
    pub fn lru_ids(&self) -> Vec<PageID> {
        self.inner.ml().lru.ids()
    }

    /// Remove the frame of a freed page. The page must not be pinned.
    pub fn drop_page(&self, id: &PageID) -> SmallResult {
        let mut inner = self.inner.ml();
        inner.zip.remove(id);
        let pinned = inner.frames.get(id).map(|m| m.pin > 0);
        match pinned {
            None => Ok(()),
            Some(true) => Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("cannot drop pinned page {:?}", id),
            )),
            Some(false) => {
                inner.frames.remove(id);
                inner.lru.remove(id);
                Ok(())
            }
        }
    }

    /// Forget every page of the space without writing it.
    pub fn drop_space(&self, space: SpaceID) {
        let mut inner = self.inner.ml();
        let ids: Vec<PageID> = inner
            .frames
            .keys()
            .filter(|id| id.space == space)
            .copied()
            .collect();
        for id in ids {
            inner.frames.remove(&id);
            inner.lru.remove(&id);
        }
        inner.zip.drop_space(space);
    }

    /// Take the dirty state of the chosen frames, write them outside the
    /// pool mutex, and restore the state of the ones that failed or
    /// were skipped for an mtr still changing them.
    fn flush_frames(&self, ids: Vec<PageID>) -> Result<usize, SmallError> {
        let mut batch = Vec::with_capacity(ids.len());
        {
            let mut inner = self.inner.ml();
            for id in ids {
                if let Some(meta) = inner.frames.get_mut(&id) {
                    if meta.dirty {
                        meta.dirty = false;
                        batch.push((meta.frame.clone(), meta.oldest_lsn, meta.newest_lsn));
                        meta.oldest_lsn = 0;
                    }
                }
            }
        }

        let mut written = 0;
        let mut result = Ok(());
        for (frame, oldest, newest) in batch {
            if result.is_ok() {
                match self.write_frame(&frame, newest) {
                    Ok(true) => {
                        written += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => result = Err(e),
                }
            }
            Self::redirty(&mut self.inner.ml(), frame.id(), oldest);
        }
        self.inner.ml().flushes += written as u64;
        result.map(|_| written)
    }

    /// Write the page if it is dirty. Returns whether a write happened.
    pub fn flush_page(&self, id: &PageID) -> Result<bool, SmallError> {
        Ok(self.flush_frames(vec![*id])? == 1)
    }

    /// Write up to `limit` dirty pages, starting from the old end of the
    /// LRU list.
    pub fn flush_lru(&self, limit: usize) -> Result<usize, SmallError> {
        let ids: Vec<PageID> = {
            let inner = self.inner.ml();
            inner
                .lru
                .ids_from_tail()
                .into_iter()
                .filter(|id| inner.frames.get(id).map(|m| m.dirty).unwrap_or(false))
                .take(limit)
                .collect()
        };
        self.flush_frames(ids)
    }

    /// Write up to `limit` dirty pages in order of their oldest
    /// modification.
    pub fn flush_list(&self, limit: usize) -> Result<usize, SmallError> {
        let ids: Vec<PageID> = {
            let inner = self.inner.ml();
            let mut dirty: Vec<(Lsn, PageID)> = inner
                .frames
                .iter()
                .filter(|(_, m)| m.dirty)
                .map(|(id, m)| (m.oldest_lsn, *id))
                .collect();
            dirty.sort();
            dirty.into_iter().take(limit).map(|(_, id)| id).collect()
        };
        self.flush_frames(ids)
    }

    pub fn flush_all(&self) -> Result<usize, SmallError> {
        self.flush_list(usize::MAX)
    }

    /// Write back the dirty pages, then drop every unpinned frame.
    pub fn invalidate(&self) -> SmallResult {
        self.flush_all()?;
        let mut inner = self.inner.ml();
        let ids: Vec<PageID> = inner
            .frames
            .iter()
            .filter(|(_, m)| m.pin == 0 && !m.dirty)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            inner.frames.remove(&id);
            inner.lru.remove(&id);
        }
        Ok(())
    }

    /// Oldest modification LSN among dirty pages.
    pub fn min_oldest_lsn(&self) -> Option<Lsn> {
        self.inner
            .ml()
            .frames
            .values()
            .filter(|m| m.dirty)
            .map(|m| m.oldest_lsn)
            .min()
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.ml();
        Stats {
            capacity: self.capacity,
            size: inner.frames.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            dirty: inner.frames.values().filter(|m| m.dirty).count(),
            flushes: inner.flushes,
            zip_hits: inner.zip_hits,
        }
    }
}
