mod test_utils;

use std::{
    sync::{Arc, Mutex},
    thread,
};

use small_innodb::{
    buffer::{BufferPool, BufferPools, BuddyAllocator, FlushObserver, Lru, ReadAhead},
    config::{BufferPoolConfig, ReadAheadConfig},
    page::set_page_lsn,
    tablespace::Fil,
    types::{Lsn, PageID, SmallResult},
    ErrorKind,
};
use tempfile::TempDir;

use crate::test_utils::{setup, TEST_SPACE};

const PAGE_SIZE: usize = 4096;

fn new_fil() -> (TempDir, Arc<Fil>) {
    let dir = tempfile::tempdir().unwrap();
    let fil = Arc::new(Fil::new(dir.path(), PAGE_SIZE));
    fil.space_create("test", TEST_SPACE).unwrap();
    for _ in 0..8 {
        fil.alloc_page(TEST_SPACE).unwrap();
    }
    (dir, fil)
}

fn page(no: u32) -> PageID {
    PageID::new(TEST_SPACE, no)
}

#[derive(Default)]
struct RecordingObserver {
    writes: Mutex<Vec<(PageID, Lsn)>>,
}

impl FlushObserver for RecordingObserver {
    fn before_page_write(&self, page_id: PageID, newest_lsn: Lsn) -> SmallResult {
        self.writes.lock().unwrap().push((page_id, newest_lsn));
        Ok(())
    }
}

#[test]
fn test_evict_unpinned() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = BufferPool::new(0, 1, PAGE_SIZE, 37, fil);

    let (a, cached) = pool.fetch(page(1)).unwrap();
    assert!(!cached);
    pool.release(&a);
    let (b, _) = pool.fetch(page(2)).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.size, 1);
    assert!(pool.contains(&page(2)));
    assert!(!pool.contains(&page(1)));
    pool.release(&b);
}

#[test]
fn test_all_pinned() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = BufferPool::new(0, 2, PAGE_SIZE, 37, fil);
    let (_a, _) = pool.fetch(page(1)).unwrap();
    let (_b, _) = pool.fetch(page(2)).unwrap();

    let err = pool.fetch(page(3)).unwrap_err();
    assert!(err.is(ErrorKind::NoFreeFrame));
    assert_eq!(pool.stats().evictions, 0);
}

#[test]
fn test_hit_pins_again() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = BufferPool::new(0, 4, PAGE_SIZE, 37, fil);
    let (a, _) = pool.fetch(page(1)).unwrap();
    let (a2, cached) = pool.fetch(page(1)).unwrap();
    assert!(cached);
    assert!(Arc::ptr_eq(&a, &a2));
    assert_eq!(pool.pin_count(&page(1)), Some(2));

    pool.release(&a);
    pool.release(&a2);
    assert_eq!(pool.pin_count(&page(1)), Some(0));
    assert_eq!(pool.stats().hits, 1);

    let err = {
        let (p, _) = pool.fetch(page(1)).unwrap();
        let err = pool.drop_page(&page(1)).unwrap_err();
        pool.release(&p);
        err
    };
    assert!(err.is(ErrorKind::InvalidState));
    pool.drop_page(&page(1)).unwrap();
    assert!(!pool.contains(&page(1)));
}

#[test]
fn test_dirty_page_written_on_flush() {
    setup();

    let (_dir, fil) = new_fil();
    let observer = Arc::new(RecordingObserver::default());
    let pool = BufferPool::new(0, 4, PAGE_SIZE, 37, fil.clone());
    pool.set_flush_observer(observer.clone());

    let (frame, _) = pool.fetch(page(3)).unwrap();
    frame.write()[100..104].copy_from_slice(b"data");
    pool.mark_dirty_range(&frame, 10, 20);
    pool.mark_dirty(&frame, 30);
    pool.release(&frame);

    assert!(pool.is_dirty(&page(3)));
    assert_eq!(pool.min_oldest_lsn(), Some(10));
    assert_eq!(pool.stats().dirty, 1);

    assert_eq!(pool.flush_all().unwrap(), 1);
    assert!(!pool.is_dirty(&page(3)));
    assert_eq!(pool.min_oldest_lsn(), None);
    assert_eq!(*observer.writes.lock().unwrap(), vec![(page(3), 30)]);

    let on_disk = fil.space_read_page(page(3)).unwrap();
    assert_eq!(&on_disk[100..104], b"data");

    // nothing left to write
    assert!(!pool.flush_page(&page(3)).unwrap());
}

#[test]
fn test_dirty_victim_written_back() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = BufferPool::new(0, 1, PAGE_SIZE, 37, fil.clone());

    let (frame, _) = pool.fetch(page(4)).unwrap();
    frame.write()[200] = 0xAB;
    pool.mark_dirty(&frame, 5);
    pool.release(&frame);

    let (other, _) = pool.fetch(page(5)).unwrap();
    pool.release(&other);
    assert_eq!(pool.stats().flushes, 1);
    assert_eq!(fil.space_read_page(page(4)).unwrap()[200], 0xAB);

    // served from the compressed copy of the evicted page
    let (again, cached) = pool.fetch(page(4)).unwrap();
    assert!(!cached);
    assert_eq!(again.read()[200], 0xAB);
    assert_eq!(pool.stats().zip_hits, 1);
    pool.release(&again);
}

/// Looks into the pool from inside the write hook, which only works
/// when the pool mutex is not held across page I/O.
#[derive(Default)]
struct ReentrantObserver {
    pool: Mutex<Option<Arc<BufferPool>>>,
    seen: Mutex<Vec<(PageID, Lsn, bool)>>,
}

impl FlushObserver for ReentrantObserver {
    fn before_page_write(&self, page_id: PageID, newest_lsn: Lsn) -> SmallResult {
        let pool = self.pool.lock().unwrap().clone();
        if let Some(pool) = pool {
            let cached = pool.contains(&page_id);
            self.seen.lock().unwrap().push((page_id, newest_lsn, cached));
        }
        Ok(())
    }
}

#[test]
fn test_dirty_victim_written_without_pool_mutex() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = Arc::new(BufferPool::new(0, 1, PAGE_SIZE, 37, fil.clone()));
    let observer = Arc::new(ReentrantObserver::default());
    *observer.pool.lock().unwrap() = Some(pool.clone());
    pool.set_flush_observer(observer.clone());

    let (frame, _) = pool.fetch(page(4)).unwrap();
    {
        let mut image = frame.write();
        image[300] = 0x5A;
        set_page_lsn(&mut image, 50);
    }
    pool.mark_dirty(&frame, 20);
    pool.release(&frame);

    let (other, _) = pool.fetch(page(5)).unwrap();
    pool.release(&other);

    // the log is flushed up to the image's own page lsn
    assert_eq!(*observer.seen.lock().unwrap(), vec![(page(4), 50, true)]);
    assert_eq!(fil.space_read_page(page(4)).unwrap()[300], 0x5A);
    assert!(!pool.contains(&page(4)));
    assert_eq!(pool.stats().flushes, 1);
    *observer.pool.lock().unwrap() = None;
}

#[test]
fn test_frame_under_modification_not_written() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = BufferPool::new(0, 1, PAGE_SIZE, 37, fil.clone());

    let (frame, _) = pool.fetch(page(6)).unwrap();
    frame.write()[400] = 0x11;
    pool.mark_dirty(&frame, 5);
    frame.begin_modify();
    frame.write()[400] = 0x22;

    assert_eq!(pool.flush_all().unwrap(), 0);
    assert!(pool.is_dirty(&page(6)));
    assert_eq!(pool.min_oldest_lsn(), Some(5));
    assert_eq!(fil.space_read_page(page(6)).unwrap()[400], 0);

    // unpinned but still being changed: not a victim either
    pool.release(&frame);
    assert!(pool.fetch(page(7)).unwrap_err().is(ErrorKind::NoFreeFrame));

    frame.end_modify();
    assert_eq!(pool.flush_all().unwrap(), 1);
    assert!(!pool.is_dirty(&page(6)));
    assert_eq!(fil.space_read_page(page(6)).unwrap()[400], 0x22);
}

#[test]
fn test_flush_list_order() {
    setup();

    let (_dir, fil) = new_fil();
    let observer = Arc::new(RecordingObserver::default());
    let pool = BufferPool::new(0, 8, PAGE_SIZE, 37, fil);
    pool.set_flush_observer(observer.clone());

    for (no, lsn) in &[(1, 30), (2, 10), (3, 20)] {
        let (frame, _) = pool.fetch(page(*no)).unwrap();
        pool.mark_dirty(&frame, *lsn);
        pool.release(&frame);
    }
    assert_eq!(pool.flush_list(2).unwrap(), 2);
    let written: Vec<PageID> = observer.writes.lock().unwrap().iter().map(|w| w.0).collect();
    assert_eq!(written, vec![page(2), page(3)]);
    assert_eq!(pool.min_oldest_lsn(), Some(30));
}

#[test]
fn test_lru_old_sublist() {
    setup();

    let mut lru = Lru::new(37);
    for i in 0..10 {
        lru.add(page(i));
    }
    assert_eq!(lru.len(), 10);
    assert_eq!(lru.old_len(), 3);
    for i in 0..3 {
        assert!(lru.is_old(&page(i)));
    }
    assert!(!lru.is_old(&page(3)));
    assert_eq!(lru.victim(|_| false), Some(page(0)));

    lru.touch(&page(0));
    assert!(!lru.is_old(&page(0)));
    assert_eq!(lru.ids()[0], page(0));
    assert_eq!(lru.victim(|id| *id == page(1)), Some(page(2)));

    assert!(lru.remove(&page(5)));
    assert!(!lru.remove(&page(5)));
    assert_eq!(lru.ids_from_tail().len(), 9);
}

#[test]
fn test_read_ahead_sequential() {
    setup();

    let ra = ReadAhead::new(&ReadAheadConfig {
        enabled: true,
        area: 8,
        threshold: 3,
    });
    assert_eq!(ra.on_access(1, 10), None);
    assert_eq!(ra.on_access(1, 11), None);
    assert_eq!(ra.on_access(1, 12), Some(13..21));
    // a jump restarts the run
    assert_eq!(ra.on_access(1, 40), None);
    assert_eq!(ra.on_access(1, 41), None);
}

#[test]
fn test_read_ahead_random_in_area() {
    setup();

    let ra = ReadAhead::new(&ReadAheadConfig {
        enabled: true,
        area: 8,
        threshold: 3,
    });
    assert_eq!(ra.on_access(1, 17), None);
    assert_eq!(ra.on_access(1, 20), None);
    assert_eq!(ra.on_access(1, 18), Some(16..24));
}

#[test]
fn test_pools_prefetch_on_sequential_access() {
    setup();

    let (_dir, fil) = new_fil();
    let pools = BufferPools::new(
        &BufferPoolConfig {
            size: 16,
            page_size: PAGE_SIZE,
            instances: 2,
            old_ratio: 37,
        },
        &ReadAheadConfig {
            enabled: true,
            area: 4,
            threshold: 2,
        },
        fil,
    );
    assert_eq!(pools.n_instances(), 2);

    for no in 1..3 {
        let (frame, _) = pools.fetch(page(no)).unwrap();
        pools.release(&frame);
    }
    for no in 3..7 {
        assert!(pools.pool_for(&page(no)).contains(&page(no)), "page {}", no);
    }
    let (frame, cached) = pools.fetch(page(4)).unwrap();
    assert!(cached);
    pools.release(&frame);
}

#[test]
fn test_concurrent_fetch() {
    setup();

    let (_dir, fil) = new_fil();
    let pool = Arc::new(BufferPool::new(0, 4, PAGE_SIZE, 37, fil));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let no = 1 + ((t + i) % 6) as u32;
                    loop {
                        match pool.fetch(page(no)) {
                            Ok((frame, _)) => {
                                assert_eq!(frame.id(), page(no));
                                pool.release(&frame);
                                break;
                            }
                            Err(e) => {
                                assert!(e.is(ErrorKind::NoFreeFrame), "{}", e);
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let stats = pool.stats();
    assert!(stats.size <= 4);
    assert_eq!(stats.hits + stats.misses, 8 * 200);
}

#[test]
fn test_buddy_allocator() {
    setup();

    let mut buddy = BuddyAllocator::new(64, 1024);
    assert_eq!(buddy.total(), 1024);
    let a = buddy.alloc(100).unwrap();
    assert_eq!(a.size, 128);
    let b = buddy.alloc(64).unwrap();
    let c = buddy.alloc(512).unwrap();
    assert_eq!(buddy.n_used(), 3);
    assert!(buddy.alloc(512).is_none());

    buddy.data_mut(&b)[0] = 9;
    assert_eq!(buddy.data(&b)[0], 9);

    buddy.free(a).unwrap();
    buddy.free(b).unwrap();
    buddy.free(c).unwrap();
    assert_eq!(buddy.free_bytes(), 1024);
    // everything coalesced back into one block
    assert_eq!(buddy.alloc(1024).unwrap().offset, 0);
    assert!(buddy.free(b).unwrap_err().is(ErrorKind::InvalidState));
}
