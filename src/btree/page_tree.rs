use std::{
    cmp::Ordering,
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
        Arc, RwLock,
    },
};

use log::{debug, warn};

use crate::{
    btree::page_cursor::PageCursor,
    buffer::BufferPools,
    error::{ErrorKind, SmallError},
    io::{read_u32, read_u64, write_u32, write_u64},
    mtr::{MlogType, Mtr},
    page::{
        fil_header::{FIL_PAGE_NEXT, FIL_PAGE_PREV},
        init_index_page, rebuild_index_page, reorganize, FilHeader, IndexPage, PageType,
        FIL_PAGE_DATA,
    },
    record::{
        bytes_compare, decode_leaf_record, decode_node_ptr, encode_leaf_record, encode_node_ptr,
        header::REC_N_EXTRA_BYTES, record_key, CompareFn,
    },
    tx_log::LogManager,
    types::{IndexID, PageID, PageNo, SmallResult, SpaceID, NULL_PAGE_NO},
    utils::HandyRwLock,
};

/// Offset of the root page number in the root pointer page.
pub const ROOT_PTR_ROOT: usize = FIL_PAGE_DATA;
/// Offset of the index id in the root pointer page.
pub const ROOT_PTR_INDEX_ID: usize = FIL_PAGE_DATA + 4;

/// A user slot of an index page, decoded.
#[derive(Debug, Clone)]
struct SlotRec {
    offset: u16,
    len: u16,
    deleted: bool,
    key: Vec<u8>,
    bytes: Vec<u8>,
}

fn page_slots(page: &[u8]) -> Result<Vec<SlotRec>, SmallError> {
    let p = IndexPage::new(page);
    let mut out = Vec::new();
    for r in p.records() {
        let bytes = page[r.offset as usize..(r.offset + r.len) as usize].to_vec();
        out.push(SlotRec {
            offset: r.offset,
            len: r.len,
            deleted: r.deleted,
            key: record_key(&bytes)?,
            bytes,
        });
    }
    Ok(out)
}

fn live_slots(page: &[u8]) -> Result<Vec<SlotRec>, SmallError> {
    Ok(page_slots(page)?.into_iter().filter(|s| !s.deleted).collect())
}

/// Decoded `(key, value)` pairs of the live records of a leaf page.
pub(crate) fn leaf_entries(page: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SmallError> {
    IndexPage::new(page)
        .user_records()
        .iter()
        .map(|rec| decode_leaf_record(rec))
        .collect()
}

struct PageInfo {
    level: u16,
    prev: PageNo,
    next: PageNo,
    n_live: usize,
}

fn page_info(page: &[u8]) -> Result<PageInfo, SmallError> {
    let p = IndexPage::new(page);
    if !p.is_index() {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!(
                "page {} is not an index page (type {:#x})",
                p.fil().page_no(),
                p.fil().raw_page_type()
            ),
        ));
    }
    Ok(PageInfo {
        level: p.level(),
        prev: p.prev(),
        next: p.next(),
        n_live: p.n_recs(),
    })
}

/// `(key, child)` node pointers of an internal page, in order.
fn node_ptrs(page: &[u8]) -> Result<Vec<(Vec<u8>, PageNo)>, SmallError> {
    IndexPage::new(page)
        .user_records()
        .iter()
        .map(|r| decode_node_ptr(r))
        .collect()
}

/// A B+ tree whose nodes are index pages of one tablespace.
///
/// The root page number is kept in a root pointer page, so it survives
/// root splits and collapses through the redo log like any other page
/// change. Writers serialize on the index latch; readers share it.
///
/// Every node pointer is a lower bound of the keys below it; the first
/// node pointer of the leftmost page on each level carries the empty
/// key.
pub struct PageTree {
    space: SpaceID,
    index_id: IndexID,
    root_ptr: PageNo,
    root: AtomicU32,
    size: AtomicUsize,
    // bumped by every insert and delete
    mod_count: AtomicU64,
    max_recs: usize,
    cmp: CompareFn,
    latch: RwLock<()>,

    pools: Arc<BufferPools>,
    log: Arc<LogManager>,
}

impl PageTree {
    /// Allocate the root pointer page and an empty root leaf.
    pub fn create(
        pools: Arc<BufferPools>,
        log: Arc<LogManager>,
        space: SpaceID,
        index_id: IndexID,
        max_recs: usize,
    ) -> Result<Self, SmallError> {
        let fil = pools.fil().clone();
        let root_ptr = fil.alloc_page(space)?;
        let root = fil.alloc_page(space)?;

        {
            let mut mtr = Mtr::start(&pools, &log);
            let ptr_frame = mtr.page_get(PageID::new(space, root_ptr))?;
            mtr.init_page(&ptr_frame, |p| {
                {
                    let mut fil = FilHeader::new(&mut *p);
                    fil.set_space_id(space);
                    fil.set_page_no(root_ptr);
                    fil.set_page_type(PageType::Sys);
                    fil.set_prev(NULL_PAGE_NO);
                    fil.set_next(NULL_PAGE_NO);
                }
                write_u32(p, ROOT_PTR_ROOT, root);
                write_u64(p, ROOT_PTR_INDEX_ID, index_id);
                Ok(())
            })?;
            let root_frame = mtr.page_get(PageID::new(space, root))?;
            mtr.init_page(&root_frame, |p| {
                init_index_page(p, space, root, 0)?;
                IndexPage::new(p).set_index_id(index_id);
                Ok(())
            })?;
            mtr.commit()?;
        }
        debug!(
            "created tree {} in space {}: root pointer {}, root {}",
            index_id, space, root_ptr, root
        );

        Ok(Self::new(pools, log, space, index_id, root_ptr, root, 0, max_recs))
    }

    /// Open a tree through its root pointer page.
    pub fn open(
        pools: Arc<BufferPools>,
        log: Arc<LogManager>,
        space: SpaceID,
        root_ptr: PageNo,
        max_recs: usize,
    ) -> Result<Self, SmallError> {
        let id = PageID::new(space, root_ptr);
        let (frame, _) = pools.fetch(id)?;
        let header = {
            let page = frame.read();
            let t = FilHeader::new(page.as_slice()).raw_page_type();
            if t == PageType::Sys as u16 {
                Ok((read_u32(&page, ROOT_PTR_ROOT), read_u64(&page, ROOT_PTR_INDEX_ID)))
            } else {
                Err(SmallError::new(
                    ErrorKind::CorruptPage,
                    &format!("{:?} is not a root pointer page (type {:#x})", id, t),
                ))
            }
        };
        pools.release(&frame);
        let (root, index_id) = header?;

        let tree = Self::new(pools, log, space, index_id, root_ptr, root, 0, max_recs);
        let mut n = 0;
        tree.for_each(|_, _| n += 1)?;
        tree.size.store(n, AtomicOrdering::SeqCst);
        Ok(tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        pools: Arc<BufferPools>,
        log: Arc<LogManager>,
        space: SpaceID,
        index_id: IndexID,
        root_ptr: PageNo,
        root: PageNo,
        size: usize,
        max_recs: usize,
    ) -> Self {
        Self {
            space,
            index_id,
            root_ptr,
            root: AtomicU32::new(root),
            size: AtomicUsize::new(size),
            mod_count: AtomicU64::new(0),
            max_recs: max_recs.max(2),
            cmp: bytes_compare,
            latch: RwLock::new(()),
            pools,
            log,
        }
    }

    pub fn space(&self) -> SpaceID {
        self.space
    }

    pub fn index_id(&self) -> IndexID {
        self.index_id
    }

    pub fn root_ptr(&self) -> PageNo {
        self.root_ptr
    }

    pub fn root(&self) -> PageNo {
        self.root.load(AtomicOrdering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::SeqCst)
    }

    pub fn mod_count(&self) -> u64 {
        self.mod_count.load(AtomicOrdering::SeqCst)
    }

    pub fn max_recs(&self) -> usize {
        self.max_recs
    }

    pub fn pools(&self) -> &Arc<BufferPools> {
        &self.pools
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }

    fn page_id(&self, page_no: PageNo) -> PageID {
        PageID::new(self.space, page_no)
    }

    /// Run `f` on the page under its shared latch.
    pub(crate) fn read_page<R, F>(&self, page_no: PageNo, f: F) -> Result<R, SmallError>
    where
        F: FnOnce(&[u8]) -> Result<R, SmallError>,
    {
        let (frame, _) = self.pools.fetch(self.page_id(page_no))?;
        let result = {
            let page = frame.read();
            f(&page)
        };
        self.pools.release(&frame);
        result
    }

    /// Child of an internal page that covers the key: the last node
    /// pointer with a key `<= key`, else the first one.
    fn find_child(&self, page: &[u8], key: &[u8]) -> Result<PageNo, SmallError> {
        let mut child = None;
        for rec in IndexPage::new(page).user_records() {
            let (k, c) = decode_node_ptr(&rec)?;
            if child.is_none() || self.compare(&k, key) != Ordering::Greater {
                child = Some(c);
            } else {
                break;
            }
        }
        child.ok_or_else(|| {
            SmallError::new(
                ErrorKind::CorruptPage,
                &format!(
                    "internal page {} has no node pointers",
                    FilHeader::new(page).page_no()
                ),
            )
        })
    }

    /// Leaf page for the key, with the internal pages above it from the
    /// root down.
    fn descend(&self, key: &[u8]) -> Result<(PageNo, Vec<PageNo>), SmallError> {
        let mut path = Vec::new();
        let mut page_no = self.root();
        loop {
            let next = self.read_page(page_no, |page| {
                let info = page_info(page)?;
                if info.level == 0 {
                    Ok(None)
                } else {
                    self.find_child(page, key).map(Some)
                }
            })?;
            match next {
                None => return Ok((page_no, path)),
                Some(child) => {
                    path.push(page_no);
                    page_no = child;
                }
            }
        }
    }

    pub fn height(&self) -> Result<usize, SmallError> {
        let _latch = self.latch.rl();
        self.read_page(self.root(), |page| Ok(page_info(page)?.level as usize + 1))
    }

    fn edge_leaf(&self, rightmost: bool) -> Result<PageNo, SmallError> {
        let mut page_no = self.root();
        loop {
            let child = self.read_page(page_no, |page| {
                if page_info(page)?.level == 0 {
                    return Ok(None);
                }
                let recs = IndexPage::new(page).user_records();
                let rec = if rightmost { recs.last() } else { recs.first() };
                match rec {
                    Some(r) => Ok(Some(decode_node_ptr(r)?.1)),
                    None => Err(SmallError::new(
                        ErrorKind::CorruptPage,
                        &format!("internal page {} has no node pointers", page_no),
                    )),
                }
            })?;
            match child {
                Some(c) => page_no = c,
                None => return Ok(page_no),
            }
        }
    }

    /// Node pointers of an internal page; empty for a leaf.
    pub fn node_pointers(&self, page_no: PageNo) -> Result<Vec<(Vec<u8>, PageNo)>, SmallError> {
        let _latch = self.latch.rl();
        self.read_page(page_no, |page| {
            if page_info(page)?.level == 0 {
                return Ok(Vec::new());
            }
            node_ptrs(page)
        })
    }

    pub fn leftmost_leaf(&self) -> Result<PageNo, SmallError> {
        let _latch = self.latch.rl();
        self.edge_leaf(false)
    }

    pub fn rightmost_leaf(&self) -> Result<PageNo, SmallError> {
        let _latch = self.latch.rl();
        self.edge_leaf(true)
    }

    // ---------------------------------------------------------------
    // reads
    // ---------------------------------------------------------------

    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        Ok(self.search_leaf(key)?.1)
    }

    /// Like `search`, also returning the leaf the key belongs to.
    pub fn search_leaf(&self, key: &[u8]) -> Result<(PageNo, Option<Vec<u8>>), SmallError> {
        let _latch = self.latch.rl();
        let (leaf, _) = self.descend(key)?;
        let value = self.find_on_page(leaf, key)?;
        Ok((leaf, value))
    }

    /// Look the key up on one leaf only, without descending.
    pub fn search_on_page(&self, page_no: PageNo, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        let _latch = self.latch.rl();
        self.find_on_page(page_no, key)
    }

    fn find_on_page(&self, page_no: PageNo, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        self.read_page(page_no, |page| {
            if page_info(page)?.level != 0 {
                return Ok(None);
            }
            for (k, v) in leaf_entries(page)? {
                match self.compare(&k, key) {
                    Ordering::Equal => return Ok(Some(v)),
                    Ordering::Greater => break,
                    Ordering::Less => {}
                }
            }
            Ok(None)
        })
    }

    /// Visit every record in key order.
    pub fn for_each<F: FnMut(&[u8], &[u8])>(&self, mut f: F) -> SmallResult {
        let _latch = self.latch.rl();
        let mut page_no = self.edge_leaf(false)?;
        while page_no != NULL_PAGE_NO {
            let (entries, next) = self.read_page(page_no, |page| {
                Ok((leaf_entries(page)?, page_info(page)?.next))
            })?;
            for (k, v) in &entries {
                f(k, v);
            }
            page_no = next;
        }
        Ok(())
    }

    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SmallError> {
        let mut out = Vec::with_capacity(self.size());
        self.for_each(|k, v| out.push((k.to_vec(), v.to_vec())))?;
        Ok(out)
    }

    pub fn first(&self) -> Result<PageCursor<'_>, SmallError> {
        let leaf = self.leftmost_leaf()?;
        PageCursor::open(self, leaf, 0)
    }

    pub fn last(&self) -> Result<PageCursor<'_>, SmallError> {
        let leaf = self.rightmost_leaf()?;
        PageCursor::open_at_end(self, leaf)
    }

    /// Cursor on the first key `>= key`.
    pub fn seek(&self, key: &[u8]) -> Result<PageCursor<'_>, SmallError> {
        let leaf = {
            let _latch = self.latch.rl();
            self.descend(key)?.0
        };
        let mut cur = PageCursor::open(self, leaf, 0)?;
        while cur.is_valid() && self.compare(cur.key(), key) == Ordering::Less {
            cur.next()?;
        }
        Ok(cur)
    }

    /// Cursor on the last key `<= key`.
    pub fn seek_le(&self, key: &[u8]) -> Result<PageCursor<'_>, SmallError> {
        let mut cur = self.seek(key)?;
        if !cur.is_valid() {
            return self.last();
        }
        if self.compare(cur.key(), key) == Ordering::Greater {
            cur.prev()?;
        }
        Ok(cur)
    }

    // ---------------------------------------------------------------
    // insert
    // ---------------------------------------------------------------

    /// Insert or replace. Returns whether an existing value was
    /// replaced.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool, SmallError> {
        let _latch = self.latch.wl();
        let rec = encode_leaf_record(key, value)?;
        let root = self.root();
        let mut mtr = Mtr::start(&self.pools, &self.log);
        let result = self
            .insert_low(&mut mtr, key, &rec)
            .and_then(|replaced| mtr.commit().map(|_| replaced));
        let replaced = self.keep_root_on_commit(root, result)?;
        self.mod_count.fetch_add(1, AtomicOrdering::SeqCst);
        if !replaced {
            self.size.fetch_add(1, AtomicOrdering::SeqCst);
        }
        Ok(replaced)
    }

    /// A failed mtr is rolled back on drop; the cached root number goes
    /// back with it.
    fn keep_root_on_commit<T>(&self, root: PageNo, result: Result<T, SmallError>) -> Result<T, SmallError> {
        if result.is_err() && self.root() != root {
            debug!("tree {}: root back to {} after a failed change", self.index_id, root);
            self.root.store(root, AtomicOrdering::SeqCst);
        }
        result
    }

    fn insert_low(&self, mtr: &mut Mtr, key: &[u8], rec: &[u8]) -> Result<bool, SmallError> {
        let (leaf, path) = self.descend(key)?;
        let frame = mtr.page_get(self.page_id(leaf))?;
        let existing = {
            let page = frame.read();
            live_slots(&page)?
                .into_iter()
                .find(|s| self.compare(&s.key, key) == Ordering::Equal)
        };

        let replaced = match existing {
            Some(old) if old.len as usize == rec.len() => {
                mtr.mlog_write_rec_update_in_place(
                    &frame,
                    old.offset + REC_N_EXTRA_BYTES as u16,
                    &rec[REC_N_EXTRA_BYTES..],
                )?;
                true
            }
            Some(old) => {
                mtr.mlog_write_rec_delete(&frame, old.offset, old.len)?;
                self.insert_rec(mtr, leaf, path, key, rec)?;
                true
            }
            None => {
                self.insert_rec(mtr, leaf, path, key, rec)?;
                false
            }
        };
        Ok(replaced)
    }

    /// Slot position for the key among all user slots of the page.
    fn insert_pos(&self, page: &[u8], key: &[u8]) -> Result<(usize, usize), SmallError> {
        let slots = page_slots(page)?;
        let pos = slots.partition_point(|s| self.compare(&s.key, key) == Ordering::Less);
        let n_live = slots.iter().filter(|s| !s.deleted).count();
        Ok((pos, n_live))
    }

    /// Insert the record into the page, reorganizing or splitting it as
    /// needed. `path` holds the ancestors of the page.
    fn insert_rec(
        &self,
        mtr: &mut Mtr,
        page_no: PageNo,
        path: Vec<PageNo>,
        key: &[u8],
        rec: &[u8],
    ) -> SmallResult {
        let frame = mtr.page_get(self.page_id(page_no))?;
        let (pos, n_live, garbage) = {
            let page = frame.read();
            let (pos, n_live) = self.insert_pos(&page, key)?;
            (pos, n_live, IndexPage::new(page.as_slice()).garbage())
        };

        if n_live < self.max_recs {
            match mtr.mlog_write_rec_insert(&frame, pos, rec) {
                Ok(_) => return Ok(()),
                Err(e) if e.is(ErrorKind::NoSpace) => {}
                Err(e) => return Err(e),
            }
            if garbage > 0 {
                mtr.modify_page(&frame, |p| {
                    reorganize(p);
                    Ok(())
                })?;
                let pos = {
                    let page = frame.read();
                    self.insert_pos(&page, key)?.0
                };
                match mtr.mlog_write_rec_insert(&frame, pos, rec) {
                    Ok(_) => return Ok(()),
                    Err(e) if e.is(ErrorKind::NoSpace) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        self.split_and_insert(mtr, page_no, path, key, rec)
    }

    /// Split the page in two around the middle record, inserting the
    /// pending record on the way, then publish the new page in the
    /// parent.
    fn split_and_insert(
        &self,
        mtr: &mut Mtr,
        page_no: PageNo,
        mut path: Vec<PageNo>,
        key: &[u8],
        rec: &[u8],
    ) -> SmallResult {
        let frame = mtr.page_get(self.page_id(page_no))?;
        let (info, mut records) = {
            let page = frame.read();
            let info = page_info(&page)?;
            let records: Vec<(Vec<u8>, Vec<u8>)> = live_slots(&page)?
                .into_iter()
                .map(|s| (s.key, s.bytes))
                .collect();
            (info, records)
        };
        let at = records.partition_point(|(k, _)| self.compare(k, key) == Ordering::Less);
        records.insert(at, (key.to_vec(), rec.to_vec()));
        if records.len() < 2 {
            return Err(SmallError::new(
                ErrorKind::NoSpace,
                &format!("record of {} bytes does not fit in an empty page", rec.len()),
            ));
        }

        let mid = records.len() / 2;
        let right = records.split_off(mid);
        let left = records;
        let sep = right[0].0.clone();
        let left_recs: Vec<Vec<u8>> = left.iter().map(|(_, r)| r.clone()).collect();
        let right_recs: Vec<Vec<u8>> = right.iter().map(|(_, r)| r.clone()).collect();

        // pin every page of this level before changing any of them
        let new_no = mtr.alloc_page(self.space)?;
        let new_frame = mtr.page_get(self.page_id(new_no))?;
        let next_frame = match info.next {
            NULL_PAGE_NO => None,
            next => Some(mtr.page_get(self.page_id(next))?),
        };
        let (space, index_id, level) = (self.space, self.index_id, info.level);

        mtr.init_page(&new_frame, |p| {
            rebuild_index_page(p, space, new_no, level, page_no, info.next, index_id, &right_recs)
        })?;
        mtr.modify_page(&frame, |p| {
            rebuild_index_page(p, space, page_no, level, info.prev, new_no, index_id, &left_recs)
        })?;
        if let Some(next_frame) = next_frame {
            mtr.mlog_write_ulint(&next_frame, FIL_PAGE_PREV, new_no as u64, MlogType::Byte4)?;
        }
        debug!(
            "tree {}: split page {} at level {}, {} + {} records, new page {}",
            self.index_id,
            page_no,
            level,
            left_recs.len(),
            right_recs.len(),
            new_no
        );

        let ptr = encode_node_ptr(&sep, new_no)?;
        match path.pop() {
            Some(parent) => self.insert_rec(mtr, parent, path, &sep, &ptr),
            None => self.grow_root(mtr, page_no, new_no, level, &ptr),
        }
    }

    /// Put a new root above the two halves of the old one.
    fn grow_root(
        &self,
        mtr: &mut Mtr,
        left: PageNo,
        right: PageNo,
        level: u16,
        right_ptr: &[u8],
    ) -> SmallResult {
        let new_root = mtr.alloc_page(self.space)?;
        let records = vec![encode_node_ptr(&[], left)?, right_ptr.to_vec()];
        let (space, index_id) = (self.space, self.index_id);
        let root_frame = mtr.page_get(self.page_id(new_root))?;
        mtr.page_get(self.page_id(self.root_ptr))?;
        mtr.init_page(&root_frame, |p| {
            rebuild_index_page(
                p,
                space,
                new_root,
                level + 1,
                NULL_PAGE_NO,
                NULL_PAGE_NO,
                index_id,
                &records,
            )
        })?;
        debug!(
            "tree {}: root split, new root {} at level {}",
            self.index_id,
            new_root,
            level + 1
        );
        debug_assert_ne!(left, right);
        self.set_root(mtr, new_root)
    }

    fn set_root(&self, mtr: &mut Mtr, root: PageNo) -> SmallResult {
        let ptr_frame = mtr.page_get(self.page_id(self.root_ptr))?;
        mtr.mlog_write_ulint(&ptr_frame, ROOT_PTR_ROOT, root as u64, MlogType::Byte4)?;
        self.root.store(root, AtomicOrdering::SeqCst);
        Ok(())
    }

    // ---------------------------------------------------------------
    // delete
    // ---------------------------------------------------------------

    /// Remove the key, returning its value. A leaf left empty is merged
    /// away into its left sibling and the root collapses when a single
    /// child remains.
    pub fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        self.delete_if(key, |_| true)
    }

    /// Remove the key only if `pred` accepts its current value. The
    /// check and the removal happen under the index latch.
    pub fn delete_if<P>(&self, key: &[u8], pred: P) -> Result<Option<Vec<u8>>, SmallError>
    where
        P: FnOnce(&[u8]) -> bool,
    {
        let _latch = self.latch.wl();
        let root = self.root();
        let mut freed = Vec::new();
        let mut mtr = Mtr::start(&self.pools, &self.log);
        let result = self
            .delete_low(&mut mtr, key, pred, &mut freed)
            .and_then(|value| mtr.commit().map(|_| value));
        let value = match self.keep_root_on_commit(root, result)? {
            Some(v) => v,
            None => return Ok(None),
        };
        self.mod_count.fetch_add(1, AtomicOrdering::SeqCst);
        self.size.fetch_sub(1, AtomicOrdering::SeqCst);
        self.free_pages(&freed);
        Ok(Some(value))
    }

    fn delete_low<P>(
        &self,
        mtr: &mut Mtr,
        key: &[u8],
        pred: P,
        freed: &mut Vec<PageNo>,
    ) -> Result<Option<Vec<u8>>, SmallError>
    where
        P: FnOnce(&[u8]) -> bool,
    {
        let (leaf, path) = self.descend(key)?;
        let frame = mtr.page_get(self.page_id(leaf))?;
        let (found, was_first) = {
            let page = frame.read();
            let slots = live_slots(&page)?;
            let pos = slots
                .iter()
                .position(|s| self.compare(&s.key, key) == Ordering::Equal);
            (pos.map(|i| slots[i].clone()), pos == Some(0))
        };
        let slot = match found {
            Some(s) => s,
            None => return Ok(None),
        };
        let (_, value) = decode_leaf_record(&slot.bytes)?;
        if !pred(&value) {
            return Ok(None);
        }
        mtr.mlog_write_rec_delete(&frame, slot.offset, slot.len)?;

        let new_first = {
            let page = frame.read();
            live_slots(&page)?.into_iter().next().map(|s| s.key)
        };
        match new_first {
            None if leaf != self.root() => self.remove_page(mtr, leaf, path, freed)?,
            Some(first) if was_first => self.raise_separator(mtr, leaf, path, &slot.key, &first)?,
            _ => {}
        }
        Ok(Some(value))
    }

    /// The smallest key of `child` went away: node pointers that carried
    /// it move up to the new smallest key. A pointer that is the first of
    /// its page bounds the parent too, so the change walks up while that
    /// holds. The empty key of a leftmost page is left alone.
    fn raise_separator(
        &self,
        mtr: &mut Mtr,
        mut child: PageNo,
        mut path: Vec<PageNo>,
        old_key: &[u8],
        new_key: &[u8],
    ) -> SmallResult {
        while let Some(parent) = path.pop() {
            let frame = mtr.page_get(self.page_id(parent))?;
            let (info, mut ptrs) = {
                let page = frame.read();
                (page_info(&page)?, node_ptrs(&page)?)
            };
            let idx = ptrs.iter().position(|(_, c)| *c == child).ok_or_else(|| {
                SmallError::new(
                    ErrorKind::CorruptPage,
                    &format!("page {} has no node pointer to {}", parent, child),
                )
            })?;
            if self.compare(&ptrs[idx].0, old_key) != Ordering::Equal {
                return Ok(());
            }
            ptrs[idx].0 = new_key.to_vec();
            let records = ptrs
                .iter()
                .map(|(k, c)| encode_node_ptr(k, *c))
                .collect::<Result<Vec<_>, _>>()?;
            let (space, index_id) = (self.space, self.index_id);
            mtr.modify_page(&frame, |p| {
                rebuild_index_page(p, space, parent, info.level, info.prev, info.next, index_id, &records)
            })?;
            debug!(
                "tree {}: separator of page {} in page {} raised",
                self.index_id, child, parent
            );
            if idx != 0 {
                return Ok(());
            }
            child = parent;
        }
        Ok(())
    }

    /// Unlink an empty page from its level and drop its node pointer.
    fn remove_page(
        &self,
        mtr: &mut Mtr,
        page_no: PageNo,
        mut path: Vec<PageNo>,
        freed: &mut Vec<PageNo>,
    ) -> SmallResult {
        let frame = mtr.page_get(self.page_id(page_no))?;
        let info = page_info(&frame.read())?;
        if info.prev != NULL_PAGE_NO {
            let f = mtr.page_get(self.page_id(info.prev))?;
            mtr.mlog_write_ulint(&f, FIL_PAGE_NEXT, info.next as u64, MlogType::Byte4)?;
        }
        if info.next != NULL_PAGE_NO {
            let f = mtr.page_get(self.page_id(info.next))?;
            mtr.mlog_write_ulint(&f, FIL_PAGE_PREV, info.prev as u64, MlogType::Byte4)?;
        }
        freed.push(page_no);
        debug!(
            "tree {}: merged empty page {} at level {} away",
            self.index_id, page_no, info.level
        );

        let parent = match path.pop() {
            Some(p) => p,
            None => {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("page {} has no parent", page_no),
                ))
            }
        };
        let remaining = self.remove_child_ptr(mtr, parent, page_no)?;
        if parent == self.root() {
            self.collapse_root(mtr, freed)
        } else if remaining == 0 {
            self.remove_page(mtr, parent, path, freed)
        } else {
            Ok(())
        }
    }

    /// Drop the node pointer to `child`. When it was the first pointer
    /// of the page the next one takes over its key, so the first key
    /// still bounds the page from below. Returns the pointers left.
    fn remove_child_ptr(&self, mtr: &mut Mtr, parent: PageNo, child: PageNo) -> Result<usize, SmallError> {
        let frame = mtr.page_get(self.page_id(parent))?;
        let (info, ptrs) = {
            let page = frame.read();
            (page_info(&page)?, node_ptrs(&page)?)
        };
        let idx = ptrs.iter().position(|(_, c)| *c == child).ok_or_else(|| {
            SmallError::new(
                ErrorKind::CorruptPage,
                &format!("page {} has no node pointer to {}", parent, child),
            )
        })?;

        let mut kept: Vec<(Vec<u8>, PageNo)> = ptrs.clone();
        let (removed_key, _) = kept.remove(idx);
        if idx == 0 && !kept.is_empty() {
            kept[0].0 = removed_key;
        }
        let records = kept
            .iter()
            .map(|(k, c)| encode_node_ptr(k, *c))
            .collect::<Result<Vec<_>, _>>()?;
        let (space, index_id) = (self.space, self.index_id);
        mtr.modify_page(&frame, |p| {
            let index_id_on_page = IndexPage::new(&*p).index_id();
            debug_assert_eq!(index_id_on_page, index_id);
            rebuild_index_page(p, space, parent, info.level, info.prev, info.next, index_id, &records)
        })?;
        Ok(kept.len())
    }

    /// While the root is an internal page with a single child, make the
    /// child the root.
    fn collapse_root(&self, mtr: &mut Mtr, freed: &mut Vec<PageNo>) -> SmallResult {
        loop {
            let root = self.root();
            let frame = mtr.page_get(self.page_id(root))?;
            let child = {
                let page = frame.read();
                let info = page_info(&page)?;
                if info.level == 0 || info.n_live != 1 {
                    return Ok(());
                }
                let recs = IndexPage::new(page.as_slice()).user_records();
                decode_node_ptr(&recs[0])?.1
            };
            debug!("tree {}: root {} collapses into {}", self.index_id, root, child);
            self.set_root(mtr, child)?;
            freed.push(root);
        }
    }

    /// Give pages back to the space once nothing pins them.
    fn free_pages(&self, pages: &[PageNo]) {
        let fil = self.pools.fil();
        for page_no in pages {
            let id = self.page_id(*page_no);
            match self.pools.drop_page(&id) {
                Ok(()) => {
                    if let Err(e) = fil.free_page(self.space, *page_no) {
                        warn!("cannot free {:?}: {}", id, e);
                    }
                }
                Err(e) => warn!("page {:?} still in use, not freed: {}", id, e),
            }
        }
    }

    /// Free every page of the tree, root pointer included.
    pub fn destroy(&self) -> SmallResult {
        let _latch = self.latch.wl();
        let mut pages = Vec::new();
        let mut level = vec![self.root()];
        while !level.is_empty() {
            let mut below = Vec::new();
            for page_no in &level {
                self.read_page(*page_no, |page| {
                    if page_info(page)?.level > 0 {
                        below.extend(node_ptrs(page)?.into_iter().map(|(_, c)| c));
                    }
                    Ok(())
                })?;
            }
            pages.extend(level);
            level = below;
        }
        pages.push(self.root_ptr);
        self.pools.flush_all()?;
        self.free_pages(&pages);
        self.size.store(0, AtomicOrdering::SeqCst);
        Ok(())
    }

    // ---------------------------------------------------------------
    // checks
    // ---------------------------------------------------------------

    /// Check every page: index page type, level one below its parent,
    /// live keys strictly increasing and inside the bounds given by the
    /// parent, consistent sibling links on each level, and a record
    /// count matching `size`.
    pub fn validate(&self) -> SmallResult {
        let _latch = self.latch.rl();
        let root = self.root();
        let root_level = self.read_page(root, |page| Ok(page_info(page)?.level))?;

        let mut levels: Vec<Vec<PageNo>> = vec![Vec::new(); root_level as usize + 1];
        let mut count = 0;
        self.validate_page(root, root_level, None, None, &mut levels, &mut count)?;

        for (level, pages) in levels.iter().enumerate() {
            for (i, page_no) in pages.iter().enumerate() {
                let expect_prev = if i == 0 { NULL_PAGE_NO } else { pages[i - 1] };
                let expect_next = pages.get(i + 1).copied().unwrap_or(NULL_PAGE_NO);
                let (prev, next) = self.read_page(*page_no, |page| {
                    let info = page_info(page)?;
                    Ok((info.prev, info.next))
                })?;
                if prev != expect_prev || next != expect_next {
                    return Err(SmallError::new(
                        ErrorKind::CorruptPage,
                        &format!(
                            "level {} page {}: links ({}, {}), expected ({}, {})",
                            level, page_no, prev, next, expect_prev, expect_next
                        ),
                    ));
                }
            }
        }
        if count != self.size() {
            return Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("tree {}: size {} but {} records in leaves", self.index_id, self.size(), count),
            ));
        }
        Ok(())
    }

    fn validate_page(
        &self,
        page_no: PageNo,
        expect_level: u16,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        levels: &mut Vec<Vec<PageNo>>,
        count: &mut usize,
    ) -> SmallResult {
        let (info, slots) = self.read_page(page_no, |page| Ok((page_info(page)?, live_slots(page)?)))?;
        let fail = |msg: String| {
            Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("tree {} page {}: {}", self.index_id, page_no, msg),
            ))
        };
        if info.level != expect_level {
            return fail(format!("level {}, expected {}", info.level, expect_level));
        }
        if info.n_live != slots.len() {
            return fail(format!("header counts {} records, found {}", info.n_live, slots.len()));
        }
        for pair in slots.windows(2) {
            if self.compare(&pair[0].key, &pair[1].key) != Ordering::Less {
                return fail(format!("keys out of order: {:?} >= {:?}", pair[0].key, pair[1].key));
            }
        }
        if let (Some(lo), Some(first)) = (lower, slots.first()) {
            if self.compare(&first.key, lo) == Ordering::Less {
                return fail(format!("key {:?} below lower bound {:?}", first.key, lo));
            }
        }
        if let (Some(hi), Some(last)) = (upper, slots.last()) {
            if self.compare(&last.key, hi) != Ordering::Less {
                return fail(format!("key {:?} not below upper bound {:?}", last.key, hi));
            }
        }
        levels[info.level as usize].push(page_no);

        if info.level == 0 {
            *count += slots.len();
            return Ok(());
        }
        if slots.is_empty() {
            return fail("internal page without node pointers".to_string());
        }
        let ptrs = slots
            .iter()
            .map(|s| decode_node_ptr(&s.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, (key, child)) in ptrs.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(key.as_slice()) };
            let hi = match ptrs.get(i + 1) {
                Some((k, _)) => Some(k.as_slice()),
                None => upper,
            };
            self.validate_page(*child, info.level - 1, lo, hi, levels, count)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PageTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<PageTree index={} space={} root={} size={}>",
            self.index_id,
            self.space,
            self.root(),
            self.size()
        )
    }
}
