//! Mini-transactions: the unit in which page changes reach the redo log.
//!
//! An mtr pins the pages it works on (the memo), applies each change to
//! the page image and records it in a private log buffer. `commit`
//! publishes the whole buffer to the redo log in one reservation, so a
//! crash either replays every record of the mtr or none of them. An mtr
//! dropped without commit puts back the page images it started from and
//! frees the pages it allocated.

pub mod apply;
pub mod mlog;

use std::{mem, sync::Arc};

use log::{debug, warn};

pub use apply::apply_record;
pub use mlog::{parse_log, MlogRecord, MlogType};

use crate::{
    buffer::{BufferPools, Frame},
    error::{ErrorKind, SmallError},
    io::SmallWriter,
    page::set_page_lsn,
    tx_log::{LogManager, LogRecord, SINGLE_REC_FLAG},
    types::{Lsn, PageID, PageNo, SmallResult, SpaceID},
};

/// How much redo an mtr produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Every change is logged; the owning transaction flushes the log
    /// up to the commit LSN.
    All,
    /// No redo at all.
    None,
    /// Changes are logged but need not be flushed at transaction commit.
    ShortInserts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtrState {
    Active,
    Committed,
}

struct MemoSlot {
    frame: Arc<Frame>,
    /// The slot owns one pin of the frame.
    pinned: bool,
    modified: bool,
    released: bool,
    /// Page image before the first change of this mtr.
    before: Option<Vec<u8>>,
}

pub struct Mtr<'a> {
    pools: &'a BufferPools,
    log: &'a LogManager,

    log_buf: SmallWriter,
    n_log_recs: usize,
    memo: Vec<MemoSlot>,
    /// Pages allocated by this mtr, freed again if it never commits.
    allocated: Vec<PageID>,
    log_mode: LogMode,
    state: MtrState,

    start_lsn: Lsn,
    end_lsn: Lsn,
}

impl<'a> Mtr<'a> {
    pub fn start(pools: &'a BufferPools, log: &'a LogManager) -> Self {
        Self {
            pools,
            log,
            log_buf: SmallWriter::new_reserved(256),
            n_log_recs: 0,
            memo: Vec::new(),
            allocated: Vec::new(),
            log_mode: LogMode::All,
            state: MtrState::Active,
            start_lsn: 0,
            end_lsn: 0,
        }
    }

    pub fn state(&self) -> MtrState {
        self.state
    }

    pub fn log_mode(&self) -> LogMode {
        self.log_mode
    }

    /// Switch the log mode, returning the previous one. An mtr that
    /// produces no redo cannot be switched to `ShortInserts`.
    pub fn set_log_mode(&mut self, mode: LogMode) -> LogMode {
        let old = self.log_mode;
        if old == LogMode::None && mode == LogMode::ShortInserts {
            debug!("mtr keeps log mode None");
            return old;
        }
        self.log_mode = mode;
        old
    }

    /// Whether the transaction owning this mtr must flush the log at
    /// commit.
    pub fn needs_flush(&self) -> bool {
        self.log_mode == LogMode::All && self.n_log_recs > 0
    }

    pub fn n_log_recs(&self) -> usize {
        self.n_log_recs
    }

    /// The private log buffer in the compact mtr format.
    pub fn log_bytes(&self) -> &[u8] {
        self.log_buf.as_slice()
    }

    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    pub fn end_lsn(&self) -> Lsn {
        self.end_lsn
    }

    pub fn parse_log(bytes: &[u8]) -> Result<Vec<MlogRecord>, SmallError> {
        parse_log(bytes)
    }

    // ---------------------------------------------------------------
    // memo
    // ---------------------------------------------------------------

    /// Fetch and pin the page for the lifetime of the mtr. A page that
    /// is already in the memo is returned without a second pin.
    pub fn page_get(&mut self, id: PageID) -> Result<Arc<Frame>, SmallError> {
        if let Some(slot) = self
            .memo
            .iter()
            .find(|s| s.frame.id() == id && s.pinned && !s.released)
        {
            return Ok(slot.frame.clone());
        }
        let (frame, _) = self.pools.fetch(id)?;
        self.memo_push(frame.clone());
        Ok(frame)
    }

    /// Hand a pinned frame to the mtr; the pin is released at commit.
    pub fn memo_push(&mut self, frame: Arc<Frame>) {
        self.memo.push(MemoSlot {
            frame,
            pinned: true,
            modified: false,
            released: false,
            before: None,
        });
    }

    /// Allocate a page in the space. Unless the mtr commits, the page
    /// goes back to the free list when the mtr is dropped.
    pub fn alloc_page(&mut self, space: SpaceID) -> Result<PageNo, SmallError> {
        let page_no = self.pools.fil().alloc_page(space)?;
        self.allocated.push(PageID::new(space, page_no));
        Ok(page_no)
    }

    pub fn memo_contains(&self, id: &PageID) -> bool {
        self.memo
            .iter()
            .any(|s| s.frame.id() == *id && !s.released)
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    pub fn set_savepoint(&self) -> usize {
        self.memo.len()
    }

    /// Release the pins taken after the savepoint. Pages modified since
    /// stay in the memo until commit. Returns the number released.
    pub fn release_at_savepoint(&mut self, savepoint: usize) -> usize {
        let mut n = 0;
        for slot in self.memo.iter_mut().skip(savepoint) {
            if slot.pinned && !slot.modified && slot.before.is_none() && !slot.released {
                self.pools.release(&slot.frame);
                slot.released = true;
                n += 1;
            }
        }
        n
    }

    fn memo_slot(&mut self, frame: &Arc<Frame>) -> &mut MemoSlot {
        let id = frame.id();
        let pos = match self
            .memo
            .iter()
            .position(|s| s.frame.id() == id && !s.released)
        {
            Some(pos) => pos,
            None => {
                self.memo.push(MemoSlot {
                    frame: frame.clone(),
                    pinned: false,
                    modified: false,
                    released: false,
                    before: None,
                });
                self.memo.len() - 1
            }
        };
        &mut self.memo[pos]
    }

    /// Keep the image the page has before the first change of this mtr.
    /// Must run before the page is latched for writing.
    fn save_before_image(&mut self, frame: &Arc<Frame>) {
        let slot = self.memo_slot(frame);
        if slot.before.is_none() {
            frame.begin_modify();
            slot.before = Some(frame.read().to_vec());
        }
    }

    fn note_modified(&mut self, frame: &Arc<Frame>) {
        self.memo_slot(frame).modified = true;
    }

    // ---------------------------------------------------------------
    // log writers
    // ---------------------------------------------------------------

    /// Open a record in the private log: type, space id and page no.
    /// The body follows through `mlog_catenate`.
    pub fn mlog_write_initial_log_record(&mut self, id: PageID, rec_type: MlogType) {
        if self.log_mode == LogMode::None {
            return;
        }
        mlog::mlog_write_initial_log_record(&mut self.log_buf, rec_type, id.space, id.page_no);
        self.n_log_recs += 1;
    }

    pub fn mlog_catenate(&mut self, bytes: &[u8]) {
        if self.log_mode == LogMode::None {
            return;
        }
        self.log_buf.write_bytes(bytes);
    }

    fn write_and_log(
        &mut self,
        frame: &Arc<Frame>,
        rec_type: MlogType,
        body: Vec<u8>,
    ) -> Result<u16, SmallError> {
        self.check_active()?;
        self.save_before_image(frame);
        let offset = {
            let mut page = frame.write();
            apply_record(rec_type, &body, &mut page)?
        };
        self.mlog_write_initial_log_record(frame.id(), rec_type);
        self.mlog_catenate(&body);
        self.note_modified(frame);
        Ok(offset)
    }

    /// Write a 1, 2, 4 or 8 byte big-endian value at the offset.
    pub fn mlog_write_ulint(
        &mut self,
        frame: &Arc<Frame>,
        offset: usize,
        value: u64,
        rec_type: MlogType,
    ) -> SmallResult {
        let size = rec_type.ulint_size().ok_or_else(|| {
            SmallError::invalid(&format!("{:?} is not an integer write", rec_type))
        })?;
        if size < 8 && value >> (size * 8) != 0 {
            return Err(SmallError::invalid(&format!(
                "value {} does not fit in {} bytes",
                value, size
            )));
        }
        let body = mlog::ulint_body(offset as u16, value, rec_type);
        self.write_and_log(frame, rec_type, body).map(|_| ())
    }

    pub fn mlog_write_string(&mut self, frame: &Arc<Frame>, offset: usize, data: &[u8]) -> SmallResult {
        let body = mlog::string_body(offset as u16, data);
        self.write_and_log(frame, MlogType::WriteString, body)
            .map(|_| ())
    }

    /// Insert the record as the `pos`-th user record of the page.
    /// Returns the record offset.
    pub fn mlog_write_rec_insert(
        &mut self,
        frame: &Arc<Frame>,
        pos: usize,
        rec: &[u8],
    ) -> Result<u16, SmallError> {
        let body = mlog::rec_insert_body(pos as u16, rec);
        self.write_and_log(frame, MlogType::RecInsert, body)
    }

    pub fn mlog_write_rec_update_in_place(
        &mut self,
        frame: &Arc<Frame>,
        offset: u16,
        bytes: &[u8],
    ) -> SmallResult {
        let body = mlog::rec_update_body(offset, bytes);
        self.write_and_log(frame, MlogType::RecUpdateInPlace, body)
            .map(|_| ())
    }

    pub fn mlog_write_rec_delete(&mut self, frame: &Arc<Frame>, offset: u16, len: u16) -> SmallResult {
        let body = mlog::rec_delete_body(offset, len);
        self.write_and_log(frame, MlogType::RecDelete, body)
            .map(|_| ())
    }

    /// Run a free-form change on the page and log the changed byte runs
    /// as string writes. The page is restored if the closure fails.
    pub fn modify_page<R, F>(&mut self, frame: &Arc<Frame>, f: F) -> Result<R, SmallError>
    where
        F: FnOnce(&mut [u8]) -> Result<R, SmallError>,
    {
        self.check_active()?;
        self.save_before_image(frame);
        let (result, runs) = {
            let mut page = frame.write();
            let before = page.clone();
            match f(&mut page) {
                Ok(r) => {
                    let runs = if self.log_mode == LogMode::None {
                        Vec::new()
                    } else {
                        diff_runs(&before, &page)
                    };
                    (r, runs)
                }
                Err(e) => {
                    page.copy_from_slice(&before);
                    return Err(e);
                }
            }
        };
        let id = frame.id();
        for (offset, bytes) in runs {
            self.mlog_write_initial_log_record(id, MlogType::WriteString);
            self.mlog_catenate(&mlog::string_body(offset as u16, &bytes));
        }
        self.note_modified(frame);
        Ok(result)
    }

    /// Lay out a page from scratch: the page is zero-filled, `f` writes
    /// the new image and the non-zero runs are logged after a page-init
    /// record. Used for freshly allocated pages, whose previous content
    /// recovery cannot reproduce.
    pub fn init_page<R, F>(&mut self, frame: &Arc<Frame>, f: F) -> Result<R, SmallError>
    where
        F: FnOnce(&mut [u8]) -> Result<R, SmallError>,
    {
        self.check_active()?;
        self.save_before_image(frame);
        let (result, runs) = {
            let mut page = frame.write();
            let before = page.clone();
            let zeros = vec![0u8; page.len()];
            page.copy_from_slice(&zeros);
            match f(&mut page) {
                Ok(r) => {
                    let runs = if self.log_mode == LogMode::None {
                        Vec::new()
                    } else {
                        diff_runs(&zeros, &page)
                    };
                    (r, runs)
                }
                Err(e) => {
                    page.copy_from_slice(&before);
                    return Err(e);
                }
            }
        };
        let id = frame.id();
        self.mlog_write_initial_log_record(id, MlogType::PageInit);
        for (offset, bytes) in runs {
            self.mlog_write_initial_log_record(id, MlogType::WriteString);
            self.mlog_catenate(&mlog::string_body(offset as u16, &bytes));
        }
        self.note_modified(frame);
        Ok(result)
    }

    fn check_active(&self) -> SmallResult {
        if self.state != MtrState::Active {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                "mtr already committed",
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // commit
    // ---------------------------------------------------------------

    /// Frame the private log for the redo stream: a lone record carries
    /// the single-record flag, a group ends with a group end marker.
    fn framed_log(&self) -> Result<Vec<u8>, SmallError> {
        let records = parse_log(self.log_buf.as_slice())?;
        let mut w = SmallWriter::new_reserved(self.log_buf.len() + 16 * records.len());
        let single = records.len() == 1;
        for rec in &records {
            let mut rec_type = rec.rec_type as u8;
            if single {
                rec_type |= SINGLE_REC_FLAG;
            }
            w.write(&LogRecord::new(
                rec_type,
                rec.space,
                rec.page_no,
                rec.body.clone(),
            ));
        }
        if records.len() > 1 {
            w.write(&LogRecord::new(MlogType::MultiRecEnd as u8, 0, 0, Vec::new()));
        }
        Ok(w.to_bytes())
    }

    /// Publish the log, stamp the modified pages with the end LSN, mark
    /// them dirty and release the memo. Returns the end LSN.
    pub fn commit(mut self) -> Result<Lsn, SmallError> {
        self.check_active()?;
        let mut start = self.log.lsn();
        let mut end = start;
        if self.log_mode != LogMode::None && self.n_log_recs > 0 {
            let bytes = self.framed_log()?;
            let mut handle = self.log.reserve_and_open(bytes.len())?;
            start = handle.start_lsn();
            handle.write_low(&bytes)?;
            end = handle.close()?;
        }
        self.start_lsn = start;
        self.end_lsn = end;

        for slot in self.memo.iter().filter(|s| s.modified) {
            let mut page = slot.frame.write();
            set_page_lsn(&mut page, end);
        }
        for slot in self.memo.iter().filter(|s| s.modified) {
            self.pools.mark_dirty_range(&slot.frame, start, end);
        }
        for slot in self.memo.iter_mut() {
            if slot.before.take().is_some() {
                slot.frame.end_modify();
            }
        }
        self.allocated.clear();
        self.release_memo();
        self.state = MtrState::Committed;
        Ok(end)
    }

    /// Put back the before-images, then free the pages this mtr
    /// allocated. Nothing of the mtr reaches the log or the disk.
    fn rollback(&mut self) {
        for slot in self.memo.iter_mut() {
            if let Some(before) = slot.before.take() {
                slot.frame.write().copy_from_slice(&before);
                slot.frame.end_modify();
            }
        }
        self.release_memo();
        for id in mem::take(&mut self.allocated) {
            if let Err(e) = self.pools.drop_page(&id) {
                warn!("cannot drop frame of unused page {:?}: {}", id, e);
                continue;
            }
            if let Err(e) = self.pools.fil().free_page(id.space, id.page_no) {
                warn!("cannot free unused page {:?}: {}", id, e);
            }
        }
    }

    fn release_memo(&mut self) {
        for slot in self.memo.iter_mut() {
            if slot.pinned && !slot.released {
                self.pools.release(&slot.frame);
                slot.released = true;
            }
        }
        self.memo.clear();
    }
}

impl<'a> Drop for Mtr<'a> {
    fn drop(&mut self) {
        if self.state == MtrState::Committed {
            return;
        }
        if self.n_log_recs > 0 {
            debug!(
                "mtr dropped with {} unpublished log records, rolling back {} pages",
                self.n_log_recs,
                self.memo.iter().filter(|s| s.before.is_some()).count()
            );
        }
        self.rollback();
    }
}

/// Byte runs where `after` differs from `before`. Runs separated by a
/// few equal bytes are merged.
fn diff_runs(before: &[u8], after: &[u8]) -> Vec<(usize, Vec<u8>)> {
    const GAP: usize = 8;
    const MAX_RUN: usize = u16::MAX as usize;

    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < after.len() {
        if before[i] == after[i] {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        let mut j = end;
        while j < after.len() && j - end <= GAP && j - start < MAX_RUN {
            if before[j] != after[j] {
                end = j + 1;
            }
            j += 1;
        }
        runs.push((start, end));
        i = end;
    }
    runs.into_iter()
        .map(|(s, e)| (s, after[s..e].to_vec()))
        .collect()
}
