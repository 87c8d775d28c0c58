use std::{collections::HashMap, convert::TryFrom};

use log::{debug, info, warn};

use crate::{
    buffer::BufferPools,
    error::{ErrorKind, SmallError},
    mtr::{apply_record, MlogType},
    page::{page_lsn, set_page_lsn},
    tablespace::Fil,
    tx_log::{decode_record, LogManager},
    types::{Lsn, PageID, SmallResult},
};

/// Where recovery reads and writes the pages it repairs.
pub trait RecvPageStore {
    fn read_page(&self, id: PageID) -> Result<Vec<u8>, SmallError>;
    fn write_page(&self, id: PageID, data: &[u8]) -> SmallResult;
}

/// Recover straight against the data files.
impl RecvPageStore for Fil {
    fn read_page(&self, id: PageID) -> Result<Vec<u8>, SmallError> {
        self.space_read_page(id)
    }

    fn write_page(&self, id: PageID, data: &[u8]) -> SmallResult {
        self.space_write_page(id, data)
    }
}

/// Recover through the buffer pool: repaired pages become dirty frames
/// stamped with the last applied LSN.
impl RecvPageStore for BufferPools {
    fn read_page(&self, id: PageID) -> Result<Vec<u8>, SmallError> {
        let (frame, _) = self.fetch(id)?;
        let data = frame.read().clone();
        self.release(&frame);
        Ok(data)
    }

    fn write_page(&self, id: PageID, data: &[u8]) -> SmallResult {
        let (frame, _) = self.fetch(id)?;
        frame.write().copy_from_slice(data);
        let lsn = page_lsn(data);
        self.mark_dirty(&frame, lsn);
        self.release(&frame);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecvRecord {
    pub rec_type: MlogType,
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvCounters {
    pub n_records: usize,
    pub n_groups: usize,
    pub n_pages: usize,
    pub n_applied: usize,
    pub n_skipped: usize,
}

/// Redo recovery state: the parsed records hashed by the page they
/// belong to.
#[derive(Default)]
pub struct RecvSys {
    addr_hash: HashMap<PageID, Vec<RecvRecord>>,
    counters: RecvCounters,
    found_corrupt_log: bool,
    /// End of the last complete group parsed.
    recovered_lsn: Lsn,
}

impl RecvSys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> RecvCounters {
        self.counters
    }

    pub fn found_corrupt_log(&self) -> bool {
        self.found_corrupt_log
    }

    pub fn recovered_lsn(&self) -> Lsn {
        self.recovered_lsn
    }

    pub fn n_pages(&self) -> usize {
        self.addr_hash.len()
    }

    pub fn records_for(&self, id: &PageID) -> &[RecvRecord] {
        self.addr_hash.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn add_group(&mut self, group: Vec<(PageID, RecvRecord)>) {
        self.counters.n_groups += 1;
        for (id, rec) in group {
            self.counters.n_records += 1;
            self.addr_hash.entry(id).or_insert_with(Vec::new).push(rec);
        }
    }

    /// Parse the log bytes starting at `start_lsn`. Only complete groups
    /// are kept: a group is a record with the single-record flag, or a
    /// run of records closed by a group end marker.
    pub fn parse(&mut self, buf: &[u8], start_lsn: Lsn) {
        self.recovered_lsn = self.recovered_lsn.max(start_lsn);
        let mut pos = 0;
        let mut pending: Vec<(PageID, RecvRecord)> = Vec::new();

        while pos < buf.len() {
            let (rec, used) = match decode_record(&buf[pos..]) {
                Ok(r) => r,
                Err(e) if e.is(ErrorKind::ShortBuffer) => {
                    debug!(
                        "log scan ends mid-record at lsn {}",
                        start_lsn + pos as u64
                    );
                    break;
                }
                Err(e) => {
                    warn!("corrupt log at lsn {}: {}", start_lsn + pos as u64, e);
                    self.found_corrupt_log = true;
                    break;
                }
            };
            let rec_start = start_lsn + pos as u64;
            let rec_end = rec_start + used as u64;
            pos += used;

            let rec_type = match MlogType::try_from(rec.rec_type) {
                Ok(t) => t,
                Err(e) => {
                    warn!("corrupt log at lsn {}: {}", rec_start, e);
                    self.found_corrupt_log = true;
                    break;
                }
            };

            if rec_type == MlogType::MultiRecEnd {
                if pending.is_empty() {
                    warn!("group end marker without a group at lsn {}", rec_start);
                    self.found_corrupt_log = true;
                    break;
                }
                self.add_group(std::mem::take(&mut pending));
                self.recovered_lsn = rec_end;
                continue;
            }

            let id = PageID::new(rec.space, rec.page_no);
            let single = rec.is_single();
            let recv = RecvRecord {
                rec_type,
                start_lsn: rec_start,
                end_lsn: rec_end,
                body: rec.payload,
            };
            if single {
                if !pending.is_empty() {
                    warn!("unterminated group before lsn {}", rec_start);
                    self.found_corrupt_log = true;
                    break;
                }
                self.add_group(vec![(id, recv)]);
                self.recovered_lsn = rec_end;
            } else {
                pending.push((id, recv));
            }
        }

        if !pending.is_empty() {
            debug!(
                "discarding {} records of an incomplete group",
                pending.len()
            );
        }
    }

    /// Apply the hashed records page by page. A page keeps the larger of
    /// its own LSN and the last applied end LSN.
    pub fn apply(&mut self, store: &dyn RecvPageStore) -> SmallResult {
        let mut ids: Vec<PageID> = self.addr_hash.keys().copied().collect();
        ids.sort();
        self.counters.n_pages = ids.len();

        for id in ids {
            let mut records = match self.addr_hash.remove(&id) {
                Some(r) => r,
                None => continue,
            };
            records.sort_by_key(|r| r.start_lsn);

            let mut page = match store.read_page(id) {
                Ok(p) => p,
                Err(e) if e.is(ErrorKind::NotFound) => {
                    // the space was dropped after these records were written
                    debug!("recovery: skipping {} records for missing {:?}", records.len(), id);
                    self.counters.n_skipped += records.len();
                    continue;
                }
                Err(e) => return Err(e),
            };
            let stored_lsn = page_lsn(&page);
            let mut last_lsn = stored_lsn;
            let mut applied = 0;
            for rec in &records {
                if rec.end_lsn <= stored_lsn {
                    self.counters.n_skipped += 1;
                    continue;
                }
                if let Err(e) = apply_record(rec.rec_type, &rec.body, &mut page) {
                    warn!(
                        "cannot apply {:?} at lsn {} to {:?}: {}",
                        rec.rec_type, rec.start_lsn, id, e
                    );
                    self.found_corrupt_log = true;
                    break;
                }
                applied += 1;
                last_lsn = last_lsn.max(rec.end_lsn);
            }
            if applied > 0 {
                set_page_lsn(&mut page, last_lsn);
                store.write_page(id, &page)?;
                self.counters.n_applied += applied;
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) {
        self.addr_hash.clear();
        self.found_corrupt_log = false;
    }
}

/// Replay the log past the checkpoint into the page store. Returns the
/// counters of the run.
pub fn recover(log: &LogManager, store: &dyn RecvPageStore) -> Result<RecvCounters, SmallError> {
    let header = log.header_at_open();
    if !header.needs_recovery() {
        return Ok(RecvCounters::default());
    }
    info!(
        "recovery from lsn {} to {}",
        header.checkpoint_lsn, header.current_lsn
    );

    let from = header.checkpoint_lsn.max(header.start_lsn);
    let buf = log.read_range(from, header.current_lsn)?;
    let mut recv = RecvSys::new();
    recv.parse(&buf, from);
    recv.apply(store)?;
    let counters = recv.counters();
    if recv.found_corrupt_log() {
        warn!("recovery stopped early on a corrupt log record");
    }
    info!(
        "recovery applied {} records to {} pages, {} skipped",
        counters.n_applied, counters.n_pages, counters.n_skipped
    );
    recv.finish();
    Ok(counters)
}
