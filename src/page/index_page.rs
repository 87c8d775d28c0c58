//! Slot-directory page holding the records of one B+-tree node.
//!
//! The index page header follows the file header:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 2    | number of directory slots      |
//! | 2      | 2    | heap top                       |
//! | 4      | 2    | heap records (bit 15: compact) |
//! | 6      | 2    | free list head                 |
//! | 8      | 2    | garbage bytes                  |
//! | 10     | 2    | last insert offset             |
//! | 12     | 2    | insert direction               |
//! | 14     | 2    | inserts in the same direction  |
//! | 16     | 2    | user records                   |
//! | 18     | 8    | max trx id                     |
//! | 26     | 2    | level (0 = leaf)               |
//! | 28     | 8    | index id                       |
//!
//! Records are appended to the heap starting at `PAGE_DATA`. The slot
//! directory grows down from the trailer: slot 0 is the infimum, slot 1
//! the supremum, then one slot per user record in key order.

use crate::{
    error::{ErrorKind, SmallError},
    io::{read_u16, read_u64, write_u16, write_u64},
    page::fil_header::{FilHeader, PageType, FIL_PAGE_DATA, FIL_PAGE_DATA_END},
    record::header::{self, REC_N_EXTRA_BYTES},
    types::{IndexID, PageNo, SmallResult, SpaceID, TrxID, NULL_PAGE_NO},
};

pub const PAGE_HEADER: usize = FIL_PAGE_DATA;

pub const PAGE_N_DIR_SLOTS: usize = 0;
pub const PAGE_HEAP_TOP: usize = 2;
pub const PAGE_N_HEAP: usize = 4;
pub const PAGE_FREE: usize = 6;
pub const PAGE_GARBAGE: usize = 8;
pub const PAGE_LAST_INSERT: usize = 10;
pub const PAGE_DIRECTION: usize = 12;
pub const PAGE_N_DIRECTION: usize = 14;
pub const PAGE_N_RECS: usize = 16;
pub const PAGE_MAX_TRX_ID: usize = 18;
pub const PAGE_LEVEL: usize = 26;
pub const PAGE_INDEX_ID: usize = 28;
const PAGE_HEADER_SIZE: usize = 36;

/// Two file-segment headers (leaf and non-leaf) sit between the page
/// header and the record heap.
const FSEG_HEADER_SIZE: usize = 10;

pub const PAGE_DATA: usize = PAGE_HEADER + PAGE_HEADER_SIZE + 2 * FSEG_HEADER_SIZE;

pub const PAGE_DIR: usize = FIL_PAGE_DATA_END;
pub const PAGE_DIR_SLOT_SIZE: usize = 2;

pub const N_HEAP_COMPACT: u16 = 0x8000;

pub const SLOT_INFIMUM: usize = 0;
pub const SLOT_SUPREMUM: usize = 1;
pub const SLOT_USER_LOW: usize = 2;

/// Location of a user record inside the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    /// Position in the slot directory.
    pub slot: usize,
    pub offset: u16,
    pub len: u16,
    pub deleted: bool,
}

#[derive(Debug)]
pub struct IndexPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> IndexPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    fn header_u16(&self, field: usize) -> u16 {
        read_u16(self.data(), PAGE_HEADER + field)
    }

    pub fn fil(&self) -> FilHeader<&[u8]> {
        FilHeader::new(self.data())
    }

    pub fn is_index(&self) -> bool {
        self.fil().raw_page_type() == PageType::Index as u16
    }

    pub fn n_dir_slots(&self) -> usize {
        self.header_u16(PAGE_N_DIR_SLOTS) as usize
    }

    pub fn heap_top(&self) -> usize {
        self.header_u16(PAGE_HEAP_TOP) as usize
    }

    pub fn n_heap(&self) -> u16 {
        self.header_u16(PAGE_N_HEAP) & !N_HEAP_COMPACT
    }

    pub fn is_compact(&self) -> bool {
        self.header_u16(PAGE_N_HEAP) & N_HEAP_COMPACT != 0
    }

    pub fn free(&self) -> u16 {
        self.header_u16(PAGE_FREE)
    }

    pub fn garbage(&self) -> usize {
        self.header_u16(PAGE_GARBAGE) as usize
    }

    pub fn last_insert(&self) -> u16 {
        self.header_u16(PAGE_LAST_INSERT)
    }

    pub fn n_recs(&self) -> usize {
        self.header_u16(PAGE_N_RECS) as usize
    }

    pub fn max_trx_id(&self) -> TrxID {
        read_u64(self.data(), PAGE_HEADER + PAGE_MAX_TRX_ID)
    }

    pub fn level(&self) -> u16 {
        self.header_u16(PAGE_LEVEL)
    }

    pub fn index_id(&self) -> IndexID {
        read_u64(self.data(), PAGE_HEADER + PAGE_INDEX_ID)
    }

    pub fn prev(&self) -> PageNo {
        self.fil().prev()
    }

    pub fn next(&self) -> PageNo {
        self.fil().next()
    }

    fn slot_addr(&self, i: usize) -> usize {
        self.data().len() - PAGE_DIR - PAGE_DIR_SLOT_SIZE * (i + 1)
    }

    pub fn slot(&self, i: usize) -> u16 {
        read_u16(self.data(), self.slot_addr(i))
    }

    /// Lowest byte used by the slot directory.
    pub fn dir_low(&self) -> usize {
        self.data().len() - PAGE_DIR - PAGE_DIR_SLOT_SIZE * self.n_dir_slots()
    }

    /// Bytes available for one more record plus its slot.
    pub fn free_space(&self) -> usize {
        self.dir_low()
            .saturating_sub(PAGE_DIR_SLOT_SIZE)
            .saturating_sub(self.heap_top())
    }

    /// Length of the record at `offset`, inferred from the next higher
    /// slot offset, or from the heap top for the last record.
    pub fn record_len(&self, offset: u16) -> usize {
        let mut end = self.heap_top();
        for i in 0..self.n_dir_slots() {
            let o = self.slot(i) as usize;
            if o > offset as usize && o < end {
                end = o;
            }
        }
        end - offset as usize
    }

    pub fn record_bytes(&self, offset: u16) -> &[u8] {
        let len = self.record_len(offset);
        &self.data()[offset as usize..offset as usize + len]
    }

    /// All user records in slot order, deleted ones included.
    pub fn records(&self) -> Vec<PageRecord> {
        let n = self.n_dir_slots();
        let mut offsets: Vec<u16> = (0..n).map(|i| self.slot(i)).collect();
        offsets.sort_unstable();
        let top = self.heap_top() as u16;

        let mut out = Vec::with_capacity(n.saturating_sub(SLOT_USER_LOW));
        for slot in SLOT_USER_LOW..n {
            let offset = self.slot(slot);
            let end = match offsets.binary_search(&offset) {
                Ok(i) if i + 1 < offsets.len() => offsets[i + 1],
                _ => top,
            };
            let rec = &self.data()[offset as usize..];
            out.push(PageRecord {
                slot,
                offset,
                len: end - offset,
                deleted: header::is_deleted(rec),
            });
        }
        out
    }

    /// Bytes of the live user records, in key order.
    pub fn user_records(&self) -> Vec<Vec<u8>> {
        self.records()
            .into_iter()
            .filter(|r| !r.deleted)
            .map(|r| self.data()[r.offset as usize..(r.offset + r.len) as usize].to_vec())
            .collect()
    }

    /// Sum of the lengths of the records on the free list.
    pub fn free_list_bytes(&self) -> usize {
        let mut total = 0;
        let mut cur = self.free();
        let mut steps = 0;
        while cur != 0 && steps <= self.n_dir_slots() {
            total += self.record_len(cur);
            cur = header::next(&self.data()[cur as usize..]);
            steps += 1;
        }
        total
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexPage<B> {
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    fn set_header_u16(&mut self, field: usize, v: u16) {
        write_u16(self.data_mut(), PAGE_HEADER + field, v);
    }

    pub fn fil_mut(&mut self) -> FilHeader<&mut [u8]> {
        FilHeader::new(self.data_mut())
    }

    fn set_slot(&mut self, i: usize, offset: u16) {
        let addr = self.slot_addr(i);
        write_u16(self.data_mut(), addr, offset);
    }

    fn set_n_heap(&mut self, n: u16) {
        let compact = self.header_u16(PAGE_N_HEAP) & N_HEAP_COMPACT;
        self.set_header_u16(PAGE_N_HEAP, compact | (n & !N_HEAP_COMPACT));
    }

    pub fn set_prev(&mut self, prev: PageNo) {
        self.fil_mut().set_prev(prev);
    }

    pub fn set_next(&mut self, next: PageNo) {
        self.fil_mut().set_next(next);
    }

    pub fn set_level(&mut self, level: u16) {
        self.set_header_u16(PAGE_LEVEL, level);
    }

    pub fn set_max_trx_id(&mut self, id: TrxID) {
        write_u64(self.data_mut(), PAGE_HEADER + PAGE_MAX_TRX_ID, id);
    }

    pub fn set_index_id(&mut self, id: IndexID) {
        write_u64(self.data_mut(), PAGE_HEADER + PAGE_INDEX_ID, id);
    }

    /// Zero the page and lay out an empty index page holding only the
    /// infimum and supremum.
    pub fn init(&mut self, space: SpaceID, page_no: PageNo, level: u16) -> SmallResult {
        for b in self.data_mut().iter_mut() {
            *b = 0;
        }
        {
            let mut fil = self.fil_mut();
            fil.set_space_id(space);
            fil.set_page_no(page_no);
            fil.set_page_type(PageType::Index);
            fil.set_prev(NULL_PAGE_NO);
            fil.set_next(NULL_PAGE_NO);
        }
        self.set_header_u16(PAGE_N_DIR_SLOTS, 0);
        self.set_header_u16(PAGE_HEAP_TOP, PAGE_DATA as u16);
        self.set_header_u16(PAGE_N_HEAP, N_HEAP_COMPACT);
        self.set_header_u16(PAGE_FREE, 0);
        self.set_header_u16(PAGE_GARBAGE, 0);
        self.set_level(level);

        self.insert_record_bytes(&header::infimum_record())?;
        self.insert_record_bytes(&header::supremum_record())?;
        self.set_header_u16(PAGE_N_RECS, 0);
        self.set_header_u16(PAGE_LAST_INSERT, 0);
        Ok(())
    }

    fn insert_into_slot(&mut self, slot_idx: usize, rec: &[u8]) -> Result<u16, SmallError> {
        if rec.len() < REC_N_EXTRA_BYTES {
            return Err(SmallError::short_buffer(REC_N_EXTRA_BYTES, rec.len()));
        }
        let n = self.n_dir_slots();
        if slot_idx > n {
            return Err(SmallError::invalid(&format!(
                "slot {} out of range, page has {} slots",
                slot_idx, n
            )));
        }
        let top = self.heap_top();
        let new_dir_low = self.slot_addr(n);
        if top + rec.len() > new_dir_low {
            return Err(SmallError::new(
                ErrorKind::NoSpace,
                &format!(
                    "page full: heap top {} + record {} > directory {}",
                    top,
                    rec.len(),
                    new_dir_low
                ),
            ));
        }

        let heap_no = self.n_heap();
        let system = header::is_system(rec);
        {
            let data = self.data_mut();
            data[top..top + rec.len()].copy_from_slice(rec);
            header::set_heap_no(&mut data[top..], heap_no);
        }
        self.set_n_heap(heap_no + 1);
        self.set_header_u16(PAGE_HEAP_TOP, (top + rec.len()) as u16);

        let mut i = n;
        while i > slot_idx {
            let prev = self.slot(i - 1);
            self.set_slot(i, prev);
            i -= 1;
        }
        self.set_slot(slot_idx, top as u16);
        self.set_header_u16(PAGE_N_DIR_SLOTS, (n + 1) as u16);

        if !system {
            let n_recs = self.n_recs() as u16;
            self.set_header_u16(PAGE_N_RECS, n_recs + 1);
        }
        self.set_header_u16(PAGE_LAST_INSERT, top as u16);
        Ok(top as u16)
    }

    /// Append the record to the heap with a slot at the end of the
    /// directory. Returns the page offset of the record.
    pub fn insert_record_bytes(&mut self, rec: &[u8]) -> Result<u16, SmallError> {
        let n = self.n_dir_slots();
        self.insert_into_slot(n, rec)
    }

    /// Insert a user record so it becomes the `pos`-th user slot.
    pub fn insert_record_at(&mut self, pos: usize, rec: &[u8]) -> Result<u16, SmallError> {
        self.insert_into_slot(SLOT_USER_LOW + pos, rec)
    }

    /// Flag the record deleted and push it on the free list.
    pub fn delete_mark(&mut self, offset: u16, len: usize) -> SmallResult {
        let off = offset as usize;
        if off < PAGE_DATA || off + REC_N_EXTRA_BYTES > self.heap_top() {
            return Err(SmallError::invalid(&format!(
                "record offset {} outside the heap",
                offset
            )));
        }
        if header::is_deleted(&self.data()[off..]) {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("record at {} is already deleted", offset),
            ));
        }
        let free = self.free();
        {
            let rec = &mut self.data_mut()[off..];
            header::set_deleted(rec, true);
            header::set_next(rec, free);
        }
        self.set_header_u16(PAGE_FREE, offset);
        let garbage = self.garbage();
        self.set_header_u16(PAGE_GARBAGE, (garbage + len) as u16);
        let n_recs = self.n_recs();
        self.set_header_u16(PAGE_N_RECS, n_recs.saturating_sub(1) as u16);
        Ok(())
    }

    /// Overwrite the body of a record without changing its length.
    pub fn update_in_place(&mut self, offset: u16, bytes: &[u8]) -> SmallResult {
        let off = offset as usize;
        if off < PAGE_DATA || off + bytes.len() > self.heap_top() {
            return Err(SmallError::invalid(&format!(
                "update of {} bytes at {} outside the heap",
                bytes.len(),
                offset
            )));
        }
        self.data_mut()[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Rewrite the live records contiguously from `PAGE_DATA`, dropping
    /// deleted records and their slots. Heap numbers are kept.
    pub fn reorganize(&mut self) {
        let n = self.n_dir_slots();
        let mut live: Vec<Vec<u8>> = Vec::with_capacity(n);
        for slot in 0..n.min(SLOT_USER_LOW) {
            let off = self.slot(slot);
            live.push(self.record_bytes(off).to_vec());
        }
        for r in self.records() {
            if !r.deleted {
                live.push(self.record_bytes(r.offset).to_vec());
            }
        }

        let old_top = self.heap_top();
        let old_dir_low = self.dir_low();
        let len = self.data().len();
        {
            let data = self.data_mut();
            for b in data[PAGE_DATA..old_top].iter_mut() {
                *b = 0;
            }
            for b in data[old_dir_low..len - PAGE_DIR].iter_mut() {
                *b = 0;
            }
        }

        let mut top = PAGE_DATA;
        let mut max_heap_no = 0;
        let n_user = live.len().saturating_sub(SLOT_USER_LOW);
        for (i, rec) in live.iter().enumerate() {
            self.data_mut()[top..top + rec.len()].copy_from_slice(rec);
            header::set_next(&mut self.data_mut()[top..], 0);
            max_heap_no = max_heap_no.max(header::heap_no(rec));
            self.set_slot(i, top as u16);
            top += rec.len();
        }

        self.set_header_u16(PAGE_N_DIR_SLOTS, live.len() as u16);
        self.set_header_u16(PAGE_HEAP_TOP, top as u16);
        self.set_n_heap(if live.is_empty() { 0 } else { max_heap_no + 1 });
        self.set_header_u16(PAGE_FREE, 0);
        self.set_header_u16(PAGE_GARBAGE, 0);
        self.set_header_u16(PAGE_N_RECS, n_user as u16);
        self.set_header_u16(PAGE_LAST_INSERT, 0);
    }
}

pub fn init_index_page(page: &mut [u8], space: SpaceID, page_no: PageNo, level: u16) -> SmallResult {
    IndexPage::new(page).init(space, page_no, level)
}

pub fn insert_record_bytes(page: &mut [u8], rec: &[u8]) -> Result<u16, SmallError> {
    IndexPage::new(page).insert_record_bytes(rec)
}

pub fn delete_mark(page: &mut [u8], offset: u16, len: usize) -> SmallResult {
    IndexPage::new(page).delete_mark(offset, len)
}

pub fn reorganize(page: &mut [u8]) {
    IndexPage::new(page).reorganize()
}

/// Lay out the page from scratch with the given user records, keeping
/// the sibling links and index id supplied by the caller.
pub fn rebuild_index_page(
    page: &mut [u8],
    space: SpaceID,
    page_no: PageNo,
    level: u16,
    prev: PageNo,
    next: PageNo,
    index_id: IndexID,
    records: &[Vec<u8>],
) -> SmallResult {
    let mut p = IndexPage::new(page);
    p.init(space, page_no, level)?;
    p.set_prev(prev);
    p.set_next(next);
    p.set_index_id(index_id);
    for rec in records {
        let mut rec = rec.clone();
        header::set_deleted(&mut rec, false);
        header::set_next(&mut rec, 0);
        p.insert_record_bytes(&rec)?;
    }
    Ok(())
}
