use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;

use crate::{
    transaction::undo::record::UndoRecord,
    types::TrxID,
    utils::HandyMutex,
};

/// An undo record kept by a rollback segment, tagged with its writer.
#[derive(Debug, Clone)]
pub struct RsegEntry {
    pub trx_id: TrxID,
    pub committed: bool,
    pub rec: UndoRecord,
}

#[derive(Default)]
struct RsegInner {
    update_undo: Vec<RsegEntry>,
    insert_undo: Vec<RsegEntry>,
    update_cached: Vec<UndoRecord>,
    insert_cached: Vec<UndoRecord>,
}

/// Collects the undo records of all transactions, up to `max_size`
/// live records (0 means unbounded). Released records are cached for
/// reuse.
pub struct RollbackSegment {
    id: u64,
    max_size: usize,
    inner: Mutex<RsegInner>,
}

impl RollbackSegment {
    pub fn new(id: u64, max_size: usize) -> Self {
        Self {
            id,
            max_size,
            inner: Mutex::new(RsegInner::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn is_full(&self, inner: &RsegInner) -> bool {
        self.max_size > 0 && inner.update_undo.len() + inner.insert_undo.len() >= self.max_size
    }

    /// Returns false when the segment is full.
    pub fn add_update_undo(&self, trx_id: TrxID, rec: UndoRecord) -> bool {
        let mut inner = self.inner.ml();
        if self.is_full(&inner) {
            return false;
        }
        inner.update_undo.push(RsegEntry {
            trx_id,
            committed: false,
            rec,
        });
        true
    }

    pub fn add_insert_undo(&self, trx_id: TrxID, rec: UndoRecord) -> bool {
        let mut inner = self.inner.ml();
        if self.is_full(&inner) {
            return false;
        }
        inner.insert_undo.push(RsegEntry {
            trx_id,
            committed: false,
            rec,
        });
        true
    }

    pub fn cache_update_undo(&self, rec: UndoRecord) {
        self.inner.ml().update_cached.push(rec);
    }

    pub fn cache_insert_undo(&self, rec: UndoRecord) {
        self.inner.ml().insert_cached.push(rec);
    }

    pub fn pop_cached_update_undo(&self) -> Option<UndoRecord> {
        self.inner.ml().update_cached.pop()
    }

    pub fn pop_cached_insert_undo(&self) -> Option<UndoRecord> {
        self.inner.ml().insert_cached.pop()
    }

    pub fn n_update_undo(&self) -> usize {
        self.inner.ml().update_undo.len()
    }

    pub fn n_insert_undo(&self) -> usize {
        self.inner.ml().insert_undo.len()
    }

    pub fn n_cached(&self) -> usize {
        let inner = self.inner.ml();
        inner.update_cached.len() + inner.insert_cached.len()
    }

    /// Update undo of the transaction, for rebuilding older versions.
    pub fn update_undo_of(&self, trx_id: TrxID) -> Vec<UndoRecord> {
        self.inner
            .ml()
            .update_undo
            .iter()
            .filter(|e| e.trx_id == trx_id)
            .map(|e| e.rec.clone())
            .collect()
    }

    /// The transaction committed: its insert undo is no longer needed,
    /// its update undo waits for purge.
    pub fn trx_committed(&self, trx_id: TrxID) {
        let mut inner = self.inner.ml();
        let (done, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.insert_undo)
            .into_iter()
            .partition(|e| e.trx_id == trx_id);
        inner.insert_undo = kept;
        for e in done {
            inner.insert_cached.push(e.rec);
        }
        for e in inner.update_undo.iter_mut().filter(|e| e.trx_id == trx_id) {
            e.committed = true;
        }
    }

    /// The transaction rolled back: drop all of its records.
    pub fn trx_rolled_back(&self, trx_id: TrxID) {
        let mut inner = self.inner.ml();
        inner.insert_undo.retain(|e| e.trx_id != trx_id);
        inner.update_undo.retain(|e| e.trx_id != trx_id);
    }

    /// Drop the records of the transaction numbered `undo_no` and
    /// above, after a partial rollback.
    pub fn trx_rolled_back_to(&self, trx_id: TrxID, undo_no: u64) {
        let mut inner = self.inner.ml();
        let keep = |e: &RsegEntry| e.trx_id != trx_id || e.rec.undo_no < undo_no;
        inner.insert_undo.retain(keep);
        inner.update_undo.retain(keep);
    }

    /// Put back a record of a finished transaction, read from the undo
    /// store on startup. Insert undo of finished transactions is never
    /// needed again, so it goes straight to the cache.
    pub fn restore(&self, trx_id: TrxID, rec: UndoRecord) {
        let mut inner = self.inner.ml();
        if rec.rec_type.is_insert() {
            inner.insert_cached.push(rec);
        } else {
            inner.update_undo.push(RsegEntry {
                trx_id,
                committed: true,
                rec,
            });
        }
    }

    /// Drop the update undo of committed transactions accepted by
    /// `purgeable`. Returns the number of records dropped.
    pub fn purge<F: Fn(TrxID) -> bool>(&self, purgeable: F) -> usize {
        self.purge_records(purgeable).len()
    }

    /// Like `purge`, returning the dropped records.
    pub fn purge_records<F: Fn(TrxID) -> bool>(&self, purgeable: F) -> Vec<UndoRecord> {
        let mut inner = self.inner.ml();
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.update_undo)
            .into_iter()
            .partition(|e| e.committed && purgeable(e.trx_id));
        inner.update_undo = kept;
        let recs: Vec<UndoRecord> = gone.into_iter().map(|e| e.rec).collect();
        inner.update_cached.extend(recs.iter().cloned());
        if !recs.is_empty() {
            debug!("rseg {}: purged {} undo records", self.id, recs.len());
        }
        recs
    }
}

/// Rollback segments by id, in creation order.
#[derive(Default)]
pub struct RsegSys {
    segments: Mutex<(HashMap<u64, Arc<RollbackSegment>>, Vec<u64>)>,
}

impl RsegSys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the segment, or return the existing one with that id.
    pub fn create(&self, id: u64, max_size: usize) -> Arc<RollbackSegment> {
        let mut segs = self.segments.ml();
        if let Some(existing) = segs.0.get(&id) {
            return existing.clone();
        }
        let rseg = Arc::new(RollbackSegment::new(id, max_size));
        segs.0.insert(id, rseg.clone());
        segs.1.push(id);
        rseg
    }

    pub fn get(&self, id: u64) -> Option<Arc<RollbackSegment>> {
        self.segments.ml().0.get(&id).cloned()
    }

    pub fn free(&self, id: u64) {
        let mut segs = self.segments.ml();
        segs.0.remove(&id);
        segs.1.retain(|i| *i != id);
    }

    pub fn all(&self) -> Vec<Arc<RollbackSegment>> {
        let segs = self.segments.ml();
        segs.1.iter().filter_map(|id| segs.0.get(id).cloned()).collect()
    }
}
