use log::debug;

use crate::{
    transaction::{trx_sys::TrxSys, undo::UndoRecord},
    types::TrxID,
};

/// Drop the update undo of committed transactions that every open read
/// view already sees. Returns the number of records dropped.
pub fn purge(trx_sys: &TrxSys) -> usize {
    purge_records(trx_sys).len()
}

/// Like `purge`, returning the dropped records so the caller can
/// release what their before-images own.
pub fn purge_records(trx_sys: &TrxSys) -> Vec<UndoRecord> {
    let mut recs = Vec::new();
    for rseg in trx_sys.rsegs().all() {
        recs.extend(rseg.purge_records(|id| trx_sys.is_purgeable(id)));
    }
    if !recs.is_empty() {
        debug!("purge: dropped {} undo records", recs.len());
    }
    recs
}

/// Whether some reader may still need the undo of `trx_id` to rebuild
/// an older row version.
pub fn undo_must_exist(trx_sys: &TrxSys, trx_id: TrxID) -> bool {
    !trx_sys.is_purgeable(trx_id)
}
