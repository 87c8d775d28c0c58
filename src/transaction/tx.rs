use core::fmt;
use std::time::Instant;

use crate::{
    error::SmallError,
    transaction::{
        read_view::ReadView,
        undo::{UndoAction, UndoLog, UndoLogKind, UndoRecord},
    },
    types::{Lsn, SmallResult, TableID, TrxID},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

/// Two-phase commit progress of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaState {
    NotStarted,
    Active,
    Prepared,
    Committed,
    RolledBack,
}

/// Identifies a distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub format_id: i32,
    pub gtrid: Vec<u8>,
    pub bqual: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, gtrid: &[u8], bqual: &[u8]) -> Self {
        Self {
            format_id,
            gtrid: gtrid.to_vec(),
            bqual: bqual.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gtrid.is_empty() && self.bqual.is_empty()
    }
}

/// A named position in the undo stream of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    pub undo_no: u64,
}

/// Applies the inverse of recorded row changes during rollback.
pub trait UndoApplier {
    fn apply_undo(&self, table_id: TableID, action: &UndoAction) -> SmallResult;
}

/// A transaction. The id is assigned when it begins; the object is
/// owned by its user, the transaction system only tracks ids.
pub struct Transaction {
    id: TrxID,
    state: TrxState,
    pub(crate) xa_state: XaState,
    pub(crate) xid: Option<Xid>,
    start_time: Option<Instant>,
    pub(crate) read_view: Option<ReadView>,

    insert_undo: UndoLog,
    update_undo: UndoLog,
    savepoints: Vec<Savepoint>,
    undo_no: u64,

    commit_lsn: Lsn,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self {
            id: 0,
            state: TrxState::NotStarted,
            xa_state: XaState::NotStarted,
            xid: None,
            start_time: None,
            read_view: None,
            insert_undo: UndoLog::new(UndoLogKind::Insert),
            update_undo: UndoLog::new(UndoLogKind::Update),
            savepoints: Vec::new(),
            undo_no: 0,
            commit_lsn: 0,
        }
    }

    pub fn id(&self) -> TrxID {
        self.id
    }

    pub fn state(&self) -> TrxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TrxState::Active
    }

    pub fn xa_state(&self) -> XaState {
        self.xa_state
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub fn read_view(&self) -> Option<&ReadView> {
        self.read_view.as_ref()
    }

    pub fn commit_lsn(&self) -> Lsn {
        self.commit_lsn
    }

    pub(crate) fn set_commit_lsn(&mut self, lsn: Lsn) {
        self.commit_lsn = lsn;
    }

    /// Number of undo records written so far; also the next undo number.
    pub fn undo_no(&self) -> u64 {
        self.undo_no
    }

    pub fn undo_len(&self) -> usize {
        self.insert_undo.len() + self.update_undo.len()
    }

    pub fn insert_undo(&self) -> &UndoLog {
        &self.insert_undo
    }

    pub fn update_undo(&self) -> &UndoLog {
        &self.update_undo
    }

    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    pub(crate) fn activate(&mut self, id: TrxID) {
        self.id = id;
        self.state = TrxState::Active;
        self.start_time = Some(Instant::now());
    }

    pub(crate) fn finish(&mut self, state: TrxState) {
        self.state = state;
        self.read_view = None;
        self.insert_undo.clear();
        self.update_undo.clear();
        self.savepoints.clear();
        self.undo_no = 0;
    }

    /// Record an undo entry for a row change and return it.
    pub(crate) fn push_undo(&mut self, table_id: TableID, action: &UndoAction) -> UndoRecord {
        let rec = UndoRecord::for_action(self.undo_no, table_id, self.id, action);
        self.undo_no += 1;
        if rec.rec_type.is_insert() {
            self.insert_undo.append(rec.clone());
        } else {
            self.update_undo.append(rec.clone());
        }
        rec
    }

    /// Remove the undo records from `undo_no` on, newest first.
    pub(crate) fn take_undo_from(&mut self, undo_no: u64) -> Vec<UndoRecord> {
        let mut recs = self.insert_undo.take_from(undo_no);
        recs.extend(self.update_undo.take_from(undo_no));
        recs.sort_by(|a, b| b.undo_no.cmp(&a.undo_no));
        self.undo_no = self.undo_no.min(undo_no);
        recs
    }

    /// Put back an undo record that was taken but not applied.
    pub(crate) fn restore_undo(&mut self, rec: UndoRecord) {
        self.undo_no = self.undo_no.max(rec.undo_no + 1);
        if rec.rec_type.is_insert() {
            self.insert_undo.append(rec);
        } else {
            self.update_undo.append(rec);
        }
    }

    pub(crate) fn push_savepoint(&mut self, name: &str) {
        self.savepoints.retain(|s| s.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            undo_no: self.undo_no,
        });
    }

    /// Find the savepoint and drop the ones taken after it.
    pub(crate) fn truncate_savepoints(&mut self, name: &str) -> Result<Savepoint, SmallError> {
        let pos = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SmallError::not_found(&format!("savepoint {} not found", name)))?;
        self.savepoints.truncate(pos + 1);
        Ok(self.savepoints[pos].clone())
    }

    pub(crate) fn release_savepoint(&mut self, name: &str) -> Result<(), SmallError> {
        let pos = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SmallError::not_found(&format!("savepoint {} not found", name)))?;
        self.savepoints.truncate(pos);
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<{} {:?} xa={:?} undo={}>",
            self, self.state, self.xa_state, self.undo_no
        )
    }
}
