use crate::transaction::undo::record::UndoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoLogKind {
    Insert,
    Update,
}

/// An append-only sequence of undo records of one kind.
#[derive(Debug, Clone)]
pub struct UndoLog {
    kind: UndoLogKind,
    records: Vec<UndoRecord>,
}

impl UndoLog {
    pub fn new(kind: UndoLogKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    pub fn kind(&self) -> UndoLogKind {
        self.kind
    }

    pub fn append(&mut self, rec: UndoRecord) {
        self.records.push(rec);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[UndoRecord] {
        &self.records
    }

    /// Remove and return the records with an undo number `>= undo_no`,
    /// newest first.
    pub fn take_from(&mut self, undo_no: u64) -> Vec<UndoRecord> {
        let keep = self.records.partition_point(|r| r.undo_no < undo_no);
        let mut tail = self.records.split_off(keep);
        tail.reverse();
        tail
    }

    pub fn clear(&mut self) -> Vec<UndoRecord> {
        std::mem::take(&mut self.records)
    }
}
