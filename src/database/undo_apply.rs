use log::debug;

use crate::{
    database::{row::StoredRow, Database},
    error::ErrorKind,
    transaction::{undo::UndoAction, UndoApplier},
    types::{SmallResult, TableID},
    utils::HandyRwLock,
};

impl UndoApplier for Database {
    /// Put the clustered row back the way it was before the change.
    /// Secondary entries are left for purge.
    fn apply_undo(&self, table_id: TableID, action: &UndoAction) -> SmallResult {
        let table = match self.dict.table_by_id(table_id) {
            Ok(t) => t,
            Err(e) if e.is(ErrorKind::NotFound) => {
                debug!("undo for dropped table {} skipped", table_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let tree = self.clustered_tree(&table)?;

        let _latch = self.purge_latch.rl();
        let current = match tree.search(action.key())? {
            Some(bytes) => Some(StoredRow::parse(&bytes)?),
            None => None,
        };
        match action {
            UndoAction::Insert { key } => {
                if let Some(row) = current {
                    tree.delete(key)?;
                    self.free_externs(&table, &row)?;
                }
            }
            UndoAction::Update { key, before } | UndoAction::Reinsert { key, before } => {
                tree.insert(key, before)?;
                if let Some(row) = current {
                    // the version being replaced owns its extern fields
                    if row.to_bytes() != *before {
                        self.free_externs(&table, &row)?;
                    }
                }
            }
            UndoAction::Delete { key, before } => {
                tree.insert(key, before)?;
            }
        }
        Ok(())
    }
}
