use log::debug;

use crate::{
    catalog::TableDef,
    database::{row::secondary_key, row::StoredRow, Database},
    error::{ErrorKind, SmallError},
    transaction::{purge_records, undo::UndoAction},
    utils::HandyRwLock,
};

/// What one purge pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub n_undo: usize,
    pub n_rows: usize,
    pub n_entries: usize,
    pub n_externs: usize,
}

impl Database {
    /// Drop the history no read view needs any more: the undo records of
    /// purgeable transactions with the extern fields of their
    /// before-images, delete-marked rows, and secondary entries that no
    /// longer match their row.
    pub fn purge(&self) -> Result<PurgeStats, SmallError> {
        let _latch = self.purge_latch.wl();
        let mut stats = PurgeStats::default();

        for rec in purge_records(&self.trx_sys) {
            stats.n_undo += 1;
            let before = match rec.action()? {
                UndoAction::Update { before, .. } | UndoAction::Reinsert { before, .. } => before,
                _ => continue,
            };
            let table = match self.dict.table_by_id(rec.table_id) {
                Ok(t) => t,
                Err(e) if e.is(ErrorKind::NotFound) => continue,
                Err(e) => return Err(e),
            };
            stats.n_externs += self.free_externs(&table, &StoredRow::parse(&before)?)?;
        }

        for table in self.dict.tables() {
            self.purge_table(&table, &mut stats)?;
        }
        if stats != PurgeStats::default() {
            debug!("purge: {:?}", stats);
        }
        Ok(stats)
    }

    fn purge_table(&self, table: &TableDef, stats: &mut PurgeStats) -> Result<(), SmallError> {
        let clustered = self.clustered_tree(table)?;
        for (key, bytes) in clustered.scan()? {
            let row = StoredRow::parse(&bytes)?;
            if !row.deleted || !self.trx_sys.is_purgeable(row.trx_id) {
                continue;
            }
            if clustered.delete_if(&key, |v| v == bytes.as_slice())?.is_some() {
                stats.n_rows += 1;
                stats.n_externs += self.free_externs(table, &row)?;
            }
        }

        for index in table.indexes.iter().filter(|i| !i.is_clustered()) {
            let tree = self.tree(index.id)?;
            for (entry, pk) in tree.scan()? {
                let stale = match clustered.search(&pk)? {
                    None => true,
                    Some(bytes) => {
                        let row = StoredRow::parse(&bytes)?;
                        if !self.trx_sys.is_purgeable(row.trx_id) {
                            false
                        } else if row.deleted {
                            true
                        } else {
                            let tuple = self.materialize(table, &row)?;
                            secondary_key(table, index, &tuple, &pk)? != entry
                        }
                    }
                };
                if stale && tree.delete_if(&entry, |v| v == pk.as_slice())?.is_some() {
                    stats.n_entries += 1;
                }
            }
        }
        Ok(())
    }
}
