//! Transactions and row operations of the engine.
//!
//! A row change takes an IX lock on the table and an X lock on the row,
//! records its inverse in the undo log and then writes the new version
//! into the clustered tree. Secondary indexes only gain entries here;
//! stale ones are removed by purge. Reads are consistent: they take an
//! IS lock on the table and rebuild the version their read view sees.

use std::collections::HashSet;

use log::debug;

use crate::{
    catalog::{IndexDef, TableDef},
    database::{
        row::{
            index_types, key_from_values, row_key, secondary_key, secondary_prefix, StoredRow,
        },
        Database,
    },
    error::{ErrorKind, SmallError},
    record::{encode_key, extern_ref::externalize_tuple, Tuple},
    transaction::{
        undo::UndoAction, LockFlags, LockMode, ReadView, RowKey, Transaction, XaState, Xid,
    },
    types::{SmallResult, TableID},
    utils::HandyRwLock,
};

/// Lock name of a row: the full clustered key in the table's clustered
/// index.
pub fn row_lock_key(table: &TableDef, key: &[u8]) -> Result<RowKey, SmallError> {
    Ok(RowKey::new(table.clustered_index()?.id, key))
}

impl Database {
    // ---------------------------------------------------------------
    // transactions
    // ---------------------------------------------------------------

    pub fn trx_create(&self) -> Transaction {
        self.trx_sys.trx_create()
    }

    /// Start the transaction. Its id is reserved in the dictionary so
    /// ids are not reused after a restart.
    pub fn begin(&self, trx: &mut Transaction) -> SmallResult {
        self.trx_sys.begin(trx)?;
        self.dict.reserve_trx_id(trx.id())
    }

    /// Begin the transaction if it is not running. A prepared XA
    /// transaction accepts no more work.
    fn activate(&self, trx: &mut Transaction) -> SmallResult {
        if !trx.is_active() {
            return self.begin(trx);
        }
        if trx.xa_state() == XaState::Prepared {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("{} is prepared", trx),
            ));
        }
        Ok(())
    }

    /// Make the changes of the transaction durable, then release it.
    /// A failed log flush leaves the transaction active.
    pub fn commit(&self, trx: &mut Transaction) -> SmallResult {
        self.flush_for_commit(trx)?;
        self.trx_sys.commit(trx, &self.locks)
    }

    fn flush_for_commit(&self, trx: &mut Transaction) -> SmallResult {
        if !trx.is_active() {
            return Ok(());
        }
        let lsn = self.log.lsn();
        if trx.undo_len() > 0 {
            if let Err(e) = self.log.flush_up_to(lsn) {
                e.show_backtrace();
                return Err(e);
            }
        }
        trx.set_commit_lsn(lsn);
        Ok(())
    }

    pub fn rollback(&self, trx: &mut Transaction) -> SmallResult {
        self.trx_sys.rollback(trx, self, &self.locks)
    }

    pub fn savepoint(&self, trx: &mut Transaction, name: &str) -> SmallResult {
        self.activate(trx)?;
        self.trx_sys.savepoint(trx, name)
    }

    pub fn rollback_to(&self, trx: &mut Transaction, name: &str) -> SmallResult {
        self.trx_sys.rollback_to_savepoint(trx, name, self)
    }

    pub fn release_savepoint(&self, trx: &mut Transaction, name: &str) -> SmallResult {
        self.trx_sys.release_savepoint(trx, name)
    }

    pub fn xa_start(&self, trx: &mut Transaction, xid: Xid) -> SmallResult {
        if !trx.is_active() {
            self.begin(trx)?;
        }
        self.trx_sys.xa_start(trx, xid)
    }

    pub fn xa_prepare(&self, trx: &mut Transaction) -> SmallResult {
        self.trx_sys.xa_prepare(trx)?;
        let lsn = self.log.lsn();
        self.log.flush_up_to(lsn)
    }

    pub fn xa_commit(&self, trx: &mut Transaction) -> SmallResult {
        if trx.xa_state() != XaState::Prepared {
            return self.trx_sys.xa_commit(trx, &self.locks);
        }
        self.flush_for_commit(trx)?;
        self.trx_sys.xa_commit(trx, &self.locks)
    }

    pub fn xa_rollback(&self, trx: &mut Transaction) -> SmallResult {
        self.trx_sys.xa_rollback(trx, self, &self.locks)
    }

    // ---------------------------------------------------------------
    // row changes
    // ---------------------------------------------------------------

    /// Take the IX lock and look the table up. The lock comes first so
    /// DDL holding an X lock is waited for.
    fn lock_for_change(&self, trx: &mut Transaction, table: &str) -> Result<TableDef, SmallError> {
        self.log_free_check()?;
        self.activate(trx)?;
        self.locks.acquire_table(trx.id(), table, LockMode::IX)?;
        self.dict.table_by_name(table)
    }

    fn lock_row(&self, trx: &Transaction, table: &TableDef, key: &[u8]) -> SmallResult {
        self.locks
            .acquire_row(trx.id(), &row_lock_key(table, key)?, LockMode::X, LockFlags::NONE)?;
        Ok(())
    }

    fn secondary_indexes(table: &TableDef) -> impl Iterator<Item = &IndexDef> {
        table.indexes.iter().filter(|i| !i.is_clustered())
    }

    /// Reject a row whose values already belong to another live row in
    /// a unique secondary index. NULL values never conflict. The values
    /// are X-locked so two writers of the same values serialize.
    fn check_unique(&self, trx: &Transaction, table: &TableDef, tuple: &Tuple, pk: &[u8]) -> SmallResult {
        let clustered = self.clustered_tree(table)?;
        for index in Self::secondary_indexes(table).filter(|i| i.is_unique()) {
            let positions = table.field_positions(index)?;
            if positions.iter().any(|p| tuple.field(*p).is_null()) {
                continue;
            }
            let prefix = secondary_prefix(table, index, tuple)?;
            self.locks
                .acquire_row(trx.id(), &RowKey::new(index.id, &prefix), LockMode::X, LockFlags::NONE)?;

            let tree = self.tree(index.id)?;
            let mut candidates = Vec::new();
            let mut cur = tree.seek(&prefix)?;
            while cur.is_valid() && cur.key().starts_with(&prefix) {
                candidates.push(cur.value().to_vec());
                cur.next()?;
            }
            for other in candidates {
                if other == pk {
                    continue;
                }
                let row = match clustered.search(&other)? {
                    Some(b) => StoredRow::parse(&b)?,
                    None => continue,
                };
                if row.deleted {
                    continue;
                }
                let current = self.materialize(table, &row)?;
                if secondary_prefix(table, index, &current)? == prefix {
                    return Err(SmallError::new(
                        ErrorKind::Duplicate,
                        &format!("duplicate entry for unique index {}.{}", table.name, index.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Write a new row version under `key`, undo first. The tuple's long
    /// fields move to the extern store and belong to the new version.
    fn write_version(
        &self,
        trx: &mut Transaction,
        table: &TableDef,
        key: &[u8],
        tuple: &Tuple,
        action: &UndoAction,
    ) -> SmallResult {
        let space = self.fil.space(table.space)?;
        let stored = externalize_tuple(
            space.ext(),
            tuple,
            self.config.extern_threshold,
            self.config.extern_prefix,
        )?;
        let row = StoredRow::new(trx.id(), &stored)?;
        if let Err(e) = self.trx_sys.add_undo(trx, table.id, action) {
            self.free_externs(table, &row)?;
            return Err(e);
        }

        self.clustered_tree(table)?.insert(key, &row.to_bytes())?;
        for index in Self::secondary_indexes(table) {
            let entry = secondary_key(table, index, tuple, key)?;
            self.tree(index.id)?.insert(&entry, key)?;
        }
        Ok(())
    }

    /// Insert a row. A live row with the same key is a `Duplicate`; a
    /// delete-marked one is written over.
    pub fn insert(&self, trx: &mut Transaction, table: &str, tuple: &Tuple) -> SmallResult {
        let def = self.lock_for_change(trx, table)?;
        def.check_tuple(tuple)?;
        let row_id = if def.uses_row_id() {
            Some(self.dict.alloc_row_id()?)
        } else {
            None
        };
        let key = row_key(&def, tuple, row_id)?;
        self.lock_row(trx, &def, &key)?;
        self.check_unique(trx, &def, tuple, &key)?;

        let _latch = self.purge_latch.rl();
        let action = match self.clustered_tree(&def)?.search(&key)? {
            Some(bytes) => {
                let old = StoredRow::parse(&bytes)?;
                if !old.deleted {
                    return Err(SmallError::new(
                        ErrorKind::Duplicate,
                        &format!("duplicate primary key in {}", def.name),
                    ));
                }
                UndoAction::Reinsert { key: key.clone(), before: bytes }
            }
            None => UndoAction::Insert { key: key.clone() },
        };
        self.write_version(trx, &def, &key, tuple, &action)?;
        debug!("{} inserted into {}", trx, def.name);
        Ok(())
    }

    /// Replace the row with the key values `key` by `tuple`. The key
    /// columns cannot change.
    pub fn update(&self, trx: &mut Transaction, table: &str, key: &Tuple, tuple: &Tuple) -> SmallResult {
        let def = self.lock_for_change(trx, table)?;
        def.check_tuple(tuple)?;
        let key = key_from_values(&def, key)?;
        if !def.uses_row_id() && row_key(&def, tuple, None)? != key {
            return Err(SmallError::invalid(&format!(
                "update of {} changes the primary key",
                def.name
            )));
        }
        self.lock_row(trx, &def, &key)?;
        self.check_unique(trx, &def, tuple, &key)?;

        let _latch = self.purge_latch.rl();
        let before = self.current_row(&def, &key)?;
        let action = UndoAction::Update {
            key: key.clone(),
            before: before.to_bytes(),
        };
        self.write_version(trx, &def, &key, tuple, &action)?;
        debug!("{} updated a row of {}", trx, def.name);
        Ok(())
    }

    /// Delete-mark the row with the key values `key`. The row is removed
    /// physically by purge once no reader can see it.
    pub fn delete(&self, trx: &mut Transaction, table: &str, key: &Tuple) -> SmallResult {
        let def = self.lock_for_change(trx, table)?;
        let key = key_from_values(&def, key)?;
        self.lock_row(trx, &def, &key)?;

        let _latch = self.purge_latch.rl();
        let before = self.current_row(&def, &key)?;
        let action = UndoAction::Delete {
            key: key.clone(),
            before: before.to_bytes(),
        };
        self.trx_sys.add_undo(trx, def.id, &action)?;
        self.clustered_tree(&def)?
            .insert(&key, &before.delete_marked(trx.id()).to_bytes())?;
        debug!("{} deleted a row of {}", trx, def.name);
        Ok(())
    }

    /// The newest version of a live row.
    fn current_row(&self, table: &TableDef, key: &[u8]) -> Result<StoredRow, SmallError> {
        match self.clustered_tree(table)?.search(key)? {
            Some(bytes) => {
                let row = StoredRow::parse(&bytes)?;
                if row.deleted {
                    Err(SmallError::not_found(&format!("row not found in {}", table.name)))
                } else {
                    Ok(row)
                }
            }
            None => Err(SmallError::not_found(&format!("row not found in {}", table.name))),
        }
    }

    // ---------------------------------------------------------------
    // consistent reads
    // ---------------------------------------------------------------

    fn lock_for_read(&self, trx: &mut Transaction, table: &str) -> Result<(TableDef, ReadView), SmallError> {
        self.activate(trx)?;
        let view = self.trx_sys.assign_read_view(trx).clone();
        self.locks.acquire_table(trx.id(), table, LockMode::IS)?;
        Ok((self.dict.table_by_name(table)?, view))
    }

    /// Walk back from `row` to the version `view` sees. None when the
    /// row did not exist for the view or was deleted in it.
    pub(crate) fn visible_version(
        &self,
        table_id: TableID,
        view: &ReadView,
        key: &[u8],
        mut row: StoredRow,
    ) -> Result<Option<StoredRow>, SmallError> {
        loop {
            if view.sees(row.trx_id) {
                return Ok(if row.deleted { None } else { Some(row) });
            }
            let writer = row.trx_id;
            let mut first_change = None;
            for rec in self.trx_sys.update_undo_of(writer) {
                if rec.table_id != table_id {
                    continue;
                }
                let action = rec.action()?;
                if action.key() == key {
                    first_change = Some(action);
                    break;
                }
            }
            let before = match first_change.as_ref().and_then(|a| a.before()) {
                Some(b) => StoredRow::parse(b)?,
                // the writer inserted the row
                None => return Ok(None),
            };
            if before.trx_id == writer {
                return Ok(None);
            }
            row = before;
        }
    }

    /// The row with the key values `key` as the transaction's read view
    /// sees it.
    pub fn get(&self, trx: &mut Transaction, table: &str, key: &Tuple) -> Result<Option<Tuple>, SmallError> {
        let (def, view) = self.lock_for_read(trx, table)?;
        let key = key_from_values(&def, key)?;
        let tree = self.clustered_tree(&def)?;
        let bytes = match self.adaptive.search_page(&tree, &key)? {
            Some(b) => b,
            None => return Ok(None),
        };
        match self.visible_version(def.id, &view, &key, StoredRow::parse(&bytes)?)? {
            Some(row) => Ok(Some(self.materialize(&def, &row)?)),
            None => Ok(None),
        }
    }

    /// Every row the read view sees, in primary key order.
    pub fn scan(&self, trx: &mut Transaction, table: &str) -> Result<Vec<Tuple>, SmallError> {
        let (def, view) = self.lock_for_read(trx, table)?;
        let mut out = Vec::new();
        for (key, bytes) in self.clustered_tree(&def)?.scan()? {
            if let Some(row) = self.visible_version(def.id, &view, &key, StoredRow::parse(&bytes)?)? {
                out.push(self.materialize(&def, &row)?);
            }
        }
        Ok(out)
    }

    /// Rows whose leading columns of the secondary index `index` equal
    /// `values`, as the read view sees them, in index order.
    pub fn index_lookup(
        &self,
        trx: &mut Transaction,
        table: &str,
        index: &str,
        values: &Tuple,
    ) -> Result<Vec<Tuple>, SmallError> {
        let (def, view) = self.lock_for_read(trx, table)?;
        let index = def
            .index(index)
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("index {} not found", index)))?;
        if values.n_fields() == 0 || values.n_fields() > index.fields.len() {
            return Err(SmallError::invalid(&format!(
                "index {} has {} fields, got {} values",
                index.name,
                index.fields.len(),
                values.n_fields()
            )));
        }
        let n = values.n_fields();
        let types = index_types(&def, &index)?;
        let prefix = encode_key(values, &types[..n]);
        let positions = def.field_positions(&index)?;

        let pks: Vec<Vec<u8>> = if index.is_clustered() {
            let tree = self.clustered_tree(&def)?;
            let mut keys = Vec::new();
            let mut cur = tree.seek(&prefix)?;
            while cur.is_valid() && cur.key().starts_with(&prefix) {
                keys.push(cur.key().to_vec());
                cur.next()?;
            }
            keys
        } else {
            let tree = self.tree(index.id)?;
            let mut keys = Vec::new();
            let mut cur = tree.seek(&prefix)?;
            while cur.is_valid() && cur.key().starts_with(&prefix) {
                keys.push(cur.value().to_vec());
                cur.next()?;
            }
            keys
        };

        let clustered = self.clustered_tree(&def)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for pk in pks {
            if !seen.insert(pk.clone()) {
                continue;
            }
            let bytes = match clustered.search(&pk)? {
                Some(b) => b,
                None => continue,
            };
            let row = match self.visible_version(def.id, &view, &pk, StoredRow::parse(&bytes)?)? {
                Some(r) => r,
                None => continue,
            };
            let tuple = self.materialize(&def, &row)?;
            let fields: Vec<_> = positions[..n].iter().map(|p| tuple.field(*p).clone()).collect();
            if encode_key(&Tuple::new(fields), &types[..n]) == prefix {
                out.push(tuple);
            }
        }
        Ok(out)
    }

    /// Close the read view of the transaction, so its next read takes a
    /// new snapshot.
    pub fn close_read_view(&self, trx: &mut Transaction) {
        self.trx_sys.close_read_view(trx)
    }

    /// Rows of the table, newest versions, delete-marked ones included.
    pub fn raw_rows(&self, table: &str) -> Result<Vec<(Vec<u8>, StoredRow)>, SmallError> {
        let def = self.dict.table_by_name(table)?;
        let _latch = self.purge_latch.rl();
        self.clustered_tree(&def)?
            .scan()?
            .into_iter()
            .map(|(k, v)| Ok((k, StoredRow::parse(&v)?)))
            .collect()
    }
}
