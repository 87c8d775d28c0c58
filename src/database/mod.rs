//! The engine context. A `Database` owns every subsystem: the file
//! layer, the buffer pools, the redo log with its writer thread, the
//! lock and transaction systems, the adaptive search cache and the
//! dictionary. Tests open one per temporary directory.

mod dml;
mod purge;
pub mod row;
mod undo_apply;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, RwLock},
};

use log::{debug, info, warn};

pub use purge::PurgeStats;
pub use row::StoredRow;
use row::{secondary_key, secondary_prefix};

use crate::{
    btree::{AdaptiveSearch, PageTree},
    buffer::BufferPools,
    catalog::{Dictionary, IndexDef, TableDef, TableSchema},
    config::Config,
    error::{ErrorKind, SmallError},
    record::{extern_free, extern_ref::resolve_tuple, Tuple},
    tablespace::Fil,
    transaction::{undo::UndoStore, LockMode, LockSys, TrxSys},
    tx_log::{recover, LogManager, RecvCounters},
    types::{IndexID, Lsn, SmallResult, TableID},
    utils::{HandyMutex, HandyRwLock},
};

/// The log is checkpointed before a change once it is fuller than this.
const LOG_FREE_CHECK_RATIO: f64 = 0.75;

/// Name of the tablespace holding the indexes of a table.
pub fn space_name(table_id: TableID) -> String {
    format!("t{}", table_id)
}

pub struct Database {
    config: Config,

    fil: Arc<Fil>,
    pools: Arc<BufferPools>,
    log: Arc<LogManager>,
    locks: LockSys,
    trx_sys: TrxSys,
    adaptive: AdaptiveSearch,
    dict: Dictionary,

    trees: RwLock<HashMap<IndexID, Arc<PageTree>>>,

    // shared by row changes, exclusive for purge
    purge_latch: RwLock<()>,
    ddl: Mutex<()>,

    recovery: RecvCounters,
}

pub type Engine = Database;

impl Database {
    /// Open the engine on `config.data_dir`: load the dictionary, open
    /// the table spaces, replay the redo log past the last checkpoint,
    /// then reload the undo store and the index trees.
    pub fn open(config: Config) -> Result<Self, SmallError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let fil = Arc::new(Fil::new(&config.data_dir, config.buffer_pool.page_size));
        let dict = Dictionary::open(config.dict_file_path())?;
        for table in dict.tables() {
            fil.space_open(&space_name(table.id), table.space)?;
        }

        let pools = Arc::new(BufferPools::new(
            &config.buffer_pool,
            &config.read_ahead,
            fil.clone(),
        ));
        let log = match LogManager::open(config.log_file_path(), &config.log) {
            Ok(log) => Arc::new(log),
            Err(e) => {
                e.show_backtrace();
                return Err(e);
            }
        };
        pools.set_flush_observer(log.clone());

        let recovery = recover(&log, &*pools)?;

        let undo_store = if config.undo_enabled {
            Some(UndoStore::open(config.undo_file_path())?)
        } else {
            None
        };
        let trx_sys = TrxSys::new(undo_store, 0);
        trx_sys.recover_undo()?;
        trx_sys.set_next_id(dict.trx_id_floor());

        let db = Self {
            locks: LockSys::new(&config.lock),
            adaptive: AdaptiveSearch::new(&config.adaptive_search),
            config,
            fil,
            pools,
            log,
            trx_sys,
            dict,
            trees: RwLock::new(HashMap::new()),
            purge_latch: RwLock::new(()),
            ddl: Mutex::new(()),
            recovery,
        };
        db.open_trees()?;
        db.checkpoint()?;
        info!(
            "database opened at {:?}: {} tables, lsn {}",
            db.config.data_dir,
            db.dict.n_tables(),
            db.log.lsn()
        );
        Ok(db)
    }

    fn open_trees(&self) -> SmallResult {
        for table in self.dict.tables() {
            for index in &table.indexes {
                if index.has_root() {
                    let tree = PageTree::open(
                        self.pools.clone(),
                        self.log.clone(),
                        table.space,
                        index.root_page,
                        self.config.max_recs_per_page,
                    )?;
                    self.trees.wl().insert(index.id, Arc::new(tree));
                } else {
                    warn!(
                        "index {}.{} has no tree, creating an empty one",
                        table.name, index.name
                    );
                    self.create_tree(&table, index)?;
                }
            }
        }
        Ok(())
    }

    fn create_tree(&self, table: &TableDef, index: &IndexDef) -> Result<Arc<PageTree>, SmallError> {
        let tree = Arc::new(PageTree::create(
            self.pools.clone(),
            self.log.clone(),
            table.space,
            index.id,
            self.config.max_recs_per_page,
        )?);
        // the dictionary must not point at pages the log could lose
        self.log.flush_up_to(self.log.lsn())?;
        self.dict.set_index_root(table.id, index.id, tree.root_ptr())?;
        self.trees.wl().insert(index.id, tree.clone());
        Ok(tree)
    }

    // ---------------------------------------------------------------
    // accessors
    // ---------------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fil(&self) -> &Arc<Fil> {
        &self.fil
    }

    pub fn pools(&self) -> &Arc<BufferPools> {
        &self.pools
    }

    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn locks(&self) -> &LockSys {
        &self.locks
    }

    pub fn trx_sys(&self) -> &TrxSys {
        &self.trx_sys
    }

    pub fn adaptive(&self) -> &AdaptiveSearch {
        &self.adaptive
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    /// Counters of the redo recovery run at open.
    pub fn recovery(&self) -> RecvCounters {
        self.recovery
    }

    pub fn tree(&self, index_id: IndexID) -> Result<Arc<PageTree>, SmallError> {
        self.trees
            .rl()
            .get(&index_id)
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("no tree for index {}", index_id)))
    }

    pub(crate) fn clustered_tree(&self, table: &TableDef) -> Result<Arc<PageTree>, SmallError> {
        self.tree(table.clustered_index()?.id)
    }

    pub fn table(&self, name: &str) -> Result<TableDef, SmallError> {
        self.dict.table_by_name(name)
    }

    // ---------------------------------------------------------------
    // DDL
    // ---------------------------------------------------------------

    /// Run `f` inside an internal transaction holding an X lock on the
    /// table, so it waits for the transactions using the table.
    fn with_table_x<R, F>(&self, table: &str, f: F) -> Result<R, SmallError>
    where
        F: FnOnce() -> Result<R, SmallError>,
    {
        let _ddl = self.ddl.ml();
        let mut trx = self.trx_create();
        self.begin(&mut trx)?;
        let result = self
            .locks
            .acquire_table(trx.id(), table, LockMode::X)
            .and_then(|_| f());
        self.trx_sys.commit(&mut trx, &self.locks)?;
        result
    }

    /// Register the table, create its tablespace and the tree of its
    /// clustered index.
    pub fn create_table(&self, schema: &TableSchema) -> Result<TableDef, SmallError> {
        let _ddl = self.ddl.ml();
        let def = self.dict.create_table(schema)?;

        let built = self
            .fil
            .space_create(&space_name(def.id), def.space)
            .and_then(|_| {
                let index = def.clustered_index()?;
                self.create_tree(&def, index)
            });
        if let Err(e) = built {
            warn!("create table {} failed: {}", def.name, e);
            self.dict.drop_table(&def.name)?;
            if self.fil.space(def.space).is_ok() {
                self.pools.drop_space(def.space);
                self.fil.space_delete(def.space)?;
            }
            return Err(e);
        }
        info!("created table {} (id {})", def.name, def.id);
        self.dict.table_by_id(def.id)
    }

    /// Remove the table with its indexes and its tablespace.
    pub fn drop_table(&self, name: &str) -> Result<TableDef, SmallError> {
        self.with_table_x(name, || {
            let def = self.dict.drop_table(name)?;
            {
                let mut trees = self.trees.wl();
                for index in &def.indexes {
                    trees.remove(&index.id);
                    self.adaptive.drop_index(index.id);
                }
            }
            self.pools.drop_space(def.space);
            self.fil.space_delete(def.space)?;
            info!("dropped table {}", name);
            Ok(def)
        })
    }

    pub fn rename_table(&self, old: &str, new: &str) -> SmallResult {
        self.with_table_x(old, || self.dict.rename_table(old, new))
    }

    /// Add a secondary index and fill it from the current rows. Fails
    /// with `Duplicate` when a unique index would see two live rows with
    /// the same values.
    pub fn create_index(
        &self,
        table: &str,
        name: &str,
        fields: &[&str],
        unique: bool,
    ) -> Result<IndexDef, SmallError> {
        self.with_table_x(table, || {
            let index = self.dict.create_index(table, name, fields, unique)?;
            let def = self.dict.table_by_name(table)?;
            let filled = self
                .create_tree(&def, &index)
                .and_then(|tree| self.fill_index(&def, &index, &tree));
            if let Err(e) = filled {
                warn!("create index {}.{} failed: {}", table, name, e);
                self.discard_index(table, &index)?;
                return Err(e);
            }
            debug!("created index {}.{} on {:?}", table, name, fields);
            Ok(index)
        })
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<IndexDef, SmallError> {
        self.with_table_x(table, || {
            let index = self
                .dict
                .table_by_name(table)?
                .index(name)
                .cloned()
                .ok_or_else(|| SmallError::not_found(&format!("index {} not found", name)))?;
            if index.is_clustered() {
                return Err(SmallError::invalid(&format!(
                    "cannot drop the clustered index of {}",
                    table
                )));
            }
            self.discard_index(table, &index)?;
            Ok(index)
        })
    }

    fn discard_index(&self, table: &str, index: &IndexDef) -> SmallResult {
        self.dict.drop_index(table, &index.name)?;
        let tree = self.trees.wl().remove(&index.id);
        self.adaptive.drop_index(index.id);
        if let Some(tree) = tree {
            tree.destroy()?;
        }
        Ok(())
    }

    /// Add an entry for the newest version of every live row.
    fn fill_index(&self, def: &TableDef, index: &IndexDef, tree: &PageTree) -> SmallResult {
        let clustered = self.clustered_tree(def)?;
        let positions = def.field_positions(index)?;
        let mut seen = HashSet::new();
        let mut n = 0;
        for (key, bytes) in clustered.scan()? {
            let row = StoredRow::parse(&bytes)?;
            if row.deleted {
                continue;
            }
            let tuple = self.materialize(def, &row)?;
            if index.is_unique() && !positions.iter().any(|p| tuple.field(*p).is_null()) {
                let prefix = secondary_prefix(def, index, &tuple)?;
                if !seen.insert(prefix) {
                    return Err(SmallError::new(
                        ErrorKind::Duplicate,
                        &format!("duplicate entry for unique index {}.{}", def.name, index.name),
                    ));
                }
            }
            tree.insert(&secondary_key(def, index, &tuple, &key)?, &key)?;
            n += 1;
        }
        debug!("index {}.{} filled with {} entries", def.name, index.name, n);
        Ok(())
    }

    // ---------------------------------------------------------------
    // log space and checkpoints
    // ---------------------------------------------------------------

    /// Purge, write every dirty page, then move the checkpoint up to the
    /// oldest change still only in memory. The undo store is emptied
    /// when nothing in it is needed any more.
    pub fn checkpoint(&self) -> Result<Lsn, SmallError> {
        self.purge()?;
        self.log.flush_up_to(self.log.lsn())?;
        self.pools.flush_all()?;
        self.fil.sync_all()?;
        let limit = self.pools.min_oldest_lsn().unwrap_or(Lsn::MAX);
        let lsn = self.log.checkpoint_up_to(limit)?;
        self.trx_sys.truncate_undo_store()?;
        debug!("database checkpoint at lsn {}", lsn);
        Ok(lsn)
    }

    /// Make room in the log before a change.
    pub fn log_free_check(&self) -> SmallResult {
        if self.log.fill_ratio() > LOG_FREE_CHECK_RATIO {
            debug!("log {:.0}% full, checkpointing", self.log.fill_ratio() * 100.0);
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Checkpoint and stop the log writer. Active transactions are left
    /// as they are.
    pub fn shutdown(&self) -> SmallResult {
        if self.trx_sys.n_active() > 0 {
            warn!(
                "shutting down with {} active transactions",
                self.trx_sys.n_active()
            );
        }
        self.checkpoint()?;
        self.log.shutdown()?;
        self.fil.sync_all()?;
        info!("database at {:?} shut down", self.config.data_dir);
        Ok(())
    }

    // ---------------------------------------------------------------
    // extern fields
    // ---------------------------------------------------------------

    /// Release the extern fields of a stored row. Ids already gone are
    /// skipped. Returns the number released.
    pub(crate) fn free_externs(&self, table: &TableDef, row: &StoredRow) -> Result<usize, SmallError> {
        let space = match self.fil.space(table.space) {
            Ok(s) => s,
            Err(e) if e.is(ErrorKind::NotFound) => return Ok(0),
            Err(e) => return Err(e),
        };
        let tuple = row.tuple(table.n_cols())?;
        let mut n = 0;
        for field in tuple.fields().iter().filter(|f| f.is_external()) {
            match extern_free(space.ext(), field) {
                Ok(()) => n += 1,
                Err(e) if e.is(ErrorKind::NotFound) => {
                    debug!("extern of {} already released: {}", table.name, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    /// Columns of a stored row with extern fields read back.
    pub(crate) fn materialize(&self, table: &TableDef, row: &StoredRow) -> Result<Tuple, SmallError> {
        let tuple = row.tuple(table.n_cols())?;
        if !tuple.fields().iter().any(|f| f.is_external()) {
            return Ok(tuple);
        }
        let space = self.fil.space(table.space)?;
        resolve_tuple(space.ext(), &tuple)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Database {:?} tables={} lsn={} {:?}>",
            self.config.data_dir,
            self.dict.n_tables(),
            self.log.lsn(),
            self.trx_sys
        )
    }
}
