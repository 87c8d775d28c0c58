use std::sync::Arc;

use small_innodb::{
    btree::PageTree,
    buffer::BufferPools,
    catalog::{ColumnDef, TableSchema},
    tablespace::Fil,
    tx_log::LogManager,
    types::{IndexID, SpaceID},
    utils, Config, DataType, Database,
};
use tempfile::TempDir;

/// # Conduct the initialization
///
/// - Setting up log configurations.
pub fn setup() {
    utils::init_log();
}

/// A configuration small enough that trees split after a handful of
/// rows and the pool has to evict.
pub fn small_config(dir: &TempDir) -> Config {
    let mut config = Config::new(dir.path());
    config.buffer_pool.page_size = 4096;
    config.buffer_pool.size = 64;
    config.max_recs_per_page = 8;
    config
}

pub fn new_db() -> (TempDir, Database) {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(small_config(&dir)).unwrap();
    (dir, db)
}

pub fn reopen(dir: &TempDir, db: Database) -> Database {
    db.shutdown().unwrap();
    drop(db);
    Database::open(small_config(dir)).unwrap()
}

/// `accounts(id int, owner varchar, balance int)` keyed on `id`.
pub fn accounts_schema() -> TableSchema {
    TableSchema::new(
        "accounts",
        vec![
            ColumnDef::new("id", DataType::int(8)),
            ColumnDef::new("owner", DataType::varchar(255)),
            ColumnDef::new("balance", DataType::int(8)),
        ],
        &["id"],
    )
}

pub fn create_accounts(db: &Database) {
    db.create_table(&accounts_schema()).unwrap();
}

pub const TEST_SPACE: SpaceID = 1;

/// The file layer, buffer pools and redo log without the rest of the
/// engine, over one tablespace `TEST_SPACE`.
pub struct Storage {
    pub dir: TempDir,
    pub config: Config,
    pub fil: Arc<Fil>,
    pub pools: Arc<BufferPools>,
    pub log: Arc<LogManager>,
}

pub fn new_storage(pool_frames: usize) -> Storage {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(&dir);
    config.buffer_pool.size = pool_frames;
    open_storage(dir, config)
}

pub fn open_storage(dir: TempDir, config: Config) -> Storage {
    let fil = Arc::new(Fil::new(dir.path(), config.buffer_pool.page_size));
    fil.space_open("test", TEST_SPACE).unwrap();
    let pools = Arc::new(BufferPools::new(&config.buffer_pool, &config.read_ahead, fil.clone()));
    let log = Arc::new(LogManager::open(config.log_file_path(), &config.log).unwrap());
    pools.set_flush_observer(log.clone());
    Storage {
        dir,
        config,
        fil,
        pools,
        log,
    }
}

impl Storage {
    pub fn create_tree(&self, index_id: IndexID, max_recs: usize) -> PageTree {
        PageTree::create(
            self.pools.clone(),
            self.log.clone(),
            TEST_SPACE,
            index_id,
            max_recs,
        )
        .unwrap()
    }
}

/// Drop everything but the files, leaving dirty pages unwritten.
pub fn crash(storage: Storage) -> (TempDir, Config) {
    let Storage {
        dir,
        config,
        fil,
        pools,
        log,
    } = storage;
    drop(pools);
    drop(log);
    drop(fil);
    (dir, config)
}
