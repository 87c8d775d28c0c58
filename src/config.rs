use std::{path::PathBuf, time::Duration};

pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Options recognized by the engine. Every subsystem receives the part
/// of this struct it cares about when the `Database` is opened.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory of the log, dictionary, undo and data files.
    pub data_dir: PathBuf,

    pub log: LogConfig,
    pub buffer_pool: BufferPoolConfig,
    pub read_ahead: ReadAheadConfig,
    pub lock: LockConfig,
    pub adaptive_search: AdaptiveSearchConfig,

    /// Fields longer than this are moved to the extern store.
    pub extern_threshold: usize,
    /// Bytes of an externally stored field kept inline.
    pub extern_prefix: usize,

    /// Persist undo records to `ib_undo.log`.
    pub undo_enabled: bool,

    /// Records per page of the page-backed trees.
    pub max_recs_per_page: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Open (or create) the log file on startup. A disabled log still
    /// assigns LSNs but never writes them anywhere.
    pub enabled: bool,
    pub file_size: u64,
    pub buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Frames per pool instance.
    pub size: usize,
    pub page_size: usize,
    pub instances: usize,
    /// Percentage of the LRU list kept as the "old" sub-list.
    pub old_ratio: usize,
}

#[derive(Debug, Clone)]
pub struct ReadAheadConfig {
    pub enabled: bool,
    /// Prefetch window size, in pages.
    pub area: usize,
    /// Consecutive accesses before a prefetch is issued.
    pub threshold: usize,
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub wait_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AdaptiveSearchConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_size: 4 << 20,
            buffer_size: 8 << 20,
        }
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            size: 256,
            page_size: DEFAULT_PAGE_SIZE,
            instances: 1,
            old_ratio: 37,
        }
    }
}

impl Default for ReadAheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            area: 64,
            threshold: 32,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(50),
        }
    }
}

impl Default for AdaptiveSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log: LogConfig::default(),
            buffer_pool: BufferPoolConfig::default(),
            read_ahead: ReadAheadConfig::default(),
            lock: LockConfig::default(),
            adaptive_search: AdaptiveSearchConfig::default(),
            extern_threshold: 32,
            extern_prefix: 16,
            undo_enabled: true,
            max_recs_per_page: 64,
        }
    }
}

impl Config {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.data_dir.join("ib_logfile0")
    }

    pub fn dict_file_path(&self) -> PathBuf {
        self.data_dir.join("ib_dict.sys")
    }

    pub fn undo_file_path(&self) -> PathBuf {
        self.data_dir.join("ib_undo.log")
    }

    pub fn space_file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.ibd", name))
    }
}
