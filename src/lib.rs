pub mod btree;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod io;
pub mod mtr;
pub mod page;
pub mod record;
pub mod tablespace;
pub mod transaction;
pub mod tx_log;
pub mod types;
pub mod utils;

mod log;

pub use config::Config;
pub use database::{Database, Engine};
pub use error::{ErrorKind, SmallError};
pub use record::{DataType, Field, Tuple};
pub use transaction::Transaction;
