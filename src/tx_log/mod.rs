//! The redo log: file header, record framing, the buffered log with its
//! writer thread, and crash recovery.

pub mod header;
pub mod log_manager;
pub mod record;
pub mod recovery;

pub use header::{LogHeader, LOG_HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
pub use log_manager::{LogCounters, LogManager, LogWrite};
pub use record::{decode_record, encode_record, LogRecord, LOG_RECORD_HEADER_SIZE, SINGLE_REC_FLAG};
pub use recovery::{recover, RecvCounters, RecvPageStore, RecvRecord, RecvSys};
