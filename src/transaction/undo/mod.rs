pub mod record;
pub mod rseg;
pub mod store;
pub mod undo_log;

pub use record::{UndoAction, UndoPayload, UndoRecord, UndoType, UNDO_RECORD_HEADER_SIZE};
pub use rseg::{RollbackSegment, RsegEntry, RsegSys};
pub use store::UndoStore;
pub use undo_log::{UndoLog, UndoLogKind};
