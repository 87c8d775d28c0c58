//! Transactions: ids and states, record and table locks, MVCC read
//! views, undo logs and two-phase commit.

pub mod lock_sys;
pub mod lock_types;
pub mod purge;
pub mod read_view;
pub mod trx_sys;
pub mod tx;
pub mod undo;
mod wait_for_graph;
pub mod xa;

pub use lock_sys::LockSys;
pub use lock_types::{
    rec_lock_conflicts, Lock, LockFlags, LockId, LockMode, LockStatus, LockTarget, RecordKey,
    RowKey,
};
pub use purge::{purge, purge_records, undo_must_exist};
pub use read_view::ReadView;
pub use trx_sys::{TrxSys, DEFAULT_RSEG_ID};
pub use tx::{Savepoint, Transaction, TrxState, UndoApplier, XaState, Xid};
