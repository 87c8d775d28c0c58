//! Two-phase commit on top of the transaction system.

use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    transaction::{
        lock_sys::LockSys,
        trx_sys::TrxSys,
        tx::{Transaction, TrxState, UndoApplier, Xid, XaState},
    },
    types::SmallResult,
};

fn wrong_state(trx: &Transaction, op: &str) -> SmallError {
    SmallError::new(
        ErrorKind::InvalidState,
        &format!(
            "{}: {} is {:?} (xa {:?})",
            op,
            trx,
            trx.state(),
            trx.xa_state()
        ),
    )
}

impl TrxSys {
    /// Attach a global transaction id. The transaction is begun if it
    /// has not started yet.
    pub fn xa_start(&self, trx: &mut Transaction, xid: Xid) -> SmallResult {
        if xid.is_empty() {
            return Err(SmallError::invalid("xa_start: empty xid"));
        }
        match trx.state() {
            TrxState::NotStarted => self.begin(trx)?,
            TrxState::Active => {}
            _ => return Err(wrong_state(trx, "xa_start")),
        }
        if trx.xa_state() != XaState::NotStarted {
            return Err(wrong_state(trx, "xa_start"));
        }
        trx.xid = Some(xid);
        trx.xa_state = XaState::Active;
        Ok(())
    }

    /// First phase: the transaction promises to commit. Its undo is
    /// made durable so the decision can be carried out later.
    pub fn xa_prepare(&self, trx: &mut Transaction) -> SmallResult {
        if !trx.is_active() || trx.xa_state() != XaState::Active {
            return Err(wrong_state(trx, "xa_prepare"));
        }
        if let Some(store) = self.undo_store() {
            store.sync()?;
        }
        trx.xa_state = XaState::Prepared;
        debug!("{} prepared as {:?}", trx, trx.xid());
        Ok(())
    }

    pub fn xa_commit(&self, trx: &mut Transaction, locks: &LockSys) -> SmallResult {
        if trx.xa_state() != XaState::Prepared {
            return Err(wrong_state(trx, "xa_commit"));
        }
        self.commit(trx, locks)
    }

    pub fn xa_rollback(
        &self,
        trx: &mut Transaction,
        applier: &dyn UndoApplier,
        locks: &LockSys,
    ) -> SmallResult {
        match trx.xa_state() {
            XaState::Prepared | XaState::Active => self.rollback(trx, applier, locks),
            _ => Err(wrong_state(trx, "xa_rollback")),
        }
    }
}
