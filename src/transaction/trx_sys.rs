use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex},
};

use log::{debug, info};

use crate::{
    error::{ErrorKind, SmallError},
    transaction::{
        lock_sys::LockSys,
        read_view::ReadView,
        tx::{Transaction, TrxState, UndoApplier, XaState},
        undo::{RollbackSegment, RsegSys, UndoAction, UndoRecord, UndoStore},
    },
    types::{SmallResult, TableID, TrxID},
    utils::HandyMutex,
};

/// Id of the rollback segment every transaction writes to.
pub const DEFAULT_RSEG_ID: u64 = 1;

struct TrxSysInner {
    next_id: TrxID,
    active: BTreeSet<TrxID>,
    // open read views by creator
    views: BTreeMap<TrxID, ReadView>,
}

/// The transaction system: id allocator, active set, open read views
/// and the rollback segments.
pub struct TrxSys {
    inner: Mutex<TrxSysInner>,
    rsegs: RsegSys,
    rseg: Arc<RollbackSegment>,
    undo_store: Option<UndoStore>,
}

impl TrxSys {
    /// `rseg_max` caps the live undo records of the default segment, 0
    /// for no cap.
    pub fn new(undo_store: Option<UndoStore>, rseg_max: usize) -> Self {
        let rsegs = RsegSys::new();
        let rseg = rsegs.create(DEFAULT_RSEG_ID, rseg_max);
        Self {
            inner: Mutex::new(TrxSysInner {
                next_id: 1,
                active: BTreeSet::new(),
                views: BTreeMap::new(),
            }),
            rsegs,
            rseg,
            undo_store,
        }
    }

    pub fn trx_create(&self) -> Transaction {
        Transaction::new()
    }

    /// Assign an id and enroll the transaction in the active set. A
    /// finished transaction object may be begun again.
    pub fn begin(&self, trx: &mut Transaction) -> SmallResult {
        if trx.is_active() {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("{} is already active", trx),
            ));
        }
        self.start(trx);
        Ok(())
    }

    fn start(&self, trx: &mut Transaction) {
        let mut inner = self.inner.ml();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.active.insert(id);
        trx.activate(id);
        trx.xa_state = XaState::NotStarted;
        trx.xid = None;
        debug!("{} started", trx);
    }

    /// The id the next transaction will get.
    pub fn next_id(&self) -> TrxID {
        self.inner.ml().next_id
    }

    /// Move the allocator forward, used when restoring ids handed out
    /// before a restart.
    pub fn set_next_id(&self, id: TrxID) {
        let mut inner = self.inner.ml();
        if id > inner.next_id {
            inner.next_id = id;
        }
    }

    /// Give the transaction a read view if it has none yet. A transaction
    /// that has not started is begun first.
    pub fn assign_read_view<'a>(&self, trx: &'a mut Transaction) -> &'a ReadView {
        if !trx.is_active() {
            self.start(trx);
        }
        let view = match trx.read_view.take() {
            Some(view) => view,
            None => {
                let mut inner = self.inner.ml();
                let active: Vec<TrxID> = inner.active.iter().copied().collect();
                let view = ReadView::new(trx.id(), &active, inner.next_id);
                inner.views.insert(trx.id(), view.clone());
                view
            }
        };
        trx.read_view.insert(view)
    }

    pub fn close_read_view(&self, trx: &mut Transaction) {
        if trx.read_view.take().is_some() {
            self.inner.ml().views.remove(&trx.id());
        }
    }

    /// Record the inverse of a row change made by the transaction.
    pub fn add_undo(
        &self,
        trx: &mut Transaction,
        table_id: TableID,
        action: &UndoAction,
    ) -> Result<UndoRecord, SmallError> {
        if !trx.is_active() {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("{} is not active", trx),
            ));
        }

        let rec = trx.push_undo(table_id, action);
        let added = if rec.rec_type.is_insert() {
            self.rseg.add_insert_undo(trx.id(), rec.clone())
        } else {
            self.rseg.add_update_undo(trx.id(), rec.clone())
        };
        if !added {
            trx.take_undo_from(rec.undo_no);
            return Err(SmallError::new(
                ErrorKind::NoSpace,
                &format!("rollback segment {} is full", self.rseg.id()),
            ));
        }

        if let Some(store) = &self.undo_store {
            store.append(&rec)?;
        }
        Ok(rec)
    }

    /// Finish the transaction: close its read view, drop its undo
    /// records, release its locks and leave the active set.
    pub fn commit(&self, trx: &mut Transaction, locks: &LockSys) -> SmallResult {
        match trx.state() {
            TrxState::Active => {}
            TrxState::NotStarted => return Ok(()),
            state => {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("cannot commit {} in state {:?}", trx, state),
                ))
            }
        }

        if let Some(store) = &self.undo_store {
            if trx.undo_len() > 0 {
                store.sync()?;
            }
        }

        self.close_read_view(trx);
        self.rseg.trx_committed(trx.id());
        let released = locks.release_all(trx.id());
        self.inner.ml().active.remove(&trx.id());

        if trx.xa_state == XaState::Prepared {
            trx.xa_state = XaState::Committed;
        }
        debug!("{} committed, released {} locks", trx, released);
        trx.finish(TrxState::Committed);
        Ok(())
    }

    /// Undo every change of the transaction, newest first, then finish
    /// it. If an inverse action fails the transaction stays active.
    pub fn rollback(
        &self,
        trx: &mut Transaction,
        applier: &dyn UndoApplier,
        locks: &LockSys,
    ) -> SmallResult {
        match trx.state() {
            TrxState::Active => {}
            TrxState::NotStarted => return Ok(()),
            state => {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("cannot roll back {} in state {:?}", trx, state),
                ))
            }
        }

        let recs = trx.take_undo_from(0);
        let n = recs.len();
        Self::apply(trx, &recs, applier)?;

        self.close_read_view(trx);
        self.rseg.trx_rolled_back(trx.id());
        locks.release_all(trx.id());
        self.inner.ml().active.remove(&trx.id());

        if trx.xa_state != XaState::NotStarted {
            trx.xa_state = XaState::RolledBack;
        }
        debug!("{} rolled back {} undo records", trx, n);
        trx.finish(TrxState::RolledBack);
        Ok(())
    }

    fn apply(trx: &mut Transaction, recs: &[UndoRecord], applier: &dyn UndoApplier) -> SmallResult {
        for (i, rec) in recs.iter().enumerate() {
            let result = rec
                .action()
                .and_then(|action| applier.apply_undo(rec.table_id, &action));
            if let Err(e) = result {
                // keep what was not applied so the caller can retry
                for r in recs[i..].iter().rev() {
                    trx.restore_undo(r.clone());
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Take a savepoint at the current end of the undo log. A savepoint
    /// with the same name is replaced.
    pub fn savepoint(&self, trx: &mut Transaction, name: &str) -> SmallResult {
        if !trx.is_active() {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("{} is not active", trx),
            ));
        }
        trx.push_savepoint(name);
        Ok(())
    }

    /// Undo the changes made after the savepoint. The savepoint itself
    /// survives, later ones are discarded.
    pub fn rollback_to_savepoint(
        &self,
        trx: &mut Transaction,
        name: &str,
        applier: &dyn UndoApplier,
    ) -> SmallResult {
        let sp = trx.truncate_savepoints(name)?;
        let recs = trx.take_undo_from(sp.undo_no);
        Self::apply(trx, &recs, applier)?;
        self.rseg.trx_rolled_back_to(trx.id(), sp.undo_no);
        debug!(
            "{} rolled back to savepoint {} ({} records)",
            trx,
            name,
            recs.len()
        );
        Ok(())
    }

    pub fn release_savepoint(&self, trx: &mut Transaction, name: &str) -> SmallResult {
        trx.release_savepoint(name)
    }

    /// Drop a transaction that will not be used again. An active one is
    /// committed first so its locks do not leak.
    pub fn release(&self, mut trx: Transaction, locks: &LockSys) -> SmallResult {
        if trx.is_active() {
            self.commit(&mut trx, locks)?;
        }
        Ok(())
    }

    pub fn is_active(&self, id: TrxID) -> bool {
        self.inner.ml().active.contains(&id)
    }

    pub fn active_ids(&self) -> Vec<TrxID> {
        self.inner.ml().active.iter().copied().collect()
    }

    pub fn n_active(&self) -> usize {
        self.inner.ml().active.len()
    }

    pub fn n_read_views(&self) -> usize {
        self.inner.ml().views.len()
    }

    /// The open view with the lowest low limit.
    pub fn oldest_view(&self) -> Option<ReadView> {
        self.inner
            .ml()
            .views
            .values()
            .min_by_key(|v| v.low_limit())
            .cloned()
    }

    /// Whether every open read view sees the changes of `id`.
    pub fn all_views_see(&self, id: TrxID) -> bool {
        self.inner.ml().views.values().all(|v| v.sees(id))
    }

    /// A committed transaction whose changes no reader can miss any more.
    pub fn is_purgeable(&self, id: TrxID) -> bool {
        let inner = self.inner.ml();
        !inner.active.contains(&id) && inner.views.values().all(|v| v.sees(id))
    }

    pub fn rseg(&self) -> &Arc<RollbackSegment> {
        &self.rseg
    }

    pub fn rsegs(&self) -> &RsegSys {
        &self.rsegs
    }

    pub fn undo_store(&self) -> Option<&UndoStore> {
        self.undo_store.as_ref()
    }

    /// Update undo written by `trx_id`, oldest first.
    pub fn update_undo_of(&self, trx_id: TrxID) -> Vec<UndoRecord> {
        let mut recs = self.rseg.update_undo_of(trx_id);
        recs.sort_by_key(|r| r.undo_no);
        recs
    }

    /// Replay the undo store into the rollback segment. Every record
    /// belongs to a transaction of a previous run, so it is kept as
    /// history until purge. Returns the number of records loaded.
    pub fn recover_undo(&self) -> Result<usize, SmallError> {
        let store = match &self.undo_store {
            Some(s) => s,
            None => return Ok(0),
        };
        let recs = store.load()?;
        let mut max_trx = 0;
        for rec in &recs {
            let trx_id = rec.payload()?.trx_id;
            max_trx = max_trx.max(trx_id);
            self.rseg.restore(trx_id, rec.clone());
        }
        if max_trx > 0 {
            self.set_next_id(max_trx + 1);
        }
        info!("recovered {} undo records", recs.len());
        Ok(recs.len())
    }

    /// Empty the undo store once nothing in it can be needed: no
    /// transaction is active and the segment holds no update undo.
    pub fn truncate_undo_store(&self) -> Result<bool, SmallError> {
        let store = match &self.undo_store {
            Some(s) => s,
            None => return Ok(false),
        };
        if self.n_active() > 0 || self.rseg.n_update_undo() > 0 {
            return Ok(false);
        }
        store.reset()?;
        debug!("undo store {:?} truncated", store.path());
        Ok(true)
    }
}

impl fmt::Debug for TrxSys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.ml();
        write!(
            f,
            "<TrxSys next_id={} active={:?} views={}>",
            inner.next_id,
            inner.active,
            inner.views.len()
        )
    }
}
