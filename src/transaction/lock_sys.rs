use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use bit_vec::BitVec;
use log::debug;

use crate::{
    config::LockConfig,
    error::{ErrorKind, SmallError},
    transaction::{
        lock_types::{
            rec_lock_conflicts, Lock, LockFlags, LockId, LockMode, LockStatus, LockTarget,
            RecordKey, RowKey,
        },
        wait_for_graph::WaitForGraph,
    },
    types::{PageNo, SpaceID, TrxID},
    utils::HandyMutex,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    Table(String),
    Page(SpaceID, PageNo),
    Row(RowKey),
}

impl QueueKey {
    fn of(target: &LockTarget) -> QueueKey {
        match target {
            LockTarget::Table(name) => QueueKey::Table(name.clone()),
            LockTarget::Record { space, page_no, .. } => QueueKey::Page(*space, *page_no),
            LockTarget::Row(row) => QueueKey::Row(row.clone()),
        }
    }
}

struct LockTables {
    next_id: LockId,
    locks: HashMap<LockId, Lock>,
    table_hash: HashMap<String, Vec<LockId>>,
    record_hash: HashMap<(SpaceID, PageNo), Vec<LockId>>,
    row_hash: HashMap<RowKey, Vec<LockId>>,
    trx_locks: HashMap<TrxID, HashSet<LockId>>,
    wait_for_graph: WaitForGraph,
}

impl LockTables {
    fn queue(&self, key: &QueueKey) -> Option<&Vec<LockId>> {
        match key {
            QueueKey::Table(name) => self.table_hash.get(name),
            QueueKey::Page(space, page_no) => self.record_hash.get(&(*space, *page_no)),
            QueueKey::Row(row) => self.row_hash.get(row),
        }
    }

    fn queue_locks(&self, key: &QueueKey) -> Vec<&Lock> {
        self.queue(key)
            .map(|q| q.iter().filter_map(|id| self.locks.get(id)).collect())
            .unwrap_or_default()
    }

    fn add(&mut self, key: QueueKey, trx: TrxID, mode: LockMode, flags: LockFlags, target: LockTarget) -> LockId {
        let id = self.next_id;
        self.next_id += 1;
        self.locks.insert(
            id,
            Lock {
                id,
                trx,
                mode,
                flags,
                target,
            },
        );
        match key {
            QueueKey::Table(name) => self.table_hash.entry(name).or_default().push(id),
            QueueKey::Page(space, page_no) => {
                self.record_hash.entry((space, page_no)).or_default().push(id)
            }
            QueueKey::Row(row) => self.row_hash.entry(row).or_default().push(id),
        }
        self.trx_locks.entry(trx).or_default().insert(id);
        id
    }

    fn remove(&mut self, id: LockId) -> Option<Lock> {
        let lock = self.locks.remove(&id)?;
        let key = QueueKey::of(&lock.target);
        let empty = match &key {
            QueueKey::Table(name) => self.table_hash.get_mut(name).map(|q| {
                q.retain(|l| *l != id);
                q.is_empty()
            }),
            QueueKey::Page(space, page_no) => self.record_hash.get_mut(&(*space, *page_no)).map(|q| {
                q.retain(|l| *l != id);
                q.is_empty()
            }),
            QueueKey::Row(row) => self.row_hash.get_mut(row).map(|q| {
                q.retain(|l| *l != id);
                q.is_empty()
            }),
        };
        if empty == Some(true) {
            match key {
                QueueKey::Table(name) => {
                    self.table_hash.remove(&name);
                }
                QueueKey::Page(space, page_no) => {
                    self.record_hash.remove(&(space, page_no));
                }
                QueueKey::Row(row) => {
                    self.row_hash.remove(&row);
                }
            }
        }
        if let Some(set) = self.trx_locks.get_mut(&lock.trx) {
            set.remove(&id);
            if set.is_empty() {
                self.trx_locks.remove(&lock.trx);
            }
        }
        Some(lock)
    }

    /// Granted locks of other transactions that conflict with the
    /// request.
    fn blockers(
        &self,
        key: &QueueKey,
        trx: TrxID,
        mode: LockMode,
        flags: LockFlags,
        heap_no: Option<u16>,
    ) -> Vec<TrxID> {
        let mut out = Vec::new();
        for lock in self.queue_locks(key) {
            if lock.trx == trx || lock.is_waiting() {
                continue;
            }
            let held_flags = lock.flags.without(LockFlags::WAIT);
            let conflict = match (key, heap_no) {
                (QueueKey::Row(_), _) => rec_lock_conflicts(mode, flags, lock.mode, held_flags),
                (_, None) => !mode.compatible(lock.mode),
                (_, Some(h)) => lock.has_bit(h) && rec_lock_conflicts(mode, flags, lock.mode, held_flags),
            };
            if conflict && !out.contains(&lock.trx) {
                out.push(lock.trx);
            }
        }
        out
    }
}

/// The lock system: table and record lock queues, the per-transaction
/// lock sets and the wait-for graph, all under one mutex. Waiters block
/// on a shared condition variable and re-check their queue on wake.
pub struct LockSys {
    tables: Mutex<LockTables>,
    wake: Condvar,
    wait_timeout: Mutex<Duration>,
}

impl LockSys {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            tables: Mutex::new(LockTables {
                next_id: 1,
                locks: HashMap::new(),
                table_hash: HashMap::new(),
                record_hash: HashMap::new(),
                row_hash: HashMap::new(),
                trx_locks: HashMap::new(),
                wait_for_graph: WaitForGraph::new(),
            }),
            wake: Condvar::new(),
            wait_timeout: Mutex::new(config.wait_timeout),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        *self.wait_timeout.ml()
    }

    pub fn set_wait_timeout(&self, timeout: Duration) {
        *self.wait_timeout.ml() = timeout;
    }

    /// Request a table lock without blocking. On `Wait` a waiting lock
    /// is queued; pass its id to `wait` to block until it is granted.
    pub fn lock_table(&self, trx: TrxID, table: &str, mode: LockMode) -> (Option<LockId>, LockStatus) {
        let key = QueueKey::Table(table.to_string());
        let mut tables = self.tables.ml();

        let own = tables
            .queue_locks(&key)
            .into_iter()
            .find(|l| l.trx == trx && !l.is_waiting())
            .map(|l| (l.id, l.mode));
        if let Some((id, held)) = own {
            if held.stronger_or_eq(mode) {
                return (Some(id), LockStatus::Granted);
            }
        }

        let blockers = tables.blockers(&key, trx, mode, LockFlags::NONE, None);
        if !blockers.is_empty() {
            return Self::enqueue_waiter(
                &mut tables,
                key,
                trx,
                mode,
                LockFlags::NONE,
                LockTarget::Table(table.to_string()),
                blockers,
            );
        }

        tables.wait_for_graph.remove_waiter(trx);
        match own {
            Some((id, _)) => {
                // upgrade in place
                if let Some(lock) = tables.locks.get_mut(&id) {
                    lock.mode = mode;
                }
                (Some(id), LockStatus::Granted)
            }
            None => {
                let id = tables.add(key, trx, mode, LockFlags::NONE, LockTarget::Table(table.to_string()));
                (Some(id), LockStatus::Granted)
            }
        }
    }

    /// Request a record lock without blocking.
    pub fn lock_rec(
        &self,
        trx: TrxID,
        rec: RecordKey,
        mode: LockMode,
        flags: LockFlags,
    ) -> (Option<LockId>, LockStatus) {
        let flags = flags.without(LockFlags::WAIT);
        let key = QueueKey::Page(rec.space, rec.page_no);
        let mut tables = self.tables.ml();

        let blockers = tables.blockers(&key, trx, mode, flags, Some(rec.heap_no));
        if !blockers.is_empty() {
            let mut heaps = BitVec::from_elem(rec.heap_no as usize + 1, false);
            heaps.set(rec.heap_no as usize, true);
            return Self::enqueue_waiter(
                &mut tables,
                key,
                trx,
                mode,
                flags,
                LockTarget::Record {
                    space: rec.space,
                    page_no: rec.page_no,
                    heaps,
                },
                blockers,
            );
        }
        tables.wait_for_graph.remove_waiter(trx);

        let mine: Vec<(LockId, LockFlags)> = tables
            .queue_locks(&key)
            .into_iter()
            .filter(|l| l.trx == trx && !l.is_waiting())
            .map(|l| (l.id, l.flags))
            .collect();

        // a gap lock held on this record alone turns into a next-key
        // lock in place
        if flags.has_record() && flags.has_gap() {
            for (id, f) in &mine {
                if *f == LockFlags::GAP {
                    if let Some(l) = tables.locks.get_mut(id) {
                        if l.has_bit(rec.heap_no) && l.heap_nos().len() == 1 {
                            l.flags = flags;
                            if !l.mode.stronger_or_eq(mode) {
                                l.mode = mode;
                            }
                            return (Some(*id), LockStatus::Granted);
                        }
                    }
                }
            }
        }

        if let Some((id, _)) = mine.iter().find(|(_, f)| *f == flags) {
            if let Some(lock) = tables.locks.get_mut(id) {
                lock.set_bit(rec.heap_no);
                if !lock.mode.stronger_or_eq(mode) {
                    lock.mode = mode;
                }
            }
            return (Some(*id), LockStatus::Granted);
        }

        let mut heaps = BitVec::from_elem(rec.heap_no as usize + 1, false);
        heaps.set(rec.heap_no as usize, true);
        let id = tables.add(
            key,
            trx,
            mode,
            flags,
            LockTarget::Record {
                space: rec.space,
                page_no: rec.page_no,
                heaps,
            },
        );
        (Some(id), LockStatus::Granted)
    }

    /// Request a lock on a row named by its key, without blocking.
    pub fn lock_row(
        &self,
        trx: TrxID,
        row: &RowKey,
        mode: LockMode,
        flags: LockFlags,
    ) -> (Option<LockId>, LockStatus) {
        let flags = flags.without(LockFlags::WAIT);
        let key = QueueKey::Row(row.clone());
        let mut tables = self.tables.ml();

        let blockers = tables.blockers(&key, trx, mode, flags, None);
        if !blockers.is_empty() {
            return Self::enqueue_waiter(
                &mut tables,
                key,
                trx,
                mode,
                flags,
                LockTarget::Row(row.clone()),
                blockers,
            );
        }
        tables.wait_for_graph.remove_waiter(trx);

        let own = tables
            .queue_locks(&key)
            .into_iter()
            .find(|l| l.trx == trx && !l.is_waiting() && l.flags == flags)
            .map(|l| l.id);
        match own {
            Some(id) => {
                if let Some(lock) = tables.locks.get_mut(&id) {
                    if !lock.mode.stronger_or_eq(mode) {
                        lock.mode = mode;
                    }
                }
                (Some(id), LockStatus::Granted)
            }
            None => {
                let id = tables.add(key, trx, mode, flags, LockTarget::Row(row.clone()));
                (Some(id), LockStatus::Granted)
            }
        }
    }

    fn enqueue_waiter(
        tables: &mut LockTables,
        key: QueueKey,
        trx: TrxID,
        mode: LockMode,
        flags: LockFlags,
        target: LockTarget,
        blockers: Vec<TrxID>,
    ) -> (Option<LockId>, LockStatus) {
        for b in &blockers {
            tables.wait_for_graph.add_edge(trx, *b);
        }
        if tables.wait_for_graph.in_cycle(trx) {
            tables.wait_for_graph.remove_waiter(trx);
            debug!(
                "deadlock: trx {} requesting {} on {:?} waits for {:?}",
                trx, mode, key, blockers
            );
            return (None, LockStatus::Deadlock);
        }
        debug!(
            "trx {} waits for {:?} to get {} on {:?}",
            trx, blockers, mode, key
        );
        let id = tables.add(key, trx, mode, flags | LockFlags::WAIT, target);
        (Some(id), LockStatus::Wait)
    }

    /// Block until the waiting lock is granted and return the id of the
    /// granted lock, which may be an older lock of the same transaction
    /// the waiter was folded into. On timeout the waiter is removed and
    /// `LockWaitTimeout` returned.
    pub fn wait(&self, trx: TrxID, lock_id: LockId) -> Result<LockId, SmallError> {
        let deadline = Instant::now() + self.wait_timeout();
        let mut tables = self.tables.ml();
        loop {
            let (key, mode, flags, heap_no) = match tables.locks.get(&lock_id) {
                Some(lock) if lock.trx == trx => {
                    if !lock.is_waiting() {
                        return Ok(lock_id);
                    }
                    (
                        QueueKey::of(&lock.target),
                        lock.mode,
                        lock.flags.without(LockFlags::WAIT),
                        lock.heap_nos().first().copied(),
                    )
                }
                _ => {
                    return Err(SmallError::new(
                        ErrorKind::InvalidState,
                        &format!("trx {} has no waiting lock {}", trx, lock_id),
                    ))
                }
            };

            let blockers = tables.blockers(&key, trx, mode, flags, heap_no);
            if blockers.is_empty() {
                let granted = Self::grant_waiter(&mut tables, lock_id);
                debug!("trx {} granted {} on {:?} after wait", trx, mode, key);
                return Ok(granted);
            }
            tables.wait_for_graph.remove_waiter(trx);
            for b in &blockers {
                tables.wait_for_graph.add_edge(trx, *b);
            }

            let now = Instant::now();
            if now >= deadline {
                tables.remove(lock_id);
                tables.wait_for_graph.remove_waiter(trx);
                drop(tables);
                self.wake.notify_all();
                let err = SmallError::new(
                    ErrorKind::LockWaitTimeout,
                    &format!("trx {} timed out waiting for {} on {:?}", trx, mode, key),
                );
                err.show_backtrace();
                return Err(err);
            }
            tables = self.wait_on(tables, deadline - now);
        }
    }

    fn wait_on<'a>(&self, guard: MutexGuard<'a, LockTables>, timeout: Duration) -> MutexGuard<'a, LockTables> {
        match self.wake.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Clear the wait flag, folding the lock into an equal granted lock
    /// of the same transaction when there is one.
    fn grant_waiter(tables: &mut LockTables, lock_id: LockId) -> LockId {
        let (trx, key, mode, flags, heap_no) = match tables.locks.get(&lock_id) {
            Some(l) => (
                l.trx,
                QueueKey::of(&l.target),
                l.mode,
                l.flags.without(LockFlags::WAIT),
                l.heap_nos().first().copied(),
            ),
            None => return lock_id,
        };
        tables.wait_for_graph.remove_waiter(trx);

        let same = tables
            .queue_locks(&key)
            .into_iter()
            .find(|l| l.id != lock_id && l.trx == trx && !l.is_waiting() && l.flags == flags)
            .map(|l| l.id);
        match same {
            Some(other) => {
                tables.remove(lock_id);
                if let Some(lock) = tables.locks.get_mut(&other) {
                    if let Some(h) = heap_no {
                        lock.set_bit(h);
                    }
                    if !lock.mode.stronger_or_eq(mode) {
                        lock.mode = mode;
                    }
                }
                other
            }
            None => {
                if let Some(lock) = tables.locks.get_mut(&lock_id) {
                    lock.flags = flags;
                }
                lock_id
            }
        }
    }

    /// Request a table lock and wait for it.
    pub fn acquire_table(&self, trx: TrxID, table: &str, mode: LockMode) -> Result<LockId, SmallError> {
        let (id, status) = self.lock_table(trx, table, mode);
        self.finish_acquire(trx, id, status, &format!("table {}", table), mode)
    }

    /// Request a record lock and wait for it.
    pub fn acquire_rec(
        &self,
        trx: TrxID,
        rec: RecordKey,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<LockId, SmallError> {
        let (id, status) = self.lock_rec(trx, rec, mode, flags);
        self.finish_acquire(trx, id, status, &format!("{:?}", rec), mode)
    }

    /// Request a row lock and wait for it.
    pub fn acquire_row(
        &self,
        trx: TrxID,
        row: &RowKey,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<LockId, SmallError> {
        let (id, status) = self.lock_row(trx, row, mode, flags);
        self.finish_acquire(trx, id, status, &format!("{:?}", row), mode)
    }

    fn finish_acquire(
        &self,
        trx: TrxID,
        id: Option<LockId>,
        status: LockStatus,
        what: &str,
        mode: LockMode,
    ) -> Result<LockId, SmallError> {
        match (status, id) {
            (LockStatus::Granted, Some(id)) => Ok(id),
            (LockStatus::Wait, Some(id)) => self.wait(trx, id),
            _ => {
                let err = SmallError::new(
                    ErrorKind::Deadlock,
                    &format!("deadlock: trx {} requesting {} on {}", trx, mode, what),
                );
                err.show_backtrace();
                Err(err)
            }
        }
    }

    pub fn unlock_table(&self, trx: TrxID, table: &str) {
        let key = QueueKey::Table(table.to_string());
        {
            let mut tables = self.tables.ml();
            let mine: Vec<LockId> = tables
                .queue_locks(&key)
                .into_iter()
                .filter(|l| l.trx == trx)
                .map(|l| l.id)
                .collect();
            for id in mine {
                tables.remove(id);
            }
        }
        self.wake.notify_all();
    }

    /// Clear the record's bit in the transaction's locks on the page,
    /// dropping locks left without records.
    pub fn unlock_rec(&self, trx: TrxID, rec: RecordKey) {
        let key = QueueKey::Page(rec.space, rec.page_no);
        {
            let mut tables = self.tables.ml();
            let mine: Vec<LockId> = tables
                .queue_locks(&key)
                .into_iter()
                .filter(|l| l.trx == trx && l.has_bit(rec.heap_no))
                .map(|l| l.id)
                .collect();
            for id in mine {
                let empty = match tables.locks.get_mut(&id) {
                    Some(lock) => {
                        lock.clear_bit(rec.heap_no);
                        !lock.has_any_bit()
                    }
                    None => false,
                };
                if empty {
                    tables.remove(id);
                }
            }
        }
        self.wake.notify_all();
    }

    /// Release every lock of the transaction, on commit or rollback.
    pub fn release_all(&self, trx: TrxID) -> usize {
        let n = {
            let mut tables = self.tables.ml();
            let ids: Vec<LockId> = tables
                .trx_locks
                .get(&trx)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            for id in &ids {
                tables.remove(*id);
            }
            tables.wait_for_graph.remove_transaction(trx);
            ids.len()
        };
        if n > 0 {
            debug!("trx {} released {} locks", trx, n);
        }
        self.wake.notify_all();
        n
    }

    pub fn n_locks(&self) -> usize {
        self.tables.ml().locks.len()
    }

    pub fn trx_lock_count(&self, trx: TrxID) -> usize {
        self.tables.ml().trx_locks.get(&trx).map(|s| s.len()).unwrap_or(0)
    }

    pub fn lock(&self, id: LockId) -> Option<Lock> {
        self.tables.ml().locks.get(&id).cloned()
    }

    /// Mode of the transaction's granted lock on the table.
    pub fn table_lock_mode(&self, trx: TrxID, table: &str) -> Option<LockMode> {
        let tables = self.tables.ml();
        let key = QueueKey::Table(table.to_string());
        tables
            .queue_locks(&key)
            .into_iter()
            .find(|l| l.trx == trx && !l.is_waiting())
            .map(|l| l.mode)
    }

    /// Whether the transaction holds a granted lock covering the record.
    pub fn holds_rec(&self, trx: TrxID, rec: RecordKey, mode: LockMode) -> bool {
        let tables = self.tables.ml();
        let key = QueueKey::Page(rec.space, rec.page_no);
        tables.queue_locks(&key).into_iter().any(|l| {
            l.trx == trx && !l.is_waiting() && l.has_bit(rec.heap_no) && l.mode.stronger_or_eq(mode)
        })
    }

    /// Whether the transaction holds a granted lock on the row.
    pub fn holds_row(&self, trx: TrxID, row: &RowKey, mode: LockMode) -> bool {
        let tables = self.tables.ml();
        let key = QueueKey::Row(row.clone());
        tables
            .queue_locks(&key)
            .into_iter()
            .any(|l| l.trx == trx && !l.is_waiting() && l.mode.stronger_or_eq(mode))
    }

    pub fn is_waiting(&self, trx: TrxID) -> bool {
        let tables = self.tables.ml();
        tables
            .trx_locks
            .get(&trx)
            .map(|s| s.iter().any(|id| tables.locks.get(id).map(|l| l.is_waiting()).unwrap_or(false)))
            .unwrap_or(false)
    }

    /// Granted locks on one resource, for checking that they are
    /// pairwise compatible.
    pub fn granted_on_rec(&self, rec: RecordKey) -> Vec<Lock> {
        let tables = self.tables.ml();
        let key = QueueKey::Page(rec.space, rec.page_no);
        tables
            .queue_locks(&key)
            .into_iter()
            .filter(|l| !l.is_waiting() && l.has_bit(rec.heap_no))
            .cloned()
            .collect()
    }

    pub fn granted_on_table(&self, table: &str) -> Vec<Lock> {
        let tables = self.tables.ml();
        tables
            .queue_locks(&QueueKey::Table(table.to_string()))
            .into_iter()
            .filter(|l| !l.is_waiting())
            .cloned()
            .collect()
    }

    pub fn has_wait_cycle(&self) -> bool {
        self.tables.ml().wait_for_graph.exists_cycle()
    }

    pub fn n_wait_edges(&self) -> usize {
        self.tables.ml().wait_for_graph.n_edges()
    }

    pub fn waits_for(&self, trx: TrxID) -> Vec<TrxID> {
        let tables = self.tables.ml();
        let mut out: Vec<TrxID> = tables
            .wait_for_graph
            .waits_for(trx)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }
}

impl fmt::Debug for LockSys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tables = self.tables.ml();
        let mut ids: Vec<&LockId> = tables.locks.keys().collect();
        ids.sort();
        writeln!(f, "<LockSys locks={}>", ids.len())?;
        for id in ids {
            let l = &tables.locks[id];
            writeln!(f, "  lock {} trx {} {} {:?} {:?}", l.id, l.trx, l.mode, l.flags, l.target)?;
        }
        Ok(())
    }
}
