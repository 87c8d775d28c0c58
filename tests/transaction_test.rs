mod test_utils;

use std::{cell::RefCell, time::Duration};

use small_innodb::{
    config::LockConfig,
    io::{Decodeable, Encodeable},
    transaction::{
        purge,
        undo::{UndoAction, UndoRecord, UndoStore, UndoType},
        LockFlags, LockMode, LockSys, ReadView, RecordKey, TrxState, TrxSys, UndoApplier,
        XaState, Xid,
    },
    types::{SmallResult, TableID},
    ErrorKind, SmallError,
};

use crate::test_utils::setup;

/// Remembers the inverse actions it is asked to apply.
#[derive(Default)]
struct RecordingApplier {
    applied: RefCell<Vec<(TableID, UndoAction)>>,
    fail_on: Option<Vec<u8>>,
}

impl UndoApplier for RecordingApplier {
    fn apply_undo(&self, table_id: TableID, action: &UndoAction) -> SmallResult {
        if self.fail_on.as_deref() == Some(action.key()) {
            return Err(SmallError::new(ErrorKind::Io, "apply failed"));
        }
        self.applied.borrow_mut().push((table_id, action.clone()));
        Ok(())
    }
}

impl RecordingApplier {
    fn keys(&self) -> Vec<Vec<u8>> {
        self.applied.borrow().iter().map(|(_, a)| a.key().to_vec()).collect()
    }
}

fn lock_sys() -> LockSys {
    LockSys::new(&LockConfig {
        wait_timeout: Duration::from_millis(200),
    })
}

fn insert(key: &[u8]) -> UndoAction {
    UndoAction::Insert { key: key.to_vec() }
}

fn update(key: &[u8], before: &[u8]) -> UndoAction {
    UndoAction::Update {
        key: key.to_vec(),
        before: before.to_vec(),
    }
}

#[test]
fn test_mvcc_snapshot() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut trx1 = trx_sys.trx_create();
    let mut trx2 = trx_sys.trx_create();
    trx_sys.begin(&mut trx1).unwrap();
    trx_sys.begin(&mut trx2).unwrap();

    let view = trx_sys.assign_read_view(&mut trx2).clone();
    assert!(!view.sees(trx1.id()));
    assert!(view.sees(trx2.id()));
    assert_eq!(trx_sys.n_read_views(), 1);

    trx_sys.commit(&mut trx2, &locks).unwrap();
    assert_eq!(trx_sys.n_read_views(), 0);
    assert!(trx2.read_view().is_none());

    // a committed trx1 stays invisible to the old snapshot
    trx_sys.commit(&mut trx1, &locks).unwrap();
    assert!(!view.sees(trx1.id()));
}

#[test]
fn test_read_view_limits() {
    let view = ReadView::new(7, &[3, 7, 5], 9);
    assert_eq!(view.creator(), 7);
    assert_eq!(view.active_ids(), &[5, 3]);
    assert_eq!(view.up_limit(), 3);
    assert_eq!(view.low_limit(), 9);

    assert!(view.sees(0));
    assert!(view.sees(1));
    assert!(view.sees(2));
    assert!(!view.sees(3));
    assert!(view.sees(4));
    assert!(!view.sees(5));
    assert!(view.sees(6));
    assert!(view.sees(7));
    assert!(view.sees(8));
    assert!(!view.sees(9));
    assert!(!view.sees(100));

    // nothing else active: everything below the limit is visible
    let alone = ReadView::new(4, &[4], 5);
    assert_eq!(alone.up_limit(), 5);
    assert!((0..5).all(|id| alone.sees(id)));
    assert!(!alone.sees(5));
}

#[test]
fn test_ids_and_states() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut trx = trx_sys.trx_create();
    assert_eq!(trx.state(), TrxState::NotStarted);
    assert_eq!(trx_sys.next_id(), 1);

    trx_sys.begin(&mut trx).unwrap();
    assert_eq!(trx.id(), 1);
    assert_eq!(trx.state(), TrxState::Active);
    assert!(trx_sys.is_active(1));
    assert!(trx_sys.begin(&mut trx).unwrap_err().is(ErrorKind::InvalidState));

    trx_sys.commit(&mut trx, &locks).unwrap();
    assert_eq!(trx.state(), TrxState::Committed);
    assert!(!trx_sys.is_active(1));
    assert!(trx_sys
        .commit(&mut trx, &locks)
        .unwrap_err()
        .is(ErrorKind::InvalidState));

    // the object can be begun again and gets a new id
    trx_sys.begin(&mut trx).unwrap();
    assert_eq!(trx.id(), 2);

    // a read view starts the transaction
    let mut reader = trx_sys.trx_create();
    trx_sys.assign_read_view(&mut reader);
    assert_eq!(reader.state(), TrxState::Active);
    assert_eq!(trx_sys.active_ids(), vec![2, 3]);
    assert_eq!(trx_sys.n_active(), 2);

    trx_sys.set_next_id(100);
    trx_sys.set_next_id(50);
    assert_eq!(trx_sys.next_id(), 100);
}

#[test]
fn test_commit_releases_locks() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    locks.acquire_table(trx.id(), "t", LockMode::IX).unwrap();
    locks
        .acquire_rec(trx.id(), RecordKey::new(1, 3, 2), LockMode::X, LockFlags::NONE)
        .unwrap();
    assert_eq!(locks.trx_lock_count(trx.id()), 2);

    trx_sys.commit(&mut trx, &locks).unwrap();
    assert_eq!(locks.n_locks(), 0);
}

#[test]
fn test_rollback_newest_first() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();
    let applier = RecordingApplier::default();

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    trx_sys.add_undo(&mut trx, 7, &insert(b"a")).unwrap();
    trx_sys.add_undo(&mut trx, 7, &update(b"b", b"old-b")).unwrap();
    trx_sys.add_undo(&mut trx, 8, &insert(b"c")).unwrap();
    assert_eq!(trx.undo_len(), 3);
    assert_eq!(trx.undo_no(), 3);
    locks.acquire_table(trx.id(), "t", LockMode::X).unwrap();

    trx_sys.rollback(&mut trx, &applier, &locks).unwrap();
    assert_eq!(trx.state(), TrxState::RolledBack);
    assert_eq!(applier.keys(), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    assert_eq!(applier.applied.borrow()[1], (7, update(b"b", b"old-b")));
    assert_eq!(trx.undo_len(), 0);
    assert_eq!(locks.n_locks(), 0);
    assert_eq!(trx_sys.n_active(), 0);
    assert_eq!(trx_sys.rseg().n_update_undo(), 0);
}

#[test]
fn test_failed_rollback_can_be_retried() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    for key in &[b"a", b"b", b"c"] {
        trx_sys.add_undo(&mut trx, 1, &insert(*key)).unwrap();
    }

    let failing = RecordingApplier {
        fail_on: Some(b"b".to_vec()),
        ..Default::default()
    };
    trx_sys.rollback(&mut trx, &failing, &locks).unwrap_err();
    assert_eq!(failing.keys(), vec![b"c".to_vec()]);
    assert_eq!(trx.state(), TrxState::Active);
    assert_eq!(trx.undo_len(), 2);

    let applier = RecordingApplier::default();
    trx_sys.rollback(&mut trx, &applier, &locks).unwrap();
    assert_eq!(applier.keys(), vec![b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_savepoints() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut trx = trx_sys.trx_create();
    assert!(trx_sys.savepoint(&mut trx, "early").unwrap_err().is(ErrorKind::InvalidState));
    trx_sys.begin(&mut trx).unwrap();

    trx_sys.add_undo(&mut trx, 1, &insert(b"a")).unwrap();
    trx_sys.savepoint(&mut trx, "s1").unwrap();
    trx_sys.add_undo(&mut trx, 1, &insert(b"b")).unwrap();
    trx_sys.savepoint(&mut trx, "s2").unwrap();
    trx_sys.add_undo(&mut trx, 1, &update(b"a", b"a0")).unwrap();
    assert_eq!(trx.savepoints().len(), 2);

    let applier = RecordingApplier::default();
    trx_sys.rollback_to_savepoint(&mut trx, "s1", &applier).unwrap();
    assert_eq!(applier.keys(), vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(trx.undo_len(), 1);
    assert_eq!(trx.undo_no(), 1);
    assert_eq!(trx.state(), TrxState::Active);

    // s1 survives, s2 is gone
    let names: Vec<&str> = trx.savepoints().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["s1"]);
    let err = trx_sys.rollback_to_savepoint(&mut trx, "s2", &applier).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));

    // rolling back to the same savepoint twice undoes nothing more
    trx_sys.rollback_to_savepoint(&mut trx, "s1", &applier).unwrap();
    assert_eq!(applier.keys().len(), 2);

    trx_sys.release_savepoint(&mut trx, "s1").unwrap();
    assert!(trx.savepoints().is_empty());
    assert!(trx_sys.release_savepoint(&mut trx, "s1").unwrap_err().is(ErrorKind::NotFound));

    trx_sys.commit(&mut trx, &locks).unwrap();
}

#[test]
fn test_savepoint_name_is_replaced() {
    setup();
    let trx_sys = TrxSys::new(None, 0);

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    trx_sys.savepoint(&mut trx, "sp").unwrap();
    trx_sys.add_undo(&mut trx, 1, &insert(b"a")).unwrap();
    trx_sys.savepoint(&mut trx, "sp").unwrap();

    assert_eq!(trx.savepoints().len(), 1);
    assert_eq!(trx.savepoints()[0].undo_no, 1);
}

#[test]
fn test_xa_two_phase_commit() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();
    let xid = Xid::new(1, b"global-1", b"branch-a");

    let mut trx = trx_sys.trx_create();
    assert!(trx_sys.xa_prepare(&mut trx).unwrap_err().is(ErrorKind::InvalidState));

    trx_sys.xa_start(&mut trx, xid.clone()).unwrap();
    assert_eq!(trx.state(), TrxState::Active);
    assert_eq!(trx.xa_state(), XaState::Active);
    assert_eq!(trx.xid(), Some(&xid));
    assert!(trx_sys.xa_start(&mut trx, xid.clone()).unwrap_err().is(ErrorKind::InvalidState));

    // commit needs the prepare phase first
    assert!(trx_sys.xa_commit(&mut trx, &locks).unwrap_err().is(ErrorKind::InvalidState));

    trx_sys.add_undo(&mut trx, 1, &insert(b"k")).unwrap();
    trx_sys.xa_prepare(&mut trx).unwrap();
    assert_eq!(trx.xa_state(), XaState::Prepared);

    trx_sys.xa_commit(&mut trx, &locks).unwrap();
    assert_eq!(trx.state(), TrxState::Committed);
    assert_eq!(trx.xa_state(), XaState::Committed);
}

#[test]
fn test_xa_rollback() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();
    let applier = RecordingApplier::default();

    let mut trx = trx_sys.trx_create();
    assert!(trx_sys
        .xa_start(&mut trx, Xid::new(0, b"", b""))
        .unwrap_err()
        .is(ErrorKind::InvalidInput));

    trx_sys.xa_start(&mut trx, Xid::new(1, b"g", b"b")).unwrap();
    trx_sys.add_undo(&mut trx, 1, &insert(b"k")).unwrap();
    trx_sys.xa_prepare(&mut trx).unwrap();

    trx_sys.xa_rollback(&mut trx, &applier, &locks).unwrap();
    assert_eq!(trx.state(), TrxState::RolledBack);
    assert_eq!(trx.xa_state(), XaState::RolledBack);
    assert_eq!(applier.keys(), vec![b"k".to_vec()]);

    assert!(trx_sys
        .xa_rollback(&mut trx, &applier, &locks)
        .unwrap_err()
        .is(ErrorKind::InvalidState));
}

#[test]
fn test_undo_record_format() {
    let action = UndoAction::Delete {
        key: b"pk-1".to_vec(),
        before: b"row image".to_vec(),
    };
    let rec = UndoRecord::for_action(4, 9, 21, &action);
    assert_eq!(rec.rec_type, UndoType::DelMark);

    let bytes = rec.to_bytes();
    assert_eq!(bytes[0], UndoType::DelMark as u8);
    let decoded = UndoRecord::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, rec);
    assert_eq!(decoded.undo_no, 4);
    assert_eq!(decoded.table_id, 9);
    assert_eq!(decoded.payload().unwrap().trx_id, 21);
    assert_eq!(decoded.action().unwrap(), action);

    let err = UndoRecord::from_bytes(&bytes[..10]).unwrap_err();
    assert!(err.is(ErrorKind::ShortBuffer));

    let mut bad = bytes.clone();
    bad[0] = 99;
    assert!(UndoRecord::from_bytes(&bad).unwrap_err().is(ErrorKind::CorruptLog));
}

#[test]
fn test_rseg_full() {
    setup();
    let trx_sys = TrxSys::new(None, 2);

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    trx_sys.add_undo(&mut trx, 1, &insert(b"a")).unwrap();
    trx_sys.add_undo(&mut trx, 1, &insert(b"b")).unwrap();

    let err = trx_sys.add_undo(&mut trx, 1, &insert(b"c")).unwrap_err();
    assert!(err.is(ErrorKind::NoSpace));
    assert_eq!(trx.undo_len(), 2);
    assert_eq!(trx.undo_no(), 2);
}

#[test]
fn test_purge_waits_for_readers() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut reader = trx_sys.trx_create();
    trx_sys.assign_read_view(&mut reader);

    let mut writer = trx_sys.trx_create();
    trx_sys.begin(&mut writer).unwrap();
    trx_sys.add_undo(&mut writer, 1, &insert(b"new")).unwrap();
    trx_sys.add_undo(&mut writer, 1, &update(b"old", b"v1")).unwrap();
    let writer_id = writer.id();
    trx_sys.commit(&mut writer, &locks).unwrap();

    // insert undo goes at commit, update undo stays for the reader
    assert_eq!(trx_sys.rseg().n_insert_undo(), 0);
    assert_eq!(trx_sys.update_undo_of(writer_id).len(), 1);
    assert!(!trx_sys.is_purgeable(writer_id));
    assert_eq!(purge(&trx_sys), 0);

    trx_sys.commit(&mut reader, &locks).unwrap();
    assert!(trx_sys.is_purgeable(writer_id));
    assert!(trx_sys.all_views_see(writer_id));
    assert_eq!(purge(&trx_sys), 1);
    assert!(trx_sys.update_undo_of(writer_id).is_empty());
}

#[test]
fn test_oldest_view() {
    setup();
    let trx_sys = TrxSys::new(None, 0);
    let locks = lock_sys();

    let mut first = trx_sys.trx_create();
    trx_sys.assign_read_view(&mut first);
    let mut second = trx_sys.trx_create();
    trx_sys.assign_read_view(&mut second);

    assert_eq!(trx_sys.oldest_view().unwrap().creator(), first.id());
    trx_sys.close_read_view(&mut first);
    assert_eq!(trx_sys.oldest_view().unwrap().creator(), second.id());
    assert_eq!(trx_sys.n_read_views(), 1);

    trx_sys.release(second, &locks).unwrap();
    assert!(trx_sys.oldest_view().is_none());
    assert_eq!(trx_sys.n_active(), 1);
}

#[test]
fn test_undo_store_recovery() {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ib_undo.log");
    let locks = lock_sys();

    {
        let trx_sys = TrxSys::new(Some(UndoStore::open(&path).unwrap()), 0);
        let mut trx = trx_sys.trx_create();
        for _ in 0..4 {
            trx_sys.begin(&mut trx).unwrap();
            trx_sys.commit(&mut trx, &locks).unwrap();
        }
        trx_sys.begin(&mut trx).unwrap();
        trx_sys.add_undo(&mut trx, 3, &insert(b"a")).unwrap();
        trx_sys.add_undo(&mut trx, 3, &update(b"b", b"b0")).unwrap();
        trx_sys.commit(&mut trx, &locks).unwrap();
        assert_eq!(trx.id(), 5);
    }

    let trx_sys = TrxSys::new(Some(UndoStore::open(&path).unwrap()), 0);
    assert_eq!(trx_sys.recover_undo().unwrap(), 2);
    assert_eq!(trx_sys.next_id(), 6);
    assert_eq!(trx_sys.update_undo_of(5).len(), 1);
    assert_eq!(trx_sys.rseg().n_insert_undo(), 0);

    // history is still needed, the store stays
    assert!(!trx_sys.truncate_undo_store().unwrap());
    assert_eq!(purge(&trx_sys), 1);
    assert!(trx_sys.truncate_undo_store().unwrap());
    assert!(trx_sys.undo_store().unwrap().load().unwrap().is_empty());
}

#[test]
fn test_truncate_needs_no_active_trx() {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let trx_sys = TrxSys::new(Some(UndoStore::open(dir.path().join("u.log")).unwrap()), 0);
    assert!(!TrxSys::new(None, 0).truncate_undo_store().unwrap());

    let mut trx = trx_sys.trx_create();
    trx_sys.begin(&mut trx).unwrap();
    assert!(!trx_sys.truncate_undo_store().unwrap());
    trx_sys.rollback(&mut trx, &RecordingApplier::default(), &lock_sys()).unwrap();
    assert!(trx_sys.truncate_undo_store().unwrap());
}
