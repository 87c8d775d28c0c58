mod test_utils;

use std::{sync::Arc, thread, time::Duration};

use small_innodb::{
    catalog::{ColumnDef, TableSchema},
    transaction::Xid,
    DataType, Database, Engine, ErrorKind, Field, Tuple,
};

use crate::test_utils::{
    account, balance, create_accounts, ids, insert_accounts, key, new_db, read_account, reopen,
    scan_accounts, setup, small_config,
};

fn owner(tuple: &Tuple) -> String {
    tuple.field(1).as_str().unwrap().to_string()
}

fn by_owner(name: &str) -> Tuple {
    Tuple::new(vec![Field::from_text(name)])
}

fn extern_count(db: &Database, table: &str) -> usize {
    let space = db.table(table).unwrap().space;
    db.fil().space(space).unwrap().ext().len()
}

#[test]
fn test_insert_get_scan() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 50);

    let rows = scan_accounts(&db);
    assert_eq!(ids(&rows), (0..50).collect::<Vec<_>>());
    let row = read_account(&db, 7).unwrap();
    assert_eq!(owner(&row), "owner7");
    assert_eq!(balance(&row), 70);
    assert!(read_account(&db, 50).is_none());

    let mut trx = db.trx_create();
    let err = db.insert(&mut trx, "accounts", &account(7, "again", 0)).unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));
    let err = db.insert(&mut trx, "accounts", &key(100)).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
    let err = db.insert(&mut trx, "nope", &account(1, "x", 0)).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    db.commit(&mut trx).unwrap();

    // the clustered tree split under the small page limit
    let clustered = db.table("accounts").unwrap().clustered_index().unwrap().id;
    let tree = db.tree(clustered).unwrap();
    assert!(tree.height().unwrap() > 1);
    tree.validate().unwrap();
}

#[test]
fn test_update_and_delete() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 5);

    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(1), &account(1, "carol", 999)).unwrap();
    db.delete(&mut trx, "accounts", &key(2)).unwrap();

    assert!(db
        .update(&mut trx, "accounts", &key(2), &account(2, "x", 0))
        .unwrap_err()
        .is(ErrorKind::NotFound));
    assert!(db.delete(&mut trx, "accounts", &key(42)).unwrap_err().is(ErrorKind::NotFound));
    assert!(db
        .update(&mut trx, "accounts", &key(3), &account(4, "x", 0))
        .unwrap_err()
        .is(ErrorKind::InvalidInput));
    db.commit(&mut trx).unwrap();

    let row = read_account(&db, 1).unwrap();
    assert_eq!(owner(&row), "carol");
    assert_eq!(balance(&row), 999);
    assert!(read_account(&db, 2).is_none());
    assert_eq!(ids(&scan_accounts(&db)), vec![0, 1, 3, 4]);

    // the key of a deleted row can be used again
    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(2, "dave", 5)).unwrap();
    db.commit(&mut trx).unwrap();
    assert_eq!(owner(&read_account(&db, 2).unwrap()), "dave");
}

#[test]
fn test_snapshot_reads() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 3);

    let mut reader = db.trx_create();
    assert_eq!(db.scan(&mut reader, "accounts").unwrap().len(), 3);

    let mut writer = db.trx_create();
    db.update(&mut writer, "accounts", &key(1), &account(1, "owner1", 999)).unwrap();
    db.delete(&mut writer, "accounts", &key(2)).unwrap();
    db.insert(&mut writer, "accounts", &account(5, "owner5", 50)).unwrap();

    // the writer sees its own changes
    assert_eq!(balance(&db.get(&mut writer, "accounts", &key(1)).unwrap().unwrap()), 999);
    assert_eq!(ids(&db.scan(&mut writer, "accounts").unwrap()), vec![0, 1, 5]);
    db.commit(&mut writer).unwrap();

    // the reader keeps its snapshot
    assert_eq!(balance(&db.get(&mut reader, "accounts", &key(1)).unwrap().unwrap()), 10);
    assert!(db.get(&mut reader, "accounts", &key(2)).unwrap().is_some());
    assert!(db.get(&mut reader, "accounts", &key(5)).unwrap().is_none());
    assert_eq!(ids(&db.scan(&mut reader, "accounts").unwrap()), vec![0, 1, 2]);

    // a new snapshot sees the commit
    db.close_read_view(&mut reader);
    assert_eq!(balance(&db.get(&mut reader, "accounts", &key(1)).unwrap().unwrap()), 999);
    db.commit(&mut reader).unwrap();
    assert_eq!(ids(&scan_accounts(&db)), vec![0, 1, 5]);
}

#[test]
fn test_uncommitted_changes_are_invisible() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 2);

    let mut writer = db.trx_create();
    db.update(&mut writer, "accounts", &key(0), &account(0, "owner0", -5)).unwrap();
    db.insert(&mut writer, "accounts", &account(9, "owner9", 90)).unwrap();

    assert_eq!(balance(&read_account(&db, 0).unwrap()), 0);
    assert!(read_account(&db, 9).is_none());
    assert_eq!(ids(&scan_accounts(&db)), vec![0, 1]);

    db.rollback(&mut writer).unwrap();
    assert_eq!(balance(&read_account(&db, 0).unwrap()), 0);
}

#[test]
fn test_rollback() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 3);

    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(10, "new", 100)).unwrap();
    db.update(&mut trx, "accounts", &key(0), &account(0, "changed", 1)).unwrap();
    db.update(&mut trx, "accounts", &key(0), &account(0, "changed again", 2)).unwrap();
    db.delete(&mut trx, "accounts", &key(1)).unwrap();
    assert_eq!(ids(&db.scan(&mut trx, "accounts").unwrap()), vec![0, 2, 10]);

    db.rollback(&mut trx).unwrap();
    assert_eq!(db.locks().n_locks(), 0);

    let rows = scan_accounts(&db);
    assert_eq!(ids(&rows), vec![0, 1, 2]);
    assert_eq!(owner(&rows[0]), "owner0");
    assert_eq!(balance(&rows[0]), 0);

    // nothing delete-marked or inserted is left behind
    let raw = db.raw_rows("accounts").unwrap();
    assert_eq!(raw.len(), 3);
    assert!(raw.iter().all(|(_, row)| !row.deleted));
}

#[test]
fn test_savepoints() {
    let (_dir, db) = new_db();
    create_accounts(&db);

    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(10, "a", 1)).unwrap();
    db.savepoint(&mut trx, "sp").unwrap();
    db.insert(&mut trx, "accounts", &account(11, "b", 2)).unwrap();
    db.update(&mut trx, "accounts", &key(10), &account(10, "a", 99)).unwrap();

    db.rollback_to(&mut trx, "sp").unwrap();
    assert_eq!(ids(&db.scan(&mut trx, "accounts").unwrap()), vec![10]);
    assert!(db.rollback_to(&mut trx, "missing").unwrap_err().is(ErrorKind::NotFound));

    db.insert(&mut trx, "accounts", &account(12, "c", 3)).unwrap();
    db.release_savepoint(&mut trx, "sp").unwrap();
    db.commit(&mut trx).unwrap();

    let rows = scan_accounts(&db);
    assert_eq!(ids(&rows), vec![10, 12]);
    assert_eq!(balance(&rows[0]), 1);
}

#[test]
fn test_xa() {
    let (_dir, db) = new_db();
    create_accounts(&db);

    let mut trx = db.trx_create();
    db.xa_start(&mut trx, Xid::new(1, b"gtrid", b"bqual")).unwrap();
    db.insert(&mut trx, "accounts", &account(1, "xa", 10)).unwrap();
    db.xa_prepare(&mut trx).unwrap();

    // a prepared transaction takes no more work
    let err = db.insert(&mut trx, "accounts", &account(2, "late", 0)).unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
    assert!(read_account(&db, 1).is_none());

    db.xa_commit(&mut trx).unwrap();
    assert_eq!(owner(&read_account(&db, 1).unwrap()), "xa");

    let mut trx = db.trx_create();
    db.xa_start(&mut trx, Xid::new(1, b"gtrid", b"second")).unwrap();
    db.update(&mut trx, "accounts", &key(1), &account(1, "gone", 0)).unwrap();
    db.xa_prepare(&mut trx).unwrap();
    db.xa_rollback(&mut trx).unwrap();
    assert_eq!(owner(&read_account(&db, 1).unwrap()), "xa");
}

#[test]
fn test_purge_waits_for_readers() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 10);

    let mut reader = db.trx_create();
    assert_eq!(db.scan(&mut reader, "accounts").unwrap().len(), 10);

    let mut trx = db.trx_create();
    for id in 0..5 {
        db.delete(&mut trx, "accounts", &key(id)).unwrap();
    }
    db.commit(&mut trx).unwrap();

    let stats = db.purge().unwrap();
    assert_eq!(stats.n_rows, 0);
    assert_eq!(db.raw_rows("accounts").unwrap().len(), 10);
    assert_eq!(db.scan(&mut reader, "accounts").unwrap().len(), 10);

    db.commit(&mut reader).unwrap();
    let stats = db.purge().unwrap();
    assert_eq!(stats.n_rows, 5);
    assert_eq!(db.raw_rows("accounts").unwrap().len(), 5);
    assert_eq!(ids(&scan_accounts(&db)), vec![5, 6, 7, 8, 9]);

    // nothing left to do
    assert_eq!(db.purge().unwrap(), Default::default());
}

#[test]
fn test_secondary_index() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 20);

    db.create_index("accounts", "by_owner", &["owner"], false).unwrap();
    let index = db.table("accounts").unwrap().index("by_owner").unwrap().clone();
    assert_eq!(db.tree(index.id).unwrap().size(), 20);

    let mut trx = db.trx_create();
    let rows = db.index_lookup(&mut trx, "accounts", "by_owner", &by_owner("owner3")).unwrap();
    assert_eq!(ids(&rows), vec![3]);
    let rows = db.index_lookup(&mut trx, "accounts", "PRIMARY", &key(4)).unwrap();
    assert_eq!(ids(&rows), vec![4]);
    let err = db.index_lookup(&mut trx, "accounts", "nope", &by_owner("x")).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    let too_many = Tuple::new(vec![Field::from_text("a"), Field::from_text("b")]);
    let err = db.index_lookup(&mut trx, "accounts", "by_owner", &too_many).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
    db.commit(&mut trx).unwrap();

    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(3), &account(3, "zed", 30)).unwrap();
    db.insert(&mut trx, "accounts", &account(30, "zed", 1)).unwrap();
    db.commit(&mut trx).unwrap();

    let mut trx = db.trx_create();
    assert!(db.index_lookup(&mut trx, "accounts", "by_owner", &by_owner("owner3")).unwrap().is_empty());
    let rows = db.index_lookup(&mut trx, "accounts", "by_owner", &by_owner("zed")).unwrap();
    assert_eq!(ids(&rows), vec![3, 30]);
    db.commit(&mut trx).unwrap();

    // the entry of the old value goes with purge
    let stats = db.purge().unwrap();
    assert_eq!(stats.n_entries, 1);
    assert_eq!(db.tree(index.id).unwrap().size(), 21);

    db.drop_index("accounts", "by_owner").unwrap();
    assert!(db.tree(index.id).unwrap_err().is(ErrorKind::NotFound));
    assert!(db.drop_index("accounts", "PRIMARY").unwrap_err().is(ErrorKind::InvalidInput));
}

#[test]
fn test_unique_index() {
    let (_dir, db) = new_db();
    create_accounts(&db);

    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(1, "a", 0)).unwrap();
    db.insert(&mut trx, "accounts", &account(2, "b", 0)).unwrap();
    db.insert(&mut trx, "accounts", &account(3, "a", 0)).unwrap();
    db.commit(&mut trx).unwrap();

    let err = db.create_index("accounts", "u_owner", &["owner"], true).unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));
    assert!(db.table("accounts").unwrap().index("u_owner").is_none());

    let mut trx = db.trx_create();
    db.delete(&mut trx, "accounts", &key(3)).unwrap();
    db.commit(&mut trx).unwrap();
    db.create_index("accounts", "u_owner", &["owner"], true).unwrap();

    let mut trx = db.trx_create();
    let err = db.insert(&mut trx, "accounts", &account(4, "b", 0)).unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));
    let err = db
        .update(&mut trx, "accounts", &key(1), &account(1, "b", 0))
        .unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));

    // an update keeping its own value is fine, NULLs never collide
    db.update(&mut trx, "accounts", &key(2), &account(2, "b", 7)).unwrap();
    let null_owner = |id| Tuple::new(vec![Field::from_i64(id), Field::null(), Field::from_i64(0)]);
    db.insert(&mut trx, "accounts", &null_owner(5)).unwrap();
    db.insert(&mut trx, "accounts", &null_owner(6)).unwrap();
    db.commit(&mut trx).unwrap();

    // a value freed by a committed update can be taken
    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(1), &account(1, "c", 0)).unwrap();
    db.insert(&mut trx, "accounts", &account(7, "a", 0)).unwrap();
    db.commit(&mut trx).unwrap();
    assert_eq!(ids(&scan_accounts(&db)), vec![1, 2, 5, 6, 7]);
}

#[test]
fn test_extern_fields() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    let long = "x".repeat(600);
    let longer = "y".repeat(900);

    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(1, &long, 5)).unwrap();
    db.commit(&mut trx).unwrap();
    assert_eq!(extern_count(&db, "accounts"), 1);
    assert_eq!(owner(&read_account(&db, 1).unwrap()), long);

    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(1), &account(1, &longer, 6)).unwrap();
    db.commit(&mut trx).unwrap();
    assert_eq!(extern_count(&db, "accounts"), 2);
    assert_eq!(owner(&read_account(&db, 1).unwrap()), longer);

    // the old version's field goes when no reader needs it
    let stats = db.purge().unwrap();
    assert_eq!(stats.n_externs, 1);
    assert_eq!(extern_count(&db, "accounts"), 1);

    // a rolled back insert releases its field at once
    let mut trx = db.trx_create();
    db.insert(&mut trx, "accounts", &account(2, &long, 0)).unwrap();
    assert_eq!(extern_count(&db, "accounts"), 2);
    db.rollback(&mut trx).unwrap();
    assert_eq!(extern_count(&db, "accounts"), 1);

    let mut trx = db.trx_create();
    db.delete(&mut trx, "accounts", &key(1)).unwrap();
    db.commit(&mut trx).unwrap();
    db.purge().unwrap();
    assert_eq!(extern_count(&db, "accounts"), 0);
}

#[test]
fn test_restart() {
    let (dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 40);
    db.create_index("accounts", "by_owner", &["owner"], false).unwrap();

    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(5), &account(5, "after", 1)).unwrap();
    db.delete(&mut trx, "accounts", &key(6)).unwrap();
    db.commit(&mut trx).unwrap();
    let last_trx = trx.id();

    let db = reopen(&dir, db);
    let rows = scan_accounts(&db);
    assert_eq!(rows.len(), 39);
    assert_eq!(owner(&read_account(&db, 5).unwrap()), "after");
    assert!(read_account(&db, 6).is_none());
    assert!(db.trx_sys().next_id() > last_trx);

    let mut trx = db.trx_create();
    let found = db.index_lookup(&mut trx, "accounts", "by_owner", &by_owner("after")).unwrap();
    assert_eq!(ids(&found), vec![5]);
    db.commit(&mut trx).unwrap();

    // the reopened tables take new rows
    insert_accounts_from(&db, 100, 10);
    assert_eq!(scan_accounts(&db).len(), 49);
}

fn insert_accounts_from(db: &Database, first: i64, count: i64) {
    let mut trx = db.trx_create();
    for id in first..first + count {
        db.insert(&mut trx, "accounts", &account(id, "later", id)).unwrap();
    }
    db.commit(&mut trx).unwrap();
}

#[test]
fn test_crash_recovery() {
    let (dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 30);
    let mut trx = db.trx_create();
    db.update(&mut trx, "accounts", &key(0), &account(0, "survivor", 1)).unwrap();
    db.commit(&mut trx).unwrap();

    // no shutdown: the pages exist only in the log
    drop(db);

    let db = Engine::open(small_config(&dir)).unwrap();
    let recovered = db.recovery();
    assert!(recovered.n_records > 0);
    assert!(recovered.n_applied > 0);

    assert_eq!(scan_accounts(&db).len(), 30);
    assert_eq!(owner(&read_account(&db, 0).unwrap()), "survivor");
    let clustered = db.table("accounts").unwrap().clustered_index().unwrap().id;
    db.tree(clustered).unwrap().validate().unwrap();

    // a clean restart has nothing to replay
    let db = reopen(&dir, db);
    assert_eq!(db.recovery().n_applied, 0);
    assert_eq!(scan_accounts(&db).len(), 30);
}

#[test]
fn test_checkpoint() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 10);

    let lsn = db.checkpoint().unwrap();
    assert!(lsn > 0);
    assert_eq!(db.log().checkpoint_lsn(), lsn);
    assert_eq!(lsn, db.log().lsn());
    assert_eq!(db.pools().stats().dirty, 0);
}

#[test]
fn test_concurrent_writers() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    let db = Arc::new(db);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for batch in 0..5 {
                    let mut trx = db.trx_create();
                    for i in 0..5 {
                        let id = t * 100 + batch * 5 + i;
                        db.insert(&mut trx, "accounts", &account(id, "w", id)).unwrap();
                    }
                    db.commit(&mut trx).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rows = scan_accounts(&db);
    assert_eq!(rows.len(), 100);
    assert!(rows.iter().all(|r| balance(r) == r.field(0).as_i64().unwrap()));
    assert_eq!(db.trx_sys().n_active(), 0);
    assert_eq!(db.locks().n_locks(), 0);
}

#[test]
fn test_writer_waits_for_row_lock() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 2);
    let db = Arc::new(db);

    let mut first = db.trx_create();
    db.update(&mut first, "accounts", &key(1), &account(1, "first", 1000)).unwrap();

    let db2 = db.clone();
    let second = thread::spawn(move || {
        let mut trx = db2.trx_create();
        db2.update(&mut trx, "accounts", &key(1), &account(1, "second", 2000)).unwrap();
        db2.commit(&mut trx).unwrap();
    });
    while db.locks().n_wait_edges() == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(balance(&read_account(&db, 1).unwrap()), 10);

    db.commit(&mut first).unwrap();
    second.join().unwrap();
    let row = read_account(&db, 1).unwrap();
    assert_eq!(owner(&row), "second");
    assert_eq!(balance(&row), 2000);
}

#[test]
fn test_lock_wait_timeout() {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(&dir);
    config.lock.wait_timeout = Duration::from_millis(100);
    let db = Database::open(config).unwrap();
    create_accounts(&db);
    insert_accounts(&db, 1);

    let mut first = db.trx_create();
    db.update(&mut first, "accounts", &key(0), &account(0, "first", 1)).unwrap();

    let mut second = db.trx_create();
    let err = db.delete(&mut second, "accounts", &key(0)).unwrap_err();
    assert!(err.is(ErrorKind::LockWaitTimeout));
    db.rollback(&mut second).unwrap();

    db.commit(&mut first).unwrap();
    assert_eq!(owner(&read_account(&db, 0).unwrap()), "first");
}

#[test]
fn test_deadlock_victim_rolls_back() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 2);
    let db = Arc::new(db);

    let mut t1 = db.trx_create();
    db.update(&mut t1, "accounts", &key(0), &account(0, "t1", 1)).unwrap();
    let mut t2 = db.trx_create();
    db.update(&mut t2, "accounts", &key(1), &account(1, "t2", 2)).unwrap();

    let db1 = db.clone();
    let waiter = thread::spawn(move || {
        db1.update(&mut t1, "accounts", &key(1), &account(1, "t1", 1)).unwrap();
        db1.commit(&mut t1).unwrap();
    });
    while db.locks().n_wait_edges() == 0 {
        thread::sleep(Duration::from_millis(5));
    }

    let err = db.update(&mut t2, "accounts", &key(0), &account(0, "t2", 2)).unwrap_err();
    assert!(err.is(ErrorKind::Deadlock));
    db.rollback(&mut t2).unwrap();

    waiter.join().unwrap();
    let rows = scan_accounts(&db);
    assert!(rows.iter().all(|r| owner(r) == "t1"));
}

#[test]
fn test_table_ddl() {
    let (_dir, db) = new_db();
    create_accounts(&db);
    insert_accounts(&db, 5);
    let space = db.table("accounts").unwrap().space;

    db.rename_table("accounts", "ledger").unwrap();
    let mut trx = db.trx_create();
    assert_eq!(db.scan(&mut trx, "ledger").unwrap().len(), 5);
    assert!(db.scan(&mut trx, "accounts").unwrap_err().is(ErrorKind::NotFound));
    db.commit(&mut trx).unwrap();

    db.drop_table("ledger").unwrap();
    assert!(db.table("ledger").unwrap_err().is(ErrorKind::NotFound));
    assert!(db.fil().space(space).is_err());
    assert!(db.drop_table("ledger").unwrap_err().is(ErrorKind::NotFound));

    let err = db.create_table(&TableSchema::new("bad", vec![], &[])).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));

    create_accounts(&db);
    assert!(scan_accounts(&db).is_empty());
    assert!(db
        .create_table(&crate::test_utils::accounts_schema())
        .unwrap_err()
        .is(ErrorKind::Duplicate));
}

#[test]
fn test_table_without_primary_key() {
    let (dir, db) = new_db();
    db.create_table(&TableSchema::new(
        "events",
        vec![ColumnDef::new("msg", DataType::varchar(64))],
        &[],
    ))
    .unwrap();

    let event = Tuple::new(vec![Field::from_text("started")]);
    let mut trx = db.trx_create();
    db.insert(&mut trx, "events", &event).unwrap();
    db.insert(&mut trx, "events", &event).unwrap();
    db.commit(&mut trx).unwrap();

    let mut trx = db.trx_create();
    assert_eq!(db.scan(&mut trx, "events").unwrap(), vec![event.clone(), event.clone()]);
    let first = Tuple::new(vec![Field::from_u64(1)]);
    assert_eq!(db.get(&mut trx, "events", &first).unwrap(), Some(event.clone()));
    db.commit(&mut trx).unwrap();

    // row ids are not handed out twice across a restart
    let db = reopen(&dir, db);
    let mut trx = db.trx_create();
    db.insert(&mut trx, "events", &event).unwrap();
    db.commit(&mut trx).unwrap();
    let raw = db.raw_rows("events").unwrap();
    assert_eq!(raw.len(), 3);
}
