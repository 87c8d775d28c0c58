use small_innodb::{Database, Field, Transaction, Tuple};

pub fn account(id: i64, owner: &str, balance: i64) -> Tuple {
    Tuple::new(vec![
        Field::from_i64(id),
        Field::from_text(owner),
        Field::from_i64(balance),
    ])
}

pub fn key(id: i64) -> Tuple {
    Tuple::new(vec![Field::from_i64(id)])
}

pub fn balance(tuple: &Tuple) -> i64 {
    tuple.field(2).as_i64().unwrap()
}

pub fn ids(rows: &[Tuple]) -> Vec<i64> {
    rows.iter().map(|t| t.field(0).as_i64().unwrap()).collect()
}

/// Insert `count` accounts with ids `0..count` in one transaction.
pub fn insert_accounts(db: &Database, count: i64) {
    let mut trx = db.trx_create();
    for id in 0..count {
        db.insert(&mut trx, "accounts", &account(id, &format!("owner{}", id), id * 10))
            .unwrap();
    }
    db.commit(&mut trx).unwrap();
}

/// Read one account with a fresh transaction.
pub fn read_account(db: &Database, id: i64) -> Option<Tuple> {
    let mut trx: Transaction = db.trx_create();
    let row = db.get(&mut trx, "accounts", &key(id)).unwrap();
    db.commit(&mut trx).unwrap();
    row
}

pub fn scan_accounts(db: &Database) -> Vec<Tuple> {
    let mut trx = db.trx_create();
    let rows = db.scan(&mut trx, "accounts").unwrap();
    db.commit(&mut trx).unwrap();
    rows
}
