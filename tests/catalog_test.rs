mod test_utils;

use small_innodb::{
    catalog::{
        check_name, persist::decode_dict, ColumnDef, Dictionary, SysTable, SysTablesRow,
        TableSchema, CLUSTERED_INDEX_NAME, DICT_FIRST_ID, DICT_ID_BATCH,
    },
    record::{field::DATA_NOT_NULL, MainType},
    types::NULL_PAGE_NO,
    DataType, ErrorKind, Field, Tuple,
};
use tempfile::TempDir;

use crate::test_utils::{accounts_schema, setup};

fn open_dict() -> (TempDir, Dictionary) {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let dict = Dictionary::open(dir.path().join("ib_dict.sys")).unwrap();
    (dir, dict)
}

fn reopen(dir: &TempDir) -> Dictionary {
    Dictionary::open(dir.path().join("ib_dict.sys")).unwrap()
}

#[test]
fn test_create_and_reload() {
    let (dir, dict) = open_dict();
    assert_eq!(dict.n_tables(), 0);

    let table = dict.create_table(&accounts_schema()).unwrap();
    assert_eq!(table.id, DICT_FIRST_ID);
    assert_eq!(table.n_cols(), 3);
    assert_eq!(table.column_pos("balance"), Some(2));

    let clustered = table.clustered_index().unwrap();
    assert_eq!(clustered.name, CLUSTERED_INDEX_NAME);
    assert!(clustered.is_unique());
    assert_eq!(clustered.fields, vec!["id".to_string()]);
    assert!(!clustered.has_root());

    dict.set_index_root(table.id, clustered.id, 3).unwrap();
    dict.create_index("accounts", "by_owner", &["owner"], false).unwrap();
    drop(dict);

    let dict = reopen(&dir);
    assert_eq!(dict.table_names(), vec!["accounts".to_string()]);
    let loaded = dict.table_by_name("accounts").unwrap();
    assert_eq!(loaded.columns, table.columns);
    assert_eq!(loaded.indexes.len(), 2);
    assert_eq!(loaded.indexes[0].root_page, 3);
    assert!(loaded.indexes[0].is_clustered());
    let by_owner = loaded.index("by_owner").unwrap();
    assert!(!by_owner.is_unique());
    assert_eq!(by_owner.root_page, NULL_PAGE_NO);
    assert_eq!(loaded.field_positions(by_owner).unwrap(), vec![1]);

    // ids keep counting after the restart
    let header = dict.header();
    assert_eq!(header.next_table_id, DICT_FIRST_ID + 1);
    assert_eq!(header.next_index_id, DICT_FIRST_ID + 2);
    let other = dict
        .create_table(&TableSchema::new(
            "other",
            vec![ColumnDef::new("a", DataType::int(4))],
            &["a"],
        ))
        .unwrap();
    assert_eq!(other.id, DICT_FIRST_ID + 1);
    assert_eq!(dict.table_by_id(other.id).unwrap().name, "other");
}

#[test]
fn test_schema_checks() {
    let (_dir, dict) = open_dict();
    dict.create_table(&accounts_schema()).unwrap();

    let err = dict.create_table(&accounts_schema()).unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));

    let dup_col = TableSchema::new(
        "t1",
        vec![
            ColumnDef::new("a", DataType::int(4)),
            ColumnDef::new("a", DataType::int(4)),
        ],
        &[],
    );
    assert!(dict.create_table(&dup_col).unwrap_err().is(ErrorKind::Duplicate));

    let bad_pk = TableSchema::new("t2", vec![ColumnDef::new("a", DataType::int(4))], &["b"]);
    assert!(dict.create_table(&bad_pk).unwrap_err().is(ErrorKind::InvalidInput));

    let empty = TableSchema::new("t3", vec![], &[]);
    assert!(dict.create_table(&empty).unwrap_err().is(ErrorKind::InvalidInput));

    let bad_name = TableSchema::new("no spaces", vec![ColumnDef::new("a", DataType::int(4))], &[]);
    assert!(dict.create_table(&bad_name).unwrap_err().is(ErrorKind::InvalidInput));

    // failed creations leave nothing behind
    assert_eq!(dict.n_tables(), 1);
}

#[test]
fn test_names() {
    check_name("accounts").unwrap();
    check_name("t_1$x").unwrap();
    check_name(&"a".repeat(64)).unwrap();
    assert!(check_name("").is_err());
    assert!(check_name(&"a".repeat(65)).is_err());
    assert!(check_name("a-b").is_err());
    assert!(check_name("naïve").is_err());
}

#[test]
fn test_index_ddl() {
    let (dir, dict) = open_dict();
    dict.create_table(&accounts_schema()).unwrap();

    let index = dict.create_index("accounts", "by_balance", &["balance", "owner"], true).unwrap();
    assert!(index.is_unique());
    assert!(!index.is_clustered());

    let err = dict.create_index("accounts", "by_balance", &["owner"], false).unwrap_err();
    assert!(err.is(ErrorKind::Duplicate));
    let err = dict.create_index("accounts", "by_x", &["missing"], false).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
    let err = dict.create_index("accounts", "by_x", &[], false).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
    let err = dict.create_index("nope", "by_x", &["a"], false).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));

    let err = dict.drop_index("accounts", CLUSTERED_INDEX_NAME).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
    assert!(dict.drop_index("accounts", "nope").unwrap_err().is(ErrorKind::NotFound));

    let dropped = dict.drop_index("accounts", "by_balance").unwrap();
    assert_eq!(dropped.id, index.id);
    drop(dict);

    let dict = reopen(&dir);
    assert_eq!(dict.table_by_name("accounts").unwrap().indexes.len(), 1);
}

#[test]
fn test_rename_and_drop() {
    let (dir, dict) = open_dict();
    let table = dict.create_table(&accounts_schema()).unwrap();
    dict.create_table(&TableSchema::new(
        "other",
        vec![ColumnDef::new("a", DataType::int(4))],
        &[],
    ))
    .unwrap();

    assert!(dict.rename_table("accounts", "other").unwrap_err().is(ErrorKind::Duplicate));
    assert!(dict.rename_table("nope", "x").unwrap_err().is(ErrorKind::NotFound));
    dict.rename_table("accounts", "ledger").unwrap();
    assert!(dict.table_by_name("accounts").unwrap_err().is(ErrorKind::NotFound));
    assert_eq!(dict.table_by_name("ledger").unwrap().id, table.id);

    dict.drop_table("other").unwrap();
    assert!(dict.drop_table("other").unwrap_err().is(ErrorKind::NotFound));
    drop(dict);

    let dict = reopen(&dir);
    assert_eq!(dict.table_names(), vec!["ledger".to_string()]);
    assert_eq!(dict.table_by_id(table.id).unwrap().name, "ledger");
}

#[test]
fn test_system_rows() {
    let (dir, dict) = open_dict();
    dict.create_table(&accounts_schema()).unwrap();
    dict.create_index("accounts", "by_owner", &["owner"], false).unwrap();

    let rows = dict.sys_rows();
    assert_eq!(rows.of(SysTable::Tables).len(), 1);
    assert_eq!(rows.of(SysTable::Columns).len(), 3);
    assert_eq!(rows.of(SysTable::Indexes).len(), 2);
    assert_eq!(rows.of(SysTable::Fields).len(), 2);
    for table in SysTable::ALL.iter() {
        for row in rows.of(*table) {
            assert_eq!(row.n_fields(), table.n_cols());
        }
    }

    let sys_table = SysTablesRow::from_tuple(&rows.tables[0]).unwrap();
    assert_eq!(sys_table.name, "accounts");
    assert_eq!(sys_table.n_cols, 3);

    let bytes = std::fs::read(dir.path().join("ib_dict.sys")).unwrap();
    let (header, decoded) = decode_dict(&bytes).unwrap();
    assert_eq!(header, dict.header());
    assert_eq!(decoded, rows);
}

#[test]
fn test_id_batches_survive_restart() {
    let (dir, dict) = open_dict();

    assert_eq!(dict.alloc_row_id().unwrap(), 1);
    assert_eq!(dict.alloc_row_id().unwrap(), 2);
    dict.reserve_trx_id(10).unwrap();
    assert_eq!(dict.trx_id_floor(), 10 + DICT_ID_BATCH);
    // inside the batch nothing changes
    dict.reserve_trx_id(20).unwrap();
    assert_eq!(dict.trx_id_floor(), 10 + DICT_ID_BATCH);
    drop(dict);

    let dict = reopen(&dir);
    assert_eq!(dict.alloc_row_id().unwrap(), 1 + DICT_ID_BATCH);
    assert_eq!(dict.trx_id_floor(), 10 + DICT_ID_BATCH);
}

#[test]
fn test_corrupt_file() {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ib_dict.sys");
    std::fs::write(&path, b"JUNKJUNKJUNK").unwrap();

    let err = Dictionary::open(&path).unwrap_err();
    assert!(err.is(ErrorKind::CorruptPage));
}

#[test]
fn test_row_checks() {
    let (_dir, dict) = open_dict();
    let table = dict.create_table(&accounts_schema()).unwrap();
    assert!(!table.uses_row_id());

    table
        .check_tuple(&Tuple::new(vec![
            Field::from_i64(1),
            Field::null(),
            Field::from_i64(5),
        ]))
        .unwrap();
    let err = table.check_tuple(&Tuple::new(vec![Field::from_i64(1)])).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));

    let strict = dict
        .create_table(&TableSchema::new(
            "strict",
            vec![ColumnDef::new("a", DataType::new(MainType::Int, DATA_NOT_NULL, 4))],
            &[],
        ))
        .unwrap();
    assert!(strict.uses_row_id());
    let err = strict.check_tuple(&Tuple::new(vec![Field::null()])).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
}
