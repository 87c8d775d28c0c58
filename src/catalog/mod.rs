//! The data dictionary: the registry of tables and indexes, stored as
//! the rows of four system tables in `ib_dict.sys`.

pub mod mem;
pub mod persist;
pub mod sys_tables;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::RwLock,
};

use log::{debug, info, warn};

pub use mem::{
    check_name, ColumnDef, IndexDef, TableDef, TableSchema, CLUSTERED_INDEX_NAME, DICT_CLUSTERED,
    DICT_UNIQUE,
};
pub use persist::{DictHeader, DICT_FIRST_ID, DICT_ID_BATCH};
pub use sys_tables::{
    SysColumnsRow, SysFieldsRow, SysIndexesRow, SysRows, SysTable, SysTablesRow,
};

use crate::{
    error::{ErrorKind, SmallError},
    types::{IndexID, PageNo, SmallResult, SpaceID, TableID, TrxID, NULL_PAGE_NO},
    utils::HandyRwLock,
};

struct DictInner {
    // as last written to the file
    header: DictHeader,
    next_row_id: u64,
    tables: BTreeMap<TableID, TableDef>,
    names: HashMap<String, TableID>,
}

impl DictInner {
    fn table_mut(&mut self, name: &str) -> Result<&mut TableDef, SmallError> {
        let id = *self
            .names
            .get(name)
            .ok_or_else(|| SmallError::not_found(&format!("table {} not found", name)))?;
        self.tables
            .get_mut(&id)
            .ok_or_else(|| SmallError::not_found(&format!("table {} not found", name)))
    }
}

pub struct Dictionary {
    path: PathBuf,
    inner: RwLock<DictInner>,
}

impl Dictionary {
    /// Load the dictionary file, or create an empty one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SmallError> {
        let path = path.as_ref().to_path_buf();
        let exists = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let dict = Self {
            path,
            inner: RwLock::new(DictInner {
                header: DictHeader::default(),
                next_row_id: 1,
                tables: BTreeMap::new(),
                names: HashMap::new(),
            }),
        };
        if exists {
            dict.bootstrap()?;
        } else {
            dict.persist()?;
            info!("created dictionary {:?}", dict.path);
        }
        Ok(dict)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the registry from the file.
    fn bootstrap(&self) -> SmallResult {
        let (header, rows) = persist::read_dict_file(&self.path)?;

        let mut tables: BTreeMap<TableID, TableDef> = BTreeMap::new();
        let mut n_cols: HashMap<TableID, usize> = HashMap::new();
        for t in &rows.tables {
            let row = match SysTablesRow::from_tuple(t) {
                Ok(r) => r,
                Err(e) => {
                    warn!("SYS_TABLES: skipping row: {}", e);
                    continue;
                }
            };
            n_cols.insert(row.id, row.n_cols as usize);
            tables.insert(
                row.id,
                TableDef {
                    id: row.id,
                    name: row.name,
                    space: row.space as SpaceID,
                    flags: row.flags as u32,
                    columns: Vec::new(),
                    indexes: Vec::new(),
                },
            );
        }

        let mut columns: Vec<SysColumnsRow> = rows
            .columns
            .iter()
            .filter_map(|t| SysColumnsRow::from_tuple(t).ok())
            .collect();
        columns.sort_by_key(|c| (c.table_id, c.pos));
        for c in columns {
            if let Some(table) = tables.get_mut(&c.table_id) {
                match c.column() {
                    Ok(col) => table.columns.push(col),
                    Err(e) => warn!("SYS_COLUMNS: skipping row: {}", e),
                }
            }
        }

        let mut fields: HashMap<IndexID, Vec<(u64, String)>> = HashMap::new();
        for t in &rows.fields {
            if let Ok(f) = SysFieldsRow::from_tuple(t) {
                fields.entry(f.index_id).or_default().push((f.pos, f.col_name));
            }
        }
        for t in &rows.indexes {
            let row = match SysIndexesRow::from_tuple(t) {
                Ok(r) => r,
                Err(e) => {
                    warn!("SYS_INDEXES: skipping row: {}", e);
                    continue;
                }
            };
            let mut cols = fields.remove(&row.id).unwrap_or_default();
            cols.sort();
            let index = IndexDef {
                id: row.id,
                table_id: row.table_id,
                name: row.name,
                fields: cols.into_iter().map(|(_, name)| name).collect(),
                index_type: row.index_type as u32,
                space: row.space as SpaceID,
                root_page: row.root_page as PageNo,
            };
            if let Some(table) = tables.get_mut(&row.table_id) {
                if index.is_clustered() {
                    table.indexes.insert(0, index);
                } else {
                    table.indexes.push(index);
                }
            }
        }

        tables.retain(|id, t| {
            let ok = n_cols.get(id) == Some(&t.columns.len());
            if !ok {
                warn!("dictionary: dropping table {} with mismatched columns", t.name);
            }
            ok
        });

        let mut inner = self.inner.wl();
        inner.names = tables.values().map(|t| (t.name.clone(), t.id)).collect();
        inner.tables = tables;
        inner.next_row_id = header.next_row_id;
        inner.header = header;
        info!(
            "dictionary {:?} loaded: {} tables",
            self.path,
            inner.tables.len()
        );
        Ok(())
    }

    fn persist_locked(&self, inner: &DictInner) -> SmallResult {
        let rows = SysRows::build(inner.tables.values());
        persist::write_dict_file(&self.path, &inner.header, &rows)
    }

    /// Write the header and the system table rows to the file.
    pub fn persist(&self) -> SmallResult {
        let inner = self.inner.rl();
        self.persist_locked(&inner)
    }

    /// Register a table with its clustered index. The index has no root
    /// until `set_index_root` is called.
    pub fn create_table(&self, schema: &TableSchema) -> Result<TableDef, SmallError> {
        check_name(&schema.name)?;
        if schema.columns.is_empty() {
            return Err(SmallError::invalid(&format!(
                "table {} has no columns",
                schema.name
            )));
        }
        for (i, col) in schema.columns.iter().enumerate() {
            check_name(&col.name)?;
            if schema.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SmallError::new(
                    ErrorKind::Duplicate,
                    &format!("duplicate column {}", col.name),
                ));
            }
        }
        for k in &schema.primary_key {
            if !schema.columns.iter().any(|c| &c.name == k) {
                return Err(SmallError::invalid(&format!(
                    "primary key column {} not in table {}",
                    k, schema.name
                )));
            }
        }

        let mut inner = self.inner.wl();
        if inner.names.contains_key(&schema.name) {
            return Err(SmallError::new(
                ErrorKind::Duplicate,
                &format!("table {} already exists", schema.name),
            ));
        }

        let id = inner.header.next_table_id;
        let index_id = inner.header.next_index_id;
        inner.header.next_table_id += 1;
        inner.header.next_index_id += 1;

        let space = id as SpaceID;
        let mut index_type = DICT_CLUSTERED;
        if !schema.primary_key.is_empty() {
            index_type |= DICT_UNIQUE;
        }
        let table = TableDef {
            id,
            name: schema.name.clone(),
            space,
            flags: 0,
            columns: schema.columns.clone(),
            indexes: vec![IndexDef {
                id: index_id,
                table_id: id,
                name: CLUSTERED_INDEX_NAME.to_string(),
                fields: schema.primary_key.clone(),
                index_type,
                space,
                root_page: NULL_PAGE_NO,
            }],
        };
        inner.tables.insert(id, table.clone());
        inner.names.insert(table.name.clone(), id);
        self.persist_locked(&inner)?;
        debug!("dictionary: created {:?}", table);
        Ok(table)
    }

    pub fn drop_table(&self, name: &str) -> Result<TableDef, SmallError> {
        let mut inner = self.inner.wl();
        let id = inner
            .names
            .remove(name)
            .ok_or_else(|| SmallError::not_found(&format!("table {} not found", name)))?;
        let table = inner
            .tables
            .remove(&id)
            .ok_or_else(|| SmallError::not_found(&format!("table {} not found", name)))?;
        self.persist_locked(&inner)?;
        debug!("dictionary: dropped table {}", name);
        Ok(table)
    }

    pub fn rename_table(&self, old: &str, new: &str) -> SmallResult {
        check_name(new)?;
        let mut inner = self.inner.wl();
        if inner.names.contains_key(new) {
            return Err(SmallError::new(
                ErrorKind::Duplicate,
                &format!("table {} already exists", new),
            ));
        }
        inner.table_mut(old)?.name = new.to_string();
        if let Some(id) = inner.names.remove(old) {
            inner.names.insert(new.to_string(), id);
        }
        self.persist_locked(&inner)
    }

    /// Register a secondary index on existing columns.
    pub fn create_index(
        &self,
        table: &str,
        name: &str,
        fields: &[&str],
        unique: bool,
    ) -> Result<IndexDef, SmallError> {
        check_name(name)?;
        if fields.is_empty() {
            return Err(SmallError::invalid(&format!("index {} has no fields", name)));
        }
        let mut inner = self.inner.wl();
        let index_id = inner.header.next_index_id;
        let def = inner.table_mut(table)?;
        if def.index(name).is_some() {
            return Err(SmallError::new(
                ErrorKind::Duplicate,
                &format!("index {} already exists on {}", name, table),
            ));
        }
        for f in fields {
            if def.column_pos(f).is_none() {
                return Err(SmallError::invalid(&format!(
                    "column {} not in table {}",
                    f, table
                )));
            }
        }
        let index = IndexDef {
            id: index_id,
            table_id: def.id,
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            index_type: if unique { DICT_UNIQUE } else { 0 },
            space: def.space,
            root_page: NULL_PAGE_NO,
        };
        def.indexes.push(index.clone());
        inner.header.next_index_id += 1;
        self.persist_locked(&inner)?;
        Ok(index)
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<IndexDef, SmallError> {
        let mut inner = self.inner.wl();
        let def = inner.table_mut(table)?;
        let pos = def
            .indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| SmallError::not_found(&format!("index {} not found", name)))?;
        if def.indexes[pos].is_clustered() {
            return Err(SmallError::invalid(&format!(
                "cannot drop the clustered index of {}",
                table
            )));
        }
        let index = def.indexes.remove(pos);
        self.persist_locked(&inner)?;
        Ok(index)
    }

    /// Record the root pointer page of an index tree.
    pub fn set_index_root(&self, table_id: TableID, index_id: IndexID, root: PageNo) -> SmallResult {
        let mut inner = self.inner.wl();
        let table = inner
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| SmallError::not_found(&format!("table id {} not found", table_id)))?;
        let index = table
            .indexes
            .iter_mut()
            .find(|i| i.id == index_id)
            .ok_or_else(|| SmallError::not_found(&format!("index id {} not found", index_id)))?;
        index.root_page = root;
        self.persist_locked(&inner)
    }

    pub fn table_by_name(&self, name: &str) -> Result<TableDef, SmallError> {
        let inner = self.inner.rl();
        inner
            .names
            .get(name)
            .and_then(|id| inner.tables.get(id))
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("table {} not found", name)))
    }

    pub fn table_by_id(&self, id: TableID) -> Result<TableDef, SmallError> {
        self.inner
            .rl()
            .tables
            .get(&id)
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("table id {} not found", id)))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.rl().tables.values().map(|t| t.name.clone()).collect()
    }

    pub fn tables(&self) -> Vec<TableDef> {
        self.inner.rl().tables.values().cloned().collect()
    }

    pub fn n_tables(&self) -> usize {
        self.inner.rl().tables.len()
    }

    pub fn header(&self) -> DictHeader {
        self.inner.rl().header
    }

    /// The system table rows as they would be written now.
    pub fn sys_rows(&self) -> SysRows {
        SysRows::build(self.inner.rl().tables.values())
    }

    /// Hand out a row id for a table without a primary key. The header
    /// is written once per batch of ids.
    pub fn alloc_row_id(&self) -> Result<u64, SmallError> {
        let mut inner = self.inner.wl();
        let id = inner.next_row_id;
        inner.next_row_id += 1;
        if id >= inner.header.next_row_id {
            inner.header.next_row_id = id + DICT_ID_BATCH;
            self.persist_locked(&inner)?;
        }
        Ok(id)
    }

    /// Make sure transaction ids up to `id` are never handed out again
    /// after a restart.
    pub fn reserve_trx_id(&self, id: TrxID) -> SmallResult {
        let mut inner = self.inner.wl();
        if id >= inner.header.next_trx_id {
            inner.header.next_trx_id = id + DICT_ID_BATCH;
            self.persist_locked(&inner)?;
        }
        Ok(())
    }

    /// Lowest transaction id that was never reserved.
    pub fn trx_id_floor(&self) -> TrxID {
        self.inner.rl().header.next_trx_id
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.rl();
        write!(
            f,
            "<Dictionary {:?} tables={:?}>",
            self.path,
            inner.tables.values().map(|t| &t.name).collect::<Vec<_>>()
        )
    }
}
