use std::fmt;

use crate::{
    error::{ErrorKind, SmallError},
    record::{DataType, Tuple},
    types::{IndexID, PageNo, SpaceID, TableID, NULL_PAGE_NO},
};

/// Index type bits, as stored in SYS_INDEXES.
pub const DICT_CLUSTERED: u32 = 1;
pub const DICT_UNIQUE: u32 = 2;

/// Name of the clustered index every table gets.
pub const CLUSTERED_INDEX_NAME: &str = "PRIMARY";

pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: DataType,
}

impl ColumnDef {
    pub fn new(name: &str, dtype: DataType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub id: IndexID,
    pub table_id: TableID,
    pub name: String,
    /// Column names, in key order.
    pub fields: Vec<String>,
    pub index_type: u32,
    pub space: SpaceID,
    /// Page holding the root pointer of the tree, `NULL_PAGE_NO` until
    /// the tree exists.
    pub root_page: PageNo,
}

impl IndexDef {
    pub fn is_clustered(&self) -> bool {
        self.index_type & DICT_CLUSTERED != 0
    }

    pub fn is_unique(&self) -> bool {
        self.index_type & DICT_UNIQUE != 0
    }

    pub fn has_root(&self) -> bool {
        self.root_page != NULL_PAGE_NO
    }
}

/// What a caller hands to `create_table`: the columns plus the names of
/// the primary key columns. A table without a primary key is keyed by
/// a hidden row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>, primary_key: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct TableDef {
    pub id: TableID,
    pub name: String,
    pub space: SpaceID,
    pub flags: u32,
    pub columns: Vec<ColumnDef>,
    /// The clustered index comes first.
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_pos(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.dtype).collect()
    }

    pub fn clustered_index(&self) -> Result<&IndexDef, SmallError> {
        self.indexes
            .iter()
            .find(|i| i.is_clustered())
            .ok_or_else(|| {
                SmallError::new(
                    ErrorKind::InvalidState,
                    &format!("table {} has no clustered index", self.name),
                )
            })
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn index_by_id(&self, id: IndexID) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.id == id)
    }

    /// Positions of the columns of an index.
    pub fn field_positions(&self, index: &IndexDef) -> Result<Vec<usize>, SmallError> {
        index
            .fields
            .iter()
            .map(|f| {
                self.column_pos(f).ok_or_else(|| {
                    SmallError::not_found(&format!("column {} of table {}", f, self.name))
                })
            })
            .collect()
    }

    /// Whether rows are keyed by a hidden row id.
    pub fn uses_row_id(&self) -> bool {
        match self.clustered_index() {
            Ok(index) => index.fields.is_empty(),
            Err(_) => true,
        }
    }

    /// Check a row against the column list.
    pub fn check_tuple(&self, tuple: &Tuple) -> Result<(), SmallError> {
        if tuple.n_fields() != self.n_cols() {
            return Err(SmallError::invalid(&format!(
                "table {} has {} columns, got {} values",
                self.name,
                self.n_cols(),
                tuple.n_fields()
            )));
        }
        for (col, field) in self.columns.iter().zip(tuple.fields()) {
            if field.is_null() && col.dtype.is_not_null() {
                return Err(SmallError::invalid(&format!(
                    "column {}.{} cannot be NULL",
                    self.name, col.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TableDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<table {} id={} space={} cols={:?} indexes={:?}>",
            self.name,
            self.id,
            self.space,
            self.columns.iter().map(|c| &c.name).collect::<Vec<_>>(),
            self.indexes.iter().map(|i| &i.name).collect::<Vec<_>>(),
        )
    }
}

/// Table and index names: 1 to 64 characters, letters, digits, `_`
/// and `$`.
pub fn check_name(name: &str) -> Result<(), SmallError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if ok {
        Ok(())
    } else {
        Err(SmallError::invalid(&format!("invalid name {:?}", name)))
    }
}
