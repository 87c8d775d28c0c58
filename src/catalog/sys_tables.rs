//! Rows of the four system tables.
//!
//! | Table       | Columns                                                  |
//! |-------------|----------------------------------------------------------|
//! | SYS_TABLES  | name, id, n_cols, space, flags                           |
//! | SYS_COLUMNS | table_id, pos, name, mtype, prtype, len                  |
//! | SYS_INDEXES | table_id, id, name, n_fields, type, space, root_page     |
//! | SYS_FIELDS  | index_id, pos, col_name                                  |
//!
//! Integers are 8-byte unsigned fields, names are varchars.

use crate::{
    catalog::mem::{ColumnDef, IndexDef, TableDef},
    error::SmallError,
    record::{DataType, Field, MainType, Tuple},
    types::TableID,
};

pub const SYS_TABLES_ID: TableID = 1;
pub const SYS_COLUMNS_ID: TableID = 2;
pub const SYS_INDEXES_ID: TableID = 3;
pub const SYS_FIELDS_ID: TableID = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysTable {
    Tables,
    Columns,
    Indexes,
    Fields,
}

impl SysTable {
    pub const ALL: [SysTable; 4] = [
        SysTable::Tables,
        SysTable::Columns,
        SysTable::Indexes,
        SysTable::Fields,
    ];

    pub fn id(self) -> TableID {
        match self {
            SysTable::Tables => SYS_TABLES_ID,
            SysTable::Columns => SYS_COLUMNS_ID,
            SysTable::Indexes => SYS_INDEXES_ID,
            SysTable::Fields => SYS_FIELDS_ID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SysTable::Tables => "SYS_TABLES",
            SysTable::Columns => "SYS_COLUMNS",
            SysTable::Indexes => "SYS_INDEXES",
            SysTable::Fields => "SYS_FIELDS",
        }
    }

    pub fn n_cols(self) -> usize {
        match self {
            SysTable::Tables => 5,
            SysTable::Columns => 6,
            SysTable::Indexes => 7,
            SysTable::Fields => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysTablesRow {
    pub name: String,
    pub id: u64,
    pub n_cols: u64,
    pub space: u64,
    pub flags: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysColumnsRow {
    pub table_id: u64,
    pub pos: u64,
    pub name: String,
    pub mtype: u64,
    pub prtype: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysIndexesRow {
    pub table_id: u64,
    pub id: u64,
    pub name: String,
    pub n_fields: u64,
    pub index_type: u64,
    pub space: u64,
    pub root_page: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysFieldsRow {
    pub index_id: u64,
    pub pos: u64,
    pub col_name: String,
}

fn get_u64(tuple: &Tuple, i: usize) -> Result<u64, SmallError> {
    tuple
        .field(i)
        .as_u64()
        .ok_or_else(|| SmallError::invalid(&format!("field {} is not an integer", i)))
}

fn get_str(tuple: &Tuple, i: usize) -> Result<String, SmallError> {
    tuple
        .field(i)
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| SmallError::invalid(&format!("field {} is not text", i)))
}

fn expect_cols(tuple: &Tuple, table: SysTable) -> Result<(), SmallError> {
    if tuple.n_fields() != table.n_cols() {
        return Err(SmallError::invalid(&format!(
            "{} row has {} fields, expected {}",
            table.name(),
            tuple.n_fields(),
            table.n_cols()
        )));
    }
    Ok(())
}

impl SysTablesRow {
    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            Field::from_text(&self.name),
            Field::from_u64(self.id),
            Field::from_u64(self.n_cols),
            Field::from_u64(self.space),
            Field::from_u64(self.flags),
        ])
    }

    pub fn from_tuple(t: &Tuple) -> Result<Self, SmallError> {
        expect_cols(t, SysTable::Tables)?;
        Ok(Self {
            name: get_str(t, 0)?,
            id: get_u64(t, 1)?,
            n_cols: get_u64(t, 2)?,
            space: get_u64(t, 3)?,
            flags: get_u64(t, 4)?,
        })
    }
}

impl SysColumnsRow {
    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            Field::from_u64(self.table_id),
            Field::from_u64(self.pos),
            Field::from_text(&self.name),
            Field::from_u64(self.mtype),
            Field::from_u64(self.prtype),
            Field::from_u64(self.len),
        ])
    }

    pub fn from_tuple(t: &Tuple) -> Result<Self, SmallError> {
        expect_cols(t, SysTable::Columns)?;
        Ok(Self {
            table_id: get_u64(t, 0)?,
            pos: get_u64(t, 1)?,
            name: get_str(t, 2)?,
            mtype: get_u64(t, 3)?,
            prtype: get_u64(t, 4)?,
            len: get_u64(t, 5)?,
        })
    }

    pub fn column(&self) -> Result<ColumnDef, SmallError> {
        let mtype = MainType::try_from(self.mtype as u8)?;
        Ok(ColumnDef::new(
            &self.name,
            DataType::new(mtype, self.prtype as u32, self.len as u32),
        ))
    }
}

impl SysIndexesRow {
    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            Field::from_u64(self.table_id),
            Field::from_u64(self.id),
            Field::from_text(&self.name),
            Field::from_u64(self.n_fields),
            Field::from_u64(self.index_type),
            Field::from_u64(self.space),
            Field::from_u64(self.root_page),
        ])
    }

    pub fn from_tuple(t: &Tuple) -> Result<Self, SmallError> {
        expect_cols(t, SysTable::Indexes)?;
        Ok(Self {
            table_id: get_u64(t, 0)?,
            id: get_u64(t, 1)?,
            name: get_str(t, 2)?,
            n_fields: get_u64(t, 3)?,
            index_type: get_u64(t, 4)?,
            space: get_u64(t, 5)?,
            root_page: get_u64(t, 6)?,
        })
    }
}

impl SysFieldsRow {
    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            Field::from_u64(self.index_id),
            Field::from_u64(self.pos),
            Field::from_text(&self.col_name),
        ])
    }

    pub fn from_tuple(t: &Tuple) -> Result<Self, SmallError> {
        expect_cols(t, SysTable::Fields)?;
        Ok(Self {
            index_id: get_u64(t, 0)?,
            pos: get_u64(t, 1)?,
            col_name: get_str(t, 2)?,
        })
    }
}

/// The SYS_* rows describing every table, in table id order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SysRows {
    pub tables: Vec<Tuple>,
    pub columns: Vec<Tuple>,
    pub indexes: Vec<Tuple>,
    pub fields: Vec<Tuple>,
}

impl SysRows {
    pub fn of(&self, table: SysTable) -> &[Tuple] {
        match table {
            SysTable::Tables => &self.tables,
            SysTable::Columns => &self.columns,
            SysTable::Indexes => &self.indexes,
            SysTable::Fields => &self.fields,
        }
    }

    pub fn of_mut(&mut self, table: SysTable) -> &mut Vec<Tuple> {
        match table {
            SysTable::Tables => &mut self.tables,
            SysTable::Columns => &mut self.columns,
            SysTable::Indexes => &mut self.indexes,
            SysTable::Fields => &mut self.fields,
        }
    }

    pub fn add_table(&mut self, table: &TableDef) {
        self.tables.push(
            SysTablesRow {
                name: table.name.clone(),
                id: table.id,
                n_cols: table.n_cols() as u64,
                space: table.space as u64,
                flags: table.flags as u64,
            }
            .to_tuple(),
        );
        for (pos, col) in table.columns.iter().enumerate() {
            self.columns.push(
                SysColumnsRow {
                    table_id: table.id,
                    pos: pos as u64,
                    name: col.name.clone(),
                    mtype: col.dtype.mtype as u64,
                    prtype: col.dtype.prtype as u64,
                    len: col.dtype.len as u64,
                }
                .to_tuple(),
            );
        }
        for index in &table.indexes {
            self.add_index(index);
        }
    }

    pub fn add_index(&mut self, index: &IndexDef) {
        self.indexes.push(
            SysIndexesRow {
                table_id: index.table_id,
                id: index.id,
                name: index.name.clone(),
                n_fields: index.fields.len() as u64,
                index_type: index.index_type as u64,
                space: index.space as u64,
                root_page: index.root_page as u64,
            }
            .to_tuple(),
        );
        for (pos, f) in index.fields.iter().enumerate() {
            self.fields.push(
                SysFieldsRow {
                    index_id: index.id,
                    pos: pos as u64,
                    col_name: f.clone(),
                }
                .to_tuple(),
            );
        }
    }

    /// The rows of every table, rebuilt from the registry.
    pub fn build<'a, I: IntoIterator<Item = &'a TableDef>>(tables: I) -> Self {
        let mut rows = SysRows::default();
        for t in tables {
            rows.add_table(t);
        }
        rows
    }
}
