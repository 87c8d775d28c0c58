//! Stored form of a clustered index row.
//!
//! | Bytes | Content                                   |
//! |-------|-------------------------------------------|
//! | 0-7   | id of the transaction that wrote the row  |
//! | 8     | flags, bit 0 = delete-marked              |
//! | 9-    | record body of the columns                |

use crate::{
    catalog::{IndexDef, TableDef},
    error::{ErrorKind, SmallError},
    io::read_u64,
    record::{decode_body, encode_body, encode_key, Field, Tuple},
    types::TrxID,
};

pub const ROW_HEADER_SIZE: usize = 9;
const ROW_DELETED: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub trx_id: TrxID,
    pub deleted: bool,
    pub body: Vec<u8>,
}

impl StoredRow {
    pub fn new(trx_id: TrxID, tuple: &Tuple) -> Result<Self, SmallError> {
        Ok(Self {
            trx_id,
            deleted: false,
            body: encode_body(tuple)?,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, SmallError> {
        if bytes.len() < ROW_HEADER_SIZE {
            return Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("row of {} bytes is shorter than its header", bytes.len()),
            ));
        }
        Ok(Self {
            trx_id: read_u64(bytes, 0),
            deleted: bytes[8] & ROW_DELETED != 0,
            body: bytes[ROW_HEADER_SIZE..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROW_HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.trx_id.to_be_bytes());
        out.push(if self.deleted { ROW_DELETED } else { 0 });
        out.extend_from_slice(&self.body);
        out
    }

    /// The same columns, delete-marked by `trx_id`.
    pub fn delete_marked(&self, trx_id: TrxID) -> Self {
        Self {
            trx_id,
            deleted: true,
            body: self.body.clone(),
        }
    }

    /// Columns as stored, extern references unresolved.
    pub fn tuple(&self, n_cols: usize) -> Result<Tuple, SmallError> {
        let (tuple, used) = decode_body(&self.body, n_cols)?;
        if used != self.body.len() {
            return Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("row body has {} trailing bytes", self.body.len() - used),
            ));
        }
        Ok(tuple)
    }
}

/// Clustered index key of a row. Tables keyed by a hidden row id take
/// it from `row_id`.
pub fn row_key(table: &TableDef, tuple: &Tuple, row_id: Option<u64>) -> Result<Vec<u8>, SmallError> {
    let index = table.clustered_index()?;
    if index.fields.is_empty() {
        let id = row_id.ok_or_else(|| SmallError::invalid("row id required"))?;
        return Ok(id.to_be_bytes().to_vec());
    }
    let positions = table.field_positions(index)?;
    let types = table.column_types();
    let fields: Vec<Field> = positions.iter().map(|p| tuple.field(*p).clone()).collect();
    let key_types: Vec<_> = positions.iter().map(|p| types[*p]).collect();
    Ok(encode_key(&Tuple::new(fields), &key_types))
}

/// Clustered index key from the values of the key columns alone, or
/// from a single row id field.
pub fn key_from_values(table: &TableDef, key: &Tuple) -> Result<Vec<u8>, SmallError> {
    let index = table.clustered_index()?;
    if index.fields.is_empty() {
        if key.n_fields() != 1 {
            return Err(SmallError::invalid("a row id key has one field"));
        }
        let id = key
            .field(0)
            .as_u64()
            .ok_or_else(|| SmallError::invalid("row id must be an integer"))?;
        return Ok(id.to_be_bytes().to_vec());
    }
    if key.n_fields() != index.fields.len() {
        return Err(SmallError::invalid(&format!(
            "key of {} has {} fields, got {}",
            table.name,
            index.fields.len(),
            key.n_fields()
        )));
    }
    Ok(encode_key(key, &index_types(table, index)?))
}

pub fn index_types(
    table: &TableDef,
    index: &IndexDef,
) -> Result<Vec<crate::record::DataType>, SmallError> {
    let types = table.column_types();
    Ok(table
        .field_positions(index)?
        .into_iter()
        .map(|p| types[p])
        .collect())
}

/// Encoded values of a secondary index's columns.
pub fn secondary_prefix(table: &TableDef, index: &IndexDef, tuple: &Tuple) -> Result<Vec<u8>, SmallError> {
    let positions = table.field_positions(index)?;
    let fields: Vec<Field> = positions.iter().map(|p| tuple.field(*p).clone()).collect();
    Ok(encode_key(&Tuple::new(fields), &index_types(table, index)?))
}

/// Secondary index entry key: the index columns followed by the
/// clustered key, so equal column values stay distinct.
pub fn secondary_key(
    table: &TableDef,
    index: &IndexDef,
    tuple: &Tuple,
    pk: &[u8],
) -> Result<Vec<u8>, SmallError> {
    let mut key = secondary_prefix(table, index, tuple)?;
    key.extend_from_slice(pk);
    Ok(key)
}
