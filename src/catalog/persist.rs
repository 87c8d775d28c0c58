//! The dictionary file, `ib_dict.sys`.
//!
//! | Part     | Content                                                |
//! |----------|--------------------------------------------------------|
//! | magic    | `"IBDC"`                                               |
//! | version  | u32                                                    |
//! | header   | next table id, next index id, next row id, next trx id |
//! | sections | SYS_TABLES, SYS_COLUMNS, SYS_INDEXES, SYS_FIELDS       |
//!
//! A section is a u32 row count followed by the rows, each one a
//! length-prefixed record body.

use std::{fs, path::Path};

use log::{debug, warn};

use crate::{
    catalog::sys_tables::{SysRows, SysTable},
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallFile, SmallReader, SmallWriter},
    record::{decode_body, encode_body},
    types::{IndexID, SmallResult, TableID, TrxID},
};

pub const DICT_MAGIC: &[u8; 4] = b"IBDC";
pub const DICT_VERSION: u32 = 1;

/// First id handed to user tables and indexes; the lower ones belong
/// to the system tables.
pub const DICT_FIRST_ID: u64 = 16;

/// Row and transaction ids are reserved in batches of this size, so the
/// header is written once per batch.
pub const DICT_ID_BATCH: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictHeader {
    pub next_table_id: TableID,
    pub next_index_id: IndexID,
    pub next_row_id: u64,
    pub next_trx_id: TrxID,
}

impl Default for DictHeader {
    fn default() -> Self {
        Self {
            next_table_id: DICT_FIRST_ID,
            next_index_id: DICT_FIRST_ID,
            next_row_id: 1,
            next_trx_id: 1,
        }
    }
}

impl Encodeable for DictHeader {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&self.next_table_id);
        writer.write(&self.next_index_id);
        writer.write(&self.next_row_id);
        writer.write(&self.next_trx_id);
    }
}

impl Decodeable for DictHeader {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        Ok(Self {
            next_table_id: reader.read()?,
            next_index_id: reader.read()?,
            next_row_id: reader.read()?,
            next_trx_id: reader.read()?,
        })
    }
}

pub fn encode_dict(header: &DictHeader, rows: &SysRows) -> Result<Vec<u8>, SmallError> {
    let mut writer = SmallWriter::new();
    writer.write_bytes(DICT_MAGIC);
    writer.write(&DICT_VERSION);
    writer.write(header);
    for table in SysTable::ALL {
        let tuples = rows.of(table);
        writer.write(&(tuples.len() as u32));
        for t in tuples {
            writer.write(&encode_body(t)?);
        }
    }
    Ok(writer.to_bytes())
}

/// Parse the file. Rows whose body does not decode into exactly the
/// column count of their table are skipped.
pub fn decode_dict(buf: &[u8]) -> Result<(DictHeader, SysRows), SmallError> {
    let mut reader = SmallReader::new(buf);
    let magic = reader.read_exact(4)?;
    if magic != DICT_MAGIC {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!("bad dictionary magic: {}", hex::encode(magic)),
        ));
    }
    let version = reader.read::<u32>()?;
    if version != DICT_VERSION {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!("unsupported dictionary version {}", version),
        ));
    }
    let header = reader.read::<DictHeader>()?;

    let mut rows = SysRows::default();
    for table in SysTable::ALL {
        let n = reader.read::<u32>()?;
        for i in 0..n {
            let body = reader.read::<Vec<u8>>()?;
            match decode_body(&body, table.n_cols()) {
                Ok((tuple, used)) if used == body.len() => rows.of_mut(table).push(tuple),
                _ => warn!("{}: skipping malformed row {}", table.name(), i),
            }
        }
    }
    Ok((header, rows))
}

/// Replace the file: write a temporary copy, sync it, then rename it
/// over the old one.
pub fn write_dict_file(path: &Path, header: &DictHeader, rows: &SysRows) -> SmallResult {
    let bytes = encode_dict(header, rows)?;
    let tmp = path.with_extension("tmp");
    {
        let file = SmallFile::create_truncate(&tmp)?;
        file.write_at(0, &bytes)?;
        file.sync()?;
    }
    fs::rename(&tmp, path)?;
    debug!("dictionary written to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

pub fn read_dict_file(path: &Path) -> Result<(DictHeader, SysRows), SmallError> {
    let file = SmallFile::open(path)?;
    decode_dict(&file.read_all()?)
}
