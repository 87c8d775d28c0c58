use std::{convert::TryFrom, fmt};

use crate::{
    error::{ErrorKind, SmallError},
    io::{SmallReader, SmallWriter},
    tx_log::SINGLE_REC_FLAG,
    types::{PageNo, SpaceID},
};

/// Types of the page-level redo records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MlogType {
    Byte1 = 1,
    Byte2 = 2,
    Byte4 = 4,
    Byte8 = 8,
    RecInsert = 9,
    RecUpdateInPlace = 13,
    RecDelete = 14,
    /// Zero-fill the page; the records that follow lay it out again.
    PageInit = 19,
    WriteString = 30,
    MultiRecEnd = 31,
}

impl TryFrom<u8> for MlogType {
    type Error = SmallError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v & !SINGLE_REC_FLAG {
            1 => Ok(MlogType::Byte1),
            2 => Ok(MlogType::Byte2),
            4 => Ok(MlogType::Byte4),
            8 => Ok(MlogType::Byte8),
            9 => Ok(MlogType::RecInsert),
            13 => Ok(MlogType::RecUpdateInPlace),
            14 => Ok(MlogType::RecDelete),
            19 => Ok(MlogType::PageInit),
            30 => Ok(MlogType::WriteString),
            31 => Ok(MlogType::MultiRecEnd),
            other => Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!("unknown redo record type {}", other),
            )),
        }
    }
}

impl MlogType {
    /// Width in bytes of the value written by a `write_ulint` record.
    pub fn ulint_size(&self) -> Option<usize> {
        match self {
            MlogType::Byte1 => Some(1),
            MlogType::Byte2 => Some(2),
            MlogType::Byte4 => Some(4),
            MlogType::Byte8 => Some(8),
            _ => None,
        }
    }
}

/// A record in the mtr's private log, before framing.
#[derive(Clone, PartialEq, Eq)]
pub struct MlogRecord {
    pub rec_type: MlogType,
    pub space: SpaceID,
    pub page_no: PageNo,
    pub body: Vec<u8>,
}

impl fmt::Debug for MlogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "mlog({:?}, page={}:{}, body=0x{})",
            self.rec_type,
            self.space,
            self.page_no,
            hex::encode(&self.body)
        )
    }
}

/// Write the part common to every record: type, compressed space id
/// and compressed page number.
pub fn mlog_write_initial_log_record(
    writer: &mut SmallWriter,
    rec_type: MlogType,
    space: SpaceID,
    page_no: PageNo,
) {
    writer.write(&(rec_type as u8));
    writer.write_compressed(space);
    writer.write_compressed(page_no);
}

pub fn ulint_body(offset: u16, value: u64, rec_type: MlogType) -> Vec<u8> {
    let mut w = SmallWriter::new();
    w.write(&offset);
    match rec_type {
        MlogType::Byte8 => w.write(&value),
        _ => w.write_compressed(value as u32),
    }
    w.to_bytes()
}

pub fn string_body(offset: u16, data: &[u8]) -> Vec<u8> {
    let mut w = SmallWriter::new_reserved(4 + data.len());
    w.write(&offset);
    w.write(&(data.len() as u16));
    w.write_bytes(data);
    w.to_bytes()
}

pub fn rec_insert_body(pos: u16, rec: &[u8]) -> Vec<u8> {
    string_body(pos, rec)
}

pub fn rec_update_body(offset: u16, bytes: &[u8]) -> Vec<u8> {
    string_body(offset, bytes)
}

pub fn rec_delete_body(offset: u16, len: u16) -> Vec<u8> {
    let mut w = SmallWriter::new();
    w.write(&offset);
    w.write(&len);
    w.to_bytes()
}

/// Read the body of a record of the given type, leaving the reader
/// right after it.
pub fn parse_body(rec_type: MlogType, reader: &mut SmallReader) -> Result<Vec<u8>, SmallError> {
    let mut w = SmallWriter::new();
    match rec_type {
        MlogType::Byte1 | MlogType::Byte2 | MlogType::Byte4 => {
            w.write(&reader.read::<u16>()?);
            w.write_compressed(reader.read_compressed()?);
        }
        MlogType::Byte8 => {
            w.write(&reader.read::<u16>()?);
            w.write(&reader.read::<u64>()?);
        }
        MlogType::WriteString | MlogType::RecInsert | MlogType::RecUpdateInPlace => {
            w.write(&reader.read::<u16>()?);
            let len = reader.read::<u16>()?;
            w.write(&len);
            w.write_bytes(reader.read_exact(len as usize)?);
        }
        MlogType::RecDelete => {
            w.write(&reader.read::<u16>()?);
            w.write(&reader.read::<u16>()?);
        }
        MlogType::PageInit | MlogType::MultiRecEnd => {}
    }
    Ok(w.to_bytes())
}

/// Parse an mtr log buffer back into records.
pub fn parse_log(buf: &[u8]) -> Result<Vec<MlogRecord>, SmallError> {
    let mut reader = SmallReader::new(buf);
    let mut out = Vec::new();
    while reader.remaining() > 0 {
        let type_byte = reader.read::<u8>()?;
        let rec_type = MlogType::try_from(type_byte)?;
        if rec_type == MlogType::MultiRecEnd {
            continue;
        }
        let space = reader.read_compressed()?;
        let page_no = reader.read_compressed()?;
        let body = parse_body(rec_type, &mut reader)?;
        out.push(MlogRecord {
            rec_type,
            space,
            page_no,
            body,
        });
    }
    Ok(out)
}
