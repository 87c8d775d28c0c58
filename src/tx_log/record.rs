use std::fmt;

use crate::{
    error::SmallError,
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
    types::{PageNo, SpaceID},
};

pub const LOG_RECORD_HEADER_SIZE: usize = 13;

/// Set on the type byte of a record that forms a group on its own.
pub const SINGLE_REC_FLAG: u8 = 0x80;

/// A redo record as it sits in the log file.
///
/// | Bytes | Field                |
/// |-------|----------------------|
/// | 0     | type                 |
/// | 1-4   | space id             |
/// | 5-8   | page no              |
/// | 9-12  | payload length       |
/// | 13-   | payload              |
#[derive(Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub rec_type: u8,
    pub space: SpaceID,
    pub page_no: PageNo,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(rec_type: u8, space: SpaceID, page_no: PageNo, payload: Vec<u8>) -> Self {
        Self {
            rec_type,
            space,
            page_no,
            payload,
        }
    }

    /// Bytes the record takes in the log stream.
    pub fn framed_len(&self) -> usize {
        LOG_RECORD_HEADER_SIZE + self.payload.len()
    }

    pub fn base_type(&self) -> u8 {
        self.rec_type & !SINGLE_REC_FLAG
    }

    pub fn is_single(&self) -> bool {
        self.rec_type & SINGLE_REC_FLAG != 0
    }
}

impl Encodeable for LogRecord {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&self.rec_type);
        writer.write(&self.space);
        writer.write(&self.page_no);
        writer.write(&(self.payload.len() as u32));
        writer.write_bytes(&self.payload);
    }
}

/// Truncated input yields `ShortBuffer`, which the recovery scan takes
/// as the end of the log.
impl Decodeable for LogRecord {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let rec_type = reader.read::<u8>()?;
        let space = reader.read::<u32>()?;
        let page_no = reader.read::<u32>()?;
        let len = reader.read::<u32>()? as usize;
        Ok(Self {
            rec_type,
            space,
            page_no,
            payload: reader.read_exact(len)?.to_vec(),
        })
    }
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "log_record(type={}, page={}:{}, payload=0x{})",
            self.rec_type,
            self.space,
            self.page_no,
            hex::encode(&self.payload)
        )
    }
}

pub fn encode_record(rec: &LogRecord) -> Vec<u8> {
    rec.to_bytes()
}

pub fn decode_record(buf: &[u8]) -> Result<(LogRecord, usize), SmallError> {
    let mut reader = SmallReader::new(buf);
    let rec = reader.read::<LogRecord>()?;
    Ok((rec, reader.position()))
}
