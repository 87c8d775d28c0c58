use crate::{
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
    types::Lsn,
};

pub const LOG_MAGIC: [u8; 4] = *b"IBLG";
pub const LOG_VERSION: u32 = 1;
pub const LOG_HEADER_SIZE: usize = 64;

/// The fixed header at the beginning of the log file.
///
/// | Bytes | Field          |
/// |-------|----------------|
/// | 0-3   | magic "IBLG"   |
/// | 4-7   | version        |
/// | 8-15  | start LSN      |
/// | 16-23 | checkpoint LSN |
/// | 24-31 | flushed LSN    |
/// | 32-39 | current LSN    |
/// | 40-47 | file size      |
/// | 48-63 | reserved       |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u32,
    /// LSN of the first record byte stored in the file.
    pub start_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub flushed_lsn: Lsn,
    pub current_lsn: Lsn,
    pub file_size: u64,
}

impl LogHeader {
    pub fn new(file_size: u64) -> Self {
        Self {
            version: LOG_VERSION,
            start_lsn: 0,
            checkpoint_lsn: 0,
            flushed_lsn: 0,
            current_lsn: 0,
            file_size,
        }
    }

    /// Whether the file holds records past the last checkpoint.
    pub fn needs_recovery(&self) -> bool {
        self.current_lsn > self.checkpoint_lsn || self.flushed_lsn < self.current_lsn
    }

    /// Field-wise newest of two headers. Every LSN in the header only
    /// grows, so writers racing on the file can merge instead of
    /// overwriting each other with an older snapshot.
    pub fn merged(&self, other: &LogHeader) -> LogHeader {
        LogHeader {
            version: self.version.max(other.version),
            start_lsn: self.start_lsn.max(other.start_lsn),
            checkpoint_lsn: self.checkpoint_lsn.max(other.checkpoint_lsn),
            flushed_lsn: self.flushed_lsn.max(other.flushed_lsn),
            current_lsn: self.current_lsn.max(other.current_lsn),
            file_size: self.file_size.max(other.file_size),
        }
    }

    /// File offset of the byte with the given LSN.
    pub fn offset_of(&self, lsn: Lsn) -> u64 {
        LOG_HEADER_SIZE as u64 + (lsn - self.start_lsn)
    }
}

impl Encodeable for LogHeader {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write_bytes(&LOG_MAGIC);
        writer.write(&self.version);
        writer.write(&self.start_lsn);
        writer.write(&self.checkpoint_lsn);
        writer.write(&self.flushed_lsn);
        writer.write(&self.current_lsn);
        writer.write(&self.file_size);
        writer.write_bytes(&[0u8; LOG_HEADER_SIZE - 48]);
    }
}

impl Decodeable for LogHeader {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let magic = reader.read_exact(4)?;
        if magic != LOG_MAGIC {
            return Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!("bad log magic: {}", hex::encode(magic)),
            ));
        }
        let header = Self {
            version: reader.read()?,
            start_lsn: reader.read()?,
            checkpoint_lsn: reader.read()?,
            flushed_lsn: reader.read()?,
            current_lsn: reader.read()?,
            file_size: reader.read()?,
        };
        reader.read_exact(LOG_HEADER_SIZE - 48)?;
        if header.version != LOG_VERSION {
            return Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!("unsupported log version {}", header.version),
            ));
        }
        if header.checkpoint_lsn > header.current_lsn || header.start_lsn > header.current_lsn {
            return Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!("inconsistent log header: {:?}", header),
            ));
        }
        Ok(header)
    }
}
