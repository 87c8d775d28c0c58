use std::path::Path;

use log::{info, warn};

use crate::{
    error::SmallError,
    io::{Decodeable, Encodeable, SmallFile},
    transaction::undo::record::UndoRecord,
    types::SmallResult,
};

/// Undo records persisted to `ib_undo.log` as a stream of
/// `[4-byte length][record]` frames.
pub struct UndoStore {
    file: SmallFile,
}

impl UndoStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SmallError> {
        Ok(Self {
            file: SmallFile::open(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn append(&self, rec: &UndoRecord) -> SmallResult {
        let bytes = rec.to_bytes();
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(&bytes);
        self.file.append(&frame)?;
        Ok(())
    }

    pub fn sync(&self) -> SmallResult {
        self.file.sync()
    }

    /// Read every complete frame, stopping at the first truncated one.
    pub fn load(&self) -> Result<Vec<UndoRecord>, SmallError> {
        let buf = self.file.read_all()?;
        let mut records = Vec::new();
        let mut off = 0;
        while off + 4 <= buf.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&buf[off..off + 4]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            off += 4;
            if len == 0 || off + len > buf.len() {
                warn!("undo log {:?}: truncated frame at {}", self.path(), off - 4);
                break;
            }
            records.push(UndoRecord::from_bytes(&buf[off..off + len])?);
            off += len;
        }
        if !records.is_empty() {
            info!("undo log {:?}: loaded {} records", self.path(), records.len());
        }
        Ok(records)
    }

    /// Drop every persisted record.
    pub fn reset(&self) -> SmallResult {
        self.file.set_len(0)?;
        self.file.sync()
    }
}
