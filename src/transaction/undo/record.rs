use std::{convert::TryFrom, fmt};

use crate::{
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
    types::{TableID, TrxID},
};

pub const UNDO_RECORD_HEADER_SIZE: usize = 19;
const UNDO_PAYLOAD_HEADER_SIZE: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UndoType {
    Insert = 11,
    UpdExist = 12,
    UpdDel = 13,
    DelMark = 14,
}

impl TryFrom<u8> for UndoType {
    type Error = SmallError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            11 => Ok(UndoType::Insert),
            12 => Ok(UndoType::UpdExist),
            13 => Ok(UndoType::UpdDel),
            14 => Ok(UndoType::DelMark),
            _ => Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!("unknown undo record type {}", v),
            )),
        }
    }
}

impl UndoType {
    /// Insert undo can be thrown away at commit; the rest is kept for
    /// older read views until purge.
    pub fn is_insert(self) -> bool {
        self == UndoType::Insert
    }
}

/// An undo record: a 19-byte header (type, compiler info, updated
/// extern flag, undo number, table id) followed by the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub rec_type: UndoType,
    pub cmpl_info: u8,
    pub updated_extern: bool,
    pub undo_no: u64,
    pub table_id: TableID,
    pub data: Vec<u8>,
}

impl UndoRecord {
    pub fn new(rec_type: UndoType, undo_no: u64, table_id: TableID, data: Vec<u8>) -> Self {
        Self {
            rec_type,
            cmpl_info: 0,
            updated_extern: false,
            undo_no,
            table_id,
            data,
        }
    }

    /// Record carrying a logical inverse of a row change.
    pub fn for_action(undo_no: u64, table_id: TableID, trx_id: TrxID, action: &UndoAction) -> Self {
        let payload = UndoPayload {
            trx_id,
            key: action.key().to_vec(),
            before: action.before().map(|b| b.to_vec()).unwrap_or_default(),
        };
        Self::new(action.undo_type(), undo_no, table_id, payload.to_bytes())
    }

    pub fn payload(&self) -> Result<UndoPayload, SmallError> {
        UndoPayload::from_bytes(&self.data)
    }

    /// The change to make to undo the recorded one.
    pub fn action(&self) -> Result<UndoAction, SmallError> {
        let p = self.payload()?;
        Ok(match self.rec_type {
            UndoType::Insert => UndoAction::Insert { key: p.key },
            UndoType::UpdExist => UndoAction::Update {
                key: p.key,
                before: p.before,
            },
            UndoType::UpdDel => UndoAction::Reinsert {
                key: p.key,
                before: p.before,
            },
            UndoType::DelMark => UndoAction::Delete {
                key: p.key,
                before: p.before,
            },
        })
    }
}

impl Encodeable for UndoRecord {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&(self.rec_type as u8));
        writer.write(&self.cmpl_info);
        writer.write(&self.updated_extern);
        writer.write(&self.undo_no);
        writer.write(&self.table_id);
        writer.write_bytes(&self.data);
    }
}

impl Decodeable for UndoRecord {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        if reader.remaining() < UNDO_RECORD_HEADER_SIZE {
            return Err(SmallError::short_buffer(UNDO_RECORD_HEADER_SIZE, reader.remaining()));
        }
        let rec_type = UndoType::try_from(reader.read::<u8>()?)?;
        let cmpl_info = reader.read::<u8>()?;
        let updated_extern = reader.read::<u8>()? != 0;
        let undo_no = reader.read::<u64>()?;
        let table_id = reader.read::<u64>()?;
        let data = reader.rest().to_vec();
        Ok(Self {
            rec_type,
            cmpl_info,
            updated_extern,
            undo_no,
            table_id,
            data,
        })
    }
}

impl fmt::Debug for UndoRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<UndoRecord {:?} no={} table={} data={}>",
            self.rec_type,
            self.undo_no,
            self.table_id,
            hex::encode(&self.data)
        )
    }
}

/// Payload of the row undo records: the writing transaction, the
/// primary key and the before-image (empty for inserts).
///
/// # Format
/// - 8 bytes: trx id
/// - 4 bytes: key length
/// - 4 bytes: before-image length
/// - key, before-image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPayload {
    pub trx_id: TrxID,
    pub key: Vec<u8>,
    pub before: Vec<u8>,
}

impl Encodeable for UndoPayload {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&self.trx_id);
        writer.write(&(self.key.len() as u32));
        writer.write(&(self.before.len() as u32));
        writer.write_bytes(&self.key);
        writer.write_bytes(&self.before);
    }
}

impl Decodeable for UndoPayload {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        if reader.remaining() < UNDO_PAYLOAD_HEADER_SIZE {
            return Err(SmallError::short_buffer(UNDO_PAYLOAD_HEADER_SIZE, reader.remaining()));
        }
        let trx_id = reader.read::<u64>()?;
        let key_len = reader.read::<u32>()? as usize;
        let before_len = reader.read::<u32>()? as usize;
        let key = reader.read_exact(key_len)?.to_vec();
        let before = reader.read_exact(before_len)?.to_vec();
        Ok(Self {
            trx_id,
            key,
            before,
        })
    }
}

/// A row change, recorded so it can be reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// The key was inserted; revert by removing it.
    Insert { key: Vec<u8> },
    /// The row was overwritten; revert by restoring the before-image.
    Update { key: Vec<u8>, before: Vec<u8> },
    /// A delete-marked row was written over; revert by restoring the
    /// delete-marked image.
    Reinsert { key: Vec<u8>, before: Vec<u8> },
    /// The row was delete-marked; revert by restoring the before-image.
    Delete { key: Vec<u8>, before: Vec<u8> },
}

impl UndoAction {
    pub fn key(&self) -> &[u8] {
        match self {
            UndoAction::Insert { key } => key,
            UndoAction::Update { key, .. } => key,
            UndoAction::Reinsert { key, .. } => key,
            UndoAction::Delete { key, .. } => key,
        }
    }

    pub fn before(&self) -> Option<&[u8]> {
        match self {
            UndoAction::Insert { .. } => None,
            UndoAction::Update { before, .. } => Some(before),
            UndoAction::Reinsert { before, .. } => Some(before),
            UndoAction::Delete { before, .. } => Some(before),
        }
    }

    pub fn undo_type(&self) -> UndoType {
        match self {
            UndoAction::Insert { .. } => UndoType::Insert,
            UndoAction::Update { .. } => UndoType::UpdExist,
            UndoAction::Reinsert { .. } => UndoType::UpdDel,
            UndoAction::Delete { .. } => UndoType::DelMark,
        }
    }
}
