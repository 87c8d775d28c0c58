use std::{convert::TryFrom, fmt};

use itertools::Itertools;

use crate::{
    error::SmallError,
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
};

/// Length marker of an SQL NULL field.
pub const UNIV_SQL_NULL: u32 = 0xFFFF_FFFF;

/// Precise-type flags.
pub const DATA_NOT_NULL: u32 = 0x0100;
pub const DATA_UNSIGNED: u32 = 0x0200;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainType {
    Varchar = 1,
    Char = 2,
    FixBinary = 3,
    Binary = 4,
    Blob = 5,
    Int = 6,
    Sys = 8,
}

impl TryFrom<u8> for MainType {
    type Error = SmallError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(MainType::Varchar),
            2 => Ok(MainType::Char),
            3 => Ok(MainType::FixBinary),
            4 => Ok(MainType::Binary),
            5 => Ok(MainType::Blob),
            6 => Ok(MainType::Int),
            8 => Ok(MainType::Sys),
            _ => Err(SmallError::invalid(&format!("unknown main type {}", v))),
        }
    }
}

/// Type descriptor of a column: main type, precise type flags, maximum
/// length and charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub mtype: MainType,
    pub prtype: u32,
    pub len: u32,
    pub charset: u16,
}

impl DataType {
    pub fn new(mtype: MainType, prtype: u32, len: u32) -> Self {
        Self {
            mtype,
            prtype,
            len,
            charset: 0,
        }
    }

    pub fn int(len: u32) -> Self {
        Self::new(MainType::Int, 0, len)
    }

    pub fn unsigned_int(len: u32) -> Self {
        Self::new(MainType::Int, DATA_UNSIGNED, len)
    }

    pub fn varchar(len: u32) -> Self {
        Self::new(MainType::Varchar, 0, len)
    }

    pub fn binary(len: u32) -> Self {
        Self::new(MainType::Binary, 0, len)
    }

    pub fn is_unsigned(&self) -> bool {
        self.prtype & DATA_UNSIGNED != 0
    }

    pub fn is_not_null(&self) -> bool {
        self.prtype & DATA_NOT_NULL != 0
    }
}

impl Encodeable for DataType {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&(self.mtype as u8));
        writer.write(&self.prtype);
        writer.write(&self.len);
        writer.write(&self.charset);
    }
}

impl Decodeable for DataType {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        Ok(Self {
            mtype: MainType::try_from(reader.read::<u8>()?)?,
            prtype: reader.read()?,
            len: reader.read()?,
            charset: reader.read()?,
        })
    }
}

/// A single field of a tuple. `data == None` is SQL NULL.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Field {
    data: Option<Vec<u8>>,
    external: bool,
}

impl Field {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Some(data.to_vec()),
            external: false,
        }
    }

    pub fn null() -> Self {
        Self {
            data: None,
            external: false,
        }
    }

    /// A field whose body is an extern reference.
    pub fn new_external(reference: Vec<u8>) -> Self {
        Self {
            data: Some(reference),
            external: true,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        Self::new(&v.to_be_bytes())
    }

    pub fn from_u64(v: u64) -> Self {
        Self::new(&v.to_be_bytes())
    }

    pub fn from_text(s: &str) -> Self {
        Self::new(s.as_bytes())
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn set_external(&mut self, external: bool) {
        self.external = external;
    }

    /// Field length, `UNIV_SQL_NULL` for NULL.
    pub fn len(&self) -> u32 {
        match &self.data {
            Some(d) => d.len() as u32,
            None => UNIV_SQL_NULL,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_u64(&self) -> Option<u64> {
        let d = self.data.as_ref()?;
        if d.is_empty() || d.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - d.len()..].copy_from_slice(d);
        Some(u64::from_be_bytes(buf))
    }

    pub fn as_i64(&self) -> Option<i64> {
        let d = self.data.as_ref()?;
        if d.is_empty() || d.len() > 8 {
            return None;
        }
        // sign-extend from the first byte
        let fill = if d[0] & 0x80 != 0 { 0xFF } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - d.len()..].copy_from_slice(d);
        Some(i64::from_be_bytes(buf))
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.data.as_ref()?).ok()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.data {
            None => write!(f, "NULL"),
            Some(d) => {
                if self.external {
                    write!(f, "ext:")?;
                }
                match std::str::from_utf8(d) {
                    Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{:?}", s),
                    _ => write!(f, "0x{}", hex::encode(d)),
                }
            }
        }
    }
}

/// An ordered list of fields; the unit the record codec encodes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Tuple {
    fields: Vec<Field>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn from_bytes_fields(fields: &[&[u8]]) -> Self {
        Self::new(fields.iter().map(|f| Field::new(f)).collect())
    }

    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn field_mut(&mut self, i: usize) -> &mut Field {
        &mut self.fields[i]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    /// A tuple made of the first `n` fields.
    pub fn prefix(&self, n: usize) -> Tuple {
        Tuple::new(self.fields[..n.min(self.fields.len())].to_vec())
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({})", self.fields.iter().map(|x| format!("{:?}", x)).join(", "))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
