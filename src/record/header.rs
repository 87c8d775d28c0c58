//! The 5 "extra" bytes stored in front of every record body.
//!
//! | Byte | Content                                     |
//! |------|---------------------------------------------|
//! | 0    | info bits (high nibble) \| n_owned (low)    |
//! | 1-2  | heap_no << 3 \| status                      |
//! | 3-4  | next record offset (free-list link)         |

use std::convert::TryFrom;

use crate::{
    error::{ErrorKind, SmallError},
    io::{read_u16, write_u16},
};

pub const REC_N_EXTRA_BYTES: usize = 5;

pub const REC_INFO_BITS_MASK: u8 = 0xF0;
pub const REC_N_OWNED_MASK: u8 = 0x0F;
pub const REC_INFO_MIN_REC_FLAG: u8 = 0x10;
pub const REC_INFO_DELETED_FLAG: u8 = 0x20;

const REC_INFO_OFFSET: usize = 0;
const REC_HEAP_STATUS_OFFSET: usize = 1;
const REC_NEXT_OFFSET: usize = 3;

pub const HEAP_NO_INFIMUM: u16 = 0;
pub const HEAP_NO_SUPREMUM: u16 = 1;
pub const HEAP_NO_USER_LOW: u16 = 2;

pub const INFIMUM_DATA: [u8; 8] = *b"infimum\0";
pub const SUPREMUM_DATA: [u8; 8] = *b"supremum";

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecStatus {
    Ordinary = 0,
    NodePtr = 1,
    Infimum = 2,
    Supremum = 3,
}

impl TryFrom<u8> for RecStatus {
    type Error = SmallError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RecStatus::Ordinary),
            1 => Ok(RecStatus::NodePtr),
            2 => Ok(RecStatus::Infimum),
            3 => Ok(RecStatus::Supremum),
            _ => Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("invalid record status: {}", v),
            )),
        }
    }
}

pub fn info_bits(rec: &[u8]) -> u8 {
    rec[REC_INFO_OFFSET] & REC_INFO_BITS_MASK
}

pub fn set_info_bits(rec: &mut [u8], bits: u8) {
    rec[REC_INFO_OFFSET] = (rec[REC_INFO_OFFSET] & REC_N_OWNED_MASK) | (bits & REC_INFO_BITS_MASK);
}

pub fn n_owned(rec: &[u8]) -> u8 {
    rec[REC_INFO_OFFSET] & REC_N_OWNED_MASK
}

pub fn set_n_owned(rec: &mut [u8], n: u8) {
    rec[REC_INFO_OFFSET] = (rec[REC_INFO_OFFSET] & REC_INFO_BITS_MASK) | (n & REC_N_OWNED_MASK);
}

pub fn is_deleted(rec: &[u8]) -> bool {
    info_bits(rec) & REC_INFO_DELETED_FLAG != 0
}

pub fn set_deleted(rec: &mut [u8], deleted: bool) {
    let bits = info_bits(rec);
    if deleted {
        set_info_bits(rec, bits | REC_INFO_DELETED_FLAG);
    } else {
        set_info_bits(rec, bits & !REC_INFO_DELETED_FLAG);
    }
}

pub fn heap_no(rec: &[u8]) -> u16 {
    read_u16(rec, REC_HEAP_STATUS_OFFSET) >> 3
}

pub fn set_heap_no(rec: &mut [u8], heap_no: u16) {
    let v = read_u16(rec, REC_HEAP_STATUS_OFFSET);
    write_u16(rec, REC_HEAP_STATUS_OFFSET, (heap_no << 3) | (v & 0x07));
}

pub fn status_bits(rec: &[u8]) -> u8 {
    (read_u16(rec, REC_HEAP_STATUS_OFFSET) & 0x07) as u8
}

pub fn status(rec: &[u8]) -> Result<RecStatus, SmallError> {
    RecStatus::try_from(status_bits(rec))
}

pub fn set_status(rec: &mut [u8], status: RecStatus) {
    let v = read_u16(rec, REC_HEAP_STATUS_OFFSET);
    write_u16(rec, REC_HEAP_STATUS_OFFSET, (v & !0x07) | status as u16);
}

pub fn is_system(rec: &[u8]) -> bool {
    let s = status_bits(rec);
    s == RecStatus::Infimum as u8 || s == RecStatus::Supremum as u8
}

pub fn next(rec: &[u8]) -> u16 {
    read_u16(rec, REC_NEXT_OFFSET)
}

pub fn set_next(rec: &mut [u8], next: u16) {
    write_u16(rec, REC_NEXT_OFFSET, next);
}

pub fn infimum_record() -> Vec<u8> {
    system_record(RecStatus::Infimum, HEAP_NO_INFIMUM, &INFIMUM_DATA)
}

pub fn supremum_record() -> Vec<u8> {
    system_record(RecStatus::Supremum, HEAP_NO_SUPREMUM, &SUPREMUM_DATA)
}

fn system_record(status: RecStatus, heap_no: u16, data: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; REC_N_EXTRA_BYTES + data.len()];
    set_n_owned(&mut rec, 1);
    set_status(&mut rec, status);
    set_heap_no(&mut rec, heap_no);
    rec[REC_N_EXTRA_BYTES..].copy_from_slice(data);
    rec
}
