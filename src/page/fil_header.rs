//! File header and trailer shared by every page of a tablespace.
//!
//! | Offset | Size | Field                  |
//! |--------|------|------------------------|
//! | 0      | 4    | checksum               |
//! | 4      | 4    | page number            |
//! | 8      | 4    | previous page          |
//! | 12     | 4    | next page              |
//! | 16     | 8    | page LSN               |
//! | 24     | 2    | page type              |
//! | 26     | 8    | flush LSN              |
//! | 34     | 4    | space id               |
//! | len-8  | 8    | trailer (low LSN bits) |

use std::convert::TryFrom;

use crc32fast::Hasher;

use crate::{
    error::{ErrorKind, SmallError},
    io::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64},
    types::{Lsn, PageNo, SpaceID},
};

pub const FIL_PAGE_SPACE_OR_CHKSUM: usize = 0;
pub const FIL_PAGE_OFFSET: usize = 4;
pub const FIL_PAGE_PREV: usize = 8;
pub const FIL_PAGE_NEXT: usize = 12;
pub const FIL_PAGE_LSN: usize = 16;
pub const FIL_PAGE_TYPE: usize = 24;
pub const FIL_PAGE_FILE_FLUSH_LSN: usize = 26;
pub const FIL_PAGE_SPACE_ID: usize = 34;
pub const FIL_PAGE_DATA: usize = 38;
pub const FIL_PAGE_DATA_END: usize = 8;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Allocated = 0,
    UndoLog = 2,
    /// Holds the root page number of a tree.
    Sys = 6,
    FspHdr = 8,
    Blob = 10,
    Index = 0x45BF,
}

impl TryFrom<u16> for PageType {
    type Error = SmallError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PageType::Allocated),
            2 => Ok(PageType::UndoLog),
            6 => Ok(PageType::Sys),
            8 => Ok(PageType::FspHdr),
            10 => Ok(PageType::Blob),
            0x45BF => Ok(PageType::Index),
            _ => Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("unknown page type: {:#x}", v),
            )),
        }
    }
}

/// Typed view over the file header of a page buffer.
#[derive(Debug)]
pub struct FilHeader<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> FilHeader<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn checksum(&self) -> u32 {
        read_u32(self.data(), FIL_PAGE_SPACE_OR_CHKSUM)
    }

    pub fn page_no(&self) -> PageNo {
        read_u32(self.data(), FIL_PAGE_OFFSET)
    }

    pub fn prev(&self) -> PageNo {
        read_u32(self.data(), FIL_PAGE_PREV)
    }

    pub fn next(&self) -> PageNo {
        read_u32(self.data(), FIL_PAGE_NEXT)
    }

    pub fn lsn(&self) -> Lsn {
        read_u64(self.data(), FIL_PAGE_LSN)
    }

    pub fn raw_page_type(&self) -> u16 {
        read_u16(self.data(), FIL_PAGE_TYPE)
    }

    pub fn page_type(&self) -> Result<PageType, SmallError> {
        PageType::try_from(self.raw_page_type())
    }

    pub fn flush_lsn(&self) -> Lsn {
        read_u64(self.data(), FIL_PAGE_FILE_FLUSH_LSN)
    }

    pub fn space_id(&self) -> SpaceID {
        read_u32(self.data(), FIL_PAGE_SPACE_ID)
    }

    /// Low 32 bits of the LSN repeated in the trailer.
    pub fn trailer_lsn(&self) -> u32 {
        let d = self.data();
        read_u32(d, d.len() - 4)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> FilHeader<B> {
    fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    pub fn set_page_no(&mut self, page_no: PageNo) {
        write_u32(self.data_mut(), FIL_PAGE_OFFSET, page_no);
    }

    pub fn set_prev(&mut self, prev: PageNo) {
        write_u32(self.data_mut(), FIL_PAGE_PREV, prev);
    }

    pub fn set_next(&mut self, next: PageNo) {
        write_u32(self.data_mut(), FIL_PAGE_NEXT, next);
    }

    /// Stamp the LSN in the header and its low half in the trailer.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        let d = self.data_mut();
        write_u64(d, FIL_PAGE_LSN, lsn);
        let len = d.len();
        write_u32(d, len - 4, lsn as u32);
    }

    pub fn set_page_type(&mut self, t: PageType) {
        write_u16(self.data_mut(), FIL_PAGE_TYPE, t as u16);
    }

    pub fn set_flush_lsn(&mut self, lsn: Lsn) {
        write_u64(self.data_mut(), FIL_PAGE_FILE_FLUSH_LSN, lsn);
    }

    pub fn set_space_id(&mut self, space: SpaceID) {
        write_u32(self.data_mut(), FIL_PAGE_SPACE_ID, space);
    }
}

pub fn page_lsn(page: &[u8]) -> Lsn {
    read_u64(page, FIL_PAGE_LSN)
}

pub fn set_page_lsn(page: &mut [u8], lsn: Lsn) {
    FilHeader::new(page).set_lsn(lsn);
}

/// CRC-32 of the page with the checksum field treated as zero. Zero is
/// reserved for "not checksummed", so a computed zero is stored as 1.
pub fn page_checksum(page: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[0u8; 4]);
    hasher.update(&page[FIL_PAGE_SPACE_OR_CHKSUM + 4..]);
    match hasher.finalize() {
        0 => 1,
        v => v,
    }
}

pub fn stamp_checksum(page: &mut [u8]) {
    let sum = page_checksum(page);
    write_u32(page, FIL_PAGE_SPACE_OR_CHKSUM, sum);
}

pub fn verify_checksum(page: &[u8]) -> Result<(), SmallError> {
    let stored = read_u32(page, FIL_PAGE_SPACE_OR_CHKSUM);
    if stored == 0 {
        return Ok(());
    }
    let actual = page_checksum(page);
    if stored != actual {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!(
                "checksum mismatch on page {}: stored {:#x}, computed {:#x}",
                read_u32(page, FIL_PAGE_OFFSET),
                stored,
                actual
            ),
        ));
    }
    Ok(())
}
