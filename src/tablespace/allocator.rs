//! Page allocation bitmap kept on page 0 of every space.
//!
//! | Offset (after FIL header) | Size | Field                 |
//! |---------------------------|------|-----------------------|
//! | 0                         | 4    | space id              |
//! | 4                         | 4    | size in pages         |
//! | 8                         | 4    | pages in use          |
//! | 12                        | ...  | bitmap, 1 bit a page  |

use bit_vec::BitVec;
use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    io::{read_u32, write_u32},
    page::fil_header::{FilHeader, PageType, FIL_PAGE_DATA, FIL_PAGE_DATA_END},
    types::{PageNo, SmallResult, SpaceID},
};

/// The file grows by whole extents.
pub const EXTENT_SIZE: u32 = 64;

const FSP_SPACE_ID: usize = FIL_PAGE_DATA;
const FSP_SIZE: usize = FIL_PAGE_DATA + 4;
const FSP_N_USED: usize = FIL_PAGE_DATA + 8;
const FSP_BITMAP: usize = FIL_PAGE_DATA + 12;

#[derive(Debug)]
pub struct SpaceAllocator {
    space: SpaceID,
    size: u32,
    used: BitVec,
}

impl SpaceAllocator {
    /// A fresh space: one extent, only the header page in use.
    pub fn new(space: SpaceID, page_size: usize) -> Self {
        let mut used = BitVec::from_elem(Self::max_pages(page_size), false);
        used.set(0, true);
        Self {
            space,
            size: EXTENT_SIZE,
            used,
        }
    }

    /// Pages a single header page can track.
    pub fn max_pages(page_size: usize) -> usize {
        (page_size - FSP_BITMAP - FIL_PAGE_DATA_END) * 8
    }

    pub fn from_header_page(page: &[u8]) -> Result<Self, SmallError> {
        let fil = FilHeader::new(page);
        if fil.raw_page_type() != PageType::FspHdr as u16 {
            return Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("page 0 is not a space header (type {})", fil.raw_page_type()),
            ));
        }
        let bitmap_end = page.len() - FIL_PAGE_DATA_END;
        let mut used = BitVec::from_bytes(&page[FSP_BITMAP..bitmap_end]);
        used.truncate(Self::max_pages(page.len()));
        Ok(Self {
            space: read_u32(page, FSP_SPACE_ID),
            size: read_u32(page, FSP_SIZE),
            used,
        })
    }

    pub fn write_header_page(&self, page: &mut [u8]) {
        for b in page.iter_mut() {
            *b = 0;
        }
        {
            let mut fil = FilHeader::new(&mut *page);
            fil.set_space_id(self.space);
            fil.set_page_no(0);
            fil.set_page_type(PageType::FspHdr);
        }
        write_u32(page, FSP_SPACE_ID, self.space);
        write_u32(page, FSP_SIZE, self.size);
        write_u32(page, FSP_N_USED, self.n_used() as u32);
        let bytes = self.used.to_bytes();
        page[FSP_BITMAP..FSP_BITMAP + bytes.len()].copy_from_slice(&bytes);
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn n_used(&self) -> usize {
        self.used.iter().filter(|b| *b).count()
    }

    pub fn is_used(&self, page_no: PageNo) -> bool {
        self.used.get(page_no as usize).unwrap_or(false)
    }

    /// Lowest free page. Returns the page and whether the space had to
    /// grow by an extent to provide it.
    pub fn alloc(&mut self) -> Result<(PageNo, bool), SmallError> {
        if let Some(p) = (1..self.size as usize).find(|i| !self.used[*i]) {
            self.used.set(p, true);
            return Ok((p as PageNo, false));
        }
        let new_size = self.size as usize + EXTENT_SIZE as usize;
        if new_size > self.used.len() {
            return Err(SmallError::new(
                ErrorKind::NoSpace,
                &format!("space {} reached {} pages", self.space, self.size),
            ));
        }
        let p = self.size as usize;
        self.size = new_size as u32;
        self.used.set(p, true);
        debug!("space {} grew to {} pages", self.space, self.size);
        Ok((p as PageNo, true))
    }

    pub fn free(&mut self, page_no: PageNo) -> SmallResult {
        if page_no == 0 || !self.is_used(page_no) {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!("page {} of space {} is not allocated", page_no, self.space),
            ));
        }
        self.used.set(page_no as usize, false);
        Ok(())
    }
}
