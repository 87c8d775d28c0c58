use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::error::SmallError;

pub type Pod<T> = Arc<RwLock<T>>;
pub type ResultPod<T> = Result<Pod<T>, SmallError>;
pub type SmallResult = Result<(), SmallError>;

pub type SpaceID = u32;
pub type PageNo = u32;
pub type Lsn = u64;
pub type TrxID = u64;
pub type TableID = u64;
pub type IndexID = u64;

/// Page number used for "no page" in sibling links and root pointers.
pub const NULL_PAGE_NO: PageNo = 0xFFFF_FFFF;

/// Address of a page: the tablespace id plus the page number inside
/// the space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageID {
    pub space: SpaceID,
    pub page_no: PageNo,
}

impl PageID {
    pub fn new(space: SpaceID, page_no: PageNo) -> Self {
        Self { space, page_no }
    }
}

impl fmt::Display for PageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.page_no)
    }
}

impl fmt::Debug for PageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "page_{}", self)
    }
}
