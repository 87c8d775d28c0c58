use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;

use crate::{
    error::SmallError,
    io::SmallFile,
    tablespace::{allocator::SpaceAllocator, extern_store::ExternStore},
    types::{PageNo, SmallResult, SpaceID},
    utils::HandyMutex,
};

/// One tablespace: a file of page-sized blocks plus its extern store.
#[derive(Debug)]
pub struct Space {
    id: SpaceID,
    name: String,
    page_size: usize,
    file: SmallFile,
    alloc: Mutex<SpaceAllocator>,
    ext: ExternStore,
}

impl Space {
    /// Open the data file at `path`, formatting it when it is empty.
    pub fn open(id: SpaceID, name: &str, path: &Path, page_size: usize) -> Result<Self, SmallError> {
        let file = SmallFile::open(path)?;
        let alloc = if file.get_size()? == 0 {
            let alloc = SpaceAllocator::new(id, page_size);
            let mut header = vec![0u8; page_size];
            alloc.write_header_page(&mut header);
            file.write_at(0, &header)?;
            file.set_len(alloc.size() as u64 * page_size as u64)?;
            debug!("space {} ({}) created at {:?}", id, name, path);
            alloc
        } else {
            let mut header = vec![0u8; page_size];
            file.read_at(0, &mut header)?;
            SpaceAllocator::from_header_page(&header)?
        };

        Ok(Self {
            id,
            name: name.to_string(),
            page_size,
            file,
            alloc: Mutex::new(alloc),
            ext: ExternStore::open(Self::ext_path(path))?,
        })
    }

    pub fn ext_path(path: &Path) -> PathBuf {
        path.with_extension("ext")
    }

    pub fn id(&self) -> SpaceID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn ext(&self) -> &ExternStore {
        &self.ext
    }

    /// Size of the space in pages, as recorded by the allocator.
    pub fn size(&self) -> u32 {
        self.alloc.ml().size()
    }

    pub fn is_allocated(&self, page_no: PageNo) -> bool {
        self.alloc.ml().is_used(page_no)
    }

    /// A page-sized buffer holding the page, zero-filled where the file
    /// has not been written yet.
    pub fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>, SmallError> {
        let mut buf = vec![0u8; self.page_size];
        self.file
            .read_at(page_no as u64 * self.page_size as u64, &mut buf)?;
        Ok(buf)
    }

    pub fn write_page(&self, page_no: PageNo, data: &[u8]) -> SmallResult {
        if data.len() != self.page_size {
            return Err(SmallError::invalid(&format!(
                "page write of {} bytes, page size is {}",
                data.len(),
                self.page_size
            )));
        }
        self.file
            .write_at(page_no as u64 * self.page_size as u64, data)
    }

    fn write_header(&self, alloc: &SpaceAllocator) -> SmallResult {
        let mut header = vec![0u8; self.page_size];
        alloc.write_header_page(&mut header);
        self.file.write_at(0, &header)
    }

    pub fn alloc_page(&self) -> Result<PageNo, SmallError> {
        let mut alloc = self.alloc.ml();
        let (page_no, grew) = alloc.alloc()?;
        if grew {
            self.file
                .set_len(alloc.size() as u64 * self.page_size as u64)?;
        }
        self.write_header(&alloc)?;
        Ok(page_no)
    }

    pub fn free_page(&self, page_no: PageNo) -> SmallResult {
        let mut alloc = self.alloc.ml();
        alloc.free(page_no)?;
        self.write_header(&alloc)
    }

    pub fn sync(&self) -> SmallResult {
        self.file.sync()?;
        self.ext.sync()
    }
}
