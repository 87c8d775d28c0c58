pub mod allocator;
pub mod extern_store;
pub mod space;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::info;

pub use allocator::{SpaceAllocator, EXTENT_SIZE};
pub use extern_store::ExternStore;
pub use space::Space;

use crate::{
    error::{ErrorKind, SmallError},
    types::{PageID, PageNo, SmallResult, SpaceID},
    utils::HandyRwLock,
};

/// Registry of open tablespaces, addressed by id or by name.
pub struct Fil {
    dir: PathBuf,
    page_size: usize,
    spaces: RwLock<HashMap<SpaceID, Arc<Space>>>,
    names: RwLock<HashMap<String, SpaceID>>,
}

impl Fil {
    pub fn new<P: Into<PathBuf>>(dir: P, page_size: usize) -> Self {
        Self {
            dir: dir.into(),
            page_size,
            spaces: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn space_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.ibd", name))
    }

    fn register(&self, space: Space) -> Arc<Space> {
        let space = Arc::new(space);
        self.names
            .wl()
            .insert(space.name().to_string(), space.id());
        self.spaces.wl().insert(space.id(), space.clone());
        space
    }

    /// Create a new space. Fails when the id or the name is taken, or
    /// when a data file with that name already exists.
    pub fn space_create(&self, name: &str, id: SpaceID) -> Result<Arc<Space>, SmallError> {
        if self.spaces.rl().contains_key(&id) || self.names.rl().contains_key(name) {
            return Err(SmallError::new(
                ErrorKind::Duplicate,
                &format!("space {} ({}) already registered", id, name),
            ));
        }
        let path = self.space_path(name);
        if path.exists() && fs::metadata(&path)?.len() > 0 {
            return Err(SmallError::new(
                ErrorKind::Duplicate,
                &format!("data file {:?} already exists", path),
            ));
        }
        let space = Space::open(id, name, &path, self.page_size)?;
        info!("created space {} ({})", id, name);
        Ok(self.register(space))
    }

    /// Open an existing space, or create it when its file is missing.
    pub fn space_open(&self, name: &str, id: SpaceID) -> Result<Arc<Space>, SmallError> {
        if let Some(space) = self.spaces.rl().get(&id) {
            return Ok(space.clone());
        }
        let path = self.space_path(name);
        let space = Space::open(id, name, &path, self.page_size)?;
        Ok(self.register(space))
    }

    /// Point a registered space at another data file.
    pub fn space_set_file<P: AsRef<Path>>(&self, id: SpaceID, path: P) -> Result<Arc<Space>, SmallError> {
        let old = self.space(id)?;
        old.sync()?;
        let space = Space::open(id, old.name(), path.as_ref(), self.page_size)?;
        Ok(self.register(space))
    }

    pub fn space_close(&self, id: SpaceID) -> SmallResult {
        let space = self
            .spaces
            .wl()
            .remove(&id)
            .ok_or_else(|| SmallError::not_found(&format!("space {}", id)))?;
        self.names.wl().remove(space.name());
        space.sync()
    }

    /// Close the space and remove its files.
    pub fn space_delete(&self, id: SpaceID) -> SmallResult {
        let space = self.space(id)?;
        let path = space.path().to_path_buf();
        self.space_close(id)?;
        drop(space);
        fs::remove_file(&path)?;
        let ext = Space::ext_path(&path);
        if ext.exists() {
            fs::remove_file(ext)?;
        }
        info!("deleted space {}", id);
        Ok(())
    }

    pub fn space(&self, id: SpaceID) -> Result<Arc<Space>, SmallError> {
        self.spaces
            .rl()
            .get(&id)
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("space {}", id)))
    }

    pub fn space_by_name(&self, name: &str) -> Result<Arc<Space>, SmallError> {
        let id = *self
            .names
            .rl()
            .get(name)
            .ok_or_else(|| SmallError::not_found(&format!("space {}", name)))?;
        self.space(id)
    }

    pub fn space_ids(&self) -> Vec<SpaceID> {
        let mut ids: Vec<SpaceID> = self.spaces.rl().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn space_read_page(&self, id: PageID) -> Result<Vec<u8>, SmallError> {
        self.space(id.space)?.read_page(id.page_no)
    }

    pub fn space_write_page(&self, id: PageID, data: &[u8]) -> SmallResult {
        self.space(id.space)?.write_page(id.page_no, data)
    }

    pub fn space_size(&self, id: SpaceID) -> Result<u32, SmallError> {
        Ok(self.space(id)?.size())
    }

    pub fn alloc_page(&self, id: SpaceID) -> Result<PageNo, SmallError> {
        self.space(id)?.alloc_page()
    }

    pub fn free_page(&self, id: SpaceID, page_no: PageNo) -> SmallResult {
        self.space(id)?.free_page(page_no)
    }

    pub fn sync_all(&self) -> SmallResult {
        let spaces: Vec<Arc<Space>> = self.spaces.rl().values().cloned().collect();
        for space in spaces {
            space.sync()?;
        }
        Ok(())
    }
}
