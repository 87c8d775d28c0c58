use std::{collections::HashMap, path::Path, sync::Mutex};

use log::warn;

use crate::{
    error::{ErrorKind, SmallError},
    io::{SmallFile, SmallReader, SmallWriter},
    types::SmallResult,
    utils::HandyMutex,
};

const OP_PUT: u8 = 1;
const OP_FREE: u8 = 2;

/// Side store for fields too long to live in a page.
///
/// Entries are appended to the file as `[op u8][id u64][len u32][bytes]`,
/// a free appends a tombstone with zero length. Ids are never reused,
/// also across restarts.
#[derive(Debug)]
pub struct ExternStore {
    file: SmallFile,
    inner: Mutex<ExternInner>,
}

#[derive(Debug)]
struct ExternInner {
    blobs: HashMap<u64, Vec<u8>>,
    next_id: u64,
}

impl ExternStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SmallError> {
        let file = SmallFile::open(path)?;
        let bytes = file.read_all()?;
        let mut blobs = HashMap::new();
        let mut next_id = 1;

        let mut reader = SmallReader::new(&bytes);
        loop {
            if reader.remaining() == 0 {
                break;
            }
            let entry = (|| -> Result<(u8, u64, Vec<u8>), SmallError> {
                let op = reader.read::<u8>()?;
                let id = reader.read::<u64>()?;
                let len = reader.read::<u32>()? as usize;
                Ok((op, id, reader.read_exact(len)?.to_vec()))
            })();
            let (op, id, data) = match entry {
                Ok(e) => e,
                Err(_) => {
                    warn!(
                        "extern store {:?}: truncated entry at {}",
                        file.path(),
                        reader.position()
                    );
                    break;
                }
            };
            next_id = next_id.max(id + 1);
            match op {
                OP_PUT => {
                    blobs.insert(id, data);
                }
                OP_FREE => {
                    blobs.remove(&id);
                }
                _ => {
                    return Err(SmallError::new(
                        ErrorKind::CorruptPage,
                        &format!("extern store: unknown op {}", op),
                    ))
                }
            }
        }

        Ok(Self {
            file,
            inner: Mutex::new(ExternInner { blobs, next_id }),
        })
    }

    fn append(&self, op: u8, id: u64, data: &[u8]) -> SmallResult {
        let mut writer = SmallWriter::new_reserved(13 + data.len());
        writer.write(&op);
        writer.write(&id);
        writer.write(&(data.len() as u32));
        writer.write_bytes(data);
        self.file.append(writer.as_slice())?;
        Ok(())
    }

    /// Store the bytes, returns the new id.
    pub fn put(&self, data: &[u8]) -> Result<u64, SmallError> {
        let mut inner = self.inner.ml();
        let id = inner.next_id;
        self.append(OP_PUT, id, data)?;
        inner.next_id += 1;
        inner.blobs.insert(id, data.to_vec());
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<Vec<u8>, SmallError> {
        self.inner
            .ml()
            .blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| SmallError::not_found(&format!("extern id {}", id)))
    }

    pub fn free(&self, id: u64) -> SmallResult {
        let mut inner = self.inner.ml();
        if inner.blobs.remove(&id).is_none() {
            return Err(SmallError::not_found(&format!("extern id {}", id)));
        }
        self.append(OP_FREE, id, &[])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.ml().blobs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.ml().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_id(&self) -> u64 {
        self.inner.ml().next_id
    }

    pub fn sync(&self) -> SmallResult {
        self.file.sync()
    }
}
