use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use crate::{
    error::{ErrorKind, SmallError},
    types::SmallResult,
    utils::HandyMutex,
};

/// A file opened with read and write mode, shared between threads.
///
/// All accesses are positioned (`read_at` / `write_at`), so callers
/// never depend on the cursor left behind by another thread.
#[derive(Debug)]
pub struct SmallFile {
    file: Mutex<File>,
    path: PathBuf,
}

impl SmallFile {
    /// Open the file at the given path with read and write mode.
    ///
    /// If the file doesn't exist, it will be created.
    pub fn open<P: AsRef<Path>>(file_path: P) -> Result<Self, SmallError> {
        let path = file_path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Open the file and drop any previous content.
    pub fn create_truncate<P: AsRef<Path>>(file_path: P) -> Result<Self, SmallError> {
        let f = Self::open(file_path)?;
        f.set_len(0)?;
        Ok(f)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.ml()
    }

    /// Fill `buf` from `offset`. Returns the number of bytes actually
    /// read, which is smaller than `buf.len()` only at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SmallError> {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(read)
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> SmallResult {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Append the bytes to the end of the file, returns the offset
    /// they were written at.
    pub fn append(&self, data: &[u8]) -> Result<u64, SmallError> {
        let mut file = self.get_file();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        Ok(offset)
    }

    pub fn read_all(&self) -> Result<Vec<u8>, SmallError> {
        let size = self.get_size()? as usize;
        let mut buf = vec![0u8; size];
        let n = self.read_at(0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn sync(&self) -> SmallResult {
        let file = self.get_file();
        file.sync_data()?;
        Ok(())
    }

    pub fn get_size(&self) -> Result<u64, SmallError> {
        let metadata = self.get_file().metadata()?;
        Ok(metadata.len())
    }

    pub fn set_len(&self, len: u64) -> SmallResult {
        self.get_file().set_len(len)?;
        Ok(())
    }
}

pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    /// Create a new `SmallWriter` with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a new `SmallWriter` with a buffer of the given capacity.
    pub fn new_reserved(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write<T: Encodeable + ?Sized>(&mut self, obj: &T) {
        obj.encode(self);
    }

    pub fn write_bytes(&mut self, obj: &[u8]) {
        self.buf.extend_from_slice(obj);
    }

    /// Write a u32 in the compressed format: 1 byte below 0x80, 2 bytes
    /// (prefix 10) below 0x4000, 3 bytes (110) below 0x200000, 4 bytes
    /// (1110) below 0x10000000, otherwise 0xF0 followed by 4 bytes.
    pub fn write_compressed(&mut self, n: u32) {
        if n < 0x80 {
            self.buf.push(n as u8);
        } else if n < 0x4000 {
            self.write_bytes(&((n | 0x8000) as u16).to_be_bytes());
        } else if n < 0x20_0000 {
            let v = n | 0xC0_0000;
            self.write_bytes(&v.to_be_bytes()[1..]);
        } else if n < 0x1000_0000 {
            self.write_bytes(&(n | 0xE000_0000).to_be_bytes());
        } else {
            self.buf.push(0xF0);
            self.write_bytes(&n.to_be_bytes());
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Pad the buffer to the given size.
    pub fn to_padded_bytes(mut self, size: usize) -> Result<Vec<u8>, SmallError> {
        if self.buf.len() > size {
            return Err(SmallError::new(
                ErrorKind::NoSpace,
                &format!(
                    "buffer size is larger than the given size: {} > {}",
                    self.buf.len(),
                    size
                ),
            ));
        }
        self.buf.resize(size, 0);
        Ok(self.buf)
    }
}

impl Default for SmallWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded reader over a byte slice. Every read checks the boundary and
/// reports `ShortBuffer` instead of panicking, since the input usually
/// comes from disk.
pub struct SmallReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> SmallReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    pub fn read_exact(&mut self, bytes_count: usize) -> Result<&'a [u8], SmallError> {
        let start = self.cursor;
        let end = start + bytes_count;
        if end > self.buf.len() {
            return Err(SmallError::short_buffer(end, self.buf.len()));
        }
        self.cursor = end;
        Ok(&self.buf[start..end])
    }

    pub fn read<T: Decodeable>(&mut self) -> Result<T, SmallError> {
        T::decode_from(self)
    }

    pub fn read_compressed(&mut self) -> Result<u32, SmallError> {
        let first = self.read_exact(1)?[0] as u32;
        if first < 0x80 {
            Ok(first)
        } else if first < 0xC0 {
            let b = self.read_exact(1)?;
            Ok(((first << 8) | b[0] as u32) & 0x3FFF)
        } else if first < 0xE0 {
            let b = self.read_exact(2)?;
            Ok(((first << 16) | (b[0] as u32) << 8 | b[1] as u32) & 0x1F_FFFF)
        } else if first < 0xF0 {
            let b = self.read_exact(3)?;
            Ok(((first << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
                & 0x0FFF_FFFF)
        } else {
            self.read::<u32>()
        }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.cursor..];
        self.cursor = self.buf.len();
        rest
    }
}

/// Number of bytes `write_compressed` uses for `n`.
pub fn compressed_size(n: u32) -> usize {
    if n < 0x80 {
        1
    } else if n < 0x4000 {
        2
    } else if n < 0x20_0000 {
        3
    } else if n < 0x1000_0000 {
        4
    } else {
        5
    }
}

pub trait Encodeable {
    fn encode(&self, writer: &mut SmallWriter);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = SmallWriter::new();
        self.encode(&mut writer);
        writer.to_bytes()
    }
}

pub trait Decodeable: Sized {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError>;

    fn from_bytes(buf: &[u8]) -> Result<Self, SmallError> {
        Self::decode_from(&mut SmallReader::new(buf))
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self, writer: &mut SmallWriter) {
                    writer.write_bytes(&self.to_be_bytes());
                }
            }

            impl Decodeable for $t {
                fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
                    let bytes = reader.read_exact(size_of::<Self>())?;
                    let bytes = bytes
                        .try_into()
                        .map_err(|_| SmallError::short_buffer(size_of::<Self>(), bytes.len()))?;
                    Ok(Self::from_be_bytes(bytes))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i32, i64);

/// # Format
/// - 2 byte: size of the payload (range: 0 - 64 KB)
/// - n bytes: payload
impl Encodeable for [u8] {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write_bytes(&(self.len() as u16).to_be_bytes());
        writer.write_bytes(self);
    }
}

impl Encodeable for Vec<u8> {
    fn encode(&self, writer: &mut SmallWriter) {
        self.as_slice().encode(writer)
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let size = reader.read::<u16>()?;
        Ok(reader.read_exact(size as usize)?.to_vec())
    }
}

impl Encodeable for String {
    fn encode(&self, writer: &mut SmallWriter) {
        self.as_bytes().encode(writer)
    }
}

impl Encodeable for str {
    fn encode(&self, writer: &mut SmallWriter) {
        self.as_bytes().encode(writer)
    }
}

impl Decodeable for String {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let bytes = Vec::<u8>::decode_from(reader)?;
        String::from_utf8(bytes).map_err(|e| SmallError::invalid(&e.to_string()))
    }
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write_bytes(&[*self as u8]);
    }
}

impl Decodeable for bool {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        Ok(reader.read::<u8>()? == 1)
    }
}

pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(b)
}

pub fn write_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
}
