use crate::{
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
};

const ZSTD_LEVEL: i32 = 3;

/// Compressed image of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipPage {
    pub original_size: u32,
    pub data: Vec<u8>,
}

impl ZipPage {
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }
}

pub fn zip_page(page: &[u8]) -> Result<ZipPage, SmallError> {
    let data = zstd::bulk::compress(page, ZSTD_LEVEL)?;
    Ok(ZipPage {
        original_size: page.len() as u32,
        data,
    })
}

pub fn unzip_page(zip: &ZipPage) -> Result<Vec<u8>, SmallError> {
    let page = zstd::bulk::decompress(&zip.data, zip.original_size as usize)
        .map_err(|e| SmallError::new(ErrorKind::CorruptPage, &e.to_string()))?;
    if page.len() != zip.original_size as usize {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!(
                "unzipped page has {} bytes, expected {}",
                page.len(),
                zip.original_size
            ),
        ));
    }
    Ok(page)
}

/// # Format
///
/// - 4 bytes: original size
/// - 4 bytes: compressed length
/// - n bytes: zstd frame
impl Encodeable for ZipPage {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&self.original_size);
        writer.write(&(self.data.len() as u32));
        writer.write_bytes(&self.data);
    }
}

impl Decodeable for ZipPage {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let original_size = reader.read::<u32>()?;
        let len = reader.read::<u32>()? as usize;
        Ok(Self {
            original_size,
            data: reader.read_exact(len)?.to_vec(),
        })
    }
}
