use crate::{
    error::{ErrorKind, SmallError},
    io::SmallReader,
    mtr::mlog::MlogType,
    page::IndexPage,
};

fn corrupt(msg: &str) -> SmallError {
    SmallError::new(ErrorKind::CorruptLog, msg)
}

fn check_range(page: &[u8], offset: usize, len: usize) -> Result<(), SmallError> {
    if offset + len > page.len() {
        return Err(corrupt(&format!(
            "redo write of {} bytes at {} past the page end {}",
            len,
            offset,
            page.len()
        )));
    }
    Ok(())
}

/// Apply one record body to the page image. Returns the page offset
/// the record touched; for inserts this is the new record's offset.
///
/// The mtr writers mutate pages through this function too, so a page
/// rebuilt from the log is byte-identical to the page that was logged.
pub fn apply_record(rec_type: MlogType, body: &[u8], page: &mut [u8]) -> Result<u16, SmallError> {
    if rec_type == MlogType::PageInit {
        for b in page.iter_mut() {
            *b = 0;
        }
        return Ok(0);
    }
    let mut reader = SmallReader::new(body);
    let offset = reader.read::<u16>()?;
    let off = offset as usize;
    match rec_type {
        MlogType::Byte1 | MlogType::Byte2 | MlogType::Byte4 | MlogType::Byte8 => {
            let size = rec_type.ulint_size().unwrap_or(8);
            let value = if rec_type == MlogType::Byte8 {
                reader.read::<u64>()?
            } else {
                reader.read_compressed()? as u64
            };
            check_range(page, off, size)?;
            let bytes = value.to_be_bytes();
            page[off..off + size].copy_from_slice(&bytes[8 - size..]);
            Ok(offset)
        }
        MlogType::WriteString => {
            let len = reader.read::<u16>()? as usize;
            let data = reader.read_exact(len)?;
            check_range(page, off, len)?;
            page[off..off + len].copy_from_slice(data);
            Ok(offset)
        }
        MlogType::RecInsert => {
            let len = reader.read::<u16>()? as usize;
            let rec = reader.read_exact(len)?;
            IndexPage::new(page).insert_record_at(off, rec)
        }
        MlogType::RecUpdateInPlace => {
            let len = reader.read::<u16>()? as usize;
            let bytes = reader.read_exact(len)?;
            IndexPage::new(page).update_in_place(offset, bytes)?;
            Ok(offset)
        }
        MlogType::RecDelete => {
            let len = reader.read::<u16>()? as usize;
            IndexPage::new(page).delete_mark(offset, len)?;
            Ok(offset)
        }
        MlogType::PageInit => Ok(0),
        MlogType::MultiRecEnd => Err(corrupt("group end marker has no page to apply to")),
    }
}
