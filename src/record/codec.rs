//! Variable-length record body.
//!
//! | Part        | Size                                                |
//! |-------------|-----------------------------------------------------|
//! | NULL bitmap | `ceil(n_fields / 8)` bytes, bit set = SQL NULL      |
//! | lengths     | per non-NULL field, 1 or 2 bytes                    |
//! | bodies      | concatenated field bytes                            |
//!
//! A length below 128 of an inline field takes one byte. Otherwise two
//! bytes are used: `0x8000 | extern_flag(0x4000) | len`.

use crate::{
    error::{ErrorKind, SmallError},
    io::{SmallReader, SmallWriter},
    record::{
        field::{Field, Tuple},
        header::{self, RecStatus, REC_N_EXTRA_BYTES},
    },
    types::PageNo,
};

const TWO_BYTE_LEN_FLAG: u16 = 0x8000;
const EXTERN_LEN_FLAG: u16 = 0x4000;
const MAX_FIELD_LEN: usize = 0x3FFF;

/// Fields of a leaf record of the page-backed tree: key and value.
pub const LEAF_N_FIELDS: usize = 2;
/// Fields of a node pointer: separator key and child page number.
pub const NODE_PTR_N_FIELDS: usize = 2;

fn null_bitmap_size(n_fields: usize) -> usize {
    (n_fields + 7) / 8
}

pub fn encode_body(tuple: &Tuple) -> Result<Vec<u8>, SmallError> {
    let n = tuple.n_fields();
    let mut bitmap = vec![0u8; null_bitmap_size(n)];
    let mut writer = SmallWriter::new();

    for (i, field) in tuple.fields().iter().enumerate() {
        if field.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&bitmap);

    for field in tuple.fields() {
        let data = match field.data() {
            Some(d) => d,
            None => continue,
        };
        if data.len() > MAX_FIELD_LEN {
            return Err(SmallError::new(
                ErrorKind::InvalidInput,
                &format!("field too long for a record: {} bytes", data.len()),
            ));
        }
        if data.len() < 128 && !field.is_external() {
            writer.write(&(data.len() as u8));
        } else {
            let mut v = TWO_BYTE_LEN_FLAG | data.len() as u16;
            if field.is_external() {
                v |= EXTERN_LEN_FLAG;
            }
            writer.write(&v);
        }
    }

    for field in tuple.fields() {
        if let Some(d) = field.data() {
            writer.write_bytes(d);
        }
    }
    Ok(writer.to_bytes())
}

/// Decode a record body, returns the tuple and the number of bytes the
/// body occupied.
pub fn decode_body(body: &[u8], n_fields: usize) -> Result<(Tuple, usize), SmallError> {
    let mut reader = SmallReader::new(body);
    let bitmap = reader.read_exact(null_bitmap_size(n_fields))?;

    let mut lens: Vec<Option<(usize, bool)>> = Vec::with_capacity(n_fields);
    for i in 0..n_fields {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            lens.push(None);
            continue;
        }
        let first = reader.read::<u8>()?;
        if first & 0x80 == 0 {
            lens.push(Some((first as usize, false)));
        } else {
            let second = reader.read::<u8>()?;
            let v = ((first as u16) << 8) | second as u16;
            let external = v & EXTERN_LEN_FLAG != 0;
            lens.push(Some(((v & MAX_FIELD_LEN as u16) as usize, external)));
        }
    }

    let mut fields = Vec::with_capacity(n_fields);
    for len in lens {
        match len {
            None => fields.push(Field::null()),
            Some((len, external)) => {
                let data = reader.read_exact(len)?;
                let mut f = Field::new(data);
                f.set_external(external);
                fields.push(f);
            }
        }
    }
    Ok((Tuple::new(fields), reader.position()))
}

/// Full record: the 5 extra bytes followed by the body. The heap number
/// is assigned by the page when the record is inserted.
pub fn encode_record(tuple: &Tuple, status: RecStatus) -> Result<Vec<u8>, SmallError> {
    let body = encode_body(tuple)?;
    let mut rec = vec![0u8; REC_N_EXTRA_BYTES];
    header::set_status(&mut rec, status);
    rec.extend_from_slice(&body);
    Ok(rec)
}

pub fn decode_record(rec: &[u8], n_fields: usize) -> Result<Tuple, SmallError> {
    if rec.len() < REC_N_EXTRA_BYTES {
        return Err(SmallError::short_buffer(REC_N_EXTRA_BYTES, rec.len()));
    }
    let (tuple, _) = decode_body(&rec[REC_N_EXTRA_BYTES..], n_fields)?;
    Ok(tuple)
}

/// Exact length of an encoded record, header included.
pub fn record_len(rec: &[u8], n_fields: usize) -> Result<usize, SmallError> {
    if rec.len() < REC_N_EXTRA_BYTES {
        return Err(SmallError::short_buffer(REC_N_EXTRA_BYTES, rec.len()));
    }
    let (_, used) = decode_body(&rec[REC_N_EXTRA_BYTES..], n_fields)?;
    Ok(REC_N_EXTRA_BYTES + used)
}

pub fn encode_leaf_record(key: &[u8], value: &[u8]) -> Result<Vec<u8>, SmallError> {
    encode_record(
        &Tuple::from_bytes_fields(&[key, value]),
        RecStatus::Ordinary,
    )
}

pub fn decode_leaf_record(rec: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SmallError> {
    let tuple = decode_record(rec, LEAF_N_FIELDS)?;
    let mut fields = tuple.into_fields().into_iter();
    match (fields.next(), fields.next()) {
        (Some(k), Some(v)) => Ok((k.bytes().to_vec(), v.bytes().to_vec())),
        _ => Err(SmallError::new(ErrorKind::CorruptPage, "leaf record without value")),
    }
}

pub fn encode_node_ptr(key: &[u8], child: PageNo) -> Result<Vec<u8>, SmallError> {
    encode_record(
        &Tuple::from_bytes_fields(&[key, &child.to_be_bytes()]),
        RecStatus::NodePtr,
    )
}

pub fn decode_node_ptr(rec: &[u8]) -> Result<(Vec<u8>, PageNo), SmallError> {
    let tuple = decode_record(rec, NODE_PTR_N_FIELDS)?;
    let child = tuple.field(1).bytes();
    if child.len() != 4 {
        return Err(SmallError::new(
            ErrorKind::CorruptPage,
            &format!("node pointer child has {} bytes", child.len()),
        ));
    }
    let page_no = u32::from_be_bytes([child[0], child[1], child[2], child[3]]);
    Ok((tuple.field(0).bytes().to_vec(), page_no))
}

/// Key of a user record, whatever its status.
pub fn record_key(rec: &[u8]) -> Result<Vec<u8>, SmallError> {
    let tuple = decode_record(rec, 2)?;
    Ok(tuple.field(0).bytes().to_vec())
}
