//! In-page reference to a field stored in the extern store.
//!
//! | Byte  | Content           |
//! |-------|-------------------|
//! | 0     | marker `0xEE`     |
//! | 1-8   | extern id (u64)   |
//! | 9-10  | prefix length     |
//! | 11-   | inline prefix     |

use crate::{
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallReader, SmallWriter},
    record::field::{Field, Tuple},
    tablespace::ExternStore,
};

pub const EXTERN_MARKER: u8 = 0xEE;
pub const EXTERN_REF_HEADER: usize = 1 + 8 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternRef {
    pub id: u64,
    pub prefix: Vec<u8>,
}

impl Encodeable for ExternRef {
    fn encode(&self, writer: &mut SmallWriter) {
        writer.write(&EXTERN_MARKER);
        writer.write(&self.id);
        writer.write(&self.prefix);
    }
}

impl Decodeable for ExternRef {
    fn decode_from(reader: &mut SmallReader) -> Result<Self, SmallError> {
        let marker = reader.read::<u8>()?;
        if marker != EXTERN_MARKER {
            return Err(SmallError::new(
                ErrorKind::CorruptPage,
                &format!("bad extern marker: {:#x}", marker),
            ));
        }
        Ok(Self {
            id: reader.read()?,
            prefix: reader.read()?,
        })
    }
}

pub fn is_extern_ref(data: &[u8]) -> bool {
    data.len() >= EXTERN_REF_HEADER && data[0] == EXTERN_MARKER
}

/// Move the field to the store when it is longer than `threshold`,
/// keeping `prefix_len` bytes inline.
pub fn externalize_field(
    store: &ExternStore,
    field: &Field,
    threshold: usize,
    prefix_len: usize,
) -> Result<Field, SmallError> {
    let data = match field.data() {
        Some(d) if d.len() > threshold && !field.is_external() => d,
        _ => return Ok(field.clone()),
    };
    let id = store.put(data)?;
    let r = ExternRef {
        id,
        prefix: data[..prefix_len.min(data.len())].to_vec(),
    };
    Ok(Field::new_external(r.to_bytes()))
}

pub fn externalize_tuple(
    store: &ExternStore,
    tuple: &Tuple,
    threshold: usize,
    prefix_len: usize,
) -> Result<Tuple, SmallError> {
    let mut fields = Vec::with_capacity(tuple.n_fields());
    for f in tuple.fields() {
        fields.push(externalize_field(store, f, threshold, prefix_len)?);
    }
    Ok(Tuple::new(fields))
}

/// Full value of a possibly external field.
pub fn extern_get(store: &ExternStore, field: &Field) -> Result<Field, SmallError> {
    if !field.is_external() {
        return Ok(field.clone());
    }
    let r = ExternRef::from_bytes(field.bytes())?;
    let data = store.get(r.id)?;
    Ok(Field::new(&data))
}

pub fn resolve_tuple(store: &ExternStore, tuple: &Tuple) -> Result<Tuple, SmallError> {
    let mut fields = Vec::with_capacity(tuple.n_fields());
    for f in tuple.fields() {
        fields.push(extern_get(store, f)?);
    }
    Ok(Tuple::new(fields))
}

pub fn extern_free(store: &ExternStore, field: &Field) -> Result<(), SmallError> {
    if !field.is_external() {
        return Ok(());
    }
    let r = ExternRef::from_bytes(field.bytes())?;
    store.free(r.id)
}

pub fn free_tuple(store: &ExternStore, tuple: &Tuple) -> Result<(), SmallError> {
    for f in tuple.fields() {
        extern_free(store, f)?;
    }
    Ok(())
}
