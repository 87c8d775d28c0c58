use std::cmp::Ordering;

use crate::record::field::{DataType, Field, MainType, Tuple};

/// Comparator used by the trees. Keys are plain bytes ordered
/// lexicographically unless the index supplies its own function.
pub type CompareFn = fn(&[u8], &[u8]) -> Ordering;

pub fn bytes_compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn trim_spaces(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && data[end - 1] == b' ' {
        end -= 1;
    }
    &data[..end]
}

fn int_value(data: &[u8], unsigned: bool) -> i128 {
    if data.is_empty() {
        return 0;
    }
    let mut v: i128 = if !unsigned && data[0] & 0x80 != 0 { -1 } else { 0 };
    for b in data {
        v = (v << 8) | *b as i128;
    }
    v
}

/// Compare two non-NULL values of the given type.
pub fn compare_data(dtype: &DataType, a: &[u8], b: &[u8]) -> Ordering {
    match dtype.mtype {
        MainType::Int => int_value(a, dtype.is_unsigned()).cmp(&int_value(b, dtype.is_unsigned())),
        MainType::Char | MainType::Varchar => trim_spaces(a).cmp(trim_spaces(b)),
        _ => a.cmp(b),
    }
}

/// NULL sorts before any value. Without a type the bodies are compared
/// byte by byte.
pub fn compare_fields(a: &Field, b: &Field, dtype: Option<&DataType>) -> Ordering {
    match (a.data(), b.data()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match dtype {
            Some(t) => compare_data(t, x, y),
            None => x.cmp(y),
        },
    }
}

/// Field by field comparison. When one tuple is a prefix of the other
/// the shorter one is smaller.
pub fn compare_tuples(a: &Tuple, b: &Tuple, types: &[DataType]) -> Ordering {
    for (i, (x, y)) in a.fields().iter().zip(b.fields()).enumerate() {
        let ord = compare_fields(x, y, types.get(i));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.n_fields().cmp(&b.n_fields())
}

const KEY_NULL: u8 = 0x00;
const KEY_NOT_NULL: u8 = 0x01;

fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for b in data {
        out.push(*b);
        if *b == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

/// Encode key fields so that comparing the results byte by byte orders
/// them the way `compare_tuples` does. Fields without a type are taken
/// as binary.
pub fn encode_key(tuple: &Tuple, types: &[DataType]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in tuple.fields().iter().enumerate() {
        let data = match field.data() {
            None => {
                out.push(KEY_NULL);
                continue;
            }
            Some(d) => d,
        };
        out.push(KEY_NOT_NULL);
        match types.get(i) {
            Some(t) if t.mtype == MainType::Int && data.len() <= 8 => {
                let v = int_value(data, t.is_unsigned());
                let ordered = if t.is_unsigned() {
                    v as u64
                } else {
                    (v as i64 as u64) ^ 0x8000_0000_0000_0000
                };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Some(t) if t.mtype == MainType::Char || t.mtype == MainType::Varchar => {
                push_escaped(&mut out, trim_spaces(data));
            }
            _ => push_escaped(&mut out, data),
        }
    }
    out
}
