pub mod codec;
pub mod compare;
pub mod extern_ref;
pub mod field;
pub mod header;

pub use codec::{
    decode_body, decode_leaf_record, decode_node_ptr, decode_record, encode_body,
    encode_leaf_record, encode_node_ptr, encode_record, record_key, record_len,
};
pub use compare::{bytes_compare, compare_fields, compare_tuples, encode_key, CompareFn};
pub use extern_ref::{extern_free, extern_get, ExternRef, EXTERN_MARKER};
pub use field::{DataType, Field, MainType, Tuple, UNIV_SQL_NULL};
pub use header::RecStatus;
