//! HPACK header compression (RFC 7541).
//!
//! The dynamic table is connection state. A [`Decoder`] or [`Encoder`] owns
//! one table each and must not be shared between connections;
//! [`decode_block`] takes the table by mutable reference for callers that
//! keep it elsewhere.

mod decoder;
mod encoder;
mod field;
mod huffman;
mod integer;
mod table;

pub use decoder::{apply, decode_block, Decoder, HeaderField};
pub use encoder::Encoder;
pub use field::{FieldName, FieldRepresentation, HpackString};
pub use huffman::{huffman_decode, huffman_encode, huffman_encoded_len};
pub use integer::{decode_integer, encode_integer};
pub use table::{
    entry_size, DynamicTable, TableEntry, DEFAULT_TABLE_CAPACITY, ENTRY_OVERHEAD, STATIC_TABLE,
};
