//! Field representations as they appear on the wire (RFC 7541 §6).
//!
//! Parsing here is stateless: indices are kept as numbers and resolved later
//! against a [`DynamicTable`](super::DynamicTable) by the decoder.

use super::huffman::{huffman_decode, huffman_encode, huffman_encoded_len};
use super::integer::{decode_integer, encode_integer};
use crate::error::HpackError;

/// A string literal and whether it was (or should be) Huffman coded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpackString {
    pub bytes:   Vec<u8>,
    pub huffman: bool,
}

impl HpackString {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes:   bytes.into(),
            huffman: false,
        }
    }

    pub fn huffman(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes:   bytes.into(),
            huffman: true,
        }
    }

    /// Parse a length-prefixed literal, returning it and the octets consumed.
    pub fn parse(input: &[u8]) -> Result<(Self, usize), HpackError> {
        let Some(&first) = input.first() else {
            return Err(HpackError::StringTruncated);
        };
        let huffman = first & 0x80 != 0;
        let (len, used) = decode_integer(input, 7)?;
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| used.checked_add(len))
            .filter(|end| *end <= input.len())
            .ok_or(HpackError::StringTruncated)?;
        let raw = &input[used..end];
        let bytes = if huffman {
            huffman_decode(raw)?
        } else {
            raw.to_vec()
        };
        Ok((Self { bytes, huffman }, end))
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        if self.huffman {
            encode_integer(huffman_encoded_len(&self.bytes) as u64, 7, 0x80, out);
            out.extend_from_slice(&huffman_encode(&self.bytes));
        } else {
            encode_integer(self.bytes.len() as u64, 7, 0x00, out);
            out.extend_from_slice(&self.bytes);
        }
    }
}

/// Name part of a literal representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldName {
    /// 1-based table index
    Indexed(u64),
    Literal(HpackString),
}

/// One instruction in a field block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRepresentation {
    /// `1xxxxxxx`: whole field from the table
    Indexed(u64),
    /// `01xxxxxx`: literal, then added to the dynamic table
    LiteralIncremental { name: FieldName, value: HpackString },
    /// `0000xxxx`: literal, table untouched
    LiteralWithoutIndexing { name: FieldName, value: HpackString },
    /// `0001xxxx`: literal that intermediaries must not index either
    LiteralNeverIndexed { name: FieldName, value: HpackString },
    /// `001xxxxx`: new dynamic table capacity
    SizeUpdate(u64),
}

impl FieldRepresentation {
    /// Parse one representation from the front of `input`.
    pub fn parse(input: &[u8]) -> Result<(Self, usize), HpackError> {
        let Some(&first) = input.first() else {
            return Err(HpackError::Empty);
        };
        if first & 0x80 != 0 {
            let (index, used) = decode_integer(input, 7)?;
            return Ok((Self::Indexed(index), used));
        }
        if first & 0xC0 == 0x40 {
            let (name, value, used) = parse_literal(input, 6)?;
            return Ok((Self::LiteralIncremental { name, value }, used));
        }
        if first & 0xE0 == 0x20 {
            let (capacity, used) = decode_integer(input, 5)?;
            return Ok((Self::SizeUpdate(capacity), used));
        }
        let (name, value, used) = parse_literal(input, 4)?;
        if first & 0x10 != 0 {
            Ok((Self::LiteralNeverIndexed { name, value }, used))
        } else {
            Ok((Self::LiteralWithoutIndexing { name, value }, used))
        }
    }

    /// Parse a whole field block.
    pub fn parse_block(mut block: &[u8]) -> Result<Vec<Self>, HpackError> {
        let mut out = Vec::new();
        while !block.is_empty() {
            let (rep, used) = Self::parse(block)?;
            out.push(rep);
            block = &block[used..];
        }
        Ok(out)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Indexed(index) => encode_integer(*index, 7, 0x80, out),
            Self::LiteralIncremental { name, value } => encode_literal(name, value, 6, 0x40, out),
            Self::LiteralWithoutIndexing { name, value } => {
                encode_literal(name, value, 4, 0x00, out)
            },
            Self::LiteralNeverIndexed { name, value } => encode_literal(name, value, 4, 0x10, out),
            Self::SizeUpdate(capacity) => encode_integer(*capacity, 5, 0x20, out),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

fn parse_literal(input: &[u8], prefix: u8) -> Result<(FieldName, HpackString, usize), HpackError> {
    let (index, mut used) = decode_integer(input, prefix)?;
    let name = if index == 0 {
        let (name, n) = HpackString::parse(&input[used..])?;
        used += n;
        FieldName::Literal(name)
    } else {
        FieldName::Indexed(index)
    };
    let (value, n) = HpackString::parse(&input[used..])?;
    Ok((name, value, used + n))
}

fn encode_literal(name: &FieldName, value: &HpackString, prefix: u8, flags: u8, out: &mut Vec<u8>) {
    match name {
        FieldName::Indexed(index) => encode_integer(*index, prefix, flags, out),
        FieldName::Literal(literal) => {
            encode_integer(0, prefix, flags, out);
            literal.encode_into(out);
        },
    }
    value.encode_into(out);
}
