use super::field::{FieldName, FieldRepresentation};
use super::table::{DynamicTable, DEFAULT_TABLE_CAPACITY};
use crate::error::HpackError;

/// A decoded header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name:          Vec<u8>,
    pub value:         Vec<u8>,
    /// Sent as a never-indexed literal
    pub never_indexed: bool,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name:          name.into(),
            value:         value.into(),
            never_indexed: false,
        }
    }
}

/// Decode one field block against `table`, applying every table side
/// effect in order.
///
/// Size updates are honored wherever they appear in the block, not only at
/// its start. On error the table keeps the effects of the representations
/// that preceded the failure.
pub fn decode_block(table: &mut DynamicTable, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
    let mut fields = Vec::new();
    let mut rest = block;
    while !rest.is_empty() {
        let (rep, used) = FieldRepresentation::parse(rest)?;
        rest = &rest[used..];
        if let Some(field) = apply(table, rep)? {
            fields.push(field);
        }
    }
    Ok(fields)
}

/// Apply one representation to `table`, returning the field it emits.
pub fn apply(
    table: &mut DynamicTable,
    rep: FieldRepresentation,
) -> Result<Option<HeaderField>, HpackError> {
    let field = match rep {
        FieldRepresentation::Indexed(index) => {
            let (name, value) = table.lookup(index)?;
            HeaderField::new(name, value)
        },
        FieldRepresentation::LiteralIncremental { name, value } => {
            let name = resolve_name(table, name)?;
            table.insert(name.clone(), value.bytes.clone());
            HeaderField::new(name, value.bytes)
        },
        FieldRepresentation::LiteralWithoutIndexing { name, value } => {
            HeaderField::new(resolve_name(table, name)?, value.bytes)
        },
        FieldRepresentation::LiteralNeverIndexed { name, value } => HeaderField {
            name:          resolve_name(table, name)?,
            value:         value.bytes,
            never_indexed: true,
        },
        FieldRepresentation::SizeUpdate(capacity) => {
            table.set_capacity(capacity)?;
            return Ok(None);
        },
    };
    Ok(Some(field))
}

fn resolve_name(table: &DynamicTable, name: FieldName) -> Result<Vec<u8>, HpackError> {
    match name {
        FieldName::Indexed(index) => Ok(table.lookup(index)?.0.to_vec()),
        FieldName::Literal(literal) => Ok(literal.bytes),
    }
}

/// Per-connection HPACK decoder. Owns the connection's dynamic table.
#[derive(Debug, Clone)]
pub struct Decoder {
    table: DynamicTable,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY)
    }
}

impl Decoder {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            table: DynamicTable::new(max_capacity),
        }
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Track a new SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_capacity(&mut self, max_capacity: usize) {
        self.table.set_max_capacity(max_capacity);
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        decode_block(&mut self.table, block)
    }
}
