use super::field::{FieldName, FieldRepresentation, HpackString};
use super::table::{DynamicTable, DEFAULT_TABLE_CAPACITY};

/// Per-connection HPACK encoder with its own dynamic table.
///
/// Exact table matches become indexed fields; everything else is sent as a
/// literal with incremental indexing, reusing a table name when one matches.
#[derive(Debug, Clone)]
pub struct Encoder {
    table:          DynamicTable,
    huffman:        bool,
    pending_update: Option<usize>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY)
    }
}

impl Encoder {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            table:          DynamicTable::new(max_capacity),
            huffman:        true,
            pending_update: None,
        }
    }

    /// Send string literals raw instead of Huffman coded.
    pub fn without_huffman(mut self) -> Self {
        self.huffman = false;
        self
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Shrink or grow the table. A size update instruction opens the next
    /// encoded block. Values above the maximum are clamped.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.min(self.table.max_capacity());
        self.pending_update = Some(capacity);
    }

    /// Encode one field block.
    pub fn encode<N, V>(&mut self, headers: &[(N, V)]) -> Vec<u8>
    where
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        if let Some(capacity) = self.pending_update.take() {
            let rep = FieldRepresentation::SizeUpdate(capacity as u64);
            rep.encode_into(&mut out);
            // capacity never exceeds max here
            let _ = self.table.set_capacity(capacity as u64);
        }
        for (name, value) in headers {
            self.encode_field(name.as_ref(), value.as_ref(), &mut out);
        }
        out
    }

    fn encode_field(&mut self, name: &[u8], value: &[u8], out: &mut Vec<u8>) {
        let rep = match self.table.find(name, value) {
            Some((index, true)) => FieldRepresentation::Indexed(index),
            found => {
                let field_name = match found {
                    Some((index, false)) => FieldName::Indexed(index),
                    _ => FieldName::Literal(self.string(name)),
                };
                self.table.insert(name.to_vec(), value.to_vec());
                FieldRepresentation::LiteralIncremental {
                    name:  field_name,
                    value: self.string(value),
                }
            },
        };
        rep.encode_into(out);
    }

    /// Encode a field that must never be indexed by any hop.
    pub fn encode_sensitive(&mut self, name: &[u8], value: &[u8]) -> Vec<u8> {
        let field_name = match self.table.find(name, value) {
            Some((index, _)) => FieldName::Indexed(index),
            None => FieldName::Literal(self.string(name)),
        };
        FieldRepresentation::LiteralNeverIndexed {
            name:  field_name,
            value: self.string(value),
        }
        .encode()
    }

    fn string(&self, bytes: &[u8]) -> HpackString {
        HpackString {
            bytes:   bytes.to_vec(),
            huffman: self.huffman,
        }
    }
}
