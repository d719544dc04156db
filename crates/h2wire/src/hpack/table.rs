//! Static and dynamic header tables (RFC 7541 §2.3, Appendix A).

use std::collections::VecDeque;

use crate::error::HpackError;

/// Per-entry accounting overhead added to name and value lengths
pub const ENTRY_OVERHEAD: usize = 32;

/// Initial dynamic table capacity before any SETTINGS exchange
pub const DEFAULT_TABLE_CAPACITY: usize = 4096;

#[rustfmt::skip]
pub const STATIC_TABLE: [(&[u8], &[u8]); 61] = [
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

/// One dynamic table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name:  Vec<u8>,
    pub value: Vec<u8>,
}

impl TableEntry {
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// Dynamic table, most recently inserted entry first.
///
/// Holds `size <= capacity <= max_capacity` after every operation.
/// `capacity` moves only through size-update instructions; `max_capacity`
/// is the bound negotiated through SETTINGS.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries:      VecDeque<TableEntry>,
    size:         usize,
    capacity:     usize,
    max_capacity: usize,
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY)
    }
}

impl DynamicTable {
    /// Empty table whose capacity starts at its maximum.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            capacity: max_capacity,
            max_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Entry at a 0-based dynamic index (0 is the newest).
    pub fn get(&self, index: usize) -> Option<&TableEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.iter()
    }

    /// Add an entry at the front, evicting from the back until it fits.
    /// An entry larger than the capacity empties the table and is dropped.
    pub fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let entry = TableEntry { name, value };
        let needed = entry.size();
        if needed > self.capacity {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.capacity - needed);
        self.size += needed;
        self.entries.push_front(entry);
        self.check_invariant();
    }

    /// Apply a dynamic table size update instruction.
    pub fn set_capacity(&mut self, capacity: u64) -> Result<(), HpackError> {
        let Some(capacity) = usize::try_from(capacity)
            .ok()
            .filter(|c| *c <= self.max_capacity)
        else {
            return Err(HpackError::TableSizeExceeded {
                requested: capacity,
                max:       self.max_capacity,
            });
        };
        self.capacity = capacity;
        self.evict_to(capacity);
        self.check_invariant();
        Ok(())
    }

    /// Change the negotiated maximum. The current capacity shrinks with it
    /// when it no longer fits.
    pub fn set_max_capacity(&mut self, max_capacity: usize) {
        self.max_capacity = max_capacity;
        if self.capacity > max_capacity {
            self.capacity = max_capacity;
            self.evict_to(max_capacity);
        }
        self.check_invariant();
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.size <= self.capacity && self.capacity <= self.max_capacity,
            "table size invariant violated: {} / {} / {}",
            self.size,
            self.capacity,
            self.max_capacity
        );
    }

    /// Resolve a 1-based HPACK index across the static table and this one.
    pub fn lookup(&self, index: u64) -> Result<(&[u8], &[u8]), HpackError> {
        let idx = usize::try_from(index).map_err(|_| HpackError::InvalidIndex(index))?;
        match idx {
            0 => Err(HpackError::InvalidIndex(index)),
            1..=61 => {
                let (name, value) = STATIC_TABLE[idx - 1];
                Ok((name, value))
            },
            _ => self
                .get(idx - STATIC_TABLE.len() - 1)
                .map(|e| (e.name.as_slice(), e.value.as_slice()))
                .ok_or(HpackError::InvalidIndex(index)),
        }
    }

    /// Find the best 1-based index for a field: an exact match if one
    /// exists (`true`), otherwise a name-only match (`false`).
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<(u64, bool)> {
        let statics = STATIC_TABLE
            .iter()
            .enumerate()
            .map(|(i, (n, v))| (i + 1, *n, *v));
        let dynamics = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i + STATIC_TABLE.len() + 1, e.name.as_slice(), e.value.as_slice()));

        let mut name_only = None;
        for (idx, n, v) in statics.chain(dynamics) {
            if n == name {
                if v == value {
                    return Some((idx as u64, true));
                }
                name_only.get_or_insert((idx as u64, false));
            }
        }
        name_only
    }
}
