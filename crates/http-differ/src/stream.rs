//! The unit of fuzzer input: the writes made on one connection.

use bytes::Bytes;

/// Ordered buffers, each one a separate write on a single connection.
///
/// Boundaries are significant: they model pipelining and partial delivery,
/// so nothing here merges or splits buffers on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteStream(pub Vec<Bytes>);

impl ByteStream {
    pub fn new(buffers: Vec<Bytes>) -> Self {
        Self(buffers)
    }

    /// Build a stream by copying borrowed buffers.
    pub fn from_slices(buffers: &[&[u8]]) -> Self {
        Self(buffers.iter().map(|b| Bytes::copy_from_slice(b)).collect())
    }

    pub fn buffers(&self) -> &[Bytes] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Bytes> {
        self.0
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all buffer lengths
    pub fn total_len(&self) -> usize {
        self.0.iter().map(Bytes::len).sum()
    }

    /// All buffers joined, as a peer reading the connection would see them.
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for buffer in &self.0 {
            out.extend_from_slice(buffer);
        }
        out
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bytes> {
        self.0.iter()
    }

    /// Map an offset into the concatenation to `(buffer, offset in buffer)`.
    ///
    /// Offsets name existing bytes, so `offset` must be below
    /// [`total_len`](Self::total_len).
    pub fn locate(&self, mut offset: usize) -> Option<(usize, usize)> {
        for (index, buffer) in self.0.iter().enumerate() {
            if offset < buffer.len() {
                return Some((index, offset));
            }
            offset -= buffer.len();
        }
        None
    }

    /// Like [`locate`](Self::locate) but for insertion points, of which there
    /// are `total_len + 1`. The end of the stream maps to the end of the last
    /// buffer.
    pub fn locate_gap(&self, mut offset: usize) -> Option<(usize, usize)> {
        for (index, buffer) in self.0.iter().enumerate() {
            if offset <= buffer.len() {
                return Some((index, offset));
            }
            offset -= buffer.len();
        }
        None
    }

    /// Copy of this stream with buffer `index` replaced.
    pub fn with_buffer(&self, index: usize, buffer: impl Into<Bytes>) -> Self {
        let mut buffers = self.0.clone();
        buffers[index] = buffer.into();
        Self(buffers)
    }
}

impl From<Vec<Vec<u8>>> for ByteStream {
    fn from(buffers: Vec<Vec<u8>>) -> Self {
        Self(buffers.into_iter().map(Bytes::from).collect())
    }
}

impl FromIterator<Bytes> for ByteStream {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ByteStream {
    type Item = &'a Bytes;
    type IntoIter = std::slice::Iter<'a, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
