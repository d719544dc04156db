//! Error types for the frame codec and the HPACK codec.
//!
//! Every failure caused by the bytes on the wire is reported through one of
//! these two types. Callers are expected to recover (skip the frame, treat it
//! generically, stop decoding the connection) rather than abort.

use crate::frame::StreamId;

/// HPACK decoding failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HpackError {
    /// Prefixed integer ran out of input before its last continuation byte
    IntegerTruncated,
    /// Prefixed integer does not fit in 64 bits
    IntegerOverflow,
    /// String literal declares more bytes than the block contains
    StringTruncated,
    /// Huffman stream decoded the EOS symbol
    HuffmanEos,
    /// Huffman padding is longer than 7 bits or is not a prefix of EOS
    HuffmanPadding,
    /// Index does not address the static or the dynamic table
    InvalidIndex(u64),
    /// Dynamic table size update above the negotiated maximum
    TableSizeExceeded { requested: u64, max: usize },
    /// Field block ended in the middle of a representation
    Empty,
}

impl std::fmt::Display for HpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IntegerTruncated => write!(f, "HPACK integer truncated"),
            Self::IntegerOverflow => write!(f, "HPACK integer overflows 64 bits"),
            Self::StringTruncated => write!(f, "HPACK string literal truncated"),
            Self::HuffmanEos => write!(f, "HPACK Huffman string contains EOS"),
            Self::HuffmanPadding => write!(f, "HPACK Huffman padding is not a prefix of EOS"),
            Self::InvalidIndex(idx) => write!(f, "HPACK index {idx} out of range"),
            Self::TableSizeExceeded { requested, max } => {
                write!(f, "HPACK table size update to {requested} exceeds maximum {max}")
            },
            Self::Empty => write!(f, "HPACK field block ended unexpectedly"),
        }
    }
}

impl std::error::Error for HpackError {}

/// Classification of frame codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// Input ended before the 9-byte header or the declared payload
    Truncated,
    /// Payload does not fit the 24-bit length field
    PayloadTooLarge,
    /// PADDED flag set but the pad length exceeds the payload
    PaddingError,
    /// PRIORITY flag set but the payload is too short, or priority fields
    /// were only partially supplied
    PriorityError,
    /// Connection-level frame on a stream, or stream-level frame on stream 0
    InvalidStreamId,
    /// Fixed-size payload has the wrong length
    InvalidLength,
    /// Frame type does not match the requested specialization
    WrongFrameType,
    /// Reserved bit in the stream identifier is set
    ReservedBitSet,
    /// CONTINUATION for a stream that has no open header block
    HeadersIncomplete,
    /// DATA for a stream that never sent HEADERS
    StreamNotFound,
    /// Internal buffer would exceed the configured maximum
    BufferTooLarge,
    /// New stream refused while at the concurrent stream limit
    TooManyStreams,
    /// Decoded header list exceeds the configured limits
    HeaderListTooLarge,
    /// HPACK failure inside a header block
    Hpack(HpackError),
}

impl std::fmt::Display for FrameErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "HTTP/2 frame truncated"),
            Self::PayloadTooLarge => write!(f, "HTTP/2 frame payload exceeds 2^24-1 bytes"),
            Self::PaddingError => write!(f, "HTTP/2 frame has missing or invalid padding"),
            Self::PriorityError => write!(f, "HTTP/2 priority fields incomplete"),
            Self::InvalidStreamId => write!(f, "HTTP/2 frame on the wrong stream"),
            Self::InvalidLength => write!(f, "HTTP/2 frame payload has an invalid length"),
            Self::WrongFrameType => write!(f, "HTTP/2 frame type mismatch"),
            Self::ReservedBitSet => write!(f, "HTTP/2 reserved stream bit set"),
            Self::HeadersIncomplete => {
                write!(f, "HTTP/2 CONTINUATION without an open header block")
            },
            Self::StreamNotFound => write!(f, "HTTP/2 frame references unknown stream"),
            Self::BufferTooLarge => write!(f, "HTTP/2 internal buffer exceeds max_buffer_size"),
            Self::TooManyStreams => write!(f, "HTTP/2 max concurrent streams limit reached"),
            Self::HeaderListTooLarge => write!(f, "HTTP/2 header list exceeds size limits"),
            Self::Hpack(e) => write!(f, "HTTP/2 HPACK decoding error: {e}"),
        }
    }
}

/// Frame codec error with optional stream context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    /// What went wrong
    pub kind:      FrameErrorKind,
    /// The stream that caused the error, if applicable
    pub stream_id: Option<StreamId>,
}

impl FrameError {
    /// Create a connection-level error (no specific stream).
    pub fn new(kind: FrameErrorKind) -> Self {
        Self {
            kind,
            stream_id: None,
        }
    }

    /// Create a stream-level error with the offending stream ID.
    pub fn with_stream(kind: FrameErrorKind, stream_id: StreamId) -> Self {
        Self {
            kind,
            stream_id: Some(stream_id),
        }
    }

    /// Whether the error came out of the HPACK decoder.
    pub fn is_hpack(&self) -> bool {
        matches!(self.kind, FrameErrorKind::Hpack(_))
    }
}

impl From<HpackError> for FrameError {
    fn from(e: HpackError) -> Self {
        Self::new(FrameErrorKind::Hpack(e))
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(sid) = self.stream_id {
            write!(f, "[stream {sid}] {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FrameErrorKind::Hpack(e) => Some(e),
            _ => None,
        }
    }
}
