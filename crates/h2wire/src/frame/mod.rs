use crate::error::{FrameError, FrameErrorKind};

mod specialized;

pub use specialized::{
    ContinuationFrame, DataFrame, Frame, GoawayFrame, HeadersFrame, PingFrame, Priority,
    PriorityFrame, PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};

/// HTTP/2 connection preface: "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum allowed frame payload length (2^24 - 1, per RFC 9113 §4.1)
pub const MAX_FRAME_PAYLOAD_LENGTH: usize = (1 << 24) - 1;

/// Largest value a 31-bit stream identifier can hold
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Newtype for HTTP/2 stream identifiers (31-bit unsigned integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId(pub u32);

impl StreamId {
    /// The connection control stream
    pub const CONNECTION: StreamId = StreamId(0);

    /// Whether this is stream 0
    pub fn is_connection(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<StreamId> for u32 {
    fn from(v: StreamId) -> Self {
        v.0
    }
}

/// Frame type octet. Unknown values are legal and stay representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(pub u8);

impl FrameType {
    pub const DATA: FrameType = FrameType(0x00);
    pub const HEADERS: FrameType = FrameType(0x01);
    pub const PRIORITY: FrameType = FrameType(0x02);
    pub const RST_STREAM: FrameType = FrameType(0x03);
    pub const SETTINGS: FrameType = FrameType(0x04);
    pub const PUSH_PROMISE: FrameType = FrameType(0x05);
    pub const PING: FrameType = FrameType(0x06);
    pub const GOAWAY: FrameType = FrameType(0x07);
    pub const WINDOW_UPDATE: FrameType = FrameType(0x08);
    pub const CONTINUATION: FrameType = FrameType(0x09);

    /// Whether this is one of the ten types defined by RFC 9113
    pub fn is_known(self) -> bool {
        self.0 <= 0x09
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Self::DATA => "DATA",
            Self::HEADERS => "HEADERS",
            Self::PRIORITY => "PRIORITY",
            Self::RST_STREAM => "RST_STREAM",
            Self::SETTINGS => "SETTINGS",
            Self::PUSH_PROMISE => "PUSH_PROMISE",
            Self::PING => "PING",
            Self::GOAWAY => "GOAWAY",
            Self::WINDOW_UPDATE => "WINDOW_UPDATE",
            Self::CONTINUATION => "CONTINUATION",
            FrameType(other) => return write!(f, "UNKNOWN({other:#04x})"),
        };
        f.write_str(name)
    }
}

/// Frame flags bitfield. All eight bits are kept, including the ones no
/// frame type defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const END_STREAM: u8 = 0x01;
    /// Same bit as END_STREAM, on SETTINGS and PING
    pub const ACK: u8 = 0x01;
    pub const END_HEADERS: u8 = 0x04;
    pub const PADDED: u8 = 0x08;
    pub const PRIORITY: u8 = 0x20;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Copy of these flags with `bit` forced to `on`
    pub fn with(self, bit: u8, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }

    pub fn end_stream(self) -> bool {
        self.contains(Self::END_STREAM)
    }

    pub fn ack(self) -> bool {
        self.contains(Self::ACK)
    }

    pub fn end_headers(self) -> bool {
        self.contains(Self::END_HEADERS)
    }

    pub fn padded(self) -> bool {
        self.contains(Self::PADDED)
    }

    pub fn priority(self) -> bool {
        self.contains(Self::PRIORITY)
    }
}

/// A frame with an uninterpreted payload.
///
/// Any 9-byte header followed by its declared payload is representable,
/// including frames no peer should ever send. This is the form mutated and
/// adversarial frames stay in when [`specialize`](Self::specialize) rejects
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFrame {
    pub frame_type: FrameType,
    pub flags:      Flags,
    /// The reserved high bit of the stream identifier field
    pub reserved:   bool,
    pub stream_id:  StreamId,
    pub payload:    Vec<u8>,
}

impl GenericFrame {
    /// Build a frame with the reserved bit clear.
    pub fn new(frame_type: FrameType, flags: Flags, stream_id: StreamId, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            flags,
            reserved: false,
            stream_id,
            payload,
        }
    }

    /// Consume exactly one frame from a byte cursor.
    ///
    /// Fails with [`FrameErrorKind::Truncated`] when the cursor runs dry before
    /// the header or the declared payload length is satisfied. The cursor is
    /// advanced past whatever was read either way.
    pub fn parse<I>(bytes: &mut I) -> Result<Self, FrameError>
    where
        I: Iterator<Item = u8>,
    {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        for slot in header.iter_mut() {
            *slot = bytes
                .next()
                .ok_or_else(|| FrameError::new(FrameErrorKind::Truncated))?;
        }
        let header = parse_frame_header(&header)?;

        let payload: Vec<u8> = bytes.take(header.length).collect();
        if payload.len() < header.length {
            return Err(FrameError::with_stream(
                FrameErrorKind::Truncated,
                header.stream_id,
            ));
        }

        Ok(Self {
            frame_type: header.frame_type,
            flags: header.flags,
            reserved: header.reserved,
            stream_id: header.stream_id,
            payload,
        })
    }

    /// Parse one frame from the front of a slice, returning it with the
    /// number of bytes consumed.
    pub fn parse_slice(buffer: &[u8]) -> Result<(Self, usize), FrameError> {
        let header = parse_frame_header(buffer)?;
        let total = FRAME_HEADER_SIZE + header.length;
        if buffer.len() < total {
            return Err(FrameError::with_stream(
                FrameErrorKind::Truncated,
                header.stream_id,
            ));
        }
        let frame = Self {
            frame_type: header.frame_type,
            flags: header.flags,
            reserved: header.reserved,
            stream_id: header.stream_id,
            payload: buffer[FRAME_HEADER_SIZE..total].to_vec(),
        };
        Ok((frame, total))
    }

    /// Parse every complete frame in `buffer`, stopping at the first
    /// truncated one. Returns the frames and the unconsumed tail.
    pub fn parse_all(buffer: &[u8]) -> (Vec<Self>, &[u8]) {
        let mut frames = Vec::new();
        let mut pos = 0;
        while let Ok((frame, used)) = Self::parse_slice(&buffer[pos..]) {
            frames.push(frame);
            pos += used;
        }
        (frames, &buffer[pos..])
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Serialize header and payload onto the end of `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), FrameError> {
        let length = self.payload.len();
        if length > MAX_FRAME_PAYLOAD_LENGTH {
            return Err(FrameError::with_stream(
                FrameErrorKind::PayloadTooLarge,
                self.stream_id,
            ));
        }
        debug_assert!(self.stream_id.0 <= MAX_STREAM_ID, "stream id out of range");
        let stream_word = (self.stream_id.0 & MAX_STREAM_ID) | ((self.reserved as u32) << 31);
        out.extend_from_slice(&(length as u32).to_be_bytes()[1..]);
        out.push(self.frame_type.0);
        out.push(self.flags.0);
        out.extend_from_slice(&stream_word.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Interpret the payload according to the frame type.
    ///
    /// Failure is not fatal: callers that need to keep going should use
    /// [`into_frame`](Self::into_frame), which falls back to
    /// [`Frame::Generic`].
    pub fn specialize(&self) -> Result<Frame, FrameError> {
        specialized::specialize(self)
    }

    /// Specialize, keeping the frame generic when its payload does not fit
    /// its type.
    pub fn into_frame(self) -> Frame {
        match self.specialize() {
            Ok(frame) => frame,
            Err(_e) => {
                crate::trace_debug!("keeping {} frame generic: {_e}", self.frame_type);
                Frame::Generic(self)
            },
        }
    }
}

/// Decoded 9-byte frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub(crate) length:     usize,
    pub(crate) frame_type: FrameType,
    pub(crate) flags:      Flags,
    pub(crate) reserved:   bool,
    pub(crate) stream_id:  StreamId,
}

/// Check if buffer starts with HTTP/2 connection preface
pub fn is_http2_preface(buffer: &[u8]) -> bool {
    buffer.starts_with(CONNECTION_PREFACE)
}

/// Heuristic check if buffer looks like an HTTP/2 frame header.
/// Checks for valid frame type and reasonable length.
pub fn looks_like_http2_frame(buffer: &[u8]) -> bool {
    let Ok(header) = parse_frame_header(buffer) else {
        return false;
    };

    if !header.frame_type.is_known() {
        return false;
    }

    // SETTINGS payloads are a whole number of 6-byte entries
    if header.frame_type == FrameType::SETTINGS
        && header.stream_id.is_connection()
        && !header.length.is_multiple_of(6)
    {
        return false;
    }

    true
}

/// Parse the 9-byte frame header.
///
/// Zero-length frames are valid (SETTINGS ACK, empty DATA with END_STREAM).
pub(crate) fn parse_frame_header(buffer: &[u8]) -> Result<FrameHeader, FrameError> {
    if buffer.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::new(FrameErrorKind::Truncated));
    }

    let length = u32::from_be_bytes([0, buffer[0], buffer[1], buffer[2]]) as usize;
    let stream_word = u32::from_be_bytes([buffer[5], buffer[6], buffer[7], buffer[8]]);

    Ok(FrameHeader {
        length,
        frame_type: FrameType(buffer[3]),
        flags: Flags(buffer[4]),
        reserved: stream_word >> 31 == 1,
        stream_id: StreamId(stream_word & MAX_STREAM_ID),
    })
}
