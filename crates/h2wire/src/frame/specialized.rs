//! Typed views over [`GenericFrame`] payloads.
//!
//! Every variant keeps enough of the generic frame (flags byte, padding
//! contents) that `to_generic` reproduces the original bytes exactly.

use super::{Flags, FrameType, GenericFrame, StreamId, MAX_STREAM_ID};
use crate::error::{FrameError, FrameErrorKind};

/// Stream dependency triple carried by HEADERS and PRIORITY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive:         bool,
    pub stream_dependency: StreamId,
    pub weight:            u8,
}

impl Priority {
    const LEN: usize = 5;

    /// Assemble a priority from optional parts. All three present gives a
    /// priority, none gives `None`, anything else is an error.
    pub fn from_parts(
        exclusive: Option<bool>,
        stream_dependency: Option<StreamId>,
        weight: Option<u8>,
    ) -> Result<Option<Self>, FrameError> {
        match (exclusive, stream_dependency, weight) {
            (Some(exclusive), Some(stream_dependency), Some(weight)) => Ok(Some(Self {
                exclusive,
                stream_dependency,
                weight,
            })),
            (None, None, None) => Ok(None),
            _ => Err(FrameError::new(FrameErrorKind::PriorityError)),
        }
    }

    fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let Some(raw) = bytes.get(..Self::LEN) else {
            return Err(FrameError::new(FrameErrorKind::PriorityError));
        };
        let word = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(Self {
            exclusive: word >> 31 == 1,
            stream_dependency: StreamId(word & MAX_STREAM_ID),
            weight: raw[4],
        })
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let word = (self.stream_dependency.0 & MAX_STREAM_ID) | ((self.exclusive as u32) << 31);
        out.extend_from_slice(&word.to_be_bytes());
        out.push(self.weight);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub flags:     Flags,
    pub data:      Vec<u8>,
    /// Padding bytes, present iff the PADDED flag is set
    pub padding:   Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id:   StreamId,
    pub flags:       Flags,
    pub priority:    Option<Priority>,
    /// HPACK-encoded field block fragment
    pub field_block: Vec<u8>,
    pub padding:     Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub flags:     Flags,
    pub priority:  Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id:  StreamId,
    pub flags:      Flags,
    pub error_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub flags:    Flags,
    /// (identifier, value) pairs in wire order, duplicates kept
    pub settings: Vec<(u16, u32)>,
}

impl SettingsFrame {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;

    /// Last value sent for `id`, if any
    pub fn get(&self, id: u16) -> Option<u32> {
        self.settings
            .iter()
            .rev()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    pub stream_id:          StreamId,
    pub flags:              Flags,
    pub reserved:           bool,
    pub promised_stream_id: StreamId,
    pub field_block:        Vec<u8>,
    pub padding:            Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub flags:       Flags,
    pub opaque_data: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    pub flags:          Flags,
    pub reserved:       bool,
    pub last_stream_id: StreamId,
    pub error_code:     u32,
    pub debug_data:     Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream 0 updates the connection window
    pub stream_id: StreamId,
    pub flags:     Flags,
    pub reserved:  bool,
    pub increment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id:   StreamId,
    pub flags:       Flags,
    pub field_block: Vec<u8>,
}

/// A frame decomposed according to its type.
///
/// `Generic` holds frames of unknown type and frames whose payload could not
/// be specialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    Generic(GenericFrame),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Data(_) => FrameType::DATA,
            Self::Headers(_) => FrameType::HEADERS,
            Self::Priority(_) => FrameType::PRIORITY,
            Self::RstStream(_) => FrameType::RST_STREAM,
            Self::Settings(_) => FrameType::SETTINGS,
            Self::PushPromise(_) => FrameType::PUSH_PROMISE,
            Self::Ping(_) => FrameType::PING,
            Self::Goaway(_) => FrameType::GOAWAY,
            Self::WindowUpdate(_) => FrameType::WINDOW_UPDATE,
            Self::Continuation(_) => FrameType::CONTINUATION,
            Self::Generic(g) => g.frame_type,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Data(f) => f.stream_id,
            Self::Headers(f) => f.stream_id,
            Self::Priority(f) => f.stream_id,
            Self::RstStream(f) => f.stream_id,
            Self::PushPromise(f) => f.stream_id,
            Self::WindowUpdate(f) => f.stream_id,
            Self::Continuation(f) => f.stream_id,
            Self::Settings(_) | Self::Ping(_) | Self::Goaway(_) => StreamId::CONNECTION,
            Self::Generic(g) => g.stream_id,
        }
    }

    /// Recompose the generic frame. PADDED and PRIORITY flag bits follow the
    /// presence of the corresponding fields; every other flag bit is kept.
    ///
    /// Fails with `PaddingError` when padding is longer than the one-octet
    /// pad length can declare.
    pub fn to_generic(&self) -> Result<GenericFrame, FrameError> {
        let mut payload = Vec::new();
        let (flags, stream_id) = match self {
            Self::Data(f) => {
                write_padded(&mut payload, f.padding.as_deref(), |p| {
                    p.extend_from_slice(&f.data)
                })?;
                (f.flags.with(Flags::PADDED, f.padding.is_some()), f.stream_id)
            },
            Self::Headers(f) => {
                write_padded(&mut payload, f.padding.as_deref(), |p| {
                    if let Some(priority) = &f.priority {
                        priority.encode_into(p);
                    }
                    p.extend_from_slice(&f.field_block);
                })?;
                let flags = f
                    .flags
                    .with(Flags::PADDED, f.padding.is_some())
                    .with(Flags::PRIORITY, f.priority.is_some());
                (flags, f.stream_id)
            },
            Self::Priority(f) => {
                f.priority.encode_into(&mut payload);
                (f.flags, f.stream_id)
            },
            Self::RstStream(f) => {
                payload.extend_from_slice(&f.error_code.to_be_bytes());
                (f.flags, f.stream_id)
            },
            Self::Settings(f) => {
                for (id, value) in &f.settings {
                    payload.extend_from_slice(&id.to_be_bytes());
                    payload.extend_from_slice(&value.to_be_bytes());
                }
                (f.flags, StreamId::CONNECTION)
            },
            Self::PushPromise(f) => {
                write_padded(&mut payload, f.padding.as_deref(), |p| {
                    p.extend_from_slice(&reserved_word(f.reserved, f.promised_stream_id));
                    p.extend_from_slice(&f.field_block);
                })?;
                (f.flags.with(Flags::PADDED, f.padding.is_some()), f.stream_id)
            },
            Self::Ping(f) => {
                payload.extend_from_slice(&f.opaque_data);
                (f.flags, StreamId::CONNECTION)
            },
            Self::Goaway(f) => {
                payload.extend_from_slice(&reserved_word(f.reserved, f.last_stream_id));
                payload.extend_from_slice(&f.error_code.to_be_bytes());
                payload.extend_from_slice(&f.debug_data);
                (f.flags, StreamId::CONNECTION)
            },
            Self::WindowUpdate(f) => {
                payload.extend_from_slice(&reserved_word(f.reserved, StreamId(f.increment)));
                (f.flags, f.stream_id)
            },
            Self::Continuation(f) => {
                payload.extend_from_slice(&f.field_block);
                (f.flags, f.stream_id)
            },
            Self::Generic(g) => return Ok(g.clone()),
        };
        Ok(GenericFrame {
            frame_type: self.frame_type(),
            flags,
            reserved: false,
            stream_id,
            payload,
        })
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        self.to_generic()?.encode()
    }
}

fn reserved_word(reserved: bool, id: StreamId) -> [u8; 4] {
    ((id.0 & MAX_STREAM_ID) | ((reserved as u32) << 31)).to_be_bytes()
}

fn split_reserved_word(bytes: &[u8]) -> (bool, StreamId) {
    let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    (word >> 31 == 1, StreamId(word & MAX_STREAM_ID))
}

fn write_padded(
    out: &mut Vec<u8>,
    padding: Option<&[u8]>,
    body: impl FnOnce(&mut Vec<u8>),
) -> Result<(), FrameError> {
    let Some(padding) = padding else {
        body(out);
        return Ok(());
    };
    let pad_length =
        u8::try_from(padding.len()).map_err(|_| FrameError::new(FrameErrorKind::PaddingError))?;
    out.push(pad_length);
    body(out);
    out.extend_from_slice(padding);
    Ok(())
}

/// Split a possibly padded payload into its body and padding.
///
/// `fixed` is the number of body bytes the frame type requires regardless of
/// content (priority block, promised stream id); the declared padding must
/// leave room for them.
fn strip_padding(
    frame: &GenericFrame,
    fixed: usize,
) -> Result<(&[u8], Option<Vec<u8>>), FrameError> {
    let payload = frame.payload.as_slice();
    if !frame.flags.padded() {
        return Ok((payload, None));
    }
    let Some((&pad_length, rest)) = payload.split_first() else {
        return Err(FrameError::with_stream(
            FrameErrorKind::PaddingError,
            frame.stream_id,
        ));
    };
    let pad_length = pad_length as usize;
    if rest.len() < pad_length + fixed {
        return Err(FrameError::with_stream(
            FrameErrorKind::PaddingError,
            frame.stream_id,
        ));
    }
    let (body, padding) = rest.split_at(rest.len() - pad_length);
    Ok((body, Some(padding.to_vec())))
}

fn require_stream(frame: &GenericFrame) -> Result<(), FrameError> {
    if frame.stream_id.is_connection() {
        Err(FrameError::with_stream(
            FrameErrorKind::InvalidStreamId,
            frame.stream_id,
        ))
    } else {
        Ok(())
    }
}

fn require_connection(frame: &GenericFrame) -> Result<(), FrameError> {
    if frame.stream_id.is_connection() {
        Ok(())
    } else {
        Err(FrameError::with_stream(
            FrameErrorKind::InvalidStreamId,
            frame.stream_id,
        ))
    }
}

fn require_length(frame: &GenericFrame, expected: usize) -> Result<(), FrameError> {
    if frame.payload.len() == expected {
        Ok(())
    } else {
        Err(FrameError::with_stream(
            FrameErrorKind::InvalidLength,
            frame.stream_id,
        ))
    }
}

pub(super) fn specialize(frame: &GenericFrame) -> Result<Frame, FrameError> {
    if frame.reserved {
        return Err(FrameError::with_stream(
            FrameErrorKind::ReservedBitSet,
            frame.stream_id,
        ));
    }

    let stream_id = frame.stream_id;
    let flags = frame.flags;

    let specialized = match frame.frame_type {
        FrameType::DATA => {
            require_stream(frame)?;
            let (data, padding) = strip_padding(frame, 0)?;
            Frame::Data(DataFrame {
                stream_id,
                flags,
                data: data.to_vec(),
                padding,
            })
        },
        FrameType::HEADERS => {
            require_stream(frame)?;
            let fixed = if flags.priority() { Priority::LEN } else { 0 };
            let unpadded_len = frame.payload.len().saturating_sub(flags.padded() as usize);
            if unpadded_len < fixed {
                return Err(FrameError::with_stream(FrameErrorKind::PriorityError, stream_id));
            }
            let (body, padding) = strip_padding(frame, fixed)?;
            let (priority, field_block) = if flags.priority() {
                (Some(Priority::parse(body)?), &body[Priority::LEN..])
            } else {
                (None, body)
            };
            Frame::Headers(HeadersFrame {
                stream_id,
                flags,
                priority,
                field_block: field_block.to_vec(),
                padding,
            })
        },
        FrameType::PRIORITY => {
            require_stream(frame)?;
            require_length(frame, Priority::LEN)?;
            Frame::Priority(PriorityFrame {
                stream_id,
                flags,
                priority: Priority::parse(&frame.payload)?,
            })
        },
        FrameType::RST_STREAM => {
            require_stream(frame)?;
            require_length(frame, 4)?;
            let p = &frame.payload;
            Frame::RstStream(RstStreamFrame {
                stream_id,
                flags,
                error_code: u32::from_be_bytes([p[0], p[1], p[2], p[3]]),
            })
        },
        FrameType::SETTINGS => {
            require_connection(frame)?;
            let p = &frame.payload;
            if !p.len().is_multiple_of(6) || (flags.ack() && !p.is_empty()) {
                return Err(FrameError::with_stream(FrameErrorKind::InvalidLength, stream_id));
            }
            let settings = p
                .chunks_exact(6)
                .map(|c| {
                    (
                        u16::from_be_bytes([c[0], c[1]]),
                        u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                    )
                })
                .collect();
            Frame::Settings(SettingsFrame { flags, settings })
        },
        FrameType::PUSH_PROMISE => {
            require_stream(frame)?;
            if frame.payload.len() < 4 + flags.padded() as usize {
                return Err(FrameError::with_stream(FrameErrorKind::InvalidLength, stream_id));
            }
            let (body, padding) = strip_padding(frame, 4)?;
            let (reserved, promised_stream_id) = split_reserved_word(body);
            Frame::PushPromise(PushPromiseFrame {
                stream_id,
                flags,
                reserved,
                promised_stream_id,
                field_block: body[4..].to_vec(),
                padding,
            })
        },
        FrameType::PING => {
            require_connection(frame)?;
            require_length(frame, 8)?;
            let mut opaque_data = [0u8; 8];
            opaque_data.copy_from_slice(&frame.payload);
            Frame::Ping(PingFrame { flags, opaque_data })
        },
        FrameType::GOAWAY => {
            require_connection(frame)?;
            let p = &frame.payload;
            if p.len() < 8 {
                return Err(FrameError::with_stream(FrameErrorKind::InvalidLength, stream_id));
            }
            let (reserved, last_stream_id) = split_reserved_word(p);
            Frame::Goaway(GoawayFrame {
                flags,
                reserved,
                last_stream_id,
                error_code: u32::from_be_bytes([p[4], p[5], p[6], p[7]]),
                debug_data: p[8..].to_vec(),
            })
        },
        FrameType::WINDOW_UPDATE => {
            require_length(frame, 4)?;
            let (reserved, increment) = split_reserved_word(&frame.payload);
            Frame::WindowUpdate(WindowUpdateFrame {
                stream_id,
                flags,
                reserved,
                increment: increment.0,
            })
        },
        FrameType::CONTINUATION => {
            require_stream(frame)?;
            Frame::Continuation(ContinuationFrame {
                stream_id,
                flags,
                field_block: frame.payload.clone(),
            })
        },
        _ => Frame::Generic(frame.clone()),
    };
    Ok(specialized)
}
