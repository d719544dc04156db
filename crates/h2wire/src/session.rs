//! Per-connection HTTP/2 decoding: raw bytes in, completed streams out.

use std::collections::{HashMap, VecDeque};

use crate::error::{FrameError, FrameErrorKind};
use crate::frame::{
    ContinuationFrame, DataFrame, Frame, GenericFrame, GoawayFrame, HeadersFrame, SettingsFrame,
    StreamId, CONNECTION_PREFACE,
};
use crate::hpack::{self, HeaderField};

/// Configurable limits for HTTP/2 header decoding and stream management.
///
/// These limits bound what one hostile or broken peer can make a session
/// buffer (HPACK decompression bombs, stream flooding, endless bodies).
#[derive(Debug, Clone)]
pub struct H2Limits {
    /// Maximum total decoded header list size in bytes (default: 65536)
    pub max_header_list_size:   usize,
    /// Maximum number of headers per header block (default: 128)
    pub max_header_count:       usize,
    /// Maximum size of any individual header value in bytes (default: 8192)
    pub max_header_value_size:  usize,
    /// Hard cap for the HPACK dynamic table, whatever SETTINGS asks for
    /// (default: 65536)
    pub max_table_size:         usize,
    /// Maximum concurrent open streams before new ones are refused
    /// (default: 100)
    pub max_concurrent_streams: usize,
    /// Maximum accumulated body size per stream in bytes (default: 10 MiB).
    /// Streams exceeding this limit are dropped.
    pub max_body_size:          usize,
    /// Maximum unconsumed input held between `feed` calls (default: 1 MiB)
    pub max_buffer_size:        usize,
}

impl Default for H2Limits {
    fn default() -> Self {
        Self {
            max_header_list_size:   65536,
            max_header_count:       128,
            max_header_value_size:  8192,
            max_table_size:         65536,
            max_concurrent_streams: 100,
            max_body_size:          10 * 1024 * 1024, // 10 MiB
            max_buffer_size:        1024 * 1024,      // 1 MiB
        }
    }
}

/// Settings announced by the peer whose frames this session decodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Settings {
    pub header_table_size:      u32,
    pub enable_push:            bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size:    u32,
    pub max_frame_size:         u32,
    pub max_header_list_size:   u32,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self {
            header_table_size:      4096,
            enable_push:            true,
            max_concurrent_streams: u32::MAX,
            initial_window_size:    65535,
            max_frame_size:         16384,
            max_header_list_size:   u32::MAX,
        }
    }
}

/// Phase of a stream's lifecycle.
///
/// Transitions only move forward:
///   ReceivingHeaders → ReceivingBody → Complete
///   ReceivingHeaders → Complete  (END_STREAM on the HEADERS frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    /// Header block open, waiting for CONTINUATION
    ReceivingHeaders { end_stream_seen: bool },
    ReceivingBody,
    Complete,
}

struct StreamState {
    headers:     Vec<(Vec<u8>, Vec<u8>)>,
    body:        Vec<u8>,
    /// Field block fragments waiting for END_HEADERS
    fragments:   Vec<u8>,
    header_size: usize,
    phase:       StreamPhase,
    /// Order of first appearance, for eviction
    opened:      u64,
}

impl StreamState {
    fn new(opened: u64) -> Self {
        Self {
            headers: Vec::new(),
            body: Vec::new(),
            fragments: Vec::new(),
            header_size: 0,
            phase: StreamPhase::ReceivingHeaders {
                end_stream_seen: false,
            },
            opened,
        }
    }
}

/// Decoding state for one direction of one HTTP/2 connection.
///
/// Owns the connection's HPACK decoder, so the dynamic table lives exactly
/// as long as the connection does. Use [`feed`](Self::feed) as bytes
/// arrive and [`try_pop`](Self::try_pop) to collect finished streams.
pub struct H2ConnectionState {
    decoder:                hpack::Decoder,
    active_streams:         HashMap<StreamId, StreamState>,
    settings:               H2Settings,
    limits:                 H2Limits,
    /// Whether the connection preface has been seen and skipped
    pub preface_received:   bool,
    buffer:                 Vec<u8>,
    expecting_continuation: Option<StreamId>,
    completed:              VecDeque<ParsedH2Message>,
    goaway:                 Option<GoawayFrame>,
    streams_opened:         u64,
}

impl Default for H2ConnectionState {
    fn default() -> Self {
        Self::with_limits(H2Limits::default())
    }
}

impl H2ConnectionState {
    /// Create a connection state with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection state with custom limits.
    pub fn with_limits(limits: H2Limits) -> Self {
        let initial = (H2Settings::default().header_table_size as usize).min(limits.max_table_size);
        Self {
            decoder: hpack::Decoder::new(initial),
            active_streams: HashMap::new(),
            settings: H2Settings::default(),
            limits,
            preface_received: false,
            buffer: Vec::new(),
            expecting_continuation: None,
            completed: VecDeque::new(),
            goaway: None,
            streams_opened: 0,
        }
    }

    /// Feed newly received bytes.
    ///
    /// Frame-level problems (bad padding, unknown stream, oversized header
    /// list) skip the offending frame. HPACK errors leave the dynamic table
    /// in an unknown state and are returned; the session should be dropped
    /// after one. Streams completed before the error remain available from
    /// [`try_pop`](Self::try_pop).
    pub fn feed(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if self.buffer.len() + data.len() > self.limits.max_buffer_size {
            return Err(FrameError::new(FrameErrorKind::BufferTooLarge));
        }
        self.buffer.extend_from_slice(data);
        self.process_buffer()
    }

    /// Pop the oldest completed message.
    pub fn try_pop(&mut self) -> Option<ParsedH2Message> {
        self.completed.pop_front()
    }

    /// Take every completed message in completion order.
    pub fn drain(&mut self) -> Vec<ParsedH2Message> {
        self.completed.drain(..).collect()
    }

    pub fn has_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Number of streams still waiting for END_HEADERS or END_STREAM.
    pub fn active_stream_count(&self) -> usize {
        self.active_streams.len()
    }

    /// Bytes held back because they do not yet form a whole frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn settings(&self) -> &H2Settings {
        &self.settings
    }

    /// The last GOAWAY the peer sent, if any.
    pub fn goaway(&self) -> Option<&GoawayFrame> {
        self.goaway.as_ref()
    }

    pub fn hpack_table(&self) -> &hpack::DynamicTable {
        self.decoder.table()
    }

    fn process_buffer(&mut self) -> Result<(), FrameError> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut pos = 0;

        if !self.preface_received {
            if buffer.starts_with(CONNECTION_PREFACE) {
                pos += CONNECTION_PREFACE.len();
                self.preface_received = true;
            } else if CONNECTION_PREFACE.starts_with(&buffer) {
                // partial preface, wait for the rest
                self.buffer = buffer;
                return Ok(());
            }
        }

        let mut fatal = None;
        while let Ok((frame, used)) = GenericFrame::parse_slice(&buffer[pos..]) {
            // always advance so a bad frame is never re-processed
            pos += used;
            let stream_id = frame.stream_id;
            match self.handle_frame(frame) {
                Ok(()) => {},
                Err(e) if e.is_hpack() => {
                    crate::trace_warn!("HPACK failure, abandoning connection: {e}");
                    fatal = Some(e);
                    break;
                },
                Err(_e) => {
                    crate::trace_debug!("skipping frame: {_e}");
                    continue;
                },
            }
            if !stream_id.is_connection() {
                self.check_stream_completion(stream_id);
            }
        }

        self.buffer = buffer;
        self.buffer.drain(..pos);
        self.evict_excess_streams();

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_frame(&mut self, generic: GenericFrame) -> Result<(), FrameError> {
        let frame = generic.specialize()?;

        if let Some(open) = self.expecting_continuation
            && !matches!(&frame, Frame::Continuation(c) if c.stream_id == open)
        {
            crate::trace_warn!("expected CONTINUATION on stream {open}, got {}", frame.frame_type());
        }

        match frame {
            Frame::Headers(f) => self.handle_headers(f),
            Frame::Continuation(f) => self.handle_continuation(f),
            Frame::Data(f) => self.handle_data(f),
            Frame::Settings(f) => {
                self.handle_settings(&f);
                Ok(())
            },
            Frame::RstStream(f) => {
                if self.active_streams.remove(&f.stream_id).is_some() {
                    crate::trace_debug!("stream {} reset ({})", f.stream_id, f.error_code);
                }
                Ok(())
            },
            Frame::Goaway(f) => {
                self.goaway = Some(f);
                Ok(())
            },
            Frame::Priority(_)
            | Frame::PushPromise(_)
            | Frame::Ping(_)
            | Frame::WindowUpdate(_)
            | Frame::Generic(_) => Ok(()),
        }
    }

    fn handle_headers(&mut self, frame: HeadersFrame) -> Result<(), FrameError> {
        let stream_id = frame.stream_id;

        if !self.active_streams.contains_key(&stream_id) {
            if self.active_streams.len() >= self.limits.max_concurrent_streams {
                return Err(FrameError::with_stream(
                    FrameErrorKind::TooManyStreams,
                    stream_id,
                ));
            }
            self.active_streams
                .insert(stream_id, StreamState::new(self.streams_opened));
            self.streams_opened += 1;
        }
        let Some(stream) = self.active_streams.get_mut(&stream_id) else {
            return Err(FrameError::with_stream(
                FrameErrorKind::StreamNotFound,
                stream_id,
            ));
        };

        let end_stream = frame.flags.end_stream();
        stream.header_size += frame.field_block.len();
        stream.fragments.extend_from_slice(&frame.field_block);
        // a second HEADERS block on a stream carries trailers
        if stream.phase == StreamPhase::ReceivingBody {
            stream.phase = StreamPhase::ReceivingHeaders {
                end_stream_seen: false,
            };
        }
        if let StreamPhase::ReceivingHeaders { end_stream_seen } = &mut stream.phase {
            *end_stream_seen |= end_stream;
        }

        if frame.flags.end_headers() {
            self.expecting_continuation = None;
            self.finish_header_block(stream_id)
        } else {
            self.expecting_continuation = Some(stream_id);
            Ok(())
        }
    }

    fn handle_continuation(&mut self, frame: ContinuationFrame) -> Result<(), FrameError> {
        let stream_id = frame.stream_id;
        let Some(stream) = self
            .active_streams
            .get_mut(&stream_id)
            .filter(|s| matches!(s.phase, StreamPhase::ReceivingHeaders { .. }))
        else {
            return Err(FrameError::with_stream(
                FrameErrorKind::HeadersIncomplete,
                stream_id,
            ));
        };

        stream.fragments.extend_from_slice(&frame.field_block);
        stream.header_size += frame.field_block.len();

        if frame.flags.end_headers() {
            self.expecting_continuation = None;
            self.finish_header_block(stream_id)
        } else {
            Ok(())
        }
    }

    fn finish_header_block(&mut self, stream_id: StreamId) -> Result<(), FrameError> {
        let Some(stream) = self.active_streams.get_mut(&stream_id) else {
            return Err(FrameError::with_stream(
                FrameErrorKind::StreamNotFound,
                stream_id,
            ));
        };
        let block = std::mem::take(&mut stream.fragments);
        let fields = self
            .decoder
            .decode(&block)
            .map_err(|e| FrameError::with_stream(FrameErrorKind::Hpack(e), stream_id))?;

        if let Err(e) = check_header_limits(&fields, &self.limits) {
            crate::trace_warn!("dropping stream {stream_id}: {e}");
            self.active_streams.remove(&stream_id);
            return Err(FrameError::with_stream(e.kind, stream_id));
        }

        stream
            .headers
            .extend(fields.into_iter().map(|f| (f.name, f.value)));
        stream.phase = match stream.phase {
            StreamPhase::ReceivingHeaders {
                end_stream_seen: true,
            } => StreamPhase::Complete,
            _ => StreamPhase::ReceivingBody,
        };
        Ok(())
    }

    fn handle_data(&mut self, frame: DataFrame) -> Result<(), FrameError> {
        let stream_id = frame.stream_id;
        let Some(stream) = self.active_streams.get_mut(&stream_id) else {
            return Err(FrameError::with_stream(
                FrameErrorKind::StreamNotFound,
                stream_id,
            ));
        };

        if stream.body.len() + frame.data.len() > self.limits.max_body_size {
            crate::trace_warn!("dropping stream {stream_id}: body exceeds max_body_size");
            self.active_streams.remove(&stream_id);
            return Ok(());
        }

        stream.body.extend_from_slice(&frame.data);
        if frame.flags.end_stream() {
            match &mut stream.phase {
                StreamPhase::ReceivingHeaders { end_stream_seen } => *end_stream_seen = true,
                phase => *phase = StreamPhase::Complete,
            }
        }
        Ok(())
    }

    fn handle_settings(&mut self, frame: &SettingsFrame) {
        if frame.flags.ack() {
            return;
        }
        for &(id, value) in &frame.settings {
            match id {
                SettingsFrame::HEADER_TABLE_SIZE => {
                    self.settings.header_table_size = value;
                    let capped = (value as usize).min(self.limits.max_table_size);
                    self.decoder.set_max_capacity(capped);
                },
                SettingsFrame::ENABLE_PUSH => self.settings.enable_push = value != 0,
                SettingsFrame::MAX_CONCURRENT_STREAMS => {
                    self.settings.max_concurrent_streams = value
                },
                SettingsFrame::INITIAL_WINDOW_SIZE => self.settings.initial_window_size = value,
                SettingsFrame::MAX_FRAME_SIZE => self.settings.max_frame_size = value,
                SettingsFrame::MAX_HEADER_LIST_SIZE => self.settings.max_header_list_size = value,
                _ => {}, // Unknown setting
            }
        }
    }

    fn check_stream_completion(&mut self, stream_id: StreamId) {
        let complete = self
            .active_streams
            .get(&stream_id)
            .is_some_and(|s| s.phase == StreamPhase::Complete);
        if complete && let Some(stream) = self.active_streams.remove(&stream_id) {
            self.completed.push_back(ParsedH2Message {
                stream_id,
                headers: stream.headers,
                body: stream.body,
                header_size: stream.header_size,
            });
        }
    }

    /// Drop the oldest open streams while over `max_concurrent_streams`.
    fn evict_excess_streams(&mut self) {
        while self.active_streams.len() > self.limits.max_concurrent_streams {
            let Some(oldest) = self
                .active_streams
                .iter()
                .min_by_key(|(_, s)| s.opened)
                .map(|(&id, _)| id)
            else {
                break;
            };
            crate::trace_warn!("evicting stream {oldest} (over max_concurrent_streams)");
            self.active_streams.remove(&oldest);
        }
    }
}

fn check_header_limits(fields: &[HeaderField], limits: &H2Limits) -> Result<(), FrameError> {
    let too_large = || FrameError::new(FrameErrorKind::HeaderListTooLarge);
    if fields.len() > limits.max_header_count {
        return Err(too_large());
    }
    let mut total = 0usize;
    for field in fields {
        if field.value.len() > limits.max_header_value_size {
            return Err(too_large());
        }
        total += hpack::entry_size(&field.name, &field.value);
    }
    if total > limits.max_header_list_size {
        return Err(too_large());
    }
    Ok(())
}

/// A completed HTTP/2 stream.
///
/// `headers` keeps every decoded field in wire order, pseudo-headers and
/// trailers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedH2Message {
    pub stream_id:   StreamId,
    pub headers:     Vec<(Vec<u8>, Vec<u8>)>,
    pub body:        Vec<u8>,
    /// Total field block bytes received for this stream
    pub header_size: usize,
}

impl ParsedH2Message {
    /// Last value of the named field
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.as_slice() == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Regular (non-pseudo) header fields
    pub fn regular_headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers
            .iter()
            .filter(|(n, _)| !n.starts_with(b":"))
            .map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    pub fn method(&self) -> Option<&[u8]> {
        self.header(b":method")
    }

    pub fn path(&self) -> Option<&[u8]> {
        self.header(b":path")
    }

    pub fn authority(&self) -> Option<&[u8]> {
        self.header(b":authority")
    }

    /// Raw `:status` value. The last one wins, so interim 1xx responses
    /// are skipped.
    pub fn status(&self) -> Option<&[u8]> {
        self.header(b":status")
    }

    pub fn is_request(&self) -> bool {
        self.method().is_some()
    }

    pub fn is_response(&self) -> bool {
        self.status().is_some()
    }

    pub fn status_code(&self) -> Option<http::StatusCode> {
        self.status()
            .and_then(|s| http::StatusCode::from_bytes(s).ok())
    }

    pub fn http_method(&self) -> Option<http::Method> {
        self.method()
            .and_then(|m| http::Method::from_bytes(m).ok())
    }

    /// Regular headers as an `http::HeaderMap`, with `:authority` mapped to
    /// `Host`. Fields `http` cannot represent are left out.
    pub fn http_headers(&self) -> http::HeaderMap {
        let mut header_map = http::HeaderMap::new();

        if let Some(authority) = self.authority()
            && let Ok(v) = http::HeaderValue::from_bytes(authority)
        {
            header_map.insert(http::header::HOST, v);
        }

        for (name, value) in self.regular_headers() {
            let parsed = (
                http::header::HeaderName::from_bytes(name),
                http::HeaderValue::from_bytes(value),
            );
            if let (Ok(n), Ok(v)) = parsed {
                header_map.append(n, v);
            }
        }

        header_map
    }
}
