//! Fuzz target: structured frame sequences
//!
//! Generates mostly well-formed HTTP/2 connections with `Arbitrary`: real
//! frame types, consistent length fields, optional padding and priority
//! blocks, and HPACK blocks built by the encoder. Random field values then
//! reach the session logic instead of dying in the frame splitter.

#![no_main]

use arbitrary::Arbitrary;
use h2wire::hpack::Encoder;
use h2wire::{Flags, FrameType, GenericFrame, H2ConnectionState, H2Limits, StreamId, CONNECTION_PREFACE};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Payload {
    Raw(Vec<u8>),
    /// A field block encoded from these pairs
    Fields(Vec<(Vec<u8>, Vec<u8>)>),
}

#[derive(Debug, Arbitrary)]
struct FuzzFrame {
    frame_type:   u8,
    flags:        u8,
    stream_id:    u8,
    payload:      Payload,
    add_padding:  bool,
    add_priority: bool,
    padding_len:  u8,
}

impl FuzzFrame {
    fn to_generic(&self, encoder: &mut Encoder) -> GenericFrame {
        let frame_type = FrameType(self.frame_type % 10);
        let mut flags = Flags(self.flags);
        let mut payload = match &self.payload {
            Payload::Raw(bytes) => bytes.clone(),
            Payload::Fields(fields) => encoder.encode(fields),
        };
        payload.truncate(16_384);

        let paddable = frame_type == FrameType::DATA || frame_type == FrameType::HEADERS;
        let mut prefix = Vec::new();
        if self.add_padding && paddable {
            flags = flags.with(Flags::PADDED, true);
            prefix.push(self.padding_len);
        }
        if self.add_priority && frame_type == FrameType::HEADERS {
            flags = flags.with(Flags::PRIORITY, true);
            prefix.extend_from_slice(&[0, 0, 0, 0, 16]);
        }
        prefix.extend_from_slice(&payload);
        if self.add_padding && paddable {
            prefix.extend(std::iter::repeat_n(0u8, usize::from(self.padding_len)));
        }

        // Small stream ids so frames actually land on the same streams
        GenericFrame::new(frame_type, flags, StreamId(u32::from(self.stream_id % 8)), prefix)
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzConnection {
    include_preface: bool,
    split_at:        u16,
    table_capacity:  u16,
    frames:          Vec<FuzzFrame>,
}

fuzz_target!(|conn: FuzzConnection| {
    let mut encoder = Encoder::new(usize::from(conn.table_capacity));
    let mut data = Vec::new();
    if conn.include_preface {
        data.extend_from_slice(CONNECTION_PREFACE);
    }
    for frame in &conn.frames {
        let _ = frame.to_generic(&mut encoder).encode_into(&mut data);
    }

    let mut state = H2ConnectionState::with_limits(H2Limits::default());
    let _ = state.feed(&data);
    let _ = state.drain();

    // Same bytes delivered in two reads
    let split = usize::from(conn.split_at).min(data.len());
    let mut state = H2ConnectionState::new();
    let _ = state.feed(&data[..split]);
    let _ = state.feed(&data[split..]);
    while state.try_pop().is_some() {}
});
