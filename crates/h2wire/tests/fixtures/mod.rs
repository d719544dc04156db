#![allow(dead_code)]
//! Raw HTTP/2 frame and HPACK block builders for tests.
//!
//! Everything here writes bytes by hand rather than going through the
//! crate's encoders, so the tests check the codecs against an independent
//! rendition of the wire format.

pub const FLAG_END_STREAM: u8 = 0x01;
pub const FLAG_END_HEADERS: u8 = 0x04;
pub const FLAG_PADDED: u8 = 0x08;
pub const FLAG_PRIORITY: u8 = 0x20;
pub const FLAG_ACK: u8 = 0x01;

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// One frame: 9-byte header followed by `payload`
pub fn build_frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(9 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes()[1..]);
    frame.push(frame_type);
    frame.push(flags);
    frame.extend_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn build_data_frame(stream_id: u32, data: &[u8], end_stream: bool) -> Vec<u8> {
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    build_frame(0x0, flags, stream_id, data)
}

pub fn build_data_frame_padded(stream_id: u32, data: &[u8], pad: u8, end_stream: bool) -> Vec<u8> {
    let flags = FLAG_PADDED | if end_stream { FLAG_END_STREAM } else { 0 };
    let mut payload = vec![pad];
    payload.extend_from_slice(data);
    payload.extend(std::iter::repeat_n(0u8, pad as usize));
    build_frame(0x0, flags, stream_id, &payload)
}

pub fn build_headers_frame(stream_id: u32, block: &[u8], flags: u8) -> Vec<u8> {
    build_frame(0x1, flags, stream_id, block)
}

/// HEADERS with END_HEADERS and END_STREAM
pub fn build_complete_headers_frame(stream_id: u32, block: &[u8]) -> Vec<u8> {
    build_headers_frame(stream_id, block, FLAG_END_HEADERS | FLAG_END_STREAM)
}

/// HEADERS carrying a priority block and `pad` bytes of padding
pub fn build_headers_frame_padded_priority(
    stream_id: u32,
    block: &[u8],
    pad: u8,
    dependency: u32,
    weight: u8,
) -> Vec<u8> {
    let mut payload = vec![pad];
    payload.extend_from_slice(&dependency.to_be_bytes());
    payload.push(weight);
    payload.extend_from_slice(block);
    payload.extend(std::iter::repeat_n(0u8, pad as usize));
    let flags = FLAG_PADDED | FLAG_PRIORITY | FLAG_END_HEADERS | FLAG_END_STREAM;
    build_frame(0x1, flags, stream_id, &payload)
}

pub fn build_continuation_frame(stream_id: u32, block: &[u8], end_headers: bool) -> Vec<u8> {
    let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
    build_frame(0x9, flags, stream_id, block)
}

pub fn build_settings_frame(settings: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, value) in settings {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    build_frame(0x4, 0, 0, &payload)
}

pub fn build_settings_ack_frame() -> Vec<u8> {
    build_frame(0x4, FLAG_ACK, 0, &[])
}

pub fn build_rst_stream_frame(stream_id: u32, error_code: u32) -> Vec<u8> {
    build_frame(0x3, 0, stream_id, &error_code.to_be_bytes())
}

pub fn build_goaway_frame(last_stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut payload = last_stream_id.to_be_bytes().to_vec();
    payload.extend_from_slice(&error_code.to_be_bytes());
    build_frame(0x7, 0, 0, &payload)
}

pub fn build_ping_frame(data: [u8; 8]) -> Vec<u8> {
    build_frame(0x6, 0, 0, &data)
}

/// Preface followed by an empty SETTINGS frame
pub fn connection_start() -> Vec<u8> {
    let mut data = PREFACE.to_vec();
    data.extend(build_settings_frame(&[]));
    data
}

/// Indexed field, index below 127
pub fn hpack_indexed(index: u8) -> Vec<u8> {
    vec![0x80 | index]
}

/// Literal with incremental indexing and a literal name, short strings only
pub fn hpack_literal_with_indexing(name: &str, value: &str) -> Vec<u8> {
    let mut out = vec![0x40, name.len() as u8];
    out.extend_from_slice(name.as_bytes());
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    out
}

/// Literal without indexing and a literal name, short strings only
pub fn hpack_literal_without_indexing(name: &str, value: &str) -> Vec<u8> {
    let mut out = vec![0x00, name.len() as u8];
    out.extend_from_slice(name.as_bytes());
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    out
}

/// Dynamic table size update, value below 31 + 127
pub fn hpack_size_update(size: u8) -> Vec<u8> {
    if size < 31 {
        vec![0x20 | size]
    } else {
        vec![0x3F, size - 31]
    }
}

/// `:status` from the static table (200, 204, 206, 304, 400, 404, 500)
pub fn hpack_status(code: u16) -> Vec<u8> {
    let index = match code {
        200 => 8,
        204 => 9,
        206 => 10,
        304 => 11,
        400 => 12,
        404 => 13,
        500 => 14,
        _ => return hpack_literal_without_indexing(":status", &code.to_string()),
    };
    hpack_indexed(index)
}

/// GET request block: static method/scheme, literal path and authority
pub fn hpack_get_request(path: &str, authority: &str) -> Vec<u8> {
    let mut block = hpack_indexed(2);
    block.extend(hpack_indexed(7));
    if path == "/" {
        block.extend(hpack_indexed(4));
    } else {
        block.extend(hpack_literal_without_indexing(":path", path));
    }
    block.extend(hpack_literal_without_indexing(":authority", authority));
    block
}
