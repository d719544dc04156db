//! Session decoding across frames, streams and feed boundaries.

mod fixtures;

use fixtures::*;
use h2wire::{FrameErrorKind, H2ConnectionState, H2Limits, HpackError, ParsedH2Message, StreamId};
use rstest::rstest;

fn decode_all(buffer: &[u8]) -> Vec<ParsedH2Message> {
    let mut state = H2ConnectionState::new();
    state.feed(buffer).expect("should decode");
    state.drain()
}

fn body_chunk(stream_id: u32, chunk: u32) -> Vec<u8> {
    format!("STREAM{stream_id}:CHUNK{chunk}").into_bytes()
}

// =============================================================================
// Stream interleaving
// =============================================================================

#[test]
fn test_interleaved_data_body_integrity() {
    let mut buffer = connection_start();
    let block = hpack_get_request("/resource", "example.com");
    for sid in [1, 3, 5] {
        buffer.extend(build_headers_frame(sid, &block, FLAG_END_HEADERS));
    }
    let order = [(1, 1), (3, 1), (1, 2), (5, 1), (3, 2), (1, 3), (5, 2), (3, 3), (5, 3)];
    for (sid, chunk) in order {
        buffer.extend(build_data_frame(sid, &body_chunk(sid, chunk), chunk == 3));
    }

    let messages = decode_all(&buffer);
    assert_eq!(messages.len(), 3);
    // completion order follows END_STREAM order
    let ids: Vec<StreamId> = messages.iter().map(|m| m.stream_id).collect();
    assert_eq!(ids, [StreamId(1), StreamId(3), StreamId(5)]);
    for msg in &messages {
        let expected: Vec<u8> = (1..=3).flat_map(|c| body_chunk(msg.stream_id.0, c)).collect();
        assert_eq!(msg.body, expected);
        assert_eq!(msg.path(), Some(&b"/resource"[..]));
    }
}

#[test]
fn test_continuation_split_header_block() {
    let block = hpack_get_request("/split", "example.com");
    let (first, rest) = block.split_at(3);
    let (second, third) = rest.split_at(4);

    let mut buffer = connection_start();
    buffer.extend(build_headers_frame(1, first, FLAG_END_STREAM));
    buffer.extend(build_continuation_frame(1, second, false));
    buffer.extend(build_continuation_frame(1, third, true));

    let messages = decode_all(&buffer);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].method(), Some(&b"GET"[..]));
    assert_eq!(messages[0].authority(), Some(&b"example.com"[..]));
    assert_eq!(messages[0].header_size, block.len());
}

#[test]
fn test_continuation_without_headers_is_skipped() {
    let mut buffer = connection_start();
    buffer.extend(build_continuation_frame(7, &hpack_indexed(2), true));
    buffer.extend(build_complete_headers_frame(1, &hpack_status(204)));
    let messages = decode_all(&buffer);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].stream_id, StreamId(1));
}

#[test]
fn test_trailers_are_appended() {
    let mut buffer = connection_start();
    buffer.extend(build_headers_frame(1, &hpack_status(200), FLAG_END_HEADERS));
    buffer.extend(build_data_frame(1, b"body", false));
    buffer.extend(build_headers_frame(
        1,
        &hpack_literal_without_indexing("grpc-status", "0"),
        FLAG_END_HEADERS | FLAG_END_STREAM,
    ));
    let messages = decode_all(&buffer);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"body");
    assert_eq!(messages[0].header(b"grpc-status"), Some(&b"0"[..]));
}

#[test]
fn test_rst_stream_discards_stream() {
    let mut buffer = connection_start();
    buffer.extend(build_headers_frame(1, &hpack_status(200), FLAG_END_HEADERS));
    buffer.extend(build_rst_stream_frame(1, 0x8));
    buffer.extend(build_data_frame(1, b"late", true));

    let mut state = H2ConnectionState::new();
    state.feed(&buffer).unwrap();
    assert!(!state.has_completed());
    assert_eq!(state.active_stream_count(), 0);
}

#[test]
fn test_goaway_is_recorded() {
    let mut buffer = connection_start();
    buffer.extend(build_goaway_frame(5, 0x2));
    let mut state = H2ConnectionState::new();
    state.feed(&buffer).unwrap();
    let goaway = state.goaway().expect("GOAWAY recorded");
    assert_eq!(goaway.last_stream_id, StreamId(5));
    assert_eq!(goaway.error_code, 0x2);
}

// =============================================================================
// Padding and priority
// =============================================================================

#[test]
fn test_padded_priority_headers_and_padded_data() {
    let mut buffer = connection_start();
    let mut block = hpack_status(200);
    block.extend(hpack_literal_without_indexing("x-id", "7"));
    buffer.extend(build_headers_frame_padded_priority(1, &block, 6, 0, 16));
    let messages = decode_all(&buffer);
    assert_eq!(messages[0].status(), Some(&b"200"[..]));
    assert_eq!(messages[0].header(b"x-id"), Some(&b"7"[..]));

    let mut buffer = connection_start();
    buffer.extend(build_headers_frame(3, &hpack_status(200), FLAG_END_HEADERS));
    buffer.extend(build_data_frame_padded(3, b"abc", 10, true));
    let messages = decode_all(&buffer);
    assert_eq!(messages[0].body, b"abc");
}

#[test]
fn test_bad_padding_skips_frame_only() {
    let mut buffer = connection_start();
    // pad length 200 in a 4-byte payload
    let flags = FLAG_PADDED | FLAG_END_HEADERS | FLAG_END_STREAM;
    buffer.extend(build_frame(0x1, flags, 1, &[200, 0x88, 0, 0]));
    buffer.extend(build_complete_headers_frame(3, &hpack_status(404)));
    let messages = decode_all(&buffer);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status_code(), Some(http::StatusCode::NOT_FOUND));
}

// =============================================================================
// HPACK state across streams
// =============================================================================

#[test]
fn test_dynamic_table_persists_across_streams() {
    let mut first = hpack_status(200);
    first.extend(hpack_literal_with_indexing("x-session", "abc"));

    let mut state = H2ConnectionState::new();
    let mut buffer = connection_start();
    buffer.extend(build_complete_headers_frame(1, &first));
    state.feed(&buffer).unwrap();

    let mut second = hpack_status(200);
    second.extend(hpack_indexed(62));
    state
        .feed(&build_complete_headers_frame(3, &second))
        .unwrap();

    let messages = state.drain();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].header(b"x-session"), Some(&b"abc"[..]));
    assert_eq!(state.hpack_table().len(), 1);
}

#[test]
fn test_settings_shrink_table_and_size_update() {
    let mut buffer = connection_start();
    let mut block = hpack_status(200);
    block.extend(hpack_literal_with_indexing("x-a", "1"));
    buffer.extend(build_complete_headers_frame(1, &block));
    buffer.extend(build_settings_frame(&[(0x1, 0)]));

    let mut state = H2ConnectionState::new();
    state.feed(&buffer).unwrap();
    assert_eq!(state.settings().header_table_size, 0);
    assert!(state.hpack_table().is_empty());

    // the evicted entry is gone
    let err = state
        .feed(&build_complete_headers_frame(3, &hpack_indexed(62)))
        .unwrap_err();
    assert!(err.is_hpack());
    assert_eq!(err.stream_id, Some(StreamId(3)));
}

#[test]
fn test_settings_table_size_is_clamped_to_limit() {
    let limits = H2Limits {
        max_table_size: 256,
        ..H2Limits::default()
    };
    let mut state = H2ConnectionState::with_limits(limits);
    let mut buffer = connection_start();
    buffer.extend(build_settings_frame(&[(0x1, 1 << 20)]));
    buffer.extend(build_complete_headers_frame(1, &hpack_size_update(100)));
    state.feed(&buffer).unwrap();
    assert_eq!(state.hpack_table().max_capacity(), 256);
    assert_eq!(state.hpack_table().capacity(), 100);
}

#[test]
fn test_hpack_error_is_fatal_but_keeps_completed() {
    let mut buffer = connection_start();
    buffer.extend(build_complete_headers_frame(1, &hpack_status(200)));
    buffer.extend(build_complete_headers_frame(3, &hpack_indexed(99)));
    buffer.extend(build_complete_headers_frame(5, &hpack_status(500)));

    let mut state = H2ConnectionState::new();
    let err = state.feed(&buffer).unwrap_err();
    assert_eq!(err.kind, FrameErrorKind::Hpack(HpackError::InvalidIndex(99)));
    let messages = state.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].stream_id, StreamId(1));
}

// =============================================================================
// Limits and incremental input
// =============================================================================

#[test]
fn test_header_count_limit_drops_stream() {
    let limits = H2Limits {
        max_header_count: 2,
        ..H2Limits::default()
    };
    let mut block = hpack_status(200);
    for i in 0..3 {
        block.extend(hpack_literal_without_indexing("x-n", &i.to_string()));
    }
    let mut buffer = connection_start();
    buffer.extend(build_complete_headers_frame(1, &block));
    let mut state = H2ConnectionState::with_limits(limits);
    state.feed(&buffer).unwrap();
    assert!(!state.has_completed());
}

#[test]
fn test_buffer_limit() {
    let limits = H2Limits {
        max_buffer_size: 16,
        ..H2Limits::default()
    };
    let mut state = H2ConnectionState::with_limits(limits);
    let err = state.feed(&[0u8; 17]).unwrap_err();
    assert_eq!(err.kind, FrameErrorKind::BufferTooLarge);
}

#[test]
fn test_concurrent_stream_limit() {
    let limits = H2Limits {
        max_concurrent_streams: 1,
        ..H2Limits::default()
    };
    let mut buffer = connection_start();
    buffer.extend(build_headers_frame(1, &hpack_status(200), FLAG_END_HEADERS));
    buffer.extend(build_headers_frame(3, &hpack_status(200), FLAG_END_HEADERS));
    let mut state = H2ConnectionState::with_limits(limits);
    state.feed(&buffer).unwrap();
    assert_eq!(state.active_stream_count(), 1);
}

#[rstest]
#[case::one_byte(1)]
#[case::three_bytes(3)]
#[case::frame_header(9)]
#[case::odd(17)]
fn test_feed_in_pieces(#[case] piece: usize) {
    let mut buffer = connection_start();
    buffer.extend(build_settings_ack_frame());
    buffer.extend(build_ping_frame(*b"pingpong"));
    buffer.extend(build_headers_frame(1, &hpack_status(200), FLAG_END_HEADERS));
    buffer.extend(build_data_frame(1, b"hello world", true));
    let whole = decode_all(&buffer);

    let mut state = H2ConnectionState::new();
    for chunk in buffer.chunks(piece) {
        state.feed(chunk).unwrap();
    }
    assert_eq!(state.drain(), whole);
    assert_eq!(state.pending_bytes(), 0);
    assert!(state.preface_received);
}

#[test]
fn test_response_without_preface() {
    // servers do not send the preface
    let mut buffer = build_settings_frame(&[(0x3, 100)]);
    buffer.extend(build_complete_headers_frame(1, &hpack_status(400)));
    let messages = decode_all(&buffer);
    assert_eq!(messages[0].status_code(), Some(http::StatusCode::BAD_REQUEST));
    assert!(messages[0].is_response());
    assert!(!messages[0].is_request());
}

#[test]
fn test_http_headers_maps_authority_to_host() {
    let mut buffer = connection_start();
    let mut block = hpack_get_request("/", "example.com");
    block.extend(hpack_literal_without_indexing("accept", "*/*"));
    buffer.extend(build_complete_headers_frame(1, &block));
    let msg = &decode_all(&buffer)[0];
    let headers = msg.http_headers();
    assert_eq!(headers.get(http::header::HOST).unwrap(), "example.com");
    assert_eq!(headers.get(http::header::ACCEPT).unwrap(), "*/*");
    assert_eq!(msg.http_method(), Some(http::Method::GET));
}
