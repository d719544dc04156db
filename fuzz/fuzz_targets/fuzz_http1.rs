//! Fuzz target: HTTP/1.x parsing
//!
//! Feeds random bytes to the permissive request and response parsers and
//! to the reflection reader. The goal is to ensure none of them panic on
//! arbitrary input.

#![no_main]

use http_differ::h1;
use http_differ::reflect::parse_reflection;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((req, _rest)) = h1::parse_request(data) {
        // Serializing whatever was accepted must not panic either
        let _ = h1::parse_request(&req.to_bytes());
        let _ = req.is_valid();
    }
    let _ = h1::parse_response(data);

    let (requests, rest) = h1::parse_request_stream(data);
    assert!(rest.len() <= data.len());
    for req in &requests {
        let _ = req.with_joined_duplicates(b", ");
        let _ = req.normalized_headers();
    }

    let _ = h1::parse_http_0_9_response(h1::strip_http_0_9_headers(data));
    let _ = parse_reflection(data);

    // Prefixes model a reply cut short by the read timeout
    if data.len() > 10 {
        let _ = h1::parse_request(&data[..data.len() / 2]);
        let _ = h1::parse_response(&data[..data.len() / 2]);
    }
});
