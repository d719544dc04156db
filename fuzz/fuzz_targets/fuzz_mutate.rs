//! Fuzz target: stream mutation and classification
//!
//! Runs the mutation engine from an arbitrary starting stream and seed,
//! then classifies the parsed result against itself under a few anomaly
//! profiles. Nothing on this path may panic.

#![no_main]

use arbitrary::Arbitrary;
use http_differ::h1::parse_request_stream;
use http_differ::{classify, AnomalyProfile, ByteStream, HttpMessage, Mutator};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed:       u64,
    buffers:    Vec<Vec<u8>>,
    rounds:     u8,
    persist:    bool,
    joins:      bool,
    chunk_body: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let mut mutator = Mutator::seeded(input.seed);
    let mut stream: ByteStream = input.buffers.into();
    for _ in 0..input.rounds % 16 {
        if let Some(mutated) = mutator.mutate(&stream) {
            stream = mutated;
        }
    }

    let (requests, _) = parse_request_stream(&stream.concat());
    let messages: Vec<HttpMessage> = requests.into_iter().map(HttpMessage::Request).collect();
    let profile = AnomalyProfile {
        doesnt_support_persistence: input.persist,
        joins_duplicate_headers: input.joins,
        duplicate_header_joiner: b", ".to_vec(),
        ..Default::default()
    };
    let _ = classify(&messages, &messages[..messages.len() / 2], &profile, &AnomalyProfile::default());

    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(input.seed);
    let chunked = http_differ::mutate::chunk_randomly(&mut rng, &input.chunk_body);
    assert!(chunked.ends_with(b"0\r\n\r\n"));
});
