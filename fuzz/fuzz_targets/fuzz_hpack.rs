//! Fuzz target: HPACK decoding
//!
//! Random field blocks go through the stateful decoder and the stateless
//! representation parser. Parsed representations must encode back to
//! something that parses to the same representation.

#![no_main]

use h2wire::hpack::{huffman_decode, huffman_encode, Decoder, FieldRepresentation};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = Decoder::new(4096);
    let _ = decoder.decode(data);
    // A second block against whatever table state the first one left
    let _ = decoder.decode(data);

    if let Ok(representations) = FieldRepresentation::parse_block(data) {
        for rep in representations {
            let bytes = rep.encode();
            let (parsed, used) = FieldRepresentation::parse(&bytes).expect("re-encoded field parses");
            assert_eq!(used, bytes.len());
            assert_eq!(parsed, rep);
        }
    }

    let _ = huffman_decode(data);
    assert_eq!(huffman_decode(&huffman_encode(data)).ok().as_deref(), Some(data));
});
