//! Fuzz target: HTTP/2 frame codec
//!
//! Feeds random bytes to the frame splitter and the session decoder. Every
//! frame that parses must survive re-encoding unchanged, whether or not it
//! specializes.

#![no_main]

use h2wire::{GenericFrame, H2ConnectionState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (frames, _rest) = GenericFrame::parse_all(data);
    for generic in &frames {
        let bytes = generic.encode().expect("parsed frame fits its length field");
        let (parsed, used) = GenericFrame::parse_slice(&bytes).expect("re-encoded frame parses");
        assert_eq!(used, bytes.len());
        assert_eq!(&parsed, generic);

        if let Ok(frame) = generic.specialize() {
            let _ = frame.encode();
        }
    }

    // Whole buffer at once, then split at an arbitrary point
    let mut state = H2ConnectionState::new();
    let _ = state.feed(data);
    let _ = state.drain();

    if data.len() > 10 {
        let mut state = H2ConnectionState::new();
        let mid = data.len() / 2;
        let _ = state.feed(&data[..mid]);
        let _ = state.feed(&data[mid..]);
        let _ = state.drain();
    }
});
