//! Fuzz target for envelope decoding.
//!
//! Arbitrary text through the codec must only ever return an error, never
//! panic: the relay feeds every inbound frame through this path before any
//! state machine sees it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nodecrypt_proto::decode;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode(text, 512 * 1024);
        // A tiny cap must reject early rather than misbehave
        let _ = decode(text, 16);
    }
});
