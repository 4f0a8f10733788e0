//! Fuzz target for the two decryption layers.
//!
//! Both `outer_open` (AES-CBC) and `chat_open` (ChaCha20) consume
//! attacker-controlled bytes: the relay opens sealed envelopes from any
//! transport, and clients open ciphertexts relayed from any peer. Neither
//! may panic on any input.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nodecrypt_crypto::{chat_open, outer_open};

#[derive(Debug, Arbitrary)]
struct OpenInput {
    key: [u8; 32],
    data: Vec<u8>,
}

fuzz_target!(|input: OpenInput| {
    let _ = outer_open(&input.key, &input.data);
    let _ = chat_open(&input.key, &input.data);
});
