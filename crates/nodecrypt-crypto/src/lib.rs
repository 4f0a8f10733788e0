//! NodeCrypt cryptographic primitives.
//!
//! Building blocks for the two protocol layers, kept free of protocol state
//! and I/O. Callers provide randomness through a [`rand_core`] RNG so every
//! operation is reproducible under a seeded generator in tests.
//!
//! # Key hierarchy
//!
//! ```text
//! Relay RSA-2048 identity (rotated daily)
//!        │ authenticates
//!        ▼
//! ECDH-P384 exchange ─▶ per-session AES-256 key        (outer layer)
//!
//! X25519 exchange ─ XOR SHA-256(password) ─ SHA-256
//!        │
//!        ▼
//! per-peer-pair ChaCha20 key                           (inner layer)
//! ```
//!
//! The outer layer protects every envelope between one client and the relay.
//! The inner layer protects chat payloads between two clients; the relay
//! holds no material for it. Mixing the password into the inner derivation
//! means peers with different passwords end up with unrelated keys, so a
//! wrong password shows up only as persistent garbage on decryption.
//!
//! # Security
//!
//! - The inner layer is plain ChaCha20, no authenticator. Tampering is not
//!   detected here; a flipped bit yields garbage that the payload parser
//!   rejects. This matches the protocol's threat model, where the relay is
//!   honest-but-curious and transport integrity comes from the outer layer.
//! - Derived symmetric keys are wiped on drop.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod exchange;
mod identity;
mod outer;
mod peer;

pub use error::CryptoError;
pub use rsa::RsaPrivateKey;
pub use exchange::{EcdhKeyPair, SESSION_KEY_SIZE};
pub use identity::{
    generate_rsa_keypair, oaep_decrypt, oaep_encrypt, private_key_from_der, private_key_to_der,
    public_key_to_der, RSA_KEY_BITS,
};
pub use outer::{outer_open, outer_seal, IV_SIZE};
pub use peer::{chat_open, chat_seal, PeerKeyPair, CHAT_NONCE_SIZE, PEER_PUBLIC_SIZE};
