//! NodeCrypt wire protocol.
//!
//! Every frame on the transport is one JSON envelope with a single-character
//! `action` tag. Binary values (identifiers, key material, ciphertexts) are
//! base64 strings. Handshake envelopes travel in the clear; everything after
//! the handshake rides inside a `Sealed` envelope whose `data` field is the
//! AES-encrypted encoding of an inner envelope.
//!
//! The codec is deliberately dumb: it validates structure and size, nothing
//! else. Whether an envelope is legal *now* is the session state machine's
//! decision, and the relay never looks inside ciphertext-bearing fields.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chat;
mod envelope;
mod errors;

pub use chat::{ChatKind, ChatPayload, MessageKind};
pub use envelope::{decode, encode, ClientId, Envelope, Member, CLIENT_ID_SIZE};
pub use errors::CodecError;
