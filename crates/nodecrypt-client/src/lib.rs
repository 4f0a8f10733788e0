//! NodeCrypt chat client.
//!
//! The [`ChatClient`] is an event-in/action-out state machine: the caller
//! owns the transport and the UI, feeds frames and intents in, and executes
//! the actions that come back. No I/O happens in this crate.
//!
//! A client drives one outer session with the relay (RSA-authenticated
//! ECDH, then AES on every frame) and one [`PeerSession`] per other member
//! of its channel (X25519 mixed with the room password, then ChaCha20 per
//! message). The relay only ever sees the outer layer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod event;
mod handshake;
mod peer;

pub use client::ChatClient;
pub use error::ClientError;
pub use event::{ChatEvent, ClientAction, ClientEvent, LogLevel};
pub use handshake::{OuterSession, OuterState};
pub use peer::{PeerSession, PeerState, PENDING_DECRYPT_TIMEOUT};
