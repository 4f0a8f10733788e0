//! Session error taxonomy.
//!
//! One enum covers every way a session can fail, with the disposition rules
//! of the protocol baked into [`SessionError::is_fatal`]: everything is
//! fatal to the transport except inner-layer decryption trouble, which a
//! wrong-password peer produces in bulk and which must never tear a session
//! down.

use std::time::Duration;

use nodecrypt_crypto::CryptoError;
use nodecrypt_proto::CodecError;
use thiserror::Error;

/// Errors raised while driving a session on either side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Frame failed structural decoding: bad JSON, unknown action, missing
    /// field, invalid base64, or oversized.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] CodecError),

    /// Envelope is out of sequence for the session state.
    #[error("protocol violation: unexpected '{action}' envelope in state {state}")]
    ProtocolViolation {
        /// Session state name when the envelope arrived
        state: &'static str,
        /// Action tag of the offending envelope
        action: char,
    },

    /// Outer-layer (AES or RSA) decryption failed.
    #[error("bad cipher: {0}")]
    BadCipher(CryptoError),

    /// Inner-layer (ChaCha20) payload did not decrypt to a valid chat
    /// record. Non-fatal: expected from wrong-password peers.
    #[error("chat payload undecryptable: {reason}")]
    ChatUndecryptable {
        /// Short parse/decode failure description
        reason: String,
    },

    /// No frame received within the idle window.
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// Time since the last received frame
        elapsed: Duration,
    },
}

impl SessionError {
    /// Whether this error terminates the session.
    ///
    /// Only inner-layer decryption failures are survivable: the sender may
    /// simply hold a different password, and that must look like silence,
    /// not a disconnect.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ChatUndecryptable { .. })
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        Self::BadCipher(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_failures_are_survivable() {
        let err = SessionError::ChatUndecryptable { reason: "not utf-8".into() };
        assert!(!err.is_fatal());
    }

    #[test]
    fn everything_else_is_fatal() {
        assert!(SessionError::ProtocolViolation { state: "Secured", action: 'e' }.is_fatal());
        assert!(SessionError::BadCipher(CryptoError::BadPadding).is_fatal());
        assert!(SessionError::IdleTimeout { elapsed: Duration::from_secs(61) }.is_fatal());
        assert!(SessionError::MalformedFrame(CodecError::Json("eof".into())).is_fatal());
    }
}
