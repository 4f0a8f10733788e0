//! Client error type.

use nodecrypt_core::error::SessionError;
use thiserror::Error;

/// Errors surfaced to the client's caller.
///
/// Every variant is fatal to the relay connection; the caller is expected
/// to drop the transport and re-handshake. Recoverable conditions (peer
/// ciphertexts that will not decrypt) never become errors — they surface as
/// [`crate::ChatEvent::DecryptFailed`] deliveries instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Protocol or cipher failure on the relay session.
    #[error(transparent)]
    Session(#[from] SessionError),
}
