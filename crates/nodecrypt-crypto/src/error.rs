//! Crypto error types.

use thiserror::Error;

/// Errors from cryptographic operations.
///
/// Variants deliberately carry no key material and no plaintext fragments;
/// messages are safe to log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// RSA key generation or OAEP operation failed.
    #[error("rsa failure: {0}")]
    Rsa(String),

    /// A public key could not be parsed from its wire encoding.
    #[error("invalid {kind} public key")]
    InvalidPublicKey {
        /// Key family that failed to parse
        kind: &'static str,
    },

    /// Ciphertext is shorter than its mandatory prefix (IV or nonce).
    #[error("ciphertext too short: {actual} bytes, need at least {min}")]
    CiphertextTooShort {
        /// Minimum length for this layer
        min: usize,
        /// Observed length
        actual: usize,
    },

    /// AES-CBC padding was invalid after decryption (wrong key or tampering).
    #[error("bad cipher: invalid padding")]
    BadPadding,
}
