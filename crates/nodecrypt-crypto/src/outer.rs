//! Outer layer: AES-256-CBC between a client and the relay.
//!
//! Every sealed envelope is `IV ‖ AES-256-CBC(session key, PKCS#7, JSON)`.
//! The IV is caller-provided so sealing stays deterministic under a seeded
//! RNG; production callers draw it from the environment.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::{error::CryptoError, exchange::SESSION_KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block / IV size.
pub const IV_SIZE: usize = 16;

/// Seal a plaintext under the session key.
///
/// Returns `iv ‖ ciphertext`. The IV must be fresh for every call.
#[must_use]
pub fn outer_seal(key: &[u8; SESSION_KEY_SIZE], iv: [u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let ciphertext = Aes256CbcEnc::new(key.into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Open an `iv ‖ ciphertext` blob sealed with [`outer_seal`].
///
/// # Errors
///
/// - `CryptoError::CiphertextTooShort` if there is no room for IV plus one
///   block
/// - `CryptoError::BadPadding` if padding is invalid after decryption, which
///   is how a wrong key or tampering surfaces at this layer
pub fn outer_open(key: &[u8; SESSION_KEY_SIZE], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < IV_SIZE * 2 {
        return Err(CryptoError::CiphertextTooShort { min: IV_SIZE * 2, actual: data.len() });
    }

    let (iv, ciphertext) = data.split_at(IV_SIZE);
    let iv: &[u8; IV_SIZE] = iv.try_into().map_err(|_| CryptoError::CiphertextTooShort {
        min: IV_SIZE * 2,
        actual: data.len(),
    })?;

    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::BadPadding)
}
