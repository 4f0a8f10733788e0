//! Relay identity: RSA-2048 keypair and OAEP sealing.
//!
//! The relay's long-lived identity key authenticates the outer handshake: a
//! client encrypts its ECDH public point under this key, and only the holder
//! of the private half can recover it and derive the matching session key.
//! Public keys travel as SPKI DER; private keys persist as PKCS#8 DER.

use rand_core::CryptoRngCore;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

use crate::error::CryptoError;

/// Modulus size of the relay identity key.
pub const RSA_KEY_BITS: usize = 2048;

/// Generate a fresh 2048-bit relay identity key.
///
/// # Errors
///
/// - `CryptoError::Rsa` if prime generation fails (RNG exhaustion)
pub fn generate_rsa_keypair(rng: &mut impl CryptoRngCore) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::new(rng, RSA_KEY_BITS).map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// SPKI DER encoding of the public half, as advertised in the hello envelope.
///
/// # Errors
///
/// - `CryptoError::Rsa` if encoding fails
pub fn public_key_to_der(private: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    RsaPublicKey::from(private)
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// PKCS#8 DER encoding of the private key, for the durable identity slot.
///
/// # Errors
///
/// - `CryptoError::Rsa` if encoding fails
pub fn private_key_to_der(private: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    private
        .to_pkcs8_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Restore a private key from its PKCS#8 DER encoding.
///
/// # Errors
///
/// - `CryptoError::Rsa` if the DER is not a valid RSA private key
pub fn private_key_from_der(der: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Encrypt under an advertised relay public key (OAEP-SHA256).
///
/// `public_der` is the SPKI DER from the hello envelope. The plaintext must
/// fit OAEP's limit for a 2048-bit modulus (190 bytes); a SEC1 P-384 point
/// (97 bytes) does.
///
/// # Errors
///
/// - `CryptoError::InvalidPublicKey` if the DER does not parse
/// - `CryptoError::Rsa` if the plaintext exceeds the OAEP limit
pub fn oaep_encrypt(
    public_der: &[u8],
    rng: &mut impl CryptoRngCore,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let public = RsaPublicKey::from_public_key_der(public_der)
        .map_err(|_| CryptoError::InvalidPublicKey { kind: "rsa" })?;

    public
        .encrypt(rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Decrypt an OAEP-SHA256 ciphertext with the relay's private key.
///
/// # Errors
///
/// - `CryptoError::Rsa` on any decryption failure (wrong key, tampered or
///   truncated ciphertext)
pub fn oaep_decrypt(private: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    private
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}
