//! Inner layer: X25519 with password mixing, ChaCha20 transport.
//!
//! Each pair of clients in a channel derives a shared ChaCha20 key:
//!
//! ```text
//! chat_key = SHA-256( X25519(my_priv, peer_pub) XOR SHA-256(password) )
//! ```
//!
//! The XOR folds the room password into the exchange. Two clients holding
//! different passwords derive unrelated keys even though their Curve25519
//! exchange succeeded, so a wrong password is observable only as persistent
//! decryption garbage — never as a protocol error the relay could see.
//!
//! ChaCha20 here is the IETF variant: 32-byte key, 12-byte random nonce
//! prepended to the ciphertext, no associated data.

use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    ChaCha20,
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Nonce size for the inner layer (IETF ChaCha20).
pub const CHAT_NONCE_SIZE: usize = 12;

/// Size of a Curve25519 public key.
pub const PEER_PUBLIC_SIZE: usize = 32;

/// A client's Curve25519 keypair for one peer relationship.
pub struct PeerKeyPair {
    secret: StaticSecret,
}

impl PeerKeyPair {
    /// Generate a fresh keypair.
    #[must_use]
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        Self { secret: StaticSecret::random_from_rng(&mut *rng) }
    }

    /// Public key bytes, announced to the peer through the relay.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; PEER_PUBLIC_SIZE] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Derive the shared chat key for this peer.
    ///
    /// Both sides call this with each other's public key and the same
    /// password and arrive at the same 32 bytes. The intermediate mixed
    /// secret is wiped before returning.
    #[must_use]
    pub fn derive_chat_key(
        &self,
        peer_public: &[u8; PEER_PUBLIC_SIZE],
        password: &str,
    ) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        let password_hash = Sha256::digest(password.as_bytes());

        let mut mixed = Zeroizing::new([0u8; 32]);
        for (out, (dh, pw)) in
            mixed.iter_mut().zip(shared.as_bytes().iter().zip(password_hash.iter()))
        {
            *out = dh ^ pw;
        }

        Sha256::digest(mixed.as_ref()).into()
    }
}

impl std::fmt::Debug for PeerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerKeyPair").finish_non_exhaustive()
    }
}

/// Encrypt a chat payload under a peer's chat key.
///
/// Returns `nonce ‖ ciphertext`. The nonce must be fresh for every call.
#[must_use]
pub fn chat_seal(key: &[u8; 32], nonce: [u8; CHAT_NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut buffer = plaintext.to_vec();
    ChaCha20::new(key.into(), (&nonce).into()).apply_keystream(&mut buffer);

    let mut out = Vec::with_capacity(CHAT_NONCE_SIZE + buffer.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&buffer);
    out
}

/// Decrypt a `nonce ‖ ciphertext` blob sealed with [`chat_seal`].
///
/// A stream cipher cannot detect a wrong key; mismatched keys yield garbage
/// bytes here and fail later at the payload parser. That failure mode is
/// expected (wrong-password peers) and must stay non-fatal in callers.
///
/// # Errors
///
/// - `CryptoError::CiphertextTooShort` if there is no room for the nonce
pub fn chat_open(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < CHAT_NONCE_SIZE {
        return Err(CryptoError::CiphertextTooShort { min: CHAT_NONCE_SIZE, actual: data.len() });
    }

    let (nonce, ciphertext) = data.split_at(CHAT_NONCE_SIZE);
    #[allow(clippy::expect_used)]
    let nonce: &[u8; CHAT_NONCE_SIZE] =
        nonce.try_into().expect("invariant: split_at yields exactly CHAT_NONCE_SIZE bytes");

    let mut buffer = ciphertext.to_vec();
    ChaCha20::new(key.into(), nonce.into()).apply_keystream(&mut buffer);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn both_peers_derive_the_same_key() {
        let mut rng = StdRng::seed_from_u64(10);
        let alice = PeerKeyPair::generate(&mut rng);
        let bob = PeerKeyPair::generate(&mut rng);

        let key_a = alice.derive_chat_key(&bob.public_bytes(), "hunter2");
        let key_b = bob.derive_chat_key(&alice.public_bytes(), "hunter2");

        assert_eq!(key_a, key_b);
    }

    #[test]
    fn different_passwords_derive_different_keys() {
        let mut rng = StdRng::seed_from_u64(11);
        let alice = PeerKeyPair::generate(&mut rng);
        let bob = PeerKeyPair::generate(&mut rng);

        let key_p = alice.derive_chat_key(&bob.public_bytes(), "p");
        let key_q = bob.derive_chat_key(&alice.public_bytes(), "q");

        assert_ne!(key_p, key_q);
    }

    #[test]
    fn seal_open_round_trip() {
        let key = [0x77u8; 32];
        let nonce = [0x01u8; CHAT_NONCE_SIZE];
        let plaintext = b"hi";

        let sealed = chat_seal(&key, nonce, plaintext);
        assert_eq!(&sealed[..CHAT_NONCE_SIZE], &nonce);
        assert_eq!(sealed.len(), CHAT_NONCE_SIZE + plaintext.len());

        let opened = chat_open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_yields_garbage_not_error() {
        let key = [0x01u8; 32];
        let wrong = [0x02u8; 32];
        let sealed = chat_seal(&key, [9u8; CHAT_NONCE_SIZE], b"the plaintext marker");

        let opened = chat_open(&wrong, &sealed).unwrap();
        assert_ne!(opened, b"the plaintext marker");
    }

    #[test]
    fn short_blob_is_rejected() {
        let result = chat_open(&[0u8; 32], &[1, 2, 3]);
        assert_eq!(result, Err(CryptoError::CiphertextTooShort { min: 12, actual: 3 }));
    }

    #[test]
    fn distinct_nonces_produce_distinct_ciphertexts() {
        let key = [0x55u8; 32];
        let a = chat_seal(&key, [0u8; CHAT_NONCE_SIZE], b"same plaintext");
        let b = chat_seal(&key, [1u8; CHAT_NONCE_SIZE], b"same plaintext");
        assert_ne!(a[CHAT_NONCE_SIZE..], b[CHAT_NONCE_SIZE..]);
    }
}
