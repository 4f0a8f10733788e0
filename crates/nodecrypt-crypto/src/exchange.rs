//! ECDH-P384 session key agreement for the outer layer.
//!
//! Each side generates an ephemeral P-384 keypair and exchanges SEC1 points
//! (the client's travels OAEP-encrypted, the relay's in the clear). The
//! session key is the first 32 bytes of the 48-byte shared X coordinate.

use p384::{ecdh::EphemeralSecret, PublicKey};
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of the derived AES session key.
pub const SESSION_KEY_SIZE: usize = 32;

/// One side's ephemeral P-384 keypair.
///
/// The secret scalar never leaves this type; it is consumed by the exchange
/// and wiped when dropped.
pub struct EcdhKeyPair {
    secret: EphemeralSecret,
}

impl EcdhKeyPair {
    /// Generate a fresh ephemeral keypair.
    #[must_use]
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        Self { secret: EphemeralSecret::random(rng) }
    }

    /// SEC1 encoding of the public point (97 bytes, uncompressed).
    #[must_use]
    pub fn public_sec1(&self) -> Vec<u8> {
        self.secret.public_key().to_sec1_bytes().to_vec()
    }

    /// Derive the AES session key from the peer's SEC1-encoded point.
    ///
    /// The raw shared secret is the 48-byte X coordinate of the shared
    /// point; the session key is its first 32 bytes. Both sides perform the
    /// identical truncation, so the keys match.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidPublicKey` if the bytes are not a valid P-384
    ///   point (including the identity)
    pub fn derive_session_key(
        &self,
        peer_sec1: &[u8],
    ) -> Result<[u8; SESSION_KEY_SIZE], CryptoError> {
        let peer = PublicKey::from_sec1_bytes(peer_sec1)
            .map_err(|_| CryptoError::InvalidPublicKey { kind: "p384" })?;

        let shared = self.secret.diffie_hellman(&peer);
        let raw = Zeroizing::new(shared.raw_secret_bytes().to_vec());

        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&raw[..SESSION_KEY_SIZE]);
        Ok(key)
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn both_sides_derive_the_same_key() {
        let mut rng = StdRng::seed_from_u64(1);
        let client = EcdhKeyPair::generate(&mut rng);
        let relay = EcdhKeyPair::generate(&mut rng);

        let client_key = client.derive_session_key(&relay.public_sec1()).unwrap();
        let relay_key = relay.derive_session_key(&client.public_sec1()).unwrap();

        assert_eq!(client_key, relay_key);
    }

    #[test]
    fn distinct_exchanges_yield_distinct_keys() {
        let mut rng = StdRng::seed_from_u64(2);
        let relay = EcdhKeyPair::generate(&mut rng);

        let a = EcdhKeyPair::generate(&mut rng);
        let b = EcdhKeyPair::generate(&mut rng);

        let key_a = relay.derive_session_key(&a.public_sec1()).unwrap();
        let key_b = relay.derive_session_key(&b.public_sec1()).unwrap();

        assert_ne!(key_a, key_b);
    }

    #[test]
    fn public_point_is_uncompressed_sec1() {
        let mut rng = StdRng::seed_from_u64(3);
        let pair = EcdhKeyPair::generate(&mut rng);

        let sec1 = pair.public_sec1();
        assert_eq!(sec1.len(), 97);
        assert_eq!(sec1[0], 0x04);
    }

    #[test]
    fn reject_invalid_point() {
        let mut rng = StdRng::seed_from_u64(4);
        let pair = EcdhKeyPair::generate(&mut rng);

        assert!(pair.derive_session_key(&[0u8; 97]).is_err());
        assert!(pair.derive_session_key(b"short").is_err());
    }
}
