//! Relay identity storage and rotation.
//!
//! The relay holds exactly one active RSA-2048 identity. It is generated on
//! first use, persisted to a single durable slot, restored on startup while
//! still within its rotation bound, and regenerated once it ages out.
//!
//! Rotation swaps an `Arc`: sessions capture the identity they were greeted
//! with and keep decrypting under it, so an in-flight handshake never tears
//! when the key rolls over underneath it.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::engine::general_purpose::STANDARD as BASE64;
use nodecrypt_core::env::{EnvRng, Environment};
use nodecrypt_crypto::{
    generate_rsa_keypair, private_key_from_der, private_key_to_der, public_key_to_der, CryptoError,
    RsaPrivateKey,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The active relay identity.
#[derive(Debug)]
pub struct RelayIdentity {
    /// RSA private half; never leaves the process
    pub private: RsaPrivateKey,
    /// SPKI DER of the public half, advertised in every hello
    pub public_der: Vec<u8>,
    /// Wall-clock creation time, seconds since the Unix epoch
    pub created_at_secs: u64,
}

/// Serialized form of an identity in the durable slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// PKCS#8 DER of the private key, base64 in the slot encoding
    #[serde(with = "der_b64")]
    pub private_der: Vec<u8>,
    /// Wall-clock creation time, seconds since the Unix epoch
    pub created_at_secs: u64,
}

mod der_b64 {
    use super::{Deserialize, BASE64};
    use base64::Engine as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Errors from identity persistence or generation.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// The durable slot failed to read or write.
    #[error("identity slot failure: {0}")]
    Slot(String),

    /// Key generation or encoding failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Single-slot durable storage for the relay identity.
///
/// One slot per relay room; writes replace the previous identity.
pub trait IdentitySlot: Send + Sync + 'static {
    /// Read the stored identity, if any.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::Slot` if the backing store fails or is corrupt
    fn load(&self) -> Result<Option<StoredIdentity>, KeyStoreError>;

    /// Replace the stored identity atomically.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::Slot` if the backing store fails
    fn store(&self, identity: &StoredIdentity) -> Result<(), KeyStoreError>;
}

impl IdentitySlot for Box<dyn IdentitySlot> {
    fn load(&self) -> Result<Option<StoredIdentity>, KeyStoreError> {
        (**self).load()
    }

    fn store(&self, identity: &StoredIdentity) -> Result<(), KeyStoreError> {
        (**self).store(identity)
    }
}

/// In-memory slot for tests and ephemeral relays.
#[derive(Debug, Default)]
pub struct MemorySlot {
    inner: Mutex<Option<StoredIdentity>>,
}

impl MemorySlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentitySlot for MemorySlot {
    fn load(&self) -> Result<Option<StoredIdentity>, KeyStoreError> {
        let guard = self.inner.lock().map_err(|e| KeyStoreError::Slot(e.to_string()))?;
        Ok(guard.clone())
    }

    fn store(&self, identity: &StoredIdentity) -> Result<(), KeyStoreError> {
        let mut guard = self.inner.lock().map_err(|e| KeyStoreError::Slot(e.to_string()))?;
        *guard = Some(identity.clone());
        Ok(())
    }
}

/// File-backed slot: JSON document, replaced via write-then-rename so a
/// crash mid-write leaves the previous identity intact.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    /// Use the given file as the identity slot.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IdentitySlot for FileSlot {
    fn load(&self) -> Result<Option<StoredIdentity>, KeyStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(KeyStoreError::Slot(e.to_string())),
        };

        serde_json::from_str(&text).map(Some).map_err(|e| KeyStoreError::Slot(e.to_string()))
    }

    fn store(&self, identity: &StoredIdentity) -> Result<(), KeyStoreError> {
        let text =
            serde_json::to_string(identity).map_err(|e| KeyStoreError::Slot(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|e| KeyStoreError::Slot(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| KeyStoreError::Slot(e.to_string()))
    }
}

/// Owns the active identity and its rotation schedule.
pub struct RelayKeyStore<S> {
    slot: S,
    rotation_interval: Duration,
    current: Option<Arc<RelayIdentity>>,
}

impl<S: IdentitySlot> RelayKeyStore<S> {
    /// Create a keystore over the given slot. Nothing is generated until
    /// the first [`Self::current`] call.
    pub fn new(slot: S, rotation_interval: Duration) -> Self {
        Self { slot, rotation_interval, current: None }
    }

    /// The active identity, generating or rotating as needed.
    ///
    /// First call restores from the slot when the stored identity is still
    /// within its rotation bound, otherwise generates fresh.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError` if generation, encoding, or the slot fails
    pub fn current<E: Environment>(&mut self, env: &E) -> Result<Arc<RelayIdentity>, KeyStoreError> {
        if self.current.is_none() {
            self.restore_or_generate(env)?;
        }
        self.rotate_if_due(env)?;

        #[allow(clippy::expect_used)]
        Ok(Arc::clone(self.current.as_ref().expect("invariant: populated above")))
    }

    /// Rotate when the active identity has reached its rotation bound.
    ///
    /// Returns whether a rotation happened. Existing sessions keep the
    /// `Arc` they captured.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError` if generation or the slot fails
    pub fn rotate_if_due<E: Environment>(&mut self, env: &E) -> Result<bool, KeyStoreError> {
        let Some(current) = self.current.as_ref() else {
            return Ok(false);
        };

        let age = env.wall_clock_secs().saturating_sub(current.created_at_secs);
        if age < self.rotation_interval.as_secs() {
            return Ok(false);
        }

        self.generate(env)?;
        Ok(true)
    }

    fn restore_or_generate<E: Environment>(&mut self, env: &E) -> Result<(), KeyStoreError> {
        if let Some(stored) = self.slot.load()? {
            let age = env.wall_clock_secs().saturating_sub(stored.created_at_secs);
            if age < self.rotation_interval.as_secs() {
                let private = private_key_from_der(&stored.private_der)?;
                let public_der = public_key_to_der(&private)?;
                self.current = Some(Arc::new(RelayIdentity {
                    private,
                    public_der,
                    created_at_secs: stored.created_at_secs,
                }));
                return Ok(());
            }
            // Stored identity aged out while the relay was down
        }

        self.generate(env)
    }

    fn generate<E: Environment>(&mut self, env: &E) -> Result<(), KeyStoreError> {
        let mut rng = EnvRng::new(env);
        let private = generate_rsa_keypair(&mut rng)?;
        let public_der = public_key_to_der(&private)?;
        let created_at_secs = env.wall_clock_secs();

        let stored =
            StoredIdentity { private_der: private_key_to_der(&private)?, created_at_secs };
        self.slot.store(&stored)?;

        self.current = Some(Arc::new(RelayIdentity { private, public_der, created_at_secs }));
        Ok(())
    }
}

impl<S> std::fmt::Debug for RelayKeyStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayKeyStore")
            .field("rotation_interval", &self.rotation_interval)
            .field("loaded", &self.current.is_some())
            .finish()
    }
}
