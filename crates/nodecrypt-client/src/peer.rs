//! Per-peer cryptographic state.
//!
//! ```text
//! seen in list ──send our key──▶ AwaitingPeerPub
//! AwaitingPeerPub ──recv peer key, derive──▶ Established
//! ```
//!
//! No plaintext may be sent to a peer that is not `Established`, and
//! ciphertexts that arrive early are buffered briefly rather than dropped:
//! both key announcements race through the relay, so a fast sender's first
//! message can overtake our half of the exchange.

use std::{ops::Sub, time::Duration};

use nodecrypt_core::env::{EnvRng, Environment};
use nodecrypt_crypto::{PeerKeyPair, PEER_PUBLIC_SIZE};

/// How long an early ciphertext may wait for the peer key before being
/// discarded.
pub const PENDING_DECRYPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer establishment states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Our key is (or is about to be) announced; theirs has not arrived
    AwaitingPeerPub,
    /// Shared chat key derived; traffic flows
    Established,
}

/// Cryptographic state for one other member of the channel.
pub struct PeerSession<I> {
    user_name: String,
    keypair: PeerKeyPair,
    chat_key: Option<[u8; 32]>,
    state: PeerState,
    key_sent: bool,
    pending: Vec<(I, Vec<u8>)>,
}

impl<I> PeerSession<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Create peer state with a fresh Curve25519 keypair.
    pub fn new<E: Environment>(env: &E, user_name: String) -> Self {
        let mut rng = EnvRng::new(env);
        Self {
            user_name,
            keypair: PeerKeyPair::generate(&mut rng),
            chat_key: None,
            state: PeerState::AwaitingPeerPub,
            key_sent: false,
            pending: Vec::new(),
        }
    }

    /// Current establishment state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Peer display name from the latest list.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Refresh the display name from a newer list.
    pub fn set_user_name(&mut self, user_name: String) {
        self.user_name = user_name;
    }

    /// Our Curve25519 public key to announce to this peer.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; PEER_PUBLIC_SIZE] {
        self.keypair.public_bytes()
    }

    /// Whether our key announcement has gone out.
    #[must_use]
    pub fn key_sent(&self) -> bool {
        self.key_sent
    }

    /// Record that our key announcement was emitted.
    pub fn mark_key_sent(&mut self) {
        self.key_sent = true;
    }

    /// Shared chat key, present exactly when `Established`.
    #[must_use]
    pub fn chat_key(&self) -> Option<&[u8; 32]> {
        self.chat_key.as_ref()
    }

    /// Process the peer's public key: derive the chat key and drain any
    /// ciphertexts that arrived early.
    ///
    /// A repeated announcement with the same key re-derives the same chat
    /// key, so this is idempotent for an unchanged peer.
    pub fn establish(
        &mut self,
        peer_public: &[u8; PEER_PUBLIC_SIZE],
        password: &str,
    ) -> Vec<(I, Vec<u8>)> {
        self.chat_key = Some(self.keypair.derive_chat_key(peer_public, password));
        self.state = PeerState::Established;
        std::mem::take(&mut self.pending)
    }

    /// Buffer a ciphertext that arrived before establishment.
    pub fn buffer(&mut self, now: I, ciphertext: Vec<u8>) {
        self.pending.push((now, ciphertext));
    }

    /// Drop buffered ciphertexts older than the pending timeout. Returns
    /// how many were discarded.
    pub fn expire_pending(&mut self, now: I) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(arrived, _)| now - *arrived < PENDING_DECRYPT_TIMEOUT);
        before - self.pending.len()
    }
}

impl<I> std::fmt::Debug for PeerSession<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("user_name", &self.user_name)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
