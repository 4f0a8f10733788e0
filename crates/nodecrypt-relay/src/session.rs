//! Per-connection session state machine (relay side).
//!
//! ```text
//! Accepted ──announce()──▶ RsaAnnounced
//! RsaAnnounced ──handle_ecdh()──▶ Secured      (derive + ack in one step)
//! Secured ──complete_join()──▶ Joined
//! <any> ──close()──▶ Closed
//! ```
//!
//! Once `Secured`, every frame from this client must be a sealed envelope;
//! the session owns the AES key and does all outer-layer sealing for the
//! driver. Any envelope out of order is a protocol violation and any outer
//! decryption failure is a bad cipher — both fatal.

use std::{ops::Sub, sync::Arc, time::Duration};

use nodecrypt_core::{
    env::{EnvRng, Environment},
    error::SessionError,
};
use nodecrypt_crypto::{oaep_decrypt, outer_open, outer_seal, EcdhKeyPair, IV_SIZE};
use nodecrypt_proto::{decode, encode, ClientId, Envelope};

use crate::keystore::RelayIdentity;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted; hello not yet emitted
    Accepted,
    /// Hello (client id + RSA public key) sent; awaiting the client's ECDH
    RsaAnnounced,
    /// AES session key established; awaiting join
    Secured,
    /// Member of a channel; relaying
    Joined,
    /// Torn down
    Closed,
}

impl SessionState {
    /// State name for error reporting.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::RsaAnnounced => "RsaAnnounced",
            Self::Secured => "Secured",
            Self::Joined => "Joined",
            Self::Closed => "Closed",
        }
    }
}

/// One client's session as the relay sees it.
///
/// Generic over the instant type so the harness can drive idle timeouts on
/// a virtual clock.
pub struct ClientSession<I> {
    client_id: ClientId,
    state: SessionState,
    /// Identity captured at accept time; rotation does not retarget it
    identity: Arc<RelayIdentity>,
    aes_key: Option<[u8; 32]>,
    channel: Option<String>,
    user_name: Option<String>,
    last_seen: I,
}

impl<I> ClientSession<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a session for a freshly accepted transport.
    pub fn new(client_id: ClientId, identity: Arc<RelayIdentity>, now: I) -> Self {
        Self {
            client_id,
            state: SessionState::Accepted,
            identity,
            aes_key: None,
            channel: None,
            user_name: None,
            last_seen: now,
        }
    }

    /// Relay-assigned identifier for this session.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channel joined by this session, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Display name announced at join, if any.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Emit the hello envelope advertising our identity.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` if already announced
    pub fn announce(&mut self) -> Result<Envelope, SessionError> {
        if self.state != SessionState::Accepted {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'h' });
        }

        self.state = SessionState::RsaAnnounced;
        Ok(Envelope::Hello {
            client_id: self.client_id,
            server_pub: self.identity.public_der.clone(),
        })
    }

    /// Process the client's OAEP-encrypted ECDH point: decrypt it, derive
    /// the AES session key, and produce the ack carrying our own point.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` outside `RsaAnnounced`
    /// - `SessionError::BadCipher` if OAEP decryption fails or the decrypted
    ///   bytes are not a valid P-384 point
    pub fn handle_ecdh<E: Environment>(
        &mut self,
        env: &E,
        ciphertext: &[u8],
    ) -> Result<Envelope, SessionError> {
        if self.state != SessionState::RsaAnnounced {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'e' });
        }

        let client_point = oaep_decrypt(&self.identity.private, ciphertext)?;

        let mut rng = EnvRng::new(env);
        let keypair = EcdhKeyPair::generate(&mut rng);
        let aes_key = keypair.derive_session_key(&client_point)?;

        self.aes_key = Some(aes_key);
        self.state = SessionState::Secured;

        Ok(Envelope::EcdhAck { ecdh_pub: keypair.public_sec1() })
    }

    /// Open a sealed envelope from this client and decode the inner record.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` before the session key exists
    /// - `SessionError::BadCipher` on AES/padding failure
    /// - `SessionError::MalformedFrame` if the plaintext is not a valid
    ///   inner envelope
    pub fn open_sealed(&self, data: &[u8], max_bytes: usize) -> Result<Envelope, SessionError> {
        let Some(key) = self.aes_key.as_ref() else {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'm' });
        };

        let plaintext = outer_open(key, data)?;
        let text = String::from_utf8(plaintext).map_err(|_| {
            SessionError::MalformedFrame(nodecrypt_proto::CodecError::Json(
                "inner envelope is not UTF-8".to_string(),
            ))
        })?;

        Ok(decode(&text, max_bytes)?)
    }

    /// Seal an inner envelope for this client, returning the wire frame.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` before the session key exists
    /// - `SessionError::MalformedFrame` if encoding fails
    pub fn seal<E: Environment>(&self, env: &E, inner: &Envelope) -> Result<String, SessionError> {
        let Some(key) = self.aes_key.as_ref() else {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'm' });
        };

        let plaintext = encode(inner)?;

        let mut iv = [0u8; IV_SIZE];
        env.random_bytes(&mut iv);

        let data = outer_seal(key, iv, plaintext.as_bytes());
        Ok(encode(&Envelope::Sealed { data })?)
    }

    /// Record the join, fixing channel and name for the session lifetime.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` outside `Secured` (a repeated
    ///   join lands here)
    pub fn complete_join(&mut self, user_name: String, channel: String) -> Result<(), SessionError> {
        if self.state != SessionState::Secured {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'j' });
        }

        self.user_name = Some(user_name);
        self.channel = Some(channel);
        self.state = SessionState::Joined;
        Ok(())
    }

    /// Record frame arrival for idle accounting.
    pub fn touch(&mut self, now: I) {
        self.last_seen = now;
    }

    /// Elapsed idle time if the timeout is exceeded, `None` otherwise.
    #[must_use]
    pub fn idle_elapsed(&self, now: I, timeout: Duration) -> Option<Duration> {
        let elapsed = now - self.last_seen;
        (elapsed >= timeout).then_some(elapsed)
    }

    /// Mark the session closed.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Session AES key, for tests asserting key agreement.
    #[cfg(test)]
    pub(crate) fn aes_key(&self) -> Option<&[u8; 32]> {
        self.aes_key.as_ref()
    }
}

impl<I> std::fmt::Debug for ClientSession<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("channel", &self.channel)
            .field("user_name", &self.user_name)
            .finish_non_exhaustive()
    }
}
