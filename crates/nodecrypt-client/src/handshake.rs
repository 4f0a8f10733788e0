//! Client side of the outer handshake.
//!
//! ```text
//! AwaitingHello ──recv h, send e──▶ AwaitingServerKey
//! AwaitingServerKey ──recv a, derive──▶ Secured
//! ```
//!
//! On hello we learn our relay-assigned id and the relay's RSA public key,
//! generate a P-384 keypair, and send our point OAEP-encrypted under the
//! relay key. The relay's own point arrives in the clear: authenticity
//! follows from the fact that only the genuine relay could decrypt our
//! point and derive the matching session key, so an impostor cannot
//! complete the handshake.

use nodecrypt_core::{
    env::{EnvRng, Environment},
    error::SessionError,
};
use nodecrypt_crypto::{oaep_encrypt, outer_open, outer_seal, EcdhKeyPair, IV_SIZE};
use nodecrypt_proto::{decode, encode, ClientId, Envelope};

/// Outer handshake phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterState {
    /// Waiting for the relay's hello
    AwaitingHello,
    /// Our encrypted point is out; waiting for the relay's point
    AwaitingServerKey,
    /// Session key derived; all traffic is sealed
    Secured,
}

impl OuterState {
    const fn name(self) -> &'static str {
        match self {
            Self::AwaitingHello => "AwaitingHello",
            Self::AwaitingServerKey => "AwaitingServerKey",
            Self::Secured => "Secured",
        }
    }
}

/// The client's session with the relay.
pub struct OuterSession {
    state: OuterState,
    client_id: Option<ClientId>,
    ecdh: Option<EcdhKeyPair>,
    aes_key: Option<[u8; 32]>,
}

impl Default for OuterSession {
    fn default() -> Self {
        Self::new()
    }
}

impl OuterSession {
    /// Fresh session awaiting the relay's hello.
    #[must_use]
    pub fn new() -> Self {
        Self { state: OuterState::AwaitingHello, client_id: None, ecdh: None, aes_key: None }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> OuterState {
        self.state
    }

    /// Phase name for error reporting.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Our relay-assigned identifier, known once the hello arrives.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Whether the session key is established.
    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.state == OuterState::Secured
    }

    /// Process the relay hello: adopt our id, generate our P-384 keypair,
    /// and produce the OAEP-encrypted ECDH envelope.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` outside `AwaitingHello`
    /// - `SessionError::BadCipher` if the advertised RSA key is unusable
    pub fn handle_hello<E: Environment>(
        &mut self,
        env: &E,
        client_id: ClientId,
        server_pub: &[u8],
    ) -> Result<Envelope, SessionError> {
        if self.state != OuterState::AwaitingHello {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'h' });
        }

        let mut rng = EnvRng::new(env);
        let keypair = EcdhKeyPair::generate(&mut rng);
        let sealed_point = oaep_encrypt(server_pub, &mut rng, &keypair.public_sec1())?;

        self.client_id = Some(client_id);
        self.ecdh = Some(keypair);
        self.state = OuterState::AwaitingServerKey;

        Ok(Envelope::Ecdh { ecdh_pub: sealed_point })
    }

    /// Process the relay's P-384 point and derive the session key.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` outside `AwaitingServerKey`
    /// - `SessionError::BadCipher` if the point is invalid
    pub fn handle_ack(&mut self, server_point: &[u8]) -> Result<(), SessionError> {
        if self.state != OuterState::AwaitingServerKey {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'a' });
        }

        let Some(keypair) = self.ecdh.take() else {
            return Err(SessionError::ProtocolViolation { state: self.state.name(), action: 'a' });
        };

        self.aes_key = Some(keypair.derive_session_key(server_point)?);
        self.state = OuterState::Secured;
        Ok(())
    }

    /// Seal an inner envelope for the relay, returning the wire frame.
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

    /// Open a sealed envelope from the relay.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` before the session key exists
    /// - `SessionError::BadCipher` on AES/padding failure
    /// - `SessionError::MalformedFrame` if the plaintext is not an envelope
    pub fn open(&self, data: &[u8], max_bytes: usize) -> Result<Envelope, SessionError> {
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
}

impl std::fmt::Debug for OuterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OuterSession")
            .field("state", &self.state)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
