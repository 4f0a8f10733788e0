//! Client state machine.
//!
//! `ChatClient` owns the outer session with the relay and one
//! [`PeerSession`] per other channel member. It consumes [`ClientEvent`]s
//! and produces [`ClientAction`]s; the caller executes them.
//!
//! # Warmup
//!
//! The first membership list can arrive before our own key announcements
//! have gone anywhere, so the first two `l` frames (the individual list at
//! our join plus the join broadcast) only refresh the roster silently.
//! Join/leave deliveries start with the third list, once the local view has
//! stabilized.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use nodecrypt_core::{
    config::DEFAULT_MAX_ENVELOPE_BYTES,
    env::Environment,
    error::SessionError,
};
use nodecrypt_crypto::{chat_open, chat_seal, CHAT_NONCE_SIZE, PEER_PUBLIC_SIZE};
use nodecrypt_proto::{
    decode, encode, ChatKind, ChatPayload, ClientId, CodecError, Envelope, Member, MessageKind,
};

use crate::{
    error::ClientError,
    event::{ChatEvent, ClientAction, ClientEvent, LogLevel},
    handshake::OuterSession,
    peer::{PeerSession, PeerState},
};

/// Membership lists received before join/leave deliveries begin.
const WARMUP_LISTS: u32 = 2;

/// The client-side protocol state machine.
pub struct ChatClient<E: Environment> {
    env: E,
    user_name: String,
    channel: String,
    password: String,
    outer: OuterSession,
    peers: HashMap<ClientId, PeerSession<E::Instant>>,
    lists_seen: u32,
}

impl<E: Environment> ChatClient<E> {
    /// Create a client that will join `channel` as `user_name` once the
    /// outer handshake completes.
    pub fn new(env: E, user_name: String, channel: String, password: String) -> Self {
        Self {
            env,
            user_name,
            channel,
            password,
            outer: OuterSession::new(),
            peers: HashMap::new(),
            lists_seen: 0,
        }
    }

    /// Our relay-assigned identifier, known once the hello arrives.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.outer.client_id()
    }

    /// Whether the outer session is established.
    #[must_use]
    pub fn is_secured(&self) -> bool {
        self.outer.is_secured()
    }

    /// Establishment state for a peer, if we track one.
    #[must_use]
    pub fn peer_state(&self, client_id: ClientId) -> Option<PeerState> {
        self.peers.get(&client_id).map(PeerSession::state)
    }

    /// Process one event and return the resulting actions.
    ///
    /// # Errors
    ///
    /// - `ClientError::Session` on any fatal relay-session failure; the
    ///   caller should drop the transport and re-handshake
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::FrameReceived(text) => self.handle_frame(&text),
            ClientEvent::SendText { text } => self.send_payload(ChatKind::Text, text, None),
            ClientEvent::SendPrivate { target, text } => {
                self.send_payload(ChatKind::Text, text, Some(target))
            },
            ClientEvent::SendPayload { kind, data, target } => {
                self.send_payload(kind, data, target)
            },
            ClientEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_frame(&mut self, text: &str) -> Result<Vec<ClientAction>, ClientError> {
        let envelope = decode(text, DEFAULT_MAX_ENVELOPE_BYTES)
            .map_err(SessionError::MalformedFrame)?;

        match envelope {
            Envelope::Hello { client_id, server_pub } => {
                let reply = self.outer.handle_hello(&self.env, client_id, &server_pub)?;
                Ok(vec![
                    ClientAction::Send(encode_frame(&reply)?),
                    ClientAction::Log {
                        level: LogLevel::Debug,
                        message: format!("relay hello received, our id is {client_id}"),
                    },
                ])
            },

            Envelope::EcdhAck { ecdh_pub } => {
                self.outer.handle_ack(&ecdh_pub)?;

                // Session is up; announce ourselves to the channel at once
                let join = Envelope::Join {
                    user_name: self.user_name.clone(),
                    channel: self.channel.clone(),
                };
                let frame = self.outer.seal(&self.env, &join)?;

                Ok(vec![
                    ClientAction::Deliver(ChatEvent::Secured),
                    ClientAction::Send(frame),
                ])
            },

            Envelope::Sealed { data } => {
                let inner = self.outer.open(&data, DEFAULT_MAX_ENVELOPE_BYTES)?;
                self.handle_inner(inner)
            },

            other => Err(SessionError::ProtocolViolation {
                state: self.outer.state_name(),
                action: other.action(),
            }
            .into()),
        }
    }

    fn handle_inner(&mut self, inner: Envelope) -> Result<Vec<ClientAction>, ClientError> {
        match inner {
            Envelope::List { members } => self.handle_list(members),

            Envelope::Client { client_id: Some(sender), user_name, key: Some(key), .. } => {
                Ok(self.handle_peer_key(sender, user_name, &key))
            },

            Envelope::Client { client_id: Some(sender), data: Some(data), .. } => {
                Ok(self.handle_chat(sender, &data, true))
            },

            Envelope::Broadcast { client_id: Some(sender), recipients, .. } => {
                Ok(self.handle_broadcast(sender, &recipients))
            },

            Envelope::Client { client_id: None, .. } | Envelope::Broadcast { client_id: None, .. } => {
                // The relay fills the sender on forward; a frame without one
                // is noise, not a reason to drop the session
                Ok(vec![ClientAction::Log {
                    level: LogLevel::Warn,
                    message: "dropping relayed envelope without sender".to_string(),
                }])
            },

            Envelope::Client { .. } => Ok(vec![ClientAction::Log {
                level: LogLevel::Debug,
                message: "dropping peer envelope with neither key nor data".to_string(),
            }]),

            other => Err(SessionError::ProtocolViolation {
                state: self.outer.state_name(),
                action: other.action(),
            }
            .into()),
        }
    }

    fn handle_list(&mut self, members: Vec<Member>) -> Result<Vec<ClientAction>, ClientError> {
        self.lists_seen += 1;
        let announce = self.lists_seen > WARMUP_LISTS;
        let my_id = self.outer.client_id();

        let mut actions = vec![ClientAction::Deliver(ChatEvent::Roster {
            members: members.clone(),
        })];

        // Tear down peers that vanished from the list
        let present: Vec<ClientId> = members.iter().map(|member| member.client_id).collect();
        let departed: Vec<ClientId> =
            self.peers.keys().copied().filter(|id| !present.contains(id)).collect();
        for client_id in departed {
            if let Some(peer) = self.peers.remove(&client_id) {
                if announce {
                    actions.push(ClientAction::Deliver(ChatEvent::PeerLeft {
                        client_id,
                        user_name: peer.user_name().to_string(),
                    }));
                }
            }
        }

        // Instantiate sessions for newcomers and announce our key to them
        for member in members {
            if Some(member.client_id) == my_id {
                continue;
            }

            let is_new = !self.peers.contains_key(&member.client_id);
            let peer = self
                .peers
                .entry(member.client_id)
                .or_insert_with(|| PeerSession::new(&self.env, member.user_name.clone()));
            peer.set_user_name(member.user_name.clone());

            if !peer.key_sent() {
                let announcement = Envelope::Client {
                    target: member.client_id,
                    client_id: None,
                    user_name: None,
                    key: Some(BASE64.encode(peer.public_bytes())),
                    data: None,
                };
                let frame = self.outer.seal(&self.env, &announcement)?;
                actions.push(ClientAction::Send(frame));

                if let Some(peer) = self.peers.get_mut(&member.client_id) {
                    peer.mark_key_sent();
                }
            }

            if is_new && announce {
                actions.push(ClientAction::Deliver(ChatEvent::PeerJoined {
                    client_id: member.client_id,
                    user_name: member.user_name,
                }));
            }
        }

        Ok(actions)
    }

    /// A peer announced its Curve25519 public key: derive the chat key and
    /// flush anything that was waiting on it.
    fn handle_peer_key(
        &mut self,
        sender: ClientId,
        user_name: Option<String>,
        key_b64: &str,
    ) -> Vec<ClientAction> {
        let Some(key_bytes) = decode_fixed::<PEER_PUBLIC_SIZE>(key_b64) else {
            return vec![ClientAction::Log {
                level: LogLevel::Warn,
                message: format!("invalid peer key from {sender}, ignoring"),
            }];
        };

        let peer = self
            .peers
            .entry(sender)
            .or_insert_with(|| PeerSession::new(&self.env, user_name.clone().unwrap_or_default()));
        if let Some(name) = user_name {
            peer.set_user_name(name);
        }

        let mut actions = Vec::new();

        // Their announcement can beat the list that would have prompted
        // ours; answer directly so the exchange still completes.
        if !peer.key_sent() {
            let announcement = Envelope::Client {
                target: sender,
                client_id: None,
                user_name: None,
                key: Some(BASE64.encode(peer.public_bytes())),
                data: None,
            };
            match self.outer.seal(&self.env, &announcement) {
                Ok(frame) => {
                    actions.push(ClientAction::Send(frame));
                    if let Some(peer) = self.peers.get_mut(&sender) {
                        peer.mark_key_sent();
                    }
                },
                Err(e) => actions.push(ClientAction::Log {
                    level: LogLevel::Warn,
                    message: format!("failed to answer peer key: {e}"),
                }),
            }
        }

        let Some(peer) = self.peers.get_mut(&sender) else {
            return actions;
        };
        let drained = peer.establish(&key_bytes, &self.password);
        let name = peer.user_name().to_string();
        let chat_key = peer.chat_key().copied();

        if let Some(chat_key) = chat_key {
            for (_, ciphertext) in drained {
                actions.extend(self.deliver_chat(sender, &name, &chat_key, &ciphertext, false));
            }
        }

        actions
    }

    /// Inbound unicast chat ciphertext (base64).
    fn handle_chat(&mut self, sender: ClientId, data_b64: &str, private: bool) -> Vec<ClientAction> {
        let Ok(ciphertext) = BASE64.decode(data_b64) else {
            return vec![
                ClientAction::Deliver(ChatEvent::DecryptFailed { from_id: sender }),
                ClientAction::Log {
                    level: LogLevel::Warn,
                    message: format!("undecodable ciphertext from {sender}"),
                },
            ];
        };

        let now = self.env.now();
        let peer = self
            .peers
            .entry(sender)
            .or_insert_with(|| PeerSession::new(&self.env, String::new()));

        match peer.chat_key().copied() {
            Some(chat_key) => {
                let name = peer.user_name().to_string();
                self.deliver_chat(sender, &name, &chat_key, &ciphertext, private)
            },
            None => {
                // Key exchange still in flight; hold the ciphertext briefly
                peer.buffer(now, ciphertext);
                vec![ClientAction::Log {
                    level: LogLevel::Debug,
                    message: format!("buffering early ciphertext from {sender}"),
                }]
            },
        }
    }

    /// Inbound broadcast: pick our entry from the per-recipient map.
    fn handle_broadcast(
        &mut self,
        sender: ClientId,
        recipients: &BTreeMap<ClientId, String>,
    ) -> Vec<ClientAction> {
        let Some(my_id) = self.outer.client_id() else {
            return Vec::new();
        };

        match recipients.get(&my_id) {
            Some(data_b64) => self.handle_chat(sender, data_b64, false),
            None => vec![ClientAction::Log {
                level: LogLevel::Debug,
                message: format!("broadcast from {sender} carries no entry for us"),
            }],
        }
    }

    /// Decrypt, parse, and deliver one chat ciphertext. Failures are
    /// delivered as `DecryptFailed` — a wrong-password peer produces these
    /// in bulk and must not affect the session.
    fn deliver_chat(
        &self,
        sender: ClientId,
        fallback_name: &str,
        chat_key: &[u8; 32],
        ciphertext: &[u8],
        private_envelope: bool,
    ) -> Vec<ClientAction> {
        let failed = |reason: String| {
            vec![
                ClientAction::Deliver(ChatEvent::DecryptFailed { from_id: sender }),
                ClientAction::Log {
                    level: LogLevel::Warn,
                    message: format!("dropping payload from {sender}: {reason}"),
                },
            ]
        };

        let plaintext = match chat_open(chat_key, ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => return failed(e.to_string()),
        };

        let payload: ChatPayload = match serde_json::from_slice(&plaintext) {
            Ok(payload) => payload,
            Err(_) => return failed("not a chat payload".to_string()),
        };

        let from_name = if payload.user_name.is_empty() {
            fallback_name.to_string()
        } else {
            payload.user_name
        };

        vec![ClientAction::Deliver(ChatEvent::Message {
            from_id: sender,
            from_name,
            kind: payload.kind.kind,
            data: payload.data,
            private: payload.kind.private || private_envelope,
            timestamp: payload.timestamp,
        })]
    }

    /// Encrypt and send a payload, broadcast or private.
    fn send_payload(
        &mut self,
        kind: ChatKind,
        data: String,
        target: Option<ClientId>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let Some(my_id) = self.outer.client_id() else {
            return Err(SessionError::ProtocolViolation {
                state: self.outer.state_name(),
                action: if target.is_some() { 'c' } else { 'w' },
            }
            .into());
        };

        let payload = ChatPayload {
            kind: MessageKind { kind, private: target.is_some() },
            data,
            user_name: self.user_name.clone(),
            client_id: my_id,
            timestamp: Some(self.env.wall_clock_secs()),
        };
        let plaintext = serde_json::to_vec(&payload)
            .map_err(|e| SessionError::MalformedFrame(CodecError::Json(e.to_string())))?;

        match target {
            Some(target) => self.send_private(target, &plaintext),
            None => self.send_broadcast(&plaintext),
        }
    }

    fn send_private(
        &mut self,
        target: ClientId,
        plaintext: &[u8],
    ) -> Result<Vec<ClientAction>, ClientError> {
        let Some(chat_key) = self.peers.get(&target).and_then(|peer| peer.chat_key().copied())
        else {
            return Ok(vec![ClientAction::Log {
                level: LogLevel::Warn,
                message: format!("peer {target} not established, dropping private message"),
            }]);
        };

        let ciphertext = chat_seal(&chat_key, self.fresh_nonce(), plaintext);
        let inner = Envelope::Client {
            target,
            client_id: None,
            user_name: None,
            key: None,
            data: Some(BASE64.encode(ciphertext)),
        };

        Ok(vec![ClientAction::Send(self.outer.seal(&self.env, &inner)?)])
    }

    fn send_broadcast(&mut self, plaintext: &[u8]) -> Result<Vec<ClientAction>, ClientError> {
        let mut recipients = BTreeMap::new();
        let established: Vec<(ClientId, [u8; 32])> = self
            .peers
            .iter()
            .filter_map(|(id, peer)| peer.chat_key().copied().map(|key| (*id, key)))
            .collect();

        for (client_id, chat_key) in established {
            let ciphertext = chat_seal(&chat_key, self.fresh_nonce(), plaintext);
            recipients.insert(client_id, BASE64.encode(ciphertext));
        }

        if recipients.is_empty() {
            return Ok(vec![ClientAction::Log {
                level: LogLevel::Debug,
                message: "no established peers, nothing sent".to_string(),
            }]);
        }

        let inner = Envelope::Broadcast { client_id: None, user_name: None, recipients };
        Ok(vec![ClientAction::Send(self.outer.seal(&self.env, &inner)?)])
    }

    fn handle_tick(&mut self) -> Vec<ClientAction> {
        let now = self.env.now();
        let mut dropped = 0;
        for peer in self.peers.values_mut() {
            dropped += peer.expire_pending(now);
        }

        if dropped == 0 {
            Vec::new()
        } else {
            vec![ClientAction::Log {
                level: LogLevel::Debug,
                message: format!("discarded {dropped} ciphertexts awaiting peer keys"),
            }]
        }
    }

    fn fresh_nonce(&self) -> [u8; CHAT_NONCE_SIZE] {
        let mut nonce = [0u8; CHAT_NONCE_SIZE];
        self.env.random_bytes(&mut nonce);
        nonce
    }
}

impl<E: Environment> std::fmt::Debug for ChatClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("user_name", &self.user_name)
            .field("outer", &self.outer)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

fn encode_frame(envelope: &Envelope) -> Result<String, ClientError> {
    Ok(encode(envelope).map_err(SessionError::MalformedFrame)?)
}

fn decode_fixed<const N: usize>(b64: &str) -> Option<[u8; N]> {
    BASE64.decode(b64).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Clone)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn wall_clock_secs(&self) -> u64 {
            1_700_000_000
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (i * 31 % 251) as u8;
            }
        }
    }

    fn new_client() -> ChatClient<FixedEnv> {
        ChatClient::new(FixedEnv, "alice".into(), "#test".into(), "p".into())
    }

    #[test]
    fn send_before_handshake_is_an_error() {
        let mut client = new_client();
        let result = client.handle(ClientEvent::SendText { text: "hi".into() });
        assert!(matches!(
            result,
            Err(ClientError::Session(SessionError::ProtocolViolation { .. }))
        ));
    }

    #[test]
    fn garbage_frame_is_malformed() {
        let mut client = new_client();
        let result = client.handle(ClientEvent::FrameReceived("not json".into()));
        assert!(matches!(
            result,
            Err(ClientError::Session(SessionError::MalformedFrame(_)))
        ));
    }

    #[test]
    fn sealed_frame_before_handshake_is_a_violation() {
        let mut client = new_client();
        let frame = encode(&Envelope::Sealed { data: vec![0u8; 48] }).unwrap();
        let result = client.handle(ClientEvent::FrameReceived(frame));
        assert!(matches!(
            result,
            Err(ClientError::Session(SessionError::ProtocolViolation { .. }))
        ));
    }

    #[test]
    fn tick_without_peers_is_quiet() {
        let mut client = new_client();
        let actions = client.handle(ClientEvent::Tick).unwrap();
        assert!(actions.is_empty());
    }
}
