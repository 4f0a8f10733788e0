//! Relay driver: events in, actions out.
//!
//! Ties together the keystore, per-connection session machines, and the
//! channel registry. The driver is pure orchestration: the runtime (or the
//! harness) feeds it events and executes the actions it returns. One driver
//! instance coordinates one relay room; events are processed to completion
//! in arrival order, which is what makes the membership invariants hold
//! without locking.
//!
//! Routing rules the driver enforces:
//!
//! - the inner envelope forwarded to a recipient is byte-identical to the
//!   one received except for the sender fields the relay fills in
//! - ciphertext-bearing fields are copied verbatim, never decoded
//! - unicast to a target outside the sender's channel is dropped silently
//! - the sender never receives its own broadcast back

use std::collections::HashMap;

use nodecrypt_core::{config::RelayConfig, env::Environment, error::SessionError};
use nodecrypt_proto::{decode, encode, ClientId, Envelope, Member, CLIENT_ID_SIZE};

use crate::{
    channels::ChannelRegistry,
    keystore::{IdentitySlot, RelayKeyStore},
    session::{ClientSession, SessionState},
};

/// Events fed into the driver by the runtime.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A transport was accepted and assigned a runtime session id.
    ConnectionAccepted {
        /// Runtime-assigned connection identifier
        session_id: u64,
    },

    /// One text frame arrived from a connection.
    FrameReceived {
        /// Originating connection
        session_id: u64,
        /// Raw frame contents
        text: String,
    },

    /// A connection was closed by the peer or the transport.
    ConnectionClosed {
        /// Closed connection
        session_id: u64,
        /// Transport-level reason
        reason: String,
    },

    /// Periodic tick driving idle timeouts and identity rotation.
    Tick,
}

/// Actions for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send one text frame to a connection.
    SendText {
        /// Target connection
        session_id: u64,
        /// Frame contents
        text: String,
    },

    /// Close a connection.
    CloseConnection {
        /// Connection to close
        session_id: u64,
        /// Reason, for the transport close frame and the log
        reason: String,
    },

    /// Emit a log line.
    Log {
        /// Severity
        level: LogLevel,
        /// Message; never contains payload data
        message: String,
    },
}

/// Log severities carried by [`RelayAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Lifecycle events
    Info,
    /// Session failures
    Warn,
    /// Relay-level failures
    Error,
}

/// The relay state machine for one room.
pub struct RelayDriver<E, S>
where
    E: Environment,
    S: IdentitySlot,
{
    env: E,
    config: RelayConfig,
    keystore: RelayKeyStore<S>,
    sessions: HashMap<u64, ClientSession<E::Instant>>,
    channels: ChannelRegistry,
    by_client: HashMap<ClientId, u64>,
}

impl<E, S> RelayDriver<E, S>
where
    E: Environment,
    S: IdentitySlot,
{
    /// Create a driver over the given identity slot.
    pub fn new(env: E, slot: S, config: RelayConfig) -> Self {
        let keystore = RelayKeyStore::new(slot, config.rsa_rotation_interval);
        Self {
            env,
            config,
            keystore,
            sessions: HashMap::new(),
            channels: ChannelRegistry::new(),
            by_client: HashMap::new(),
        }
    }

    /// Process one event and return the actions to execute.
    pub fn process_event(&mut self, event: RelayEvent) -> Vec<RelayAction> {
        match event {
            RelayEvent::ConnectionAccepted { session_id } => self.handle_accepted(session_id),
            RelayEvent::FrameReceived { session_id, text } => self.handle_frame(session_id, &text),
            RelayEvent::ConnectionClosed { session_id, reason } => {
                self.handle_closed(session_id, &reason)
            },
            RelayEvent::Tick => self.handle_tick(),
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// State of a session, if it exists.
    #[must_use]
    pub fn session_state(&self, session_id: u64) -> Option<SessionState> {
        self.sessions.get(&session_id).map(ClientSession::state)
    }

    /// Members of a channel, in join order.
    #[must_use]
    pub fn channel_members(&self, channel: &str) -> &[ClientId] {
        self.channels.members(channel)
    }

    fn handle_accepted(&mut self, session_id: u64) -> Vec<RelayAction> {
        if self.sessions.len() >= self.config.max_connections {
            return vec![RelayAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }];
        }

        let identity = match self.keystore.current(&self.env) {
            Ok(identity) => identity,
            Err(e) => {
                return vec![
                    RelayAction::Log {
                        level: LogLevel::Error,
                        message: format!("identity unavailable: {e}"),
                    },
                    RelayAction::CloseConnection {
                        session_id,
                        reason: "relay identity unavailable".to_string(),
                    },
                ];
            },
        };

        let client_id = self.fresh_client_id();
        let mut session = ClientSession::new(client_id, identity, self.env.now());

        let hello = match session.announce() {
            Ok(hello) => hello,
            Err(e) => return self.fail_session(session_id, &e),
        };

        let mut actions = match self.send_plain(session_id, &hello) {
            Ok(actions) => actions,
            Err(e) => return self.fail_session(session_id, &e),
        };

        self.sessions.insert(session_id, session);
        self.by_client.insert(client_id, session_id);

        actions.push(RelayAction::Log {
            level: LogLevel::Debug,
            message: format!("session {session_id} accepted as client {client_id}"),
        });
        actions
    }

    fn handle_frame(&mut self, session_id: u64, text: &str) -> Vec<RelayAction> {
        let now = self.env.now();
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return vec![RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("frame from unknown session {session_id}"),
            }];
        };
        session.touch(now);

        let envelope = match decode(text, self.config.max_envelope_bytes) {
            Ok(envelope) => envelope,
            Err(e) => return self.fail_session(session_id, &SessionError::from(e)),
        };

        match envelope {
            Envelope::Ecdh { ecdh_pub } => self.handle_ecdh(session_id, &ecdh_pub),
            Envelope::Sealed { data } => self.handle_sealed(session_id, &data),
            other => {
                let state = self
                    .sessions
                    .get(&session_id)
                    .map_or("Closed", |session| session.state().name());
                self.fail_session(
                    session_id,
                    &SessionError::ProtocolViolation { state, action: other.action() },
                )
            },
        }
    }

    fn handle_ecdh(&mut self, session_id: u64, ciphertext: &[u8]) -> Vec<RelayAction> {
        let env = self.env.clone();
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Vec::new();
        };

        match session.handle_ecdh(&env, ciphertext) {
            Ok(ack) => match self.send_plain(session_id, &ack) {
                Ok(actions) => actions,
                Err(e) => self.fail_session(session_id, &e),
            },
            Err(e) => self.fail_session(session_id, &e),
        }
    }

    fn handle_sealed(&mut self, session_id: u64, data: &[u8]) -> Vec<RelayAction> {
        let inner = {
            let Some(session) = self.sessions.get(&session_id) else {
                return Vec::new();
            };
            match session.open_sealed(data, self.config.max_envelope_bytes) {
                Ok(inner) => inner,
                Err(e) => return self.fail_session(session_id, &e),
            }
        };

        match inner {
            Envelope::Join { user_name, channel } => {
                self.handle_join(session_id, user_name, channel)
            },
            Envelope::Client { target, key, data, .. } => {
                self.handle_unicast(session_id, target, key, data)
            },
            Envelope::Broadcast { recipients, .. } => self.handle_broadcast(session_id, recipients),
            other => {
                let state = self
                    .sessions
                    .get(&session_id)
                    .map_or("Closed", |session| session.state().name());
                self.fail_session(
                    session_id,
                    &SessionError::ProtocolViolation { state, action: other.action() },
                )
            },
        }
    }

    fn handle_join(
        &mut self,
        session_id: u64,
        user_name: String,
        channel: String,
    ) -> Vec<RelayAction> {
        let client_id = {
            let Some(session) = self.sessions.get_mut(&session_id) else {
                return Vec::new();
            };
            if let Err(e) = session.complete_join(user_name.clone(), channel.clone()) {
                return self.fail_session(session_id, &e);
            }
            session.client_id()
        };

        let inserted = self.channels.join(client_id, &channel);
        debug_assert!(inserted, "session state machine admits exactly one join");

        // The joiner learns its own id and the existing members before any
        // chat can arrive; the membership broadcast follows for everyone.
        let mut actions = Vec::new();
        let list = self.channel_list(&channel);
        actions.extend(self.send_sealed_to_client(client_id, &list));
        actions.extend(self.broadcast_list(&channel));

        actions.push(RelayAction::Log {
            level: LogLevel::Info,
            message: format!("client {client_id} joined channel ({} members)", list_len(&list)),
        });
        actions
    }

    fn handle_unicast(
        &mut self,
        session_id: u64,
        target: ClientId,
        key: Option<String>,
        data: Option<String>,
    ) -> Vec<RelayAction> {
        let (sender_id, sender_name) = match self.joined_sender(session_id, 'c') {
            Ok(sender) => sender,
            Err(actions) => return actions,
        };

        if !self.channels.share_channel(sender_id, target) {
            // The inner layer is opaque to us, so there is no meaningful
            // error to send back; senders must tolerate silent drops.
            return vec![RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("dropping unicast from {sender_id} to unknown target {target}"),
            }];
        }

        let forwarded = Envelope::Client {
            target,
            client_id: Some(sender_id),
            user_name: Some(sender_name),
            key,
            data,
        };

        self.send_sealed_to_client(target, &forwarded)
    }

    fn handle_broadcast(
        &mut self,
        session_id: u64,
        recipients: std::collections::BTreeMap<ClientId, String>,
    ) -> Vec<RelayAction> {
        let (sender_id, sender_name) = match self.joined_sender(session_id, 'w') {
            Ok(sender) => sender,
            Err(actions) => return actions,
        };

        let Some(channel) = self.channels.channel_of(sender_id).map(str::to_string) else {
            return Vec::new();
        };

        let forwarded = Envelope::Broadcast {
            client_id: Some(sender_id),
            user_name: Some(sender_name),
            recipients,
        };

        let mut actions = Vec::new();
        for member in self.channels.members(&channel).to_vec() {
            if member != sender_id {
                actions.extend(self.send_sealed_to_client(member, &forwarded));
            }
        }
        actions
    }

    fn handle_closed(&mut self, session_id: u64, reason: &str) -> Vec<RelayAction> {
        let mut actions = vec![RelayAction::Log {
            level: LogLevel::Debug,
            message: format!("session {session_id} closed: {reason}"),
        }];
        actions.extend(self.purge_session(session_id));
        actions
    }

    fn handle_tick(&mut self) -> Vec<RelayAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let idle: Vec<(u64, std::time::Duration)> = self
            .sessions
            .iter()
            .filter_map(|(id, session)| {
                session.idle_elapsed(now, self.config.idle_timeout).map(|elapsed| (*id, elapsed))
            })
            .collect();

        for (session_id, elapsed) in idle {
            let err = SessionError::IdleTimeout { elapsed };
            actions.extend(self.fail_session(session_id, &err));
        }

        match self.keystore.rotate_if_due(&self.env) {
            Ok(true) => actions.push(RelayAction::Log {
                level: LogLevel::Info,
                message: "relay identity rotated".to_string(),
            }),
            Ok(false) => {},
            Err(e) => actions.push(RelayAction::Log {
                level: LogLevel::Error,
                message: format!("identity rotation failed: {e}"),
            }),
        }

        actions
    }

    /// Close a session over a fatal error and notify its channel.
    fn fail_session(&mut self, session_id: u64, error: &SessionError) -> Vec<RelayAction> {
        let mut actions = vec![
            RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("closing session {session_id}: {error}"),
            },
            RelayAction::CloseConnection { session_id, reason: error.to_string() },
        ];
        actions.extend(self.purge_session(session_id));
        actions
    }

    /// Remove a session and broadcast the shrunk membership to its channel.
    fn purge_session(&mut self, session_id: u64) -> Vec<RelayAction> {
        let Some(mut session) = self.sessions.remove(&session_id) else {
            return Vec::new();
        };
        session.close();
        self.by_client.remove(&session.client_id());

        match self.channels.leave(session.client_id()) {
            Some(channel) => self.broadcast_list(&channel),
            None => Vec::new(),
        }
    }

    /// Sealed membership list to every current member of a channel.
    fn broadcast_list(&self, channel: &str) -> Vec<RelayAction> {
        let list = self.channel_list(channel);
        let mut actions = Vec::new();
        for member in self.channels.members(channel).to_vec() {
            actions.extend(self.send_sealed_to_client(member, &list));
        }
        actions
    }

    fn channel_list(&self, channel: &str) -> Envelope {
        let members = self
            .channels
            .members(channel)
            .iter()
            .filter_map(|client_id| {
                let session = self.sessions.get(self.by_client.get(client_id)?)?;
                Some(Member {
                    client_id: *client_id,
                    user_name: session.user_name().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Envelope::List { members }
    }

    /// Seal an inner envelope under one client's session key and send it.
    fn send_sealed_to_client(&self, client_id: ClientId, inner: &Envelope) -> Vec<RelayAction> {
        let Some(session_id) = self.by_client.get(&client_id).copied() else {
            return Vec::new();
        };
        let Some(session) = self.sessions.get(&session_id) else {
            return Vec::new();
        };

        match session.seal(&self.env, inner) {
            Ok(text) => vec![RelayAction::SendText { session_id, text }],
            Err(e) => vec![RelayAction::Log {
                level: LogLevel::Warn,
                message: format!("failed to seal for client {client_id}: {e}"),
            }],
        }
    }

    fn send_plain(
        &self,
        session_id: u64,
        envelope: &Envelope,
    ) -> Result<Vec<RelayAction>, SessionError> {
        let text = encode(envelope)?;
        Ok(vec![RelayAction::SendText { session_id, text }])
    }

    /// Sender info for a relaying envelope; the session must be `Joined`.
    #[allow(clippy::type_complexity)]
    fn joined_sender(
        &mut self,
        session_id: u64,
        action: char,
    ) -> Result<(ClientId, String), Vec<RelayAction>> {
        let Some(session) = self.sessions.get(&session_id) else {
            return Err(Vec::new());
        };

        if session.state() != SessionState::Joined {
            let err = SessionError::ProtocolViolation { state: session.state().name(), action };
            return Err(self.fail_session(session_id, &err));
        }

        let name = session.user_name().unwrap_or_default().to_string();
        Ok((session.client_id(), name))
    }

    fn fresh_client_id(&self) -> ClientId {
        loop {
            let mut bytes = [0u8; CLIENT_ID_SIZE];
            self.env.random_bytes(&mut bytes);
            let client_id = ClientId::from_bytes(bytes);
            if !self.by_client.contains_key(&client_id) {
                return client_id;
            }
        }
    }
}

fn list_len(list: &Envelope) -> usize {
    match list {
        Envelope::List { members } => members.len(),
        _ => 0,
    }
}

impl<E, S> std::fmt::Debug for RelayDriver<E, S>
where
    E: Environment,
    S: IdentitySlot,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver")
            .field("sessions", &self.sessions.len())
            .field("channels", &self.channels.channel_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use nodecrypt_crypto::{oaep_encrypt, outer_seal, EcdhKeyPair, IV_SIZE};
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    use super::*;
    use crate::keystore::MemorySlot;

    #[derive(Clone)]
    struct TestEnv {
        rng: Arc<Mutex<StdRng>>,
        wall_secs: Arc<Mutex<u64>>,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self {
                rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
                wall_secs: Arc::new(Mutex::new(1_700_000_000)),
            }
        }
    }

    impl Environment for TestEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn wall_clock_secs(&self) -> u64 {
            *self.wall_secs.lock().unwrap()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    fn new_driver(env: &TestEnv) -> RelayDriver<TestEnv, MemorySlot> {
        RelayDriver::new(env.clone(), MemorySlot::new(), RelayConfig::default())
    }

    fn sent_frames(actions: &[RelayAction]) -> Vec<(u64, Envelope)> {
        actions
            .iter()
            .filter_map(|action| match action {
                RelayAction::SendText { session_id, text } => {
                    Some((*session_id, decode(text, usize::MAX).unwrap()))
                },
                _ => None,
            })
            .collect()
    }

    fn has_close(actions: &[RelayAction]) -> bool {
        actions.iter().any(|action| matches!(action, RelayAction::CloseConnection { .. }))
    }

    /// Run the client half of the outer handshake against the driver.
    fn handshake(
        driver: &mut RelayDriver<TestEnv, MemorySlot>,
        session_id: u64,
        rng: &mut StdRng,
    ) -> ([u8; 32], ClientId) {
        let actions = driver.process_event(RelayEvent::ConnectionAccepted { session_id });
        let frames = sent_frames(&actions);
        let (server_pub, client_id) = match &frames[0].1 {
            Envelope::Hello { client_id, server_pub } => (server_pub.clone(), *client_id),
            other => panic!("expected hello, got {other:?}"),
        };

        let keypair = EcdhKeyPair::generate(rng);
        let sealed_point = oaep_encrypt(&server_pub, rng, &keypair.public_sec1()).unwrap();
        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id,
            text: encode(&Envelope::Ecdh { ecdh_pub: sealed_point }).unwrap(),
        });

        let frames = sent_frames(&actions);
        let aes_key = match &frames[0].1 {
            Envelope::EcdhAck { ecdh_pub } => keypair.derive_session_key(ecdh_pub).unwrap(),
            other => panic!("expected ecdh ack, got {other:?}"),
        };

        (aes_key, client_id)
    }

    fn seal_for_relay(key: &[u8; 32], rng: &mut StdRng, inner: &Envelope) -> String {
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);
        let data = outer_seal(key, iv, encode(inner).unwrap().as_bytes());
        encode(&Envelope::Sealed { data }).unwrap()
    }

    fn join(
        driver: &mut RelayDriver<TestEnv, MemorySlot>,
        session_id: u64,
        key: &[u8; 32],
        rng: &mut StdRng,
        user_name: &str,
        channel: &str,
    ) -> Vec<RelayAction> {
        let inner =
            Envelope::Join { user_name: user_name.to_string(), channel: channel.to_string() };
        driver.process_event(RelayEvent::FrameReceived {
            session_id,
            text: seal_for_relay(key, rng, &inner),
        })
    }

    #[test]
    fn handshake_derives_matching_keys() {
        let env = TestEnv::new(1);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(100);

        let (client_key, _) = handshake(&mut driver, 1, &mut rng);

        let relay_key = driver.sessions.get(&1).unwrap().aes_key().copied().unwrap();
        assert_eq!(client_key, relay_key);
        assert_eq!(driver.session_state(1), Some(SessionState::Secured));
    }

    #[test]
    fn join_sends_individual_list_then_broadcast() {
        let env = TestEnv::new(2);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(200);

        let (key, client_id) = handshake(&mut driver, 1, &mut rng);
        let actions = join(&mut driver, 1, &key, &mut rng, "alice", "#test");

        // Individual list first, then the membership broadcast (also to the
        // joiner): two sealed frames for a lone member.
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|(sid, _)| *sid == 1));

        assert_eq!(driver.session_state(1), Some(SessionState::Joined));
        assert_eq!(driver.channel_members("#test"), &[client_id]);
    }

    #[test]
    fn duplicate_join_is_fatal() {
        let env = TestEnv::new(3);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(300);

        let (key, _) = handshake(&mut driver, 1, &mut rng);
        join(&mut driver, 1, &key, &mut rng, "alice", "#test");

        let actions = join(&mut driver, 1, &key, &mut rng, "alice", "#test");
        assert!(has_close(&actions));
        assert_eq!(driver.session_count(), 0);
        assert!(driver.channel_members("#test").is_empty());
    }

    #[test]
    fn chat_before_join_is_fatal() {
        let env = TestEnv::new(4);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(400);

        let (key, client_id) = handshake(&mut driver, 1, &mut rng);

        let inner = Envelope::Client {
            target: client_id,
            client_id: None,
            user_name: None,
            key: Some("AAAA".into()),
            data: None,
        };
        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id: 1,
            text: seal_for_relay(&key, &mut rng, &inner),
        });

        assert!(has_close(&actions));
    }

    #[test]
    fn plain_envelope_after_handshake_is_fatal() {
        let env = TestEnv::new(5);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(500);

        let (_key, _) = handshake(&mut driver, 1, &mut rng);

        // Join must arrive sealed; plaintext join is a violation
        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id: 1,
            text: encode(&Envelope::Join { user_name: "x".into(), channel: "#x".into() })
                .unwrap(),
        });

        assert!(has_close(&actions));
    }

    #[test]
    fn garbage_ciphertext_is_bad_cipher() {
        let env = TestEnv::new(6);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(600);

        let (_key, _) = handshake(&mut driver, 1, &mut rng);

        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id: 1,
            text: encode(&Envelope::Sealed { data: vec![0u8; 64] }).unwrap(),
        });

        assert!(has_close(&actions));
    }

    #[test]
    fn unicast_to_unknown_target_drops_silently() {
        let env = TestEnv::new(7);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(700);

        let (key, _) = handshake(&mut driver, 1, &mut rng);
        join(&mut driver, 1, &key, &mut rng, "alice", "#test");

        let stranger = ClientId::from_bytes([0xEE; CLIENT_ID_SIZE]);
        let inner = Envelope::Client {
            target: stranger,
            client_id: None,
            user_name: None,
            key: None,
            data: Some("AAAA".into()),
        };
        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id: 1,
            text: seal_for_relay(&key, &mut rng, &inner),
        });

        assert!(sent_frames(&actions).is_empty());
        assert!(!has_close(&actions));
        assert_eq!(driver.session_state(1), Some(SessionState::Joined));
    }

    #[test]
    fn broadcast_never_echoes_the_sender() {
        let env = TestEnv::new(8);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(800);

        let (key_a, id_a) = handshake(&mut driver, 1, &mut rng);
        join(&mut driver, 1, &key_a, &mut rng, "alice", "#test");
        let (key_b, id_b) = handshake(&mut driver, 2, &mut rng);
        join(&mut driver, 2, &key_b, &mut rng, "bob", "#test");

        let mut recipients = std::collections::BTreeMap::new();
        recipients.insert(id_b, "Y2lwaGVydGV4dA==".to_string());
        let inner = Envelope::Broadcast { client_id: None, user_name: None, recipients };

        let actions = driver.process_event(RelayEvent::FrameReceived {
            session_id: 1,
            text: seal_for_relay(&key_a, &mut rng, &inner),
        });

        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 2);

        // The forwarded copy carries the sender identity the relay filled in
        let opened = nodecrypt_crypto::outer_open(&key_b, &match &frames[0].1 {
            Envelope::Sealed { data } => data.clone(),
            other => panic!("expected sealed frame, got {other:?}"),
        })
        .unwrap();
        let inner = decode(std::str::from_utf8(&opened).unwrap(), usize::MAX).unwrap();
        match inner {
            Envelope::Broadcast { client_id, user_name, .. } => {
                assert_eq!(client_id, Some(id_a));
                assert_eq!(user_name.as_deref(), Some("alice"));
            },
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn disconnect_broadcasts_shrunk_list() {
        let env = TestEnv::new(9);
        let mut driver = new_driver(&env);
        let mut rng = StdRng::seed_from_u64(900);

        let (key_a, _) = handshake(&mut driver, 1, &mut rng);
        join(&mut driver, 1, &key_a, &mut rng, "alice", "#test");
        let (key_b, id_b) = handshake(&mut driver, 2, &mut rng);
        join(&mut driver, 2, &key_b, &mut rng, "bob", "#test");

        let actions = driver.process_event(RelayEvent::ConnectionClosed {
            session_id: 2,
            reason: "transport closed".to_string(),
        });

        // Remaining member gets the updated list with bob gone
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 1);

        assert!(!driver.channel_members("#test").contains(&id_b));
        assert_eq!(driver.session_count(), 1);
    }
}
