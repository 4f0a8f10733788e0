//! Deterministic simulation harness.
//!
//! [`SimEnv`] gives the protocol a virtual clock and a seeded RNG, and
//! [`Cluster`] wires one [`RelayDriver`] to any number of [`ChatClient`]s
//! through in-memory frame queues. Everything runs synchronously in one
//! thread: a scenario connects clients, sends messages, advances time, and
//! asserts on delivered events and the relay's wire transcript. The same
//! seed replays the same bytes.

#![forbid(unsafe_code)]

use std::{
    collections::{BTreeMap, VecDeque},
    ops::Sub,
    sync::{Arc, Mutex},
    time::Duration,
};

use nodecrypt_client::{ChatClient, ChatEvent, ClientAction, ClientError, ClientEvent};
use nodecrypt_core::{config::RelayConfig, env::Environment};
use nodecrypt_proto::{decode, ClientId, Envelope};
use nodecrypt_relay::{MemorySlot, RelayAction, RelayDriver, RelayEvent};
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// Virtual instant: time since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(Duration);

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0 - rhs.0
    }
}

/// Simulation environment: virtual clock plus seeded RNG.
///
/// Clones share the clock and the RNG, so every component in a scenario
/// sees the same time and draws from one deterministic entropy stream.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<StdRng>>,
}

/// Wall-clock offset of the simulation epoch (2023-11-14, arbitrary).
const WALL_BASE_SECS: u64 = 1_700_000_000;

impl SimEnv {
    /// Create an environment with the given RNG seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Advance virtual time (both monotonic and wall clock).
    pub fn advance(&self, duration: Duration) {
        #[allow(clippy::expect_used)]
        let mut clock = self.clock.lock().expect("clock lock poisoned");
        *clock += duration;
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    #[allow(clippy::expect_used)]
    fn now(&self) -> SimInstant {
        SimInstant(*self.clock.lock().expect("clock lock poisoned"))
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        WALL_BASE_SECS + self.clock.lock().expect("clock lock poisoned").as_secs()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        // The cluster is driven by explicit ticks; sleeping is a no-op
        async {}
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("rng lock poisoned").fill_bytes(buffer);
    }
}

/// One simulated client: the state machine plus everything it delivered.
pub struct SimClient {
    /// The client under test
    pub client: ChatClient<SimEnv>,
    /// Runtime session id on the relay side
    pub session_id: u64,
    /// Whether the simulated transport is still up
    pub connected: bool,
    /// Every event the client delivered, in order
    pub events: Vec<ChatEvent>,
    /// Fatal errors the client raised (normally empty)
    pub errors: Vec<ClientError>,
}

impl SimClient {
    /// Delivered `Message` events, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<&ChatEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, ChatEvent::Message { .. }))
            .collect()
    }

    /// Number of membership lists received.
    #[must_use]
    pub fn roster_count(&self) -> usize {
        self.events.iter().filter(|event| matches!(event, ChatEvent::Roster { .. })).count()
    }

    /// Number of `DecryptFailed` deliveries.
    #[must_use]
    pub fn decrypt_failures(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, ChatEvent::DecryptFailed { .. }))
            .count()
    }
}

/// One relay and its clients, wired through in-memory queues.
pub struct Cluster {
    /// Shared simulation environment
    pub env: SimEnv,
    /// The relay under test
    pub relay: RelayDriver<SimEnv, MemorySlot>,
    /// Every log line the relay emitted
    pub relay_log: Vec<String>,
    /// Every frame the relay sent, with its destination session
    pub relay_sent: Vec<(u64, String)>,
    clients: BTreeMap<String, SimClient>,
    to_clients: VecDeque<(u64, String)>,
    to_relay: VecDeque<(u64, String)>,
    relay_closes: VecDeque<(u64, String)>,
    next_session_id: u64,
}

impl Cluster {
    /// Create a cluster with default relay configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, RelayConfig::default())
    }

    /// Create a cluster with explicit relay configuration.
    #[must_use]
    pub fn with_config(seed: u64, config: RelayConfig) -> Self {
        let env = SimEnv::new(seed);
        let relay = RelayDriver::new(env.clone(), MemorySlot::new(), config);
        Self {
            env,
            relay,
            relay_log: Vec::new(),
            relay_sent: Vec::new(),
            clients: BTreeMap::new(),
            to_clients: VecDeque::new(),
            to_relay: VecDeque::new(),
            relay_closes: VecDeque::new(),
            next_session_id: 1,
        }
    }

    /// Connect a named client and run the handshake plus join to
    /// completion.
    ///
    /// # Panics
    ///
    /// Panics if the client raises a fatal error during connection.
    pub fn connect(&mut self, name: &str, user_name: &str, channel: &str, password: &str) {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let client = ChatClient::new(
            self.env.clone(),
            user_name.to_string(),
            channel.to_string(),
            password.to_string(),
        );

        self.clients.insert(
            name.to_string(),
            SimClient { client, session_id, connected: true, events: Vec::new(), errors: Vec::new() },
        );

        let actions = self.relay.process_event(RelayEvent::ConnectionAccepted { session_id });
        self.dispatch_relay(actions);
        self.pump();
    }

    /// Send a broadcast text message from a named client.
    ///
    /// # Panics
    ///
    /// Panics if the client raises a fatal error.
    pub fn send_text(&mut self, name: &str, text: &str) {
        self.client_event(name, ClientEvent::SendText { text: text.to_string() });
    }

    /// Send a private text message between two named clients.
    ///
    /// # Panics
    ///
    /// Panics if the sender raises a fatal error or the target has no id.
    pub fn send_private(&mut self, from: &str, to: &str, text: &str) {
        let target = self.client_id(to);
        self.client_event(from, ClientEvent::SendPrivate { target, text: text.to_string() });
    }

    /// Feed an arbitrary event to a named client and pump.
    ///
    /// # Panics
    ///
    /// Panics if the client raises a fatal error.
    pub fn client_event(&mut self, name: &str, event: ClientEvent) {
        let actions = self
            .client_mut(name)
            .client
            .handle(event)
            .unwrap_or_else(|e| panic!("client '{name}' failed: {e}"));
        self.dispatch_client(name, actions);
        self.pump();
    }

    /// Close a client's transport from the client side.
    pub fn disconnect(&mut self, name: &str) {
        let session_id = {
            let client = self.client_mut(name);
            client.connected = false;
            client.session_id
        };

        let actions = self.relay.process_event(RelayEvent::ConnectionClosed {
            session_id,
            reason: "client disconnected".to_string(),
        });
        self.dispatch_relay(actions);
        self.pump();
    }

    /// Drive the relay's periodic tick (idle timeouts, rotation).
    pub fn tick_relay(&mut self) {
        let actions = self.relay.process_event(RelayEvent::Tick);
        self.dispatch_relay(actions);
        self.pump();
    }

    /// A client by name.
    ///
    /// # Panics
    ///
    /// Panics if no client has that name.
    #[must_use]
    pub fn client(&self, name: &str) -> &SimClient {
        self.clients.get(name).unwrap_or_else(|| panic!("no client '{name}'"))
    }

    /// A client's relay-assigned identifier.
    ///
    /// # Panics
    ///
    /// Panics if the client never completed its hello.
    #[must_use]
    pub fn client_id(&self, name: &str) -> ClientId {
        self.client(name)
            .client
            .client_id()
            .unwrap_or_else(|| panic!("client '{name}' has no id yet"))
    }

    /// The RSA public key the relay advertised to a client's session.
    ///
    /// # Panics
    ///
    /// Panics if no hello was sent to that session.
    #[must_use]
    pub fn hello_server_pub(&self, name: &str) -> Vec<u8> {
        let session_id = self.client(name).session_id;
        self.relay_sent
            .iter()
            .filter(|(sid, _)| *sid == session_id)
            .find_map(|(_, text)| match decode(text, usize::MAX) {
                Ok(Envelope::Hello { server_pub, .. }) => Some(server_pub),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no hello recorded for '{name}'"))
    }

    fn client_mut(&mut self, name: &str) -> &mut SimClient {
        self.clients.get_mut(name).unwrap_or_else(|| panic!("no client '{name}'"))
    }

    fn name_of_session(&self, session_id: u64) -> Option<String> {
        self.clients
            .iter()
            .find(|(_, client)| client.session_id == session_id)
            .map(|(name, _)| name.clone())
    }

    fn dispatch_relay(&mut self, actions: Vec<RelayAction>) {
        for action in actions {
            match action {
                RelayAction::SendText { session_id, text } => {
                    self.relay_sent.push((session_id, text.clone()));
                    self.to_clients.push_back((session_id, text));
                },
                RelayAction::CloseConnection { session_id, reason } => {
                    self.relay_closes.push_back((session_id, reason));
                },
                RelayAction::Log { message, .. } => self.relay_log.push(message),
            }
        }
    }

    fn dispatch_client(&mut self, name: &str, actions: Vec<ClientAction>) {
        let session_id = self.client(name).session_id;
        for action in actions {
            match action {
                ClientAction::Send(text) => self.to_relay.push_back((session_id, text)),
                ClientAction::Deliver(event) => self.client_mut(name).events.push(event),
                ClientAction::Log { .. } => {},
            }
        }
    }

    /// Route queued frames until the cluster is quiescent.
    ///
    /// # Panics
    ///
    /// Panics if routing fails to quiesce within a generous budget, which
    /// would indicate a protocol loop.
    pub fn pump(&mut self) {
        for _ in 0..100_000 {
            if let Some((session_id, text)) = self.to_clients.pop_front() {
                self.deliver_to_client(session_id, text);
                continue;
            }

            if let Some((session_id, text)) = self.to_relay.pop_front() {
                let actions =
                    self.relay.process_event(RelayEvent::FrameReceived { session_id, text });
                self.dispatch_relay(actions);
                continue;
            }

            if let Some((session_id, _reason)) = self.relay_closes.pop_front() {
                if let Some(name) = self.name_of_session(session_id) {
                    self.client_mut(&name).connected = false;
                }
                // The transport teardown echoes back as a closed event
                let actions = self.relay.process_event(RelayEvent::ConnectionClosed {
                    session_id,
                    reason: "relay closed".to_string(),
                });
                self.dispatch_relay(actions);
                continue;
            }

            return;
        }

        panic!("cluster did not quiesce; protocol loop?");
    }

    fn deliver_to_client(&mut self, session_id: u64, text: String) {
        let Some(name) = self.name_of_session(session_id) else {
            return;
        };
        if !self.client(&name).connected {
            return;
        }

        let result = self.client_mut(&name).client.handle(ClientEvent::FrameReceived(text));
        match result {
            Ok(actions) => self.dispatch_client(&name, actions),
            Err(error) => {
                // A fatal client error drops the transport, like production
                let client = self.client_mut(&name);
                client.errors.push(error);
                client.connected = false;

                let actions = self.relay.process_event(RelayEvent::ConnectionClosed {
                    session_id,
                    reason: "client error".to_string(),
                });
                self.dispatch_relay(actions);
            },
        }
    }
}
