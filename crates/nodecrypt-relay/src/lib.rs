//! NodeCrypt relay.
//!
//! The relay is a blind forwarder: it authenticates the transport layer
//! with each client, then shuttles opaque ciphertexts between members of a
//! channel. It never holds material that would decrypt chat traffic.
//!
//! # Architecture
//!
//! The protocol logic lives in [`RelayDriver`], a pure action-based state
//! machine (Sans-IO): the runtime feeds it events and executes the actions
//! it returns. This crate's [`Relay`] is the production glue, wrapping the
//! driver with a Tokio WebSocket accept loop, per-connection tasks, and a
//! periodic tick for idle timeouts and identity rotation.
//!
//! Events are linearized through a single driver lock, and actions are
//! executed while it is held; per-connection outbound queues then preserve
//! that order on the wire, which is the relay's per-sender ordering
//! guarantee.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channels;
mod driver;
mod keystore;
mod session;
mod system_env;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
};

pub use channels::ChannelRegistry;
pub use driver::{LogLevel, RelayAction, RelayDriver, RelayEvent};
use futures_util::{SinkExt, StreamExt};
pub use keystore::{
    FileSlot, IdentitySlot, KeyStoreError, MemorySlot, RelayIdentity, RelayKeyStore,
    StoredIdentity,
};
use nodecrypt_core::config::{RelayConfig, TICK_INTERVAL};
use nodecrypt_core::env::Environment;
pub use session::{ClientSession, SessionState};
pub use system_env::SystemEnv;
use thiserror::Error;
use tokio::{net::TcpListener, sync::Mutex};
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};

/// Errors from the production runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Runtime configuration for a relay process.
#[derive(Debug, Clone)]
pub struct RelayRuntimeConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`
    pub bind_address: String,
    /// Durable identity slot path; in-memory identity when absent
    pub identity_file: Option<PathBuf>,
    /// Protocol tunables
    pub relay: RelayConfig,
}

impl Default for RelayRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            identity_file: None,
            relay: RelayConfig::default(),
        }
    }
}

/// Messages queued to a connection's writer task.
enum Outbound {
    Frame(String),
    Close(String),
}

/// Per-connection outbound queues, keyed by session id.
type Senders = Arc<StdMutex<HashMap<u64, tokio::sync::mpsc::UnboundedSender<Outbound>>>>;

type Driver = RelayDriver<SystemEnv, Box<dyn IdentitySlot>>;

/// Production relay: [`RelayDriver`] plus a WebSocket runtime.
pub struct Relay {
    driver: Driver,
    listener: TcpListener,
    env: SystemEnv,
}

impl Relay {
    /// Bind the relay to its configured address.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Io` if the listener cannot bind
    pub async fn bind(config: RelayRuntimeConfig) -> Result<Self, RuntimeError> {
        let env = SystemEnv::new();

        let slot: Box<dyn IdentitySlot> = match &config.identity_file {
            Some(path) => Box::new(FileSlot::new(path.clone())),
            None => Box::new(MemorySlot::new()),
        };

        let driver = RelayDriver::new(env.clone(), slot, config.relay);
        let listener = TcpListener::bind(&config.bind_address).await?;

        Ok(Self { driver, listener, env })
    }

    /// Local address the relay is bound to.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Io` if the socket is gone
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, RuntimeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections and relay until the process is stopped.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Io` if accepting fails unrecoverably
    pub async fn run(self) -> Result<(), RuntimeError> {
        tracing::info!("relay listening on {}", self.listener.local_addr()?);

        let driver = Arc::new(Mutex::new(self.driver));
        let senders: Senders = Arc::new(StdMutex::new(HashMap::new()));

        // Idle timeouts and identity rotation ride a coarse periodic tick.
        {
            let driver = Arc::clone(&driver);
            let senders = Arc::clone(&senders);
            let env = self.env.clone();
            tokio::spawn(async move {
                loop {
                    env.sleep(TICK_INTERVAL).await;
                    let mut driver = driver.lock().await;
                    let actions = driver.process_event(RelayEvent::Tick);
                    execute_actions(actions, &senders);
                }
            });
        }

        let mut next_session_id: u64 = 1;
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let session_id = next_session_id;
            next_session_id += 1;

            tracing::debug!(%peer_addr, session_id, "transport accepted");

            let driver = Arc::clone(&driver);
            let senders = Arc::clone(&senders);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, session_id, driver, senders).await {
                    tracing::debug!(session_id, "connection ended: {e}");
                }
            });
        }
    }
}

/// Drive one WebSocket connection: writer task, read loop, teardown.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    session_id: u64,
    driver: Arc<Mutex<Driver>>,
    senders: Senders,
) -> Result<(), RuntimeError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| RuntimeError::WebSocket(e.to_string()))?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Outbound>();
    if let Ok(mut map) = senders.lock() {
        map.insert(session_id, tx);
    }

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                },
                Outbound::Close(reason) => {
                    let frame =
                        CloseFrame { code: CloseCode::Protocol, reason: reason.into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                },
            }
        }
    });

    {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(RelayEvent::ConnectionAccepted { session_id });
        execute_actions(actions, &senders);
    }

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let mut driver = driver.lock().await;
                let actions = driver.process_event(RelayEvent::FrameReceived { session_id, text });
                execute_actions(actions, &senders);
            },
            Ok(Message::Ping(_) | Message::Pong(_)) => {},
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {
                // Binary frames are not part of the protocol
                break;
            },
        }
    }

    if let Ok(mut map) = senders.lock() {
        map.remove(&session_id);
    }

    {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(RelayEvent::ConnectionClosed {
            session_id,
            reason: "transport closed".to_string(),
        });
        execute_actions(actions, &senders);
    }

    writer.abort();
    Ok(())
}

/// Execute driver actions. Called with the driver lock held so outbound
/// queue order matches event order.
fn execute_actions(actions: Vec<RelayAction>, senders: &Senders) {
    let Ok(map) = senders.lock() else {
        return;
    };

    for action in actions {
        match action {
            RelayAction::SendText { session_id, text } => {
                if let Some(tx) = map.get(&session_id) {
                    let _ = tx.send(Outbound::Frame(text));
                } else {
                    tracing::debug!(session_id, "send to missing session");
                }
            },
            RelayAction::CloseConnection { session_id, reason } => {
                if let Some(tx) = map.get(&session_id) {
                    let _ = tx.send(Outbound::Close(reason));
                }
            },
            RelayAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }
}
