//! Client events and actions.

use nodecrypt_proto::{ChatKind, ClientId, Member};

/// Events the caller feeds into the client.
///
/// The caller is responsible for receiving frames from the transport,
/// forwarding user intents, and ticking periodically so buffered
/// ciphertexts can expire.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// One frame arrived from the relay.
    FrameReceived(String),

    /// Send a text message to every established peer in the channel.
    SendText {
        /// Message text
        text: String,
    },

    /// Send a private text message to a single peer.
    SendPrivate {
        /// Recipient
        target: ClientId,
        /// Message text
        text: String,
    },

    /// Send an arbitrary payload (image, file chunk). Broadcast when
    /// `target` is absent, private otherwise.
    SendPayload {
        /// Payload kind
        kind: ChatKind,
        /// Payload data; opaque to the client core
        data: String,
        /// Single recipient, or the whole channel when absent
        target: Option<ClientId>,
    },

    /// Periodic housekeeping tick.
    Tick,
}

/// Everything the client reports to its consumer, as one sum type.
///
/// The UI matches on this exhaustively; there are no callbacks to wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The outer handshake completed; the join has been sent.
    Secured,

    /// A membership list arrived. Emitted for every list, including the
    /// warmup pair received at our own join.
    Roster {
        /// Current channel members, in join order, including us
        members: Vec<Member>,
    },

    /// A peer appeared in the channel. Suppressed during the two-frame
    /// warmup while our own view is still stabilizing.
    PeerJoined {
        /// Peer identifier
        client_id: ClientId,
        /// Peer display name
        user_name: String,
    },

    /// A peer left the channel. Suppressed during the warmup.
    PeerLeft {
        /// Peer identifier
        client_id: ClientId,
        /// Peer display name
        user_name: String,
    },

    /// A chat payload decrypted and parsed.
    Message {
        /// Sender identifier
        from_id: ClientId,
        /// Sender display name
        from_name: String,
        /// Payload kind
        kind: ChatKind,
        /// Payload data
        data: String,
        /// Addressed to us alone rather than the channel
        private: bool,
        /// Sender wall-clock timestamp, if provided
        timestamp: Option<u64>,
    },

    /// A payload from this peer would not decrypt. Expected in bulk from a
    /// peer holding a different password; never fatal.
    DecryptFailed {
        /// Sender whose payload was dropped
        from_id: ClientId,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send one frame to the relay.
    Send(String),

    /// Deliver an event to the application layer.
    Deliver(ChatEvent),

    /// Emit a log line.
    Log {
        /// Severity
        level: LogLevel,
        /// Message; never contains plaintext or key material
        message: String,
    },
}

/// Log severities carried by [`ClientAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Lifecycle events
    Info,
    /// Dropped or undecryptable data
    Warn,
}
