//! Channel membership tracking.
//!
//! The registry maintains bidirectional mappings: channel → members (for
//! broadcast fan-out, in join order) and client → channel (for cleanup on
//! disconnect). Channels are created lazily on first join and destroyed
//! when the last member leaves. Channel names are opaque byte strings
//! matched exactly; the registry never normalizes them.

use std::collections::HashMap;

use nodecrypt_proto::ClientId;

/// Tracks which clients have joined which channel.
///
/// A client belongs to at most one channel for the lifetime of its session;
/// a second `join` for a client already in a channel is rejected and the
/// caller treats it as a protocol violation.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Channel name → members in join order
    channels: HashMap<String, Vec<ClientId>>,
    /// Client → channel name
    memberships: HashMap<ClientId, String>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to a channel, creating the channel if needed.
    ///
    /// Returns `false` if the client is already in a channel.
    pub fn join(&mut self, client_id: ClientId, channel: &str) -> bool {
        if self.memberships.contains_key(&client_id) {
            return false;
        }

        self.channels.entry(channel.to_string()).or_default().push(client_id);
        self.memberships.insert(client_id, channel.to_string());
        true
    }

    /// Remove a client from its channel.
    ///
    /// Returns the channel name it left, or `None` if it had not joined.
    /// An emptied channel is destroyed.
    pub fn leave(&mut self, client_id: ClientId) -> Option<String> {
        let channel = self.memberships.remove(&client_id)?;

        if let Some(members) = self.channels.get_mut(&channel) {
            members.retain(|member| *member != client_id);
            if members.is_empty() {
                self.channels.remove(&channel);
            }
        }

        Some(channel)
    }

    /// Members of a channel, in join order. Empty if the channel does not
    /// exist.
    #[must_use]
    pub fn members(&self, channel: &str) -> &[ClientId] {
        self.channels.get(channel).map_or(&[], Vec::as_slice)
    }

    /// The channel a client has joined, if any.
    #[must_use]
    pub fn channel_of(&self, client_id: ClientId) -> Option<&str> {
        self.memberships.get(&client_id).map(String::as_str)
    }

    /// Whether two clients share a channel.
    #[must_use]
    pub fn share_channel(&self, a: ClientId, b: ClientId) -> bool {
        match (self.memberships.get(&a), self.memberships.get(&b)) {
            (Some(channel_a), Some(channel_b)) => channel_a == channel_b,
            _ => false,
        }
    }

    /// Number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
