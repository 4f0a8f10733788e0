//! Chat payloads: the plaintext a client encrypts for its peers.
//!
//! A `ChatPayload` only ever exists inside the ChaCha20 layer; neither the
//! relay nor this crate's codec sees one in the clear on the wire.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::envelope::ClientId;

/// What a chat payload carries.
///
/// File kinds are opaque to the core: chunking and reassembly happen above
/// this layer, and `data` is relayed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// UTF-8 text message
    Text,
    /// Base64-encoded inline image
    Image,
    /// File transfer start descriptor
    FileStart,
    /// File transfer chunk
    FileVolume,
    /// File transfer end marker
    FileEnd,
}

impl ChatKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::FileStart => "file_start",
            Self::FileVolume => "file_volume",
            Self::FileEnd => "file_end",
        }
    }
}

/// A chat kind plus its addressing mode.
///
/// On the wire this is a single string: the kind name, with a `_private`
/// suffix when the payload is addressed to a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageKind {
    /// Payload kind
    pub kind: ChatKind,
    /// Addressed to a single peer rather than the channel
    pub private: bool,
}

impl MessageKind {
    /// A broadcast kind.
    #[must_use]
    pub const fn broadcast(kind: ChatKind) -> Self {
        Self { kind, private: false }
    }

    /// A single-peer kind.
    #[must_use]
    pub const fn private(kind: ChatKind) -> Self {
        Self { kind, private: true }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if self.private {
            f.write_str("_private")?;
        }
        Ok(())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (base, private) = match text.strip_suffix("_private") {
            Some(base) => (base, true),
            None => (text, false),
        };

        let kind = match base {
            "text" => ChatKind::Text,
            "image" => ChatKind::Image,
            "file_start" => ChatKind::FileStart,
            "file_volume" => ChatKind::FileVolume,
            "file_end" => ChatKind::FileEnd,
            _ => return Err(format!("unknown message kind '{text}'")),
        };

        Ok(Self { kind, private })
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The plaintext record inside the ChaCha20 layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Kind and addressing mode
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// UTF-8 text, a base64 chunk, or a file descriptor; opaque to the core
    pub data: String,
    /// Sender display name
    pub user_name: String,
    /// Sender identifier
    pub client_id: ClientId,
    /// Sender wall-clock timestamp, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CLIENT_ID_SIZE;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            MessageKind::broadcast(ChatKind::Text),
            MessageKind::private(ChatKind::Text),
            MessageKind::broadcast(ChatKind::FileVolume),
            MessageKind::private(ChatKind::Image),
        ] {
            let text = kind.to_string();
            let parsed: MessageKind = text.parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn private_suffix_is_appended() {
        assert_eq!(MessageKind::private(ChatKind::Text).to_string(), "text_private");
        assert_eq!(MessageKind::broadcast(ChatKind::FileEnd).to_string(), "file_end");
    }

    #[test]
    fn reject_unknown_kind() {
        assert!("sticker".parse::<MessageKind>().is_err());
        // A bare suffix is not a kind either
        assert!("_private".parse::<MessageKind>().is_err());
    }

    #[test]
    fn payload_json_uses_type_field() {
        let payload = ChatPayload {
            kind: MessageKind::broadcast(ChatKind::Text),
            data: "hi".into(),
            user_name: "alice".into(),
            client_id: ClientId::from_bytes([1; CLIENT_ID_SIZE]),
            timestamp: Some(1_700_000_000),
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"text\""));

        let parsed: ChatPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, parsed);
    }
}
