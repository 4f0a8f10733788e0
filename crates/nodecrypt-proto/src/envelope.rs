//! Envelope types and the JSON codec.
//!
//! An envelope is a JSON object whose `action` field is a single-character
//! tag. Handshake envelopes (`h`, `e`, `a`) and the sealed carrier (`m`)
//! appear on the transport directly; the remaining tags (`j`, `l`, `c`, `w`)
//! only ever occur as the plaintext *inside* a sealed envelope.
//!
//! Ciphertext-bearing fields (`data` on `c`, the values of `recipients` on
//! `w`) stay base64 `String`s end to end. The relay copies them verbatim;
//! only the addressed client ever decodes them.

use std::{collections::BTreeMap, fmt};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::CodecError;

/// Byte length of a client identifier.
pub const CLIENT_ID_SIZE: usize = 16;

/// Opaque 16-byte client identifier, unique within a relay lifetime.
///
/// Serialized as base64 on the wire. `Display` renders a short hex prefix,
/// which is what the relay logs; the full value never needs to be printed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId([u8; CLIENT_ID_SIZE]);

impl ClientId {
    /// Wrap raw identifier bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    /// Base64 form as used on the wire.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({self})")
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(&text).map_err(serde::de::Error::custom)?;
        let bytes: [u8; CLIENT_ID_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            serde::de::Error::custom(format!(
                "client_id has length {}, expected {CLIENT_ID_SIZE}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// One entry of a membership list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member's relay-assigned identifier
    pub client_id: ClientId,
    /// Display name announced at join
    pub user_name: String,
}

/// Base64 codec for required binary fields.
mod b64 {
    use super::{Deserialize, Deserializer, Serializer, BASE64};
    use base64::Engine as _;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(&text).map_err(serde::de::Error::custom)
    }
}

/// All wire envelopes, tagged by their single-character action.
///
/// # Invariants
///
/// - Each variant maps to exactly one action character; unknown actions fail
///   decoding with [`CodecError::Json`].
/// - Round-trip encoding produces an equivalent value.
/// - `data` fields and `recipients` values are opaque base64 strings. Nothing
///   in this crate decodes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Envelope {
    /// Relay → client: session identifier and the relay's RSA public key
    /// (SPKI DER). First frame on every connection; never AES-wrapped.
    #[serde(rename = "h")]
    Hello {
        /// Identifier assigned to this connection
        client_id: ClientId,
        /// Relay RSA-2048 public key, SPKI DER
        #[serde(with = "b64")]
        server_pub: Vec<u8>,
    },

    /// Client → relay: the client's P-384 public point, RSA-OAEP-encrypted
    /// under the relay key from `h`. Never AES-wrapped.
    #[serde(rename = "e")]
    Ecdh {
        /// OAEP ciphertext of the SEC1-encoded P-384 point
        #[serde(with = "b64")]
        ecdh_pub: Vec<u8>,
    },

    /// Relay → client: the relay's P-384 public point, in the clear.
    /// Completes the outer key agreement. Never AES-wrapped.
    #[serde(rename = "a")]
    EcdhAck {
        /// SEC1-encoded P-384 point
        #[serde(with = "b64")]
        ecdh_pub: Vec<u8>,
    },

    /// Carrier for every post-handshake envelope: `data` is
    /// `IV ‖ AES-256-CBC(session key, inner envelope JSON)`.
    #[serde(rename = "m")]
    Sealed {
        /// IV-prefixed AES ciphertext
        #[serde(with = "b64")]
        data: Vec<u8>,
    },

    /// Client → relay (inner): announce a name and join a channel.
    #[serde(rename = "j")]
    Join {
        /// Display name for membership lists
        user_name: String,
        /// Channel to join; opaque bytes, matched exactly
        channel: String,
    },

    /// Relay → client (inner): current membership of the session's channel.
    #[serde(rename = "l")]
    List {
        /// All members, in join order, including the recipient
        members: Vec<Member>,
    },

    /// Peer-directed envelope (inner), relayed to a single target. Carries
    /// either a Curve25519 public key announcement (`key`) or a ChaCha20
    /// ciphertext (`data`). The relay fills `client_id` and `user_name` from
    /// the sending session when forwarding.
    #[serde(rename = "c")]
    Client {
        /// Recipient of this envelope
        target: ClientId,
        /// Sender identity, filled by the relay on forward
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        /// Sender display name, filled by the relay on forward
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        /// Base64 Curve25519 public key (peer key announcement)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// Base64 ChaCha20 ciphertext; opaque to the relay
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    /// Channel broadcast (inner): one ChaCha20 ciphertext per recipient,
    /// keyed by recipient identifier. The relay fills the sender fields and
    /// forwards the map verbatim to every other member.
    #[serde(rename = "w")]
    Broadcast {
        /// Sender identity, filled by the relay on forward
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        /// Sender display name, filled by the relay on forward
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        /// Per-recipient base64 ChaCha20 ciphertexts; opaque to the relay
        recipients: BTreeMap<ClientId, String>,
    },
}

impl Envelope {
    /// The single-character action tag, for logging.
    #[must_use]
    pub const fn action(&self) -> char {
        match self {
            Self::Hello { .. } => 'h',
            Self::Ecdh { .. } => 'e',
            Self::EcdhAck { .. } => 'a',
            Self::Sealed { .. } => 'm',
            Self::Join { .. } => 'j',
            Self::List { .. } => 'l',
            Self::Client { .. } => 'c',
            Self::Broadcast { .. } => 'w',
        }
    }
}

/// Encode an envelope to its wire form.
///
/// # Errors
///
/// - `CodecError::Json` if serialization fails (not reachable for the types
///   in this crate, kept for the contract)
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Json(e.to_string()))
}

/// Decode one wire frame into an envelope.
///
/// The size check runs before any parsing so oversized frames are rejected
/// without feeding them to the JSON parser.
///
/// # Errors
///
/// - `CodecError::Oversized` if the frame exceeds `max_bytes`
/// - `CodecError::Json` for invalid JSON, unknown action tags, missing
///   required fields, or invalid base64 in a required binary field
pub fn decode(text: &str, max_bytes: usize) -> Result<Envelope, CodecError> {
    if text.len() > max_bytes {
        return Err(CodecError::Oversized { size: text.len(), max: max_bytes });
    }

    serde_json::from_str(text).map_err(|e| CodecError::Json(e.to_string()))
}
