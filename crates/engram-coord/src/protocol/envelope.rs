//! Message envelope and wire id scheme.
//!
//! Every frame is one JSON envelope. Timestamps serialize as
//! `{"__type": "Date", "value": <ISO-8601>}`; decoders also accept plain
//! ISO-8601 strings for compatibility with older peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::messages::MessageType;

// ============================================================================
// WIRE DATES
// ============================================================================

/// Serde codec for the `{"__type": "Date"}` wrapper.
pub(crate) mod wire_date {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct Wrapper<'a> {
        #[serde(rename = "__type")]
        type_tag: &'a str,
        value: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Incoming {
        Wrapped {
            #[serde(rename = "__type")]
            #[allow(dead_code)]
            type_tag: String,
            value: String,
        },
        Plain(String),
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Wrapper {
            type_tag: "Date",
            value: value.to_rfc3339(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = match Incoming::deserialize(deserializer)? {
            Incoming::Wrapped { value, .. } | Incoming::Plain(value) => value,
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| D::Error::custom(format!("bad timestamp {raw:?}: {e}")))
    }
}

// ============================================================================
// WIRE IDS
// ============================================================================

/// Kinds of wire-generated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Ordinary message
    Msg,
    /// Lock grant
    Lock,
    /// Detected conflict
    Conflict,
    /// Resume token
    Resume,
}

impl IdKind {
    fn prefix(&self) -> &'static str {
        match self {
            IdKind::Msg => "msg",
            IdKind::Lock => "lock",
            IdKind::Conflict => "conflict",
            IdKind::Resume => "resume",
        }
    }
}

/// Generate a wire id: `<kind>_<epochMillis>_<9-char-base36>`.
pub fn wire_id(kind: IdKind) -> String {
    let millis = Utc::now().timestamp_millis();
    // Entropy from a v4 UUID, base36-encoded and padded to nine chars.
    let uuid = uuid::Uuid::new_v4();
    let seed = u64::from_le_bytes(uuid.as_bytes()[..8].try_into().unwrap_or([0; 8]));
    format!("{}_{}_{}", kind.prefix(), millis, base36(seed, 9))
}

fn base36(mut value: u64, width: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::with_capacity(width);
    for _ in 0..width {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// The message envelope every frame carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    /// Wire id, `<kind>_<millis>_<base36>`
    pub id: String,
    /// Send instant
    #[serde(with = "wire_date")]
    pub timestamp: DateTime<Utc>,
    /// Sending agent id, or `server`
    pub sender: String,
    /// Message discriminant; payload schema is fixed per discriminant
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Discriminant-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Id of the message this one answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Time-to-live in milliseconds, advisory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl Envelope {
    /// A new envelope from `sender` with a typed payload.
    pub fn new<P: Serialize>(sender: &str, msg_type: MessageType, payload: &P) -> Self {
        Self {
            id: wire_id(IdKind::Msg),
            timestamp: Utc::now(),
            sender: sender.to_string(),
            msg_type,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            correlation_id: None,
            ttl: None,
        }
    }

    /// Builder-style correlation id.
    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Parse the payload into its typed form.
    pub fn parse_payload<P: serde::de::DeserializeOwned>(&self) -> Result<P, ProtocolError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ProtocolError::BadPayload(e.to_string()))
    }

    /// Serialize for transmission.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Decode one frame into an envelope.
///
/// Malformed JSON and unknown discriminants both surface as
/// [`ProtocolError::Invalid`]; the connection layer answers with
/// `INVALID_MESSAGE` and closes.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Invalid(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
