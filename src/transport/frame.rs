//! JSON frames exchanged with the relay

use serde::{Deserialize, Serialize};

use super::{TransportError, TransportResult};

/// Frames the client sends
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Announce this client's identifier after opening a session
    Connect {
        /// Sender identifier
        did: String,
    },
    /// Deliver ciphertext to a peer
    Message {
        /// Recipient identifier
        to: String,
        /// Base64 ciphertext
        content: String,
    },
}

impl OutboundFrame {
    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> TransportResult<String> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidData(e.to_string()))
    }
}

/// Frames the relay sends
///
/// Kept flat and permissive: unknown types and missing fields are left to
/// the connection manager to judge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// `message`, `error`, `connected`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Sender identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Base64 ciphertext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// ISO 8601 relay timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Relay error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundFrame {
    /// Parse a received text frame
    pub fn parse(text: &str) -> TransportResult<Self> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidData(e.to_string()))
    }

    /// Build an inbound `message` frame, as the relay would
    pub fn message(from: &str, content: &str, timestamp: Option<&str>) -> Self {
        InboundFrame {
            kind: "message".to_string(),
            from: Some(from.to_string()),
            content: Some(content.to_string()),
            timestamp: timestamp.map(str::to_string),
            error: None,
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> TransportResult<String> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidData(e.to_string()))
    }
}
