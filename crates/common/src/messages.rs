//! Request and reply documents for every RPC the gateway sends or serves.

use crate::error::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// Gateway → session manager
// ============================================================================

/// Sent when a new connection presents its session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOnlineRequest {
    /// Raw session key taken from the first client frame.
    #[serde(with = "base64_body")]
    pub session_key: Bytes,
    /// Connection accept time, unix millis.
    pub online_time: i64,
    /// Name of the gateway holding the connection.
    pub gate_name: String,
}

/// Session manager verdict for a [`SessionOnlineRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOnlineReply {
    #[serde(default)]
    pub session_id: String,
    /// Empty on success.
    #[serde(default)]
    pub err: String,
    /// Logic service initially responsible for the session.
    #[serde(default)]
    pub alloc_logic_service: String,
}

impl SessionOnlineReply {
    pub fn is_rejected(&self) -> bool {
        !self.err.is_empty()
    }
}

/// Published (no reply) when an authoritative connection goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOfflineNotice {
    pub session_id: String,
    pub online_time: i64,
}

// ============================================================================
// Gateway → logic service
// ============================================================================

/// One client payload forwarded to the session's logic service.
/// The reply is opaque; it only marks the request as complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLogicMsgRequest {
    pub session_id: String,
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

// ============================================================================
// Backend services → gateway (control plane)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSessionLogicRequest {
    pub session_id: String,
    pub alloc_logic_service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMsgToSessionRequest {
    pub session_ids: Vec<String>,
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMsgToSessionRequest {
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

/// Acknowledgement returned by every control-plane method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyAck {}

// ============================================================================
// Encoding helpers
// ============================================================================

/// Serialize a message into a broker payload.
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

/// Parse a broker payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Opaque bodies travel as standard base64 strings.
mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
