//! Gateway wire types for cordgate.
//!
//! This crate holds everything that crosses the wire between cordgate and the
//! remote messaging gateway, with no I/O of its own:
//!
//! - **Frames**: the `{op, d, s, t}` envelope and the control payloads
//!   (HELLO, IDENTIFY, RESUME, READY, HEARTBEAT)
//! - **Close codes**: the static table deciding whether a dropped session
//!   may be resumed
//! - **Message elements**: the platform-agnostic message model shared by the
//!   inbound codec and the outbound encoder
//!
//! # Example
//!
//! ```
//! use cordgate_protocol::{GatewayFrame, OpCode};
//!
//! let frame: GatewayFrame =
//!     serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
//! assert_eq!(frame.opcode(), Some(OpCode::Hello));
//! ```

pub mod close_codes;
pub mod element;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use close_codes::{CloseClassification, CloseCode, classify};
pub use element::{Attrs, MessageElement, Segment, Sendable, value_to_string};

// ============================================================================
// Opcodes
// ============================================================================

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OpCode::Dispatch),
            1 => Ok(OpCode::Heartbeat),
            2 => Ok(OpCode::Identify),
            3 => Ok(OpCode::PresenceUpdate),
            4 => Ok(OpCode::VoiceStateUpdate),
            6 => Ok(OpCode::Resume),
            7 => Ok(OpCode::Reconnect),
            8 => Ok(OpCode::RequestGuildMembers),
            9 => Ok(OpCode::InvalidSession),
            10 => Ok(OpCode::Hello),
            11 => Ok(OpCode::HeartbeatAck),
            other => Err(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

/// Dispatch names handled by the session itself rather than the dispatcher.
pub mod dispatch_names {
    pub const READY: &str = "READY";
    pub const RESUMED: &str = "RESUMED";
}

// ============================================================================
// Frame envelope
// ============================================================================

/// A single gateway frame.
///
/// `s` and `t` are only present on DISPATCH frames. Some deployments also tag
/// dispatches with an event `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl GatewayFrame {
    /// Build a control frame with no sequence or event type.
    pub fn control(op: OpCode, d: Value) -> Self {
        Self {
            op: op.into(),
            d,
            s: None,
            t: None,
            id: None,
        }
    }

    /// Heartbeat carrying the last sequence seen (`null` before any dispatch).
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::control(
            OpCode::Heartbeat,
            sequence.map(Value::from).unwrap_or(Value::Null),
        )
    }

    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::control(OpCode::Identify, to_value(payload))
    }

    pub fn resume(payload: &ResumePayload) -> Self {
        Self::control(OpCode::Resume, to_value(payload))
    }

    /// The decoded opcode, if known.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::try_from(self.op).ok()
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    // Plain structs of strings and integers always serialize.
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

// ============================================================================
// Control payloads
// ============================================================================

/// Client properties announced at identify time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl ClientProperties {
    /// Properties for this host, naming the client as `name`.
    pub fn for_client(name: &str) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: name.to_string(),
            device: name.to_string(),
        }
    }
}

/// IDENTIFY request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: u64,
    pub properties: ClientProperties,
}

/// RESUME request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// HELLO body sent by the server right after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// READY dispatch body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub user: SelfUser,
}

/// The bot's own identity, as reported by READY.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelfUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: u64,
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an RFC 3339 timestamp to unix seconds.
pub fn unix_seconds(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp())
}
