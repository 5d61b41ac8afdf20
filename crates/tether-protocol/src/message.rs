//! Outbound frames sent by a relay worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{DeviceId, UserId};
use uuid::Uuid;

use crate::parse::FrameError;
use crate::version::{DEVICE_TYPE, EXTENSION_VERSION, FRAME_VERSION};

/// Action names used on the wire.
pub mod action {
    pub const AUTH: &str = "AUTH";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";
}

/// Periodic liveness frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Fresh correlation id per heartbeat
    pub id: String,
    pub version: String,
    pub action: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Identity payload answering an AUTH challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub browser_id: String,
    pub user_id: String,
    pub user_agent: String,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub device_type: String,
    pub version: String,
}

impl AuthResult {
    pub fn new(
        device_id: &DeviceId,
        user_id: &UserId,
        user_agent: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            browser_id: device_id.to_string(),
            user_id: user_id.as_str().to_string(),
            user_agent: user_agent.to_string(),
            timestamp: at.timestamp(),
            device_type: DEVICE_TYPE.to_string(),
            version: EXTENSION_VERSION.to_string(),
        }
    }
}

/// Reply to an inbound request, echoing its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub origin_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuthResult>,
}

/// Any frame a worker writes to its relay session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Heartbeat(Heartbeat),
    Reply(Reply),
}

impl OutboundFrame {
    /// Creates a heartbeat with a freshly generated correlation id.
    pub fn heartbeat() -> Self {
        Self::Heartbeat(Heartbeat {
            id: Uuid::new_v4().to_string(),
            version: FRAME_VERSION.to_string(),
            action: action::PING.to_string(),
            data: serde_json::Map::new(),
        })
    }

    /// Creates the reply to an AUTH challenge.
    pub fn auth_reply(id: impl Into<String>, result: AuthResult) -> Self {
        Self::Reply(Reply {
            id: id.into(),
            origin_action: action::AUTH.to_string(),
            result: Some(result),
        })
    }

    /// Creates the acknowledgement of a keepalive probe.
    pub fn pong_reply(id: impl Into<String>) -> Self {
        Self::Reply(Reply {
            id: id.into(),
            origin_action: action::PONG.to_string(),
            result: None,
        })
    }

    /// Correlation id of this frame.
    pub fn id(&self) -> &str {
        match self {
            Self::Heartbeat(h) => &h.id,
            Self::Reply(r) => &r.id,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &str {
        match self {
            Self::Heartbeat(h) => &h.action,
            Self::Reply(r) => &r.origin_action,
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}
