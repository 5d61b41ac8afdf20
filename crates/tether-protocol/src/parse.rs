//! Classification of inbound frames.
//!
//! The upstream sends JSON objects with an `action` and an `id`. Only two
//! actions need an answer; everything else is logged and ignored. A frame
//! that cannot be classified is reported as a [`FrameError`] so the caller
//! can drop it without tearing down the session.

use serde_json::Value;
use thiserror::Error;

use crate::message::action;

/// Errors for frames that cannot be parsed or answered.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON (or serialization of an outbound frame failed)
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// A request that needs a reply arrived without a usable id
    #[error("{action} frame has no string id")]
    MissingId { action: String },
}

/// An inbound frame reduced to what the worker reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Authentication challenge; answer with the identity payload.
    AuthChallenge { id: String },

    /// Keepalive probe from the peer; answer with an acknowledgement.
    KeepaliveProbe { id: String },

    /// Any other action (or none); no reply.
    Unhandled { action: Option<String> },
}

impl InboundFrame {
    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(FrameError::NotAnObject);
        };

        let action_name = map.get("action").and_then(Value::as_str);
        let id = map.get("id").and_then(Value::as_str).map(str::to_string);

        match action_name {
            Some(action::AUTH) => id
                .map(|id| Self::AuthChallenge { id })
                .ok_or_else(|| FrameError::MissingId {
                    action: action::AUTH.to_string(),
                }),
            Some(action::PONG) => id
                .map(|id| Self::KeepaliveProbe { id })
                .ok_or_else(|| FrameError::MissingId {
                    action: action::PONG.to_string(),
                }),
            other => Ok(Self::Unhandled {
                action: other.map(str::to_string),
            }),
        }
    }
}
