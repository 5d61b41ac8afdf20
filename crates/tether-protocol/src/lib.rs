//! tether protocol - wire frames for relay sessions
//!
//! This crate provides the JSON frames exchanged with the upstream over
//! each relay's websocket: the outbound heartbeat, the replies to AUTH
//! and PONG requests, and classification of inbound frames.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{action, AuthResult, Heartbeat, OutboundFrame, Reply};
pub use parse::{FrameError, InboundFrame};
pub use version::{DEFAULT_USER_AGENT, DEVICE_TYPE, EXTENSION_VERSION, FRAME_VERSION};
