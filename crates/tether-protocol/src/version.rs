//! Version strings and client descriptors sent on the wire.

/// Version field carried by outbound heartbeat frames.
pub const FRAME_VERSION: &str = "1.0.0";

/// Client version reported in AUTH replies.
pub const EXTENSION_VERSION: &str = "2.5.0";

/// Device type reported in AUTH replies.
pub const DEVICE_TYPE: &str = "extension";

/// User agent used for the websocket handshake and AUTH replies unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
