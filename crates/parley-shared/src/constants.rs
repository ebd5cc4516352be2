/// Application name
pub const APP_NAME: &str = "parley";

/// Maximum message content size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum length of a group display name, in characters
pub const MAX_GROUP_NAME_LEN: usize = 128;

/// Maximum number of members in a single group (creator included)
pub const MAX_GROUP_MEMBERS: usize = 256;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5600;

/// Default capacity of a connection's outbound event queue
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
