/// Application name
pub const APP_NAME: &str = "AidConnect";

/// Maximum length of a message body, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 5_000;

/// Default number of notifications returned by a listing.
pub const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;

/// Outbound events queued per live connection before new ones are dropped.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Default origin allowed by CORS (the web client dev server).
pub const DEFAULT_CLIENT_URL: &str = "http://localhost:5173";
