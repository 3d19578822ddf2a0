/// Default HTTP port for the gateway.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Origin allowed to call the JSON API from a browser.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Number of events requested from upstream per conversation window.
pub const DEFAULT_EVENT_WINDOW_SIZE: usize = 10;

/// Number of events from a fetched window returned to the client.
pub const DEFAULT_EVENT_WINDOW_TAKE: usize = 1;

/// Interval of the relay's idle tick, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Push-channel event name for forwarded chat messages.
pub const EVENT_CHAT_MESSAGE: &str = "chat_message";

/// Push-channel event name for acknowledgements.
pub const EVENT_MY_RESPONSE: &str = "my_response";
