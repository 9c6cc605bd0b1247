use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_SERVER_NAME: &str = "TCChat";
/// Longest chat message a client will put on the wire, in characters.
pub const MAX_MESSAGE_CHARS: usize = 140;
pub const MAX_LINE_LENGTH: usize = 4096;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, e.g. `0.0.0.0:8081`.
    pub bind_addr: String,
    /// Name sent to every client in its Welcome frame.
    pub server_name: String,
    /// Frames queued per connection before further frames to it are dropped.
    pub outbound_capacity: usize,
    /// Longest accepted inbound line in bytes, terminator included.
    pub max_line_length: usize,
    /// Upper bound on a single socket write to one client.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            outbound_capacity: 64,
            max_line_length: MAX_LINE_LENGTH,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub connect_timeout: Duration,
    pub max_message_chars: usize,
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout: Duration::from_secs(3),
            max_message_chars: MAX_MESSAGE_CHARS,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}
