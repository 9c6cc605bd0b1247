pub mod client;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod shutdown;

// Re-export public items for convenience
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use protocol::ChatMessage;
pub use runtime::create_runtime;
pub use server::ChatServer;
