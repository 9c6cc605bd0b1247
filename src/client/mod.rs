mod notice;
mod session;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::{self, ChatMessage};

pub use notice::Notice;
pub use session::SessionEnd;

/// Typed by the operator to leave the chat.
pub const QUIT_COMMAND: &str = "!q";

/// Operator input the client refuses to put on the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Message should contain at most {max} characters")]
    TooLong { max: usize },
    #[error("Message cannot contain a newline character")]
    EmbeddedNewline,
    #[error("Username cannot be empty")]
    EmptyUsername,
    #[error("Username cannot contain tabs or control characters")]
    InvalidUsername,
}

/// Checks one line of operator input before it is sent as a chat body.
pub fn validate_message(line: &str, max_chars: usize) -> Result<&str, InputError> {
    if line.contains('\n') {
        return Err(InputError::EmbeddedNewline);
    }
    if line.chars().count() > max_chars {
        return Err(InputError::TooLong { max: max_chars });
    }
    Ok(line)
}

pub fn validate_username(name: &str) -> Result<&str, InputError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InputError::EmptyUsername);
    }
    if name.chars().any(char::is_control) {
        return Err(InputError::InvalidUsername);
    }
    Ok(name)
}

/// A connection to a chat server.
///
/// Use [`Client::register`] once, then hand the client to [`Client::run`]
/// for the interactive part of the session.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: ClientConfig,
}

impl Client {
    /// Connects to `config.server_addr`, giving up after `config.connect_timeout`.
    ///
    /// # Arguments
    /// - `config`: Server address, dial timeout and line limits.
    ///
    /// # Returns
    /// A `Result` containing the `Client` or an error if the dial fails or times out.
    ///
    /// # Examples
    /// ```no_run
    /// # async fn doc() -> anyhow::Result<()> {
    /// use tcchat::{Client, ClientConfig};
    ///
    /// let mut client = Client::connect(ClientConfig::default()).await?;
    /// let server_name = client.register("alice").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let addr = config.server_addr.clone();
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("timed out connecting to {}", addr))?
            .with_context(|| format!("failed to connect to {}", addr))?;
        info!("Connected to {}", addr);

        let (read_half, writer) = stream.into_split();
        Ok(Client {
            reader: BufReader::new(read_half),
            writer,
            config,
        })
    }

    /// Sends one frame to the server.
    ///
    /// # Arguments
    /// - `message`: The `ChatMessage` to encode and write.
    ///
    /// # Returns
    /// A `Result` indicating success or failure.
    pub async fn send(&mut self, message: &ChatMessage) -> Result<()> {
        self.writer.write_all(message.encode().as_bytes()).await?;
        debug!("Sent: {}", message);
        Ok(())
    }

    /// Reads one frame from the server.
    ///
    /// # Returns
    /// `Ok(None)` once the server has closed, or an error for an unreadable
    /// or malformed line.
    pub async fn receive(&mut self) -> Result<Option<ChatMessage>> {
        match protocol::read_line(&mut self.reader, self.config.max_line_length).await? {
            Some(line) => Ok(Some(ChatMessage::decode(&line)?)),
            None => Ok(None),
        }
    }

    /// Asks to join as `username` and waits for the server's reply.
    ///
    /// # Arguments
    /// - `username`: The requested name; the server may append a suffix.
    ///
    /// # Returns
    /// The server name from the Welcome frame. Any other reply is logged and
    /// discarded, leaving `None`.
    pub async fn register(&mut self, username: &str) -> Result<Option<String>> {
        let username = validate_username(username)?.to_string();
        self.send(&ChatMessage::Register { username }).await?;

        let line = protocol::read_line(&mut self.reader, self.config.max_line_length)
            .await?
            .ok_or_else(|| anyhow!("server closed the connection during registration"))?;
        match ChatMessage::decode(&line) {
            Ok(ChatMessage::Welcome { server_name }) => Ok(Some(server_name)),
            Ok(other) => {
                warn!("Expected a welcome, got {}", other.tag());
                Ok(None)
            }
            Err(e) => {
                warn!("Expected a welcome: {}", e);
                Ok(None)
            }
        }
    }

    /// Runs the duplex loop until the operator quits or the connection ends.
    ///
    /// # Arguments
    /// - `input`: Yields operator lines.
    /// - `notices`: Receives everything worth showing the operator.
    ///
    /// # Returns
    /// How the session ended.
    pub async fn run<R>(self, input: R, notices: mpsc::UnboundedSender<Notice>) -> Result<SessionEnd>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        session::run(self.reader, self.writer, self.config, input, notices).await
    }
}
