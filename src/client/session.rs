//! Client duplex loop.
//!
//! The receive path renders whatever the server pushes; the send path turns
//! operator lines into frames. They share the socket (one half each) and a
//! [`Shutdown`] flag, and either one can end the session for both.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Notice, QUIT_COMMAND, validate_message};
use crate::config::ClientConfig;
use crate::protocol::{self, ChatMessage, LineError};
use crate::shutdown::Shutdown;

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The operator typed the quit command or closed their input.
    Quit,
    /// The connection broke or the server closed it.
    ConnectionLost,
    /// The server sent something a client cannot handle.
    ProtocolFault,
}

pub(super) async fn run<R>(
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: ClientConfig,
    input: R,
    notices: mpsc::UnboundedSender<Notice>,
) -> Result<SessionEnd>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let shutdown = Shutdown::new();
    let receiving = tokio::spawn(receive_path(
        reader,
        config.max_line_length,
        notices.clone(),
        shutdown.clone(),
    ));
    let sending = tokio::spawn(send_path(
        writer,
        input,
        config.max_message_chars,
        notices,
        shutdown,
    ));

    let (received, sent) = tokio::join!(receiving, sending);
    // Whichever path tripped the shutdown decides the outcome.
    let end = sent?.or(received?).unwrap_or(SessionEnd::ConnectionLost);
    info!("Session ended: {:?}", end);
    Ok(end)
}

/// Returns `Some` only when this path ended the session.
async fn receive_path(
    mut reader: BufReader<OwnedReadHalf>,
    max_line_length: usize,
    notices: mpsc::UnboundedSender<Notice>,
    shutdown: Shutdown,
) -> Option<SessionEnd> {
    loop {
        let result = tokio::select! {
            _ = shutdown.wait() => return None,
            result = protocol::read_line(&mut reader, max_line_length) => result,
        };
        if shutdown.is_triggered() {
            return None;
        }

        let (end, notice) = match result {
            Ok(Some(line)) => {
                match ChatMessage::decode(&line).ok().and_then(Notice::from_message) {
                    Some(notice) => {
                        let _ = notices.send(notice);
                        continue;
                    }
                    None => (
                        SessionEnd::ProtocolFault,
                        Notice::ProtocolFault(line.trim_end().to_string()),
                    ),
                }
            }
            Ok(None) => (
                SessionEnd::ConnectionLost,
                Notice::ConnectionLost("server closed the connection".to_string()),
            ),
            Err(LineError::TooLong(limit)) => (
                SessionEnd::ProtocolFault,
                Notice::ProtocolFault(format!("line longer than {limit} bytes")),
            ),
            Err(LineError::InvalidUtf8) => (
                SessionEnd::ProtocolFault,
                Notice::ProtocolFault("line is not valid UTF-8".to_string()),
            ),
            Err(LineError::Io(e)) => (SessionEnd::ConnectionLost, Notice::ConnectionLost(e.to_string())),
        };
        warn!("Receive path stopping: {}", notice);
        let _ = notices.send(notice);
        shutdown.trigger();
        // Dropping the read half here; the send path closes the write half.
        return Some(end);
    }
}

/// Returns `Some` only when this path ended the session.
async fn send_path<R>(
    mut writer: OwnedWriteHalf,
    input: R,
    max_message_chars: usize,
    notices: mpsc::UnboundedSender<Notice>,
    shutdown: Shutdown,
) -> Option<SessionEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let end = loop {
        let next = tokio::select! {
            _ = shutdown.wait() => break None,
            next = lines.next_line() => next,
        };
        if shutdown.is_triggered() {
            break None;
        }

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("End of input");
                break Some(quit(&mut writer, &notices, &shutdown).await);
            }
            Err(e) => {
                warn!("Input error: {}", e);
                break Some(quit(&mut writer, &notices, &shutdown).await);
            }
        };

        let body = match validate_message(&line, max_message_chars) {
            Ok(body) => body,
            Err(e) => {
                let _ = notices.send(Notice::Rejected(e));
                continue;
            }
        };
        if body.trim() == QUIT_COMMAND {
            break Some(quit(&mut writer, &notices, &shutdown).await);
        }
        if body.is_empty() {
            continue;
        }

        let frame = ChatMessage::Message {
            body: body.to_string(),
        }
        .encode();
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            let _ = notices.send(Notice::ConnectionLost(e.to_string()));
            shutdown.trigger();
            break Some(SessionEnd::ConnectionLost);
        }
    };

    let _ = writer.shutdown().await;
    end
}

async fn quit(
    writer: &mut OwnedWriteHalf,
    notices: &mpsc::UnboundedSender<Notice>,
    shutdown: &Shutdown,
) -> SessionEnd {
    let _ = notices.send(Notice::Leaving);
    // Trip the flag first so the server closing on us is not reported as a lost connection.
    shutdown.trigger();
    if let Err(e) = writer.write_all(ChatMessage::Disconnect.encode().as_bytes()).await {
        warn!("Could not send disconnect: {}", e);
    }
    let _ = notices.send(Notice::Left);
    SessionEnd::Quit
}
