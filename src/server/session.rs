use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use tracing_futures::Instrument;

use super::hub::{HubError, HubHandle, Peer};
use super::registry::ConnId;
use crate::config::ServerConfig;
use crate::protocol::{self, ChatMessage, LineError};

/// Why a connection's writer task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Every sender went away and the queue was flushed.
    Drained,
    Failed,
    TimedOut,
}

/// Why a session's read loop ended.
#[derive(Debug, PartialEq, Eq)]
enum Close {
    Disconnect,
    PeerClosed,
    Violation,
}

/// Serves one accepted connection until it disconnects, breaks or misbehaves.
///
/// Reads happen here; writes go through a bounded queue drained by a
/// separate writer task so a slow peer never stalls the registry. Whatever
/// ends the loop, the connection is unregistered and closed exactly once.
pub(crate) async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    hub: HubHandle,
    config: Arc<ServerConfig>,
) -> Result<()> {
    info!("Serving {}", addr);
    let (read_half, write_half) = socket.into_split();
    let (outbound, queue) = mpsc::channel(config.outbound_capacity);
    let writer = tokio::spawn(
        write_frames(write_half, queue, config.write_timeout).instrument(tracing::Span::current()),
    );

    let result = read_frames(read_half, conn, &hub, outbound, config.max_line_length).await;

    // No-op when the loop already unregistered on Disconnect.
    match hub.unregister(conn).await {
        Ok(Some(username)) => debug!("Unregistered {} on close", username),
        Ok(None) => {}
        Err(e) => error!("Could not unregister {}: {}", conn, e),
    }
    // The registry's copy of the outbound queue is gone now, so the writer
    // drains what is left, shuts the socket down and exits.
    match writer.await {
        Ok(WriterExit::Drained) => {}
        Ok(exit) => debug!("Writer stopped early ({:?})", exit),
        Err(e) => error!("Writer task for {} failed: {:?}", conn, e),
    }

    match result {
        Ok(close) => {
            info!("Connection closed ({:?})", close);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn read_frames(
    read_half: OwnedReadHalf,
    conn: ConnId,
    hub: &HubHandle,
    outbound: Peer,
    max_line_length: usize,
) -> Result<Close> {
    let mut reader = BufReader::new(read_half);
    loop {
        let line = match protocol::read_line(&mut reader, max_line_length).await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(Close::PeerClosed),
            Err(LineError::TooLong(limit)) => {
                warn!("Line longer than {} bytes, closing", limit);
                return Ok(Close::Violation);
            }
            Err(LineError::InvalidUtf8) => {
                warn!("Protocol violation: line is not valid UTF-8");
                return Ok(Close::Violation);
            }
            Err(LineError::Io(e)) => {
                info!("Connection error: {}", e);
                return Ok(Close::PeerClosed);
            }
        };
        debug!("Received: {}", line.trim_end().escape_debug());

        let message = match ChatMessage::decode(&line) {
            Ok(message) => message,
            Err(violation) => {
                warn!("Protocol violation: {}", violation);
                return Ok(Close::Violation);
            }
        };

        match message {
            ChatMessage::Register { username } => {
                match hub.register(conn, username, outbound.clone()).await {
                    Ok(assigned) => debug!("Registered as {}", assigned),
                    Err(HubError::Registry(e)) => {
                        warn!("Protocol violation: {}", e);
                        return Ok(Close::Violation);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ChatMessage::Message { body } => hub.broadcast_message(conn, body).await?,
            ChatMessage::Disconnect => {
                hub.unregister(conn).await?;
                return Ok(Close::Disconnect);
            }
            other => {
                warn!("Protocol violation: {} is not a client frame", other.tag());
                return Ok(Close::Violation);
            }
        }
    }
}

async fn write_frames(
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
) -> WriterExit {
    let mut exit = WriterExit::Drained;
    while let Some(frame) = queue.recv().await {
        match timeout(write_timeout, write_half.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write error: {}", e);
                exit = WriterExit::Failed;
                break;
            }
            Err(_) => {
                warn!("Write timed out after {:?}", write_timeout);
                exit = WriterExit::TimedOut;
                break;
            }
        }
    }
    queue.close();
    let _ = write_half.shutdown().await;
    exit
}
