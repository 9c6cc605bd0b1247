mod hub;
mod registry;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, info_span};
use tracing_futures::Instrument;

use crate::config::ServerConfig;

pub use hub::{Hub, HubError, HubHandle, Peer, ServerEvent};
pub use registry::{ConnId, Registry, RegistryError};

/// Chat server that accepts connections and relays TCCHAT frames between them.
///
/// Each accepted connection runs in its own task. Registry state lives in a
/// single [`Hub`] task that all connection tasks talk to.
pub struct ChatServer {
    listener: TcpListener,
    hub: HubHandle,
    config: Arc<ServerConfig>,
}

impl ChatServer {
    /// Binds the listener and starts the registry task.
    ///
    /// # Arguments
    /// - `config`: Bind address, server name and per-connection limits.
    ///
    /// # Returns
    /// A `Result` containing the server or an error if binding fails.
    ///
    /// # Examples
    /// ```no_run
    /// # async fn doc() -> anyhow::Result<()> {
    /// use tcchat::{ChatServer, ServerConfig};
    ///
    /// let server = ChatServer::bind(ServerConfig::default()).await?;
    /// server.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        let hub = Hub::spawn(config.server_name.clone());
        info!("Chat server bound to {}", listener.local_addr()?);
        Ok(ChatServer {
            listener,
            hub,
            config: Arc::new(config),
        })
    }

    /// The address the listener actually bound, useful with port `0`.
    ///
    /// # Returns
    /// A `Result` containing the socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle onto the registry, e.g. to inspect who is connected.
    ///
    /// # Returns
    /// A cloned `HubHandle`; it stays usable after `run` has taken the server.
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Subscribes to join, leave and registry-empty events.
    ///
    /// # Returns
    /// A receiver that sees every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.hub.subscribe()
    }

    /// Accepts connections forever, one task per connection.
    ///
    /// # Returns
    /// A `Result` that only resolves if accepting a connection fails.
    pub async fn run(self) -> Result<()> {
        let mut next_id = 0u64;
        loop {
            let (socket, addr) = self.listener.accept().await.context("accept failed")?;
            next_id += 1;
            let conn = ConnId(next_id);
            let hub = self.hub.clone();
            let config = self.config.clone();
            info!("Accepted connection {} from {}", conn, addr);

            let span = info_span!("connection", %conn, peer = %addr);
            tokio::spawn(
                async move {
                    if let Err(e) = session::handle_client(socket, addr, conn, hub, config).await {
                        error!("Client {} error: {:?}", addr, e);
                    }
                }
                .instrument(span),
            );
        }
    }
}
