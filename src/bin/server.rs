//! TCCHAT server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --port 9000 --name "Lobby"
//! ```

use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::Parser;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use tcchat::config::{DEFAULT_PORT, DEFAULT_SERVER_NAME};
use tcchat::server::ServerEvent;
use tcchat::{ChatServer, ServerConfig, create_runtime};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "TCCHAT line-protocol chat server", long_about = None)]
struct Args {
    /// Host address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Server name announced to clients on registration
    #[arg(short = 'n', long, default_value = DEFAULT_SERVER_NAME)]
    name: String,
}

fn main() -> Result<()> {
    #[cfg(feature = "console")]
    console_subscriber::init();
    #[cfg(not(feature = "console"))]
    tcchat::logging::init_tracing(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        server_name: args.name,
        ..ServerConfig::default()
    };

    let runtime = create_runtime()?;
    let result = runtime.block_on(serve(config));
    // The shutdown prompt may still be blocked on stdin.
    runtime.shutdown_background();
    result
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Launching server...");
    let server = ChatServer::bind(config).await?;
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(confirm_shutdown_when_empty(server.subscribe(), stop_tx));

    tokio::select! {
        result = server.run() => result,
        _ = stop_rx => {
            info!("Shutting down server...");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down server...");
            Ok(())
        }
    }
}

/// Asks the operator whether to stop each time the last user leaves.
async fn confirm_shutdown_when_empty(
    mut events: broadcast::Receiver<ServerEvent>,
    stop: oneshot::Sender<()>,
) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::RegistryEmpty) => {
                info!("All users have left the chat");
                match tokio::task::spawn_blocking(ask_shutdown).await {
                    Ok(Ok(true)) => {
                        let _ = stop.send(());
                        return;
                    }
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => warn!("Could not read answer: {}", e),
                    Err(e) => warn!("Prompt task failed: {}", e),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} server events", n),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn ask_shutdown() -> io::Result<bool> {
    print!("Do you wish to shut down the server? yes/no : ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
