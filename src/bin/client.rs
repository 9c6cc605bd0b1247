//! TCCHAT client.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin client
//! cargo run --bin client -- 192.168.1.20 9000
//! ```

use std::io::Write;
use std::process;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use tcchat::client::{Notice, SessionEnd};
use tcchat::config::DEFAULT_PORT;
use tcchat::{Client, ClientConfig, create_runtime};

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "TCCHAT line-protocol chat client", long_about = None)]
struct Args {
    /// Server IP address or host name
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() {
    tcchat::logging::init_tracing(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();
    let config = ClientConfig {
        server_addr: format!("{}:{}", args.host, args.port),
        ..ClientConfig::default()
    };

    let result = create_runtime().and_then(|runtime| {
        let result = runtime.block_on(chat(config));
        // Stdin is read on a blocking thread that would never finish on its own.
        runtime.shutdown_background();
        result
    });

    process::exit(match result {
        Ok(SessionEnd::Quit) => 0,
        Ok(_) => 1,
        Err(e) => {
            eprintln!("Connection Error: {:#}", e);
            1
        }
    });
}

async fn chat(config: ClientConfig) -> Result<SessionEnd> {
    let mut client = Client::connect(config).await?;
    let mut input = BufReader::new(tokio::io::stdin());

    print!("Enter username: ");
    std::io::stdout().flush()?;
    let mut username = String::new();
    input.read_line(&mut username).await?;

    if let Some(server_name) = client.register(&username).await? {
        println!("{}", Notice::Welcome(server_name));
    }

    let (notices, mut rendered) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(notice) = rendered.recv().await {
            let _ = stdout.write_all(format!("{notice}\n").as_bytes()).await;
            let _ = stdout.flush().await;
        }
    });

    let end = client.run(input, notices).await?;
    let _ = printer.await;
    Ok(end)
}
