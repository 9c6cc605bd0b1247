use std::io::Cursor;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use tcchat::client::{InputError, Notice, SessionEnd};
use tcchat::protocol::{self, ChatMessage};
use tcchat::{Client, ClientConfig};

const WAIT: Duration = Duration::from_secs(5);

/// Server side of one scripted connection.
struct FakeServer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn next(&mut self) -> Result<Option<ChatMessage>> {
        match timeout(WAIT, protocol::read_line(&mut self.reader, 4096)).await?? {
            Some(line) => Ok(Some(ChatMessage::decode(&line)?)),
            None => Ok(None),
        }
    }

    async fn push(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

async fn listen() -> Result<(TcpListener, ClientConfig)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let config = ClientConfig {
        server_addr: listener.local_addr()?.to_string(),
        ..ClientConfig::default()
    };
    Ok((listener, config))
}

/// Connects a client and completes the handshake against a fake server.
async fn registered_pair() -> Result<(Client, FakeServer)> {
    let (listener, config) = listen().await?;
    let mut client = Client::connect(config).await?;
    let (socket, _) = listener.accept().await?;
    let (read_half, writer) = socket.into_split();
    let mut server = FakeServer {
        reader: BufReader::new(read_half),
        writer,
    };

    let handshake = tokio::spawn(async move {
        let name = client.register("tester").await?;
        Ok::<_, anyhow::Error>((client, name))
    });
    assert_eq!(
        server.next().await?,
        Some(ChatMessage::Register {
            username: "tester".to_string()
        })
    );
    server.push("TCCHAT_WELCOME\tFake\n").await?;
    let (client, name) = handshake.await??;
    assert_eq!(name.as_deref(), Some("Fake"));
    Ok((client, server))
}

async fn collect_notices(mut rx: mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Some(notice) = rx.recv().await {
        out.push(notice);
    }
    out
}

#[tokio::test]
async fn long_messages_never_reach_the_wire() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let script = format!("{}\n{}\n!q\n", "x".repeat(141), "y".repeat(140));
    let (notices, rendered) = mpsc::unbounded_channel();

    let end = timeout(WAIT, client.run(Cursor::new(script.into_bytes()), notices)).await??;
    assert_eq!(end, SessionEnd::Quit);

    assert_eq!(
        server.next().await?,
        Some(ChatMessage::Message {
            body: "y".repeat(140)
        })
    );
    assert_eq!(server.next().await?, Some(ChatMessage::Disconnect));
    assert_eq!(server.next().await?, None);

    let notices = collect_notices(rendered).await;
    assert_eq!(
        notices,
        [
            Notice::Rejected(InputError::TooLong { max: 140 }),
            Notice::Leaving,
            Notice::Left,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn quit_command_is_trimmed() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, _rendered) = mpsc::unbounded_channel();

    let end = timeout(WAIT, client.run(BufReader::new(&b"  !q  \n"[..]), notices)).await??;
    assert_eq!(end, SessionEnd::Quit);
    assert_eq!(server.next().await?, Some(ChatMessage::Disconnect));
    Ok(())
}

#[tokio::test]
async fn end_of_input_disconnects() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, _rendered) = mpsc::unbounded_channel();

    let end = timeout(WAIT, client.run(BufReader::new(&b""[..]), notices)).await??;
    assert_eq!(end, SessionEnd::Quit);
    assert_eq!(server.next().await?, Some(ChatMessage::Disconnect));
    assert_eq!(server.next().await?, None);
    Ok(())
}

#[tokio::test]
async fn unexpected_frame_is_fatal() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, rendered) = mpsc::unbounded_channel();
    // Keep the operator side open so only the receive path can end things.
    let (_typing, input) = tokio::io::duplex(64);

    server.push("TCCHAT_USERIN\tbob\n").await?;
    server.push("TCCHAT_WELCOME\tagain\n").await?;

    let end = timeout(WAIT, client.run(BufReader::new(input), notices)).await??;
    assert_eq!(end, SessionEnd::ProtocolFault);
    // The client closed its side without sending anything else.
    assert_eq!(server.next().await?, None);

    let notices = collect_notices(rendered).await;
    assert_eq!(
        notices,
        [
            Notice::UserJoined("bob".to_string()),
            Notice::ProtocolFault("TCCHAT_WELCOME\tagain".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn server_hangup_ends_the_session() -> Result<()> {
    let (client, server) = registered_pair().await?;
    let (notices, rendered) = mpsc::unbounded_channel();
    let (_typing, input) = tokio::io::duplex(64);

    drop(server);
    let end = timeout(WAIT, client.run(BufReader::new(input), notices)).await??;
    assert_eq!(end, SessionEnd::ConnectionLost);

    let notices = collect_notices(rendered).await;
    assert!(matches!(notices.as_slice(), [Notice::ConnectionLost(_)]));
    Ok(())
}

#[tokio::test]
async fn relayed_chat_is_rendered() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, mut rendered) = mpsc::unbounded_channel();
    let (mut typing, input) = tokio::io::duplex(64);
    let session = tokio::spawn(client.run(BufReader::new(input), notices));

    server.push("TCCHAT_BCAST\talice\tone\ttwo\n").await?;
    server.push("TCCHAT_USEROUT\talice\n").await?;

    let first = timeout(WAIT, rendered.recv())
        .await?
        .ok_or_else(|| anyhow!("no notice"))?;
    assert_eq!(first.to_string(), "alice: one\ttwo");
    let second = timeout(WAIT, rendered.recv())
        .await?
        .ok_or_else(|| anyhow!("no notice"))?;
    assert_eq!(second.to_string(), "alice has left the chat.");

    typing.write_all(b"!q\n").await?;
    assert_eq!(timeout(WAIT, session).await???, SessionEnd::Quit);
    Ok(())
}

#[tokio::test]
async fn non_welcome_reply_is_not_fatal_to_registration() -> Result<()> {
    let (listener, config) = listen().await?;
    let mut client = Client::connect(config).await?;
    let (mut socket, _) = listener.accept().await?;
    socket.write_all(b"TCCHAT_USERIN\tsomeone\n").await?;

    assert_eq!(client.register("tester").await?, None);
    Ok(())
}

#[tokio::test]
async fn invalid_username_is_refused_locally() -> Result<()> {
    let (_listener, config) = listen().await?;
    let mut client = Client::connect(config).await?;
    let err = client.register("   ").await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<InputError>(),
        Some(&InputError::EmptyUsername)
    );
    Ok(())
}

#[tokio::test]
async fn connect_reports_refused_address() -> Result<()> {
    let (listener, config) = listen().await?;
    drop(listener);
    assert!(Client::connect(config).await.is_err());
    Ok(())
}

#[tokio::test]
async fn receive_decodes_one_frame_at_a_time() -> Result<()> {
    let (mut client, mut server) = registered_pair().await?;
    server.push("TCCHAT_BCAST\talice\thi\nTCCHAT_USERIN\tbob\n").await?;

    assert_eq!(
        client.receive().await?,
        Some(ChatMessage::Broadcast {
            username: "alice".to_string(),
            body: "hi".to_string()
        })
    );
    assert_eq!(
        client.receive().await?,
        Some(ChatMessage::UserJoined {
            username: "bob".to_string()
        })
    );

    drop(server);
    assert_eq!(client.receive().await?, None);
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_from_the_server_is_a_protocol_fault() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, rendered) = mpsc::unbounded_channel();
    let (_typing, input) = tokio::io::duplex(64);

    server.writer.write_all(b"TCCHAT_BCAST\tbob\t\xc3\x28\n").await?;
    let end = timeout(WAIT, client.run(BufReader::new(input), notices)).await??;
    assert_eq!(end, SessionEnd::ProtocolFault);
    assert_eq!(server.next().await?, None);

    let notices = collect_notices(rendered).await;
    assert!(matches!(notices.as_slice(), [Notice::ProtocolFault(_)]));
    Ok(())
}

#[tokio::test]
async fn escape_sequences_in_pushed_names_are_refused() -> Result<()> {
    let (client, mut server) = registered_pair().await?;
    let (notices, rendered) = mpsc::unbounded_channel();
    let (_typing, input) = tokio::io::duplex(64);

    server.push("TCCHAT_USERIN\t\x1b[31mred\n").await?;
    let end = timeout(WAIT, client.run(BufReader::new(input), notices)).await??;
    assert_eq!(end, SessionEnd::ProtocolFault);

    let notices = collect_notices(rendered).await;
    assert!(matches!(notices.as_slice(), [Notice::ProtocolFault(_)]));
    Ok(())
}
