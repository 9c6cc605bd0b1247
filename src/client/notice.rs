use std::fmt;

use super::InputError;
use crate::protocol::ChatMessage;

/// Something the operator should see, rendered with `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Welcome(String),
    UserJoined(String),
    UserLeft(String),
    Chat { username: String, body: String },
    Rejected(InputError),
    Leaving,
    Left,
    ConnectionLost(String),
    ProtocolFault(String),
}

impl Notice {
    /// The notice for a frame the server may push at any time, `None` for
    /// anything a client should never receive mid-session.
    pub fn from_message(message: ChatMessage) -> Option<Self> {
        match message {
            ChatMessage::UserJoined { username } => Some(Notice::UserJoined(username)),
            ChatMessage::UserLeft { username } => Some(Notice::UserLeft(username)),
            ChatMessage::Broadcast { username, body } => Some(Notice::Chat { username, body }),
            _ => None,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Welcome(server) => write!(f, "Welcome to: {server}"),
            Notice::UserJoined(name) => write!(f, "{name} has joined the chat."),
            Notice::UserLeft(name) => write!(f, "{name} has left the chat."),
            Notice::Chat { username, body } => write!(f, "{username}: {body}"),
            Notice::Rejected(e) => write!(f, "{e}"),
            Notice::Leaving => f.write_str("Leaving the chat..."),
            Notice::Left => f.write_str("Successfully left the chat."),
            Notice::ConnectionLost(reason) => write!(f, "Connection error: {reason}"),
            Notice::ProtocolFault(line) => {
                write!(f, "Unexpected data from server, closing: {line:?}")
            }
        }
    }
}
