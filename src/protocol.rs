//! TCCHAT wire format.
//!
//! Every frame is one UTF-8 line terminated by `\n`. Fields are separated by
//! `\t` and the first field is the kind tag. Bodies are free text and may carry
//! tabs of their own, so the decoder re-joins trailing fields into the body.
//! Newlines inside a field are never escaped; producers must reject them.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const TAG_REGISTER: &str = "TCCHAT_REGISTER";
pub const TAG_MESSAGE: &str = "TCCHAT_MESSAGE";
pub const TAG_DISCONNECT: &str = "TCCHAT_DISCONNECT";
pub const TAG_WELCOME: &str = "TCCHAT_WELCOME";
pub const TAG_USER_IN: &str = "TCCHAT_USERIN";
pub const TAG_USER_OUT: &str = "TCCHAT_USEROUT";
pub const TAG_BROADCAST: &str = "TCCHAT_BCAST";

const FIELD_SEPARATOR: char = '\t';

/// A decoded TCCHAT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// client -> server: join with the requested name.
    Register { username: String },
    /// client -> server: chat text.
    Message { body: String },
    /// client -> server: graceful leave.
    Disconnect,
    /// server -> client: registration accepted.
    Welcome { server_name: String },
    /// server -> client: someone joined.
    UserJoined { username: String },
    /// server -> client: someone left.
    UserLeft { username: String },
    /// server -> client: relayed chat text.
    Broadcast { username: String, body: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("empty frame")]
    Empty,
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("{tag} expects {expected} field(s), got {actual}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{0} carries an empty username")]
    EmptyUsername(&'static str),
    #[error("{0} carries a username with control characters")]
    UnprintableUsername(&'static str),
}

impl ChatMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ChatMessage::Register { .. } => TAG_REGISTER,
            ChatMessage::Message { .. } => TAG_MESSAGE,
            ChatMessage::Disconnect => TAG_DISCONNECT,
            ChatMessage::Welcome { .. } => TAG_WELCOME,
            ChatMessage::UserJoined { .. } => TAG_USER_IN,
            ChatMessage::UserLeft { .. } => TAG_USER_OUT,
            ChatMessage::Broadcast { .. } => TAG_BROADCAST,
        }
    }

    /// Decodes one line, with or without its trailing terminator.
    pub fn decode(line: &str) -> Result<Self, ProtocolViolation> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(ProtocolViolation::Empty);
        }

        let (tag, rest) = match line.split_once(FIELD_SEPARATOR) {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (line, None),
        };

        match tag {
            TAG_REGISTER => single_name(TAG_REGISTER, rest)
                .map(|username| ChatMessage::Register { username }),
            TAG_USER_IN => single_name(TAG_USER_IN, rest)
                .map(|username| ChatMessage::UserJoined { username }),
            TAG_USER_OUT => single_name(TAG_USER_OUT, rest)
                .map(|username| ChatMessage::UserLeft { username }),
            TAG_WELCOME => single_field(TAG_WELCOME, rest)
                .map(|server_name| ChatMessage::Welcome { server_name }),
            TAG_MESSAGE => match rest {
                // The whole remainder is the body, tabs included.
                Some(body) => Ok(ChatMessage::Message {
                    body: body.to_string(),
                }),
                None => Err(field_count(TAG_MESSAGE, 1, 0)),
            },
            TAG_BROADCAST => match rest.and_then(|rest| rest.split_once(FIELD_SEPARATOR)) {
                Some((username, _)) if username.chars().any(char::is_control) => {
                    Err(ProtocolViolation::UnprintableUsername(TAG_BROADCAST))
                }
                Some((username, body)) => Ok(ChatMessage::Broadcast {
                    username: username.to_string(),
                    body: body.to_string(),
                }),
                None => Err(field_count(TAG_BROADCAST, 2, rest.map_or(0, |_| 1))),
            },
            TAG_DISCONNECT => match rest {
                None => Ok(ChatMessage::Disconnect),
                Some(rest) => Err(field_count(TAG_DISCONNECT, 0, count_fields(rest))),
            },
            other => Err(ProtocolViolation::UnknownTag(other.to_string())),
        }
    }

    /// Encodes the frame as a terminated line.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

/// The unterminated line, as it is logged.
impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            ChatMessage::Register { username }
            | ChatMessage::UserJoined { username }
            | ChatMessage::UserLeft { username } => write!(f, "{tag}\t{username}"),
            ChatMessage::Welcome { server_name } => write!(f, "{tag}\t{server_name}"),
            ChatMessage::Message { body } => write!(f, "{tag}\t{body}"),
            ChatMessage::Broadcast { username, body } => write!(f, "{tag}\t{username}\t{body}"),
            ChatMessage::Disconnect => f.write_str(tag),
        }
    }
}

fn count_fields(rest: &str) -> usize {
    rest.split(FIELD_SEPARATOR).count()
}

fn field_count(tag: &'static str, expected: usize, actual: usize) -> ProtocolViolation {
    ProtocolViolation::FieldCount {
        tag,
        expected,
        actual,
    }
}

fn single_field(tag: &'static str, rest: Option<&str>) -> Result<String, ProtocolViolation> {
    match rest {
        Some(field) if !field.contains(FIELD_SEPARATOR) => Ok(field.to_string()),
        Some(rest) => Err(field_count(tag, 1, count_fields(rest))),
        None => Err(field_count(tag, 1, 0)),
    }
}

fn single_name(tag: &'static str, rest: Option<&str>) -> Result<String, ProtocolViolation> {
    let name = single_field(tag, rest)?;
    if name.is_empty() {
        return Err(ProtocolViolation::EmptyUsername(tag));
    }
    if name.chars().any(char::is_control) {
        return Err(ProtocolViolation::UnprintableUsername(tag));
    }
    Ok(name)
}

#[derive(Debug, Error)]
pub enum LineError {
    #[error("line exceeds {0} bytes")]
    TooLong(usize),
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one `\n`-terminated line of at most `limit` bytes (terminator included).
///
/// Returns `Ok(None)` on a clean end of stream. A final line without a
/// terminator counts as a broken connection; bytes that are not UTF-8 are
/// reported as [`LineError::InvalidUtf8`] rather than as an I/O failure.
pub async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = match (&mut *reader).take(limit as u64).read_line(&mut line).await {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => return Err(LineError::InvalidUtf8),
        Err(e) => return Err(e.into()),
    };
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if n >= limit {
            return Err(LineError::TooLong(limit));
        }
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unterminated line").into());
    }
    Ok(Some(line))
}
