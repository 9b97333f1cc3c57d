//! Error types for each layer of the chat stack.

use std::io;

use http::StatusCode;
use thiserror::Error;

use crate::{frame::Opcode, message::MessageKind};

/// Building or parsing a single wire frame failed.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {len} bytes does not fit a frame of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("frame needs {needed} bytes but the buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("declared frame of {len} bytes exceeds the frame capacity of {capacity} bytes")]
    FrameTooLarge { len: usize, capacity: usize },

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("64-bit extended payload length is not supported")]
    UnsupportedLength,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Moving an application message across a connection failed. Every variant
/// ends use of the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,

    #[error("socket error: {0}")]
    Io(#[source] io::Error),

    #[error("malformed frame: {0}")]
    Frame(#[source] FrameError),

    #[error("length frame carries {0} bytes, expected 8")]
    MalformedLength(usize),

    #[error("message of {len} bytes exceeds the limit of {max} bytes")]
    MessageTooLarge { len: u64, max: usize },

    #[error("announced {announced} bytes but received {received}")]
    LengthMismatch { announced: u64, received: usize },

    #[error("unexpected {0} frame inside a fragmented message")]
    UnexpectedFrame(Opcode),
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => Self::Io(err),
            other => Self::Frame(other),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// The HTTP upgrade exchange failed, on either side.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("could not connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("http failure during handshake: {0}")]
    Http(#[from] hyper::Error),

    #[error("could not build handshake request: {0}")]
    Request(#[from] http::Error),

    #[error("handshake status code is {0}, expected 101")]
    Status(StatusCode),

    #[error("handshake response is not an upgrade to websocket")]
    NotUpgrade,

    #[error("handshake response key is invalid")]
    KeyMismatch,

    #[error("request is missing the Sec-WebSocket-Key header")]
    MissingKey,

    #[error("no chat endpoint at {0}")]
    UnknownPath(String),

    #[error("request does not name a participant: {0}")]
    MissingIdentity(&'static str),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("participant {0} is already connected")]
    Duplicate(String),
}

impl HandshakeError {
    /// Status the server answers with when it rejects an upgrade request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingKey | Self::MissingIdentity(_) | Self::Identity(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownPath(_) => StatusCode::NOT_FOUND,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("participant {0} is already registered")]
    AlreadyRegistered(String),

    #[error("participant {0} is not registered")]
    NotRegistered(String),

    #[error("{0} messages cannot be routed")]
    Unroutable(MessageKind),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity {0:?} is not of the form name,id")]
    Malformed(String),

    #[error("name {0:?} may only contain 0-9, A-Z, a-z and _")]
    InvalidName(String),

    #[error("identity id must not be empty")]
    EmptyId,
}

/// Queuing an outbound message failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("the connection was closed")]
    Closed,

    #[error("the outbound queue is full")]
    Full,
}
