//! Application messages and participant identities.
//!
//! Messages travel as JSON objects with a `type` tag, e.g.
//! `{"type":"SEND_MSG_SINGLE","sender":"bob,b1","recipient":"alice,a1","content":"hi"}`.
//! An [`Identity`] is written as the composite string `"name,id"`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Who a participant is: a display name plus an id unique among connected
/// participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    name: String,
    id: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        let id = id.into();
        validate_name(&name)?;
        if id.trim().is_empty() {
            return Err(IdentityError::EmptyId);
        }
        Ok(Self { name, id })
    }

    /// Builds an identity with a freshly generated id.
    pub fn generate(name: impl Into<String>) -> Result<Self, IdentityError> {
        Self::new(name, nanoid::nanoid!())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Names may only contain ASCII letters, digits and `_`, which keeps the
/// `"name,id"` encoding unambiguous.
pub fn validate_name(name: &str) -> Result<(), IdentityError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(IdentityError::InvalidName(name.to_string()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.name, self.id)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once(',') {
            Some((name, id)) => Identity::new(name, id),
            None => Err(IdentityError::Malformed(value)),
        }
    }
}

impl std::str::FromStr for Identity {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Identity::try_from(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Asks the hub for everyone else who is connected.
    GetUsers { sender: Identity },
    /// Answer to [`Message::GetUsers`]; `sender` is the requester.
    GetUsersResponse {
        sender: Identity,
        content: Vec<Identity>,
    },
    SendMsgSingle {
        sender: Identity,
        recipient: Identity,
        content: String,
    },
    UserConnected { sender: Identity },
    UserDisconnected { sender: Identity },
    /// Generated locally when a connection's read side ends. Never valid on
    /// the wire.
    ConnClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GetUsers,
    GetUsersResponse,
    SendMsgSingle,
    UserConnected,
    UserDisconnected,
    ConnClosed,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetUsers => "GET_USERS",
            Self::GetUsersResponse => "GET_USERS_RESPONSE",
            Self::SendMsgSingle => "SEND_MSG_SINGLE",
            Self::UserConnected => "USER_CONNECTED",
            Self::UserDisconnected => "USER_DISCONNECTED",
            Self::ConnClosed => "CONN_CLOSED",
        };
        f.write_str(name)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::GetUsers { .. } => MessageKind::GetUsers,
            Self::GetUsersResponse { .. } => MessageKind::GetUsersResponse,
            Self::SendMsgSingle { .. } => MessageKind::SendMsgSingle,
            Self::UserConnected { .. } => MessageKind::UserConnected,
            Self::UserDisconnected { .. } => MessageKind::UserDisconnected,
            Self::ConnClosed => MessageKind::ConnClosed,
        }
    }

    pub fn sender(&self) -> Option<&Identity> {
        match self {
            Self::GetUsers { sender }
            | Self::GetUsersResponse { sender, .. }
            | Self::SendMsgSingle { sender, .. }
            | Self::UserConnected { sender }
            | Self::UserDisconnected { sender } => Some(sender),
            Self::ConnClosed => None,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
