use anyhow::{Result, ensure};

use crate::{connection::ConnectionSettings, frame::FRAME_CAPACITY};

pub const DEFAULT_CLIENT_HOST: &str = "localhost";
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Undelivered messages a participant may accumulate before new ones are
/// dropped.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Largest application message a connection accepts, in bytes.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mailbox_capacity: usize,
    pub max_message_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_PORT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.host, self.mailbox_capacity, self.max_message_len)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            masked: false,
            max_message_len: self.max_message_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub mailbox_capacity: usize,
    pub max_message_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CLIENT_HOST.to_string(),
            port: DEFAULT_PORT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.host, self.mailbox_capacity, self.max_message_len)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            masked: true,
            max_message_len: self.max_message_len,
        }
    }
}

fn validate_common(host: &str, mailbox_capacity: usize, max_message_len: usize) -> Result<()> {
    ensure!(!host.trim().is_empty(), "host must not be empty");
    ensure!(mailbox_capacity > 0, "mailbox capacity must be at least 1");
    ensure!(
        max_message_len >= FRAME_CAPACITY,
        "max message length must be at least {FRAME_CAPACITY} bytes"
    );
    Ok(())
}
