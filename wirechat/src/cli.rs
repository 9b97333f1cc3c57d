use clap::{Args, Parser, Subcommand};

use crate::config::{
    ClientConfig, DEFAULT_CLIENT_HOST, DEFAULT_MAILBOX_CAPACITY, DEFAULT_MAX_MESSAGE_LEN,
    DEFAULT_PORT, DEFAULT_SERVER_HOST, ServerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, upgrading HTTP connections on /chat.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface to bind to.
    #[arg(long, default_value = DEFAULT_SERVER_HOST)]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Messages queued per participant before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    pub mailbox_capacity: usize,

    /// Largest message accepted from a client, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
    pub max_message_len: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name; letters, digits and underscores only.
    #[arg(long)]
    pub name: String,

    /// Participant id. A random one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Server host to connect to.
    #[arg(long, default_value = DEFAULT_CLIENT_HOST)]
    pub host: String,

    /// Server port to connect to.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            mailbox_capacity: args.mailbox_capacity,
            max_message_len: args.max_message_len,
        }
    }
}

impl From<&ClientArgs> for ClientConfig {
    fn from(args: &ClientArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            ..ClientConfig::default()
        }
    }
}
