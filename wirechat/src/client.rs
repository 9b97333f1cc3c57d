use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
    time::timeout,
};
use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    connection::{Callback, Connection, ConnectionState},
    console::{ConsoleCommand, HELP},
    error::{HandshakeError, SendError},
    handshake,
    mailbox::mailbox,
    message::{Identity, Message},
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A live connection to the chat server.
pub struct ClientHandle {
    identity: Identity,
    connection: Connection,
}

/// Connects as `identity`. `handler` runs on the connection's read task for
/// every inbound message, ending with exactly one [`Message::ConnClosed`].
pub async fn connect<F>(
    config: &ClientConfig,
    identity: Identity,
    handler: F,
) -> Result<ClientHandle, HandshakeError>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    let io = handshake::connect(&config.host, config.port, &identity).await?;
    info!(server = %config.addr(), participant = %identity, "connected to chat server");

    let (mailbox, outbox) = mailbox(config.mailbox_capacity);
    let connection = Connection::spawn(
        io,
        config.addr(),
        mailbox,
        outbox,
        Callback(handler),
        config.connection_settings(),
    );

    Ok(ClientHandle {
        identity,
        connection,
    })
}

impl ClientHandle {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues `message` for the server without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        self.connection.mailbox().deliver(message)
    }

    /// Asks the server who else is online.
    pub fn request_users(&self) -> Result<(), SendError> {
        self.send(Message::GetUsers {
            sender: self.identity.clone(),
        })
    }

    pub fn send_to(&self, recipient: Identity, content: impl Into<String>) -> Result<(), SendError> {
        self.send(Message::SendMsgSingle {
            sender: self.identity.clone(),
            recipient,
            content: content.into(),
        })
    }

    /// Starts an orderly close. Returns `true` only for the first call.
    pub fn quit(&self) -> bool {
        self.connection.close()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub async fn closed(&self) {
        self.connection.closed().await
    }
}

/// Participants the terminal client currently knows to be online.
#[derive(Debug, Default)]
pub struct Roster {
    peers: BTreeMap<String, Identity>,
}

impl Roster {
    pub fn replace(&mut self, peers: Vec<Identity>) {
        self.peers = peers
            .into_iter()
            .map(|peer| (peer.id().to_string(), peer))
            .collect();
    }

    pub fn insert(&mut self, peer: Identity) {
        self.peers.insert(peer.id().to_string(), peer);
    }

    pub fn remove(&mut self, peer: &Identity) {
        self.peers.remove(peer.id());
    }

    /// Finds a participant by exact id, or else by a name only one of them has.
    pub fn resolve(&self, target: &str) -> Result<Identity> {
        if let Some(peer) = self.peers.get(target) {
            return Ok(peer.clone());
        }

        let matches: Vec<&Identity> = self
            .peers
            .values()
            .filter(|peer| peer.name() == target)
            .collect();
        match matches.as_slice() {
            [] => bail!("nobody called '{target}' is online, try /users"),
            [peer] => Ok((*peer).clone()),
            several => {
                let ids: Vec<&str> = several.iter().map(|peer| peer.id()).collect();
                bail!("'{target}' is ambiguous, use one of the ids: {}", ids.join(", "))
            }
        }
    }
}

pub async fn run(config: ClientConfig, identity: Identity) -> Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let handle = connect(&config, identity, move |message| {
        let _ = events_tx.send(message);
    })
    .await
    .with_context(|| format!("failed to connect to {}", config.addr()))?;

    write_stdout(&format!(
        "*** connected as {} ({})",
        handle.identity().name(),
        handle.identity().id()
    ))
    .await?;
    handle.request_users()?;

    let mut roster = Roster::default();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&handle, &mut roster, &mut events, &mut stdin, &mut input).await?;
    shutdown_connection(&handle).await;

    Ok(())
}

async fn run_client_loop(
    handle: &ClientHandle,
    roster: &mut Roster,
    events: &mut mpsc::UnboundedReceiver<Message>,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        select! {
            event = events.recv() => {
                if !handle_server_message(event, roster).await? {
                    break;
                }
            }
            // A partial line read before another branch won stays in `input`.
            bytes_read = stdin.read_line(input) => {
                let keep_going = handle_stdin_input(bytes_read, input, handle, roster).await?;
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(event: Option<Message>, roster: &mut Roster) -> Result<bool> {
    match event {
        Some(Message::ConnClosed) | None => {
            write_stdout("*** connection closed").await?;
            Ok(false)
        }
        Some(message) => {
            render_server_message(message, roster).await?;
            Ok(true)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    handle: &ClientHandle,
    roster: &Roster,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    let command = match ConsoleCommand::parse(text) {
        Ok(command) => command,
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            return Ok(true);
        }
    };

    let sent = match command {
        ConsoleCommand::Users => handle.request_users(),
        ConsoleCommand::Msg { target, text } => match roster.resolve(&target) {
            Ok(recipient) => handle.send_to(recipient, text),
            Err(err) => {
                write_stderr(&format!("!!! {err}")).await?;
                return Ok(true);
            }
        },
        ConsoleCommand::Help => {
            write_stdout(HELP).await?;
            return Ok(true);
        }
        ConsoleCommand::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
    };

    match sent {
        Ok(()) => Ok(true),
        Err(SendError::Full) => {
            write_stderr("!!! too many pending messages, try again").await?;
            Ok(true)
        }
        Err(SendError::Closed) => {
            write_stdout("*** connection closed").await?;
            Ok(false)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(handle: &ClientHandle) {
    handle.quit();
    if timeout(CLOSE_TIMEOUT, handle.closed()).await.is_err() {
        warn!("connection did not close in time");
    }
}

async fn render_server_message(message: Message, roster: &mut Roster) -> io::Result<()> {
    match message {
        Message::GetUsersResponse { content, .. } => {
            let names: Vec<&str> = content.iter().map(Identity::name).collect();
            let line = if names.is_empty() {
                "*** nobody else is online".to_string()
            } else {
                format!("*** currently online: {}", names.join(", "))
            };
            roster.replace(content);
            write_stdout(&line).await
        }
        Message::UserConnected { sender } => {
            let line = format!("*** {} joined the chat", sender.name());
            roster.insert(sender);
            write_stdout(&line).await
        }
        Message::UserDisconnected { sender } => {
            roster.remove(&sender);
            write_stdout(&format!("*** {} left the chat", sender.name())).await
        }
        Message::SendMsgSingle {
            sender, content, ..
        } => write_stdout(&format!("<{}> {content}", sender.name())).await,
        Message::GetUsers { .. } | Message::ConnClosed => Ok(()),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
