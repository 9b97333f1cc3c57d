//! Per-connection driver shared by the server and the client.
//!
//! A [`Connection`] owns the upgraded socket and runs two tasks over it. The
//! read task decodes inbound messages and hands each one to a [`Dispatch`]
//! implementation; the write task drains the connection's outbound
//! [`Mailbox`] onto the socket. When the read side ends for any reason the
//! dispatcher receives exactly one [`Message::ConnClosed`] and the mailbox is
//! closed, which in turn stops the write task. A failed write stops the read
//! task too, so a broken socket is reported the same way as a hangup.

use std::{future::Future, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::{Notify, mpsc, watch},
};
use tracing::{debug, warn};

use crate::{
    error::TransportError,
    mailbox::Mailbox,
    message::Message,
    transport::{MessageReader, MessageWriter},
};

/// Receives every message decoded from a connection, in arrival order.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, message: Message) -> impl Future<Output = ()> + Send;
}

/// Adapts a plain callback into a [`Dispatch`].
pub struct Callback<F>(pub F);

impl<F> Dispatch for Callback<F>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    async fn dispatch(&self, message: Message) {
        (self.0)(message)
    }
}

/// Lifecycle of a connection. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Clients mask their frames, servers do not.
    pub masked: bool,
    pub max_message_len: usize,
}

pub struct Connection {
    mailbox: Mailbox,
    state: watch::Receiver<ConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl Connection {
    /// Starts driving `io`. `outbox` must be the receiver paired with
    /// `mailbox`.
    pub fn spawn<IO, D>(
        io: IO,
        peer: impl Into<String>,
        mailbox: Mailbox,
        outbox: mpsc::Receiver<Message>,
        dispatch: D,
        settings: ConnectionSettings,
    ) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
        D: Dispatch,
    {
        let peer = peer.into();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);

        let (reader, writer) = tokio::io::split(io);
        let reader = MessageReader::new(reader, settings.max_message_len);
        let writer = MessageWriter::new(writer, settings.masked);
        let write_failed = Arc::new(Notify::new());

        let read_task = tokio::spawn(read_loop(
            reader,
            dispatch,
            mailbox.clone(),
            Arc::clone(&state_tx),
            Arc::clone(&write_failed),
            peer.clone(),
        ));
        let write_task = tokio::spawn(write_loop(
            writer,
            outbox,
            mailbox.clone(),
            Arc::clone(&state_tx),
            write_failed,
            peer.clone(),
        ));
        advance(&state_tx, ConnectionState::Open);

        let supervisor_state = Arc::clone(&state_tx);
        let supervisor_peer = peer;
        tokio::spawn(async move {
            let (read, write) = tokio::join!(read_task, write_task);
            if let Err(err) = read {
                warn!(peer = %supervisor_peer, error = ?err, "read task failed");
            }
            if let Err(err) = write {
                warn!(peer = %supervisor_peer, error = ?err, "write task failed");
            }
            advance(&supervisor_state, ConnectionState::Closed);
            debug!(peer = %supervisor_peer, "connection closed");
        });

        Self {
            mailbox,
            state,
            state_tx,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stops accepting outbound messages; the write task flushes what is
    /// queued and shuts down the write side of the socket. Returns `true`
    /// only for the first call.
    pub fn close(&self) -> bool {
        let closed = self.mailbox.close();
        advance(&self.state_tx, ConnectionState::Closing);
        closed
    }

    /// Waits until both tasks have finished.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}

async fn read_loop<R, D>(
    mut reader: MessageReader<R>,
    dispatch: D,
    mailbox: Mailbox,
    state: Arc<watch::Sender<ConnectionState>>,
    write_failed: Arc<Notify>,
    peer: String,
) where
    R: AsyncRead + Unpin,
    D: Dispatch,
{
    loop {
        let received = select! {
            received = reader.receive() => received,
            _ = write_failed.notified() => {
                debug!(%peer, "stopping reads after a failed write");
                break;
            }
        };

        let payload = match received {
            Ok(payload) => payload,
            Err(TransportError::Closed) => {
                debug!(%peer, "peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(%peer, error = %err, "connection read failed");
                break;
            }
        };

        match Message::from_bytes(&payload) {
            Ok(Message::ConnClosed) => {
                warn!(%peer, "discarding CONN_CLOSED received from the wire");
            }
            Ok(message) => dispatch.dispatch(message).await,
            Err(err) => warn!(%peer, error = %err, "discarding undecodable message"),
        }
    }

    advance(&state, ConnectionState::Closing);
    dispatch.dispatch(Message::ConnClosed).await;
    mailbox.close();
}

async fn write_loop<W>(
    mut writer: MessageWriter<W>,
    mut outbox: mpsc::Receiver<Message>,
    mailbox: Mailbox,
    state: Arc<watch::Sender<ConnectionState>>,
    write_failed: Arc<Notify>,
    peer: String,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%peer, kind = %message.kind(), error = %err, "failed to encode message");
                continue;
            }
        };
        if let Err(err) = writer.send(&payload).await {
            warn!(%peer, error = %err, "connection write failed");
            // Stored as a permit if the read task is mid-dispatch.
            write_failed.notify_one();
            break;
        }
    }

    advance(&state, ConnectionState::Closing);
    mailbox.close();
    if let Err(err) = writer.shutdown().await {
        debug!(%peer, error = %err, "failed to shut down write side");
    }
}
