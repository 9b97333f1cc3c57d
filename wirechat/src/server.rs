use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    connection::{Connection, Dispatch},
    error::{HandshakeError, HubError},
    handshake,
    hub::{Hub, Participant},
    mailbox::mailbox,
    message::{Identity, Message},
};

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    hub: Arc<Hub>,
    config: ServerConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState {
                hub: Arc::new(Hub::new()),
                config,
            }),
        }
    }

    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {}", config.addr()))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &ServerState) {
    let closed = state.hub.close_all().await;
    info!(connections = closed, "server shutting down");
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_http_connection(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_http_connection(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let service = service_fn(move |request| {
            let state = Arc::clone(&state);
            async move { Ok::<_, Infallible>(handle_upgrade(request, peer, state).await) }
        });

        if let Err(err) = http1::Builder::new()
            .timer(TokioTimer::new())
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            debug!(peer = %peer, error = ?err, "http connection ended with error");
        }
    });
}

async fn handle_upgrade(
    mut request: Request<Incoming>,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Response<Full<Bytes>> {
    let upgrade = match handshake::parse_upgrade_request(&request) {
        Ok(upgrade) => upgrade,
        Err(err) => {
            warn!(peer = %peer, error = %err, "rejecting upgrade request");
            return handshake::rejection(&err);
        }
    };

    let identity = upgrade.identity.clone();
    if state.hub.is_registered(identity.id()).await {
        let err = HandshakeError::Duplicate(identity.id().to_string());
        warn!(peer = %peer, error = %err, "rejecting upgrade request");
        return handshake::rejection(&err);
    }

    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => run_session(TokioIo::new(upgraded), identity, peer, state).await,
            Err(err) => warn!(peer = %peer, error = %err, "connection upgrade failed"),
        }
    });

    handshake::switching_protocols(&upgrade)
}

async fn run_session<IO>(io: IO, identity: Identity, peer: SocketAddr, state: Arc<ServerState>)
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mailbox, outbox) = mailbox(state.config.mailbox_capacity);
    let participant = Arc::new(Participant::new(identity.clone(), mailbox.clone()));
    if let Err(err) = state.hub.register(participant).await {
        warn!(peer = %peer, error = %err, "dropping upgraded connection");
        return;
    }

    info!(peer = %peer, participant = %identity, "participant connected");
    let session = Session {
        hub: Arc::clone(&state.hub),
        identity: identity.clone(),
    };
    let connection = Connection::spawn(
        io,
        peer.to_string(),
        mailbox,
        outbox,
        session,
        state.config.connection_settings(),
    );
    connection.closed().await;
    info!(peer = %peer, participant = %identity, "participant disconnected");
}

/// Applies one connection's inbound messages to the hub.
struct Session {
    hub: Arc<Hub>,
    identity: Identity,
}

impl Dispatch for Session {
    async fn dispatch(&self, message: Message) {
        let id = self.identity.id();
        let kind = message.kind();

        // A client may only speak for itself.
        if message.sender().is_some_and(|sender| sender.id() != id) {
            warn!(participant = %self.identity, %kind, "dropping message with a foreign sender");
            return;
        }

        let outcome = match message {
            Message::GetUsers { .. } => self.hub.answer_get_users(id).await,
            Message::SendMsgSingle { .. } => self.hub.route(message).await,
            Message::ConnClosed => self.hub.unregister(id).await.map(|_| ()),
            _ => Err(HubError::Unroutable(kind)),
        };

        if let Err(err) = outcome {
            warn!(participant = %self.identity, %kind, error = %err, "message not handled");
        }
    }
}
