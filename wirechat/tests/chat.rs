use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use http::StatusCode;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use wirechat::{
    client::{self, ClientHandle},
    config::{ClientConfig, ServerConfig},
    connection::ConnectionState,
    error::HandshakeError,
    message::{Identity, Message},
    server::Server,
};

const WAIT: Duration = Duration::from_secs(3);

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = Server::new(listener, ServerConfig::default());

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".into(),
            port: self.addr.port(),
            ..ClientConfig::default()
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

struct TestClient {
    handle: ClientHandle,
    events: mpsc::UnboundedReceiver<Message>,
}

impl TestClient {
    async fn next(&mut self, description: &str) -> Result<Message> {
        match timeout(WAIT, self.events.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(anyhow!("{description}: event stream closed")),
            Err(_) => Err(anyhow!("{description}: timed out")),
        }
    }

    async fn assert_quiet(&mut self) {
        let next = timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(next.is_err(), "unexpected event: {next:?}");
    }
}

async fn connect(server: &TestServer, name: &str, id: &str) -> Result<TestClient> {
    let (tx, events) = mpsc::unbounded_channel();
    let handle = client::connect(&server.client_config(), Identity::new(name, id)?, move |message| {
        let _ = tx.send(message);
    })
    .await
    .with_context(|| format!("{name} failed to connect"))?;
    Ok(TestClient { handle, events })
}

#[tokio::test]
async fn direct_messages_and_presence_between_two_clients() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = connect(&server, "alice", "id-1").await?;
    let alice_id = alice.handle.identity().clone();

    alice.handle.request_users()?;
    assert_eq!(
        alice.next("alice user list").await?,
        Message::GetUsersResponse {
            sender: alice_id.clone(),
            content: vec![],
        }
    );

    let mut bob = connect(&server, "bob", "id-2").await?;
    let bob_id = bob.handle.identity().clone();
    assert_eq!(
        alice.next("alice sees bob join").await?,
        Message::UserConnected {
            sender: bob_id.clone()
        }
    );

    bob.handle.send_to(alice_id.clone(), "hi")?;
    assert_eq!(
        alice.next("alice hears bob").await?,
        Message::SendMsgSingle {
            sender: bob_id.clone(),
            recipient: alice_id.clone(),
            content: "hi".into(),
        }
    );

    bob.handle.request_users()?;
    assert_eq!(
        bob.next("bob user list").await?,
        Message::GetUsersResponse {
            sender: bob_id.clone(),
            content: vec![alice_id.clone()],
        }
    );

    assert!(bob.handle.quit());
    assert!(!bob.handle.quit());
    assert_eq!(
        alice.next("alice sees bob leave").await?,
        Message::UserDisconnected {
            sender: bob_id.clone()
        }
    );
    assert_eq!(bob.next("bob closed").await?, Message::ConnClosed);
    timeout(WAIT, bob.handle.closed()).await?;
    assert_eq!(bob.handle.state(), ConnectionState::Closed);

    // Messages to someone who already left vanish silently.
    alice.handle.send_to(bob_id, "are you there?")?;
    alice.assert_quiet().await;
    alice.handle.request_users()?;
    assert_eq!(
        alice.next("alice alone again").await?,
        Message::GetUsersResponse {
            sender: alice_id,
            content: vec![],
        }
    );

    alice.handle.quit();
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn long_messages_cross_many_frames_intact() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = connect(&server, "alice", "a").await?;
    let mut carol = connect(&server, "carol", "c").await?;
    alice.next("alice sees carol join").await?;

    let content: String = (0..10_000)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    carol.handle.send_to(alice.handle.identity().clone(), content.clone())?;

    match alice.next("alice receives long message").await? {
        Message::SendMsgSingle { content: got, .. } => assert_eq!(got, content),
        other => return Err(anyhow!("unexpected message {other:?}")),
    }

    carol.handle.quit();
    carol.next("carol closed").await?;
    alice.handle.quit();
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn forged_sender_is_ignored() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = connect(&server, "alice", "a").await?;
    let mallory = connect(&server, "mallory", "m").await?;
    alice.next("alice sees mallory join").await?;

    mallory.handle.send(Message::SendMsgSingle {
        sender: Identity::new("bob", "b")?,
        recipient: alice.handle.identity().clone(),
        content: "trust me".into(),
    })?;
    alice.assert_quiet().await;

    mallory.handle.quit();
    alice.handle.quit();
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_are_refused_at_the_handshake() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = connect(&server, "alice", "same").await?;
    alice.handle.request_users()?;
    alice.next("alice is registered").await?;

    let (tx, _events) = mpsc::unbounded_channel();
    let result = client::connect(
        &server.client_config(),
        Identity::new("impostor", "same")?,
        move |message| {
            let _ = tx.send(message);
        },
    )
    .await;
    assert!(matches!(
        result,
        Err(HandshakeError::Status(StatusCode::CONFLICT))
    ));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn upgrade_without_key_is_a_bad_request() -> Result<()> {
    let server = TestServer::start().await?;

    let mut stream = TcpStream::connect(server.addr).await?;
    stream
        .write_all(
            b"GET /chat?name=x&id=y HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\r\n",
        )
        .await?;

    let mut buf = vec![0u8; 512];
    let read = timeout(WAIT, stream.read(&mut buf)).await??;
    let head = String::from_utf8_lossy(&buf[..read]);
    assert!(head.starts_with("HTTP/1.1 400"), "unexpected response: {head}");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn server_shutdown_closes_clients() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = connect(&server, "alice", "a").await?;
    alice.handle.request_users()?;
    alice.next("alice user list").await?;

    server.stop().await;

    assert_eq!(alice.next("alice closed").await?, Message::ConnClosed);
    timeout(WAIT, alice.handle.closed()).await?;
    Ok(())
}
