use std::{process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const BINARY: &str = env!("CARGO_BIN_EXE_wirechat");

#[tokio::test]
async fn cli_direct_messages_end_to_end() -> Result<()> {
    let (mut server_child, mut server_stderr) = spawn_server().await?;
    let port = read_server_port(&mut server_stderr).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain(server_stderr).await;
    });

    let mut alice = spawn_client("alice", "id-a", port).await?;
    let alone = read_line_expect(&mut alice.stdout, "waiting for alice user list").await?;
    assert_eq!(alone, "*** nobody else is online");

    let mut bob = spawn_client("bob", "id-b", port).await?;
    let bob_roster = read_line_expect(&mut bob.stdout, "waiting for bob user list").await?;
    assert_eq!(bob_roster, "*** currently online: alice");
    let alice_sees_bob = read_line_expect(&mut alice.stdout, "waiting for alice join notice").await?;
    assert_eq!(alice_sees_bob, "*** bob joined the chat");

    alice.send_line("/msg bob hello bob").await?;
    let bob_hears_alice = read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "<alice> hello bob");

    bob.send_line("/msg id-a hi alice").await?;
    let alice_hears_bob = read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "<bob> hi alice");

    bob.send_line("/quit").await?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving chat");
    let alice_sees_departure =
        read_line_expect(&mut alice.stdout, "waiting for alice to see bob leave").await?;
    assert_eq!(alice_sees_departure, "*** bob left the chat");

    alice.send_line("/quit").await?;
    let alice_quit = read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving chat");

    bob.finish("bob client").await?;
    alice.finish("alice client").await?;

    // The server keeps running after clients leave; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn finish(self, name: &str) -> Result<()> {
        let ClientProcess {
            mut child, stdin, ..
        } = self;
        drop(stdin);

        let status = timeout(READ_TIMEOUT, child.wait())
            .await
            .map_err(|_| anyhow!("{name} did not exit"))?
            .with_context(|| format!("failed to await {name} process"))?;
        if !status.success() {
            return Err(anyhow!("{name} exited with status {status}"));
        }
        Ok(())
    }
}

async fn spawn_server() -> Result<(Child, BufReader<ChildStderr>)> {
    let mut cmd = Command::new(BINARY);
    cmd.arg("server")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stderr = child
        .stderr
        .take()
        .context("server stderr missing after spawn")?;

    Ok((child, BufReader::new(stderr)))
}

async fn read_server_port(reader: &mut BufReader<ChildStderr>) -> Result<u16> {
    loop {
        let line = read_line(reader)
            .await?
            .context("server did not emit listening address")?;
        if !line.contains("server listening on") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .last()
            .context("unexpected server banner format")?;
        let port = addr
            .rsplit(':')
            .next()
            .map(|port| port.trim_end_matches(|c: char| !c.is_ascii_digit()))
            .and_then(|port| port.parse().ok())
            .with_context(|| format!("server banner missing port: {line}"))?;
        return Ok(port);
    }
}

async fn spawn_client(name: &str, id: &str, port: u16) -> Result<ClientProcess> {
    let mut cmd = Command::new(BINARY);
    cmd.arg("client")
        .arg("--name")
        .arg(name)
        .arg("--id")
        .arg(id)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
    if welcome != format!("*** connected as {name} ({id})") {
        return Err(anyhow!("expected welcome banner for {name}, got '{welcome}'"));
    }

    Ok(process)
}

async fn read_line_expect<R>(reader: &mut BufReader<R>, description: &str) -> Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line<R>(reader: &mut BufReader<R>) -> Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let bytes_io = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes_io? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain<R>(mut reader: BufReader<R>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            buffer.clear();
            bytes > 0
        })
        .unwrap_or(false)
    {}
}
