use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-chat");
    let log_dir = tempfile::tempdir()?;
    let log_path = log_dir.path().join("serverlog.txt");

    let (mut server_child, mut server_stdout) = spawn_server(&binary, &log_path).await?;
    let port = read_server_port(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut alice = spawn_client(&binary, &port).await?;
    alice
        .wait_for("No other users connected", "alice greeting")
        .await?;
    alice.send_line("alice").await?;
    wait_for_event(&log_path, "User set their name to alice").await?;

    let mut bob = spawn_client(&binary, &port).await?;
    let listing = bob.wait_for("Connected users:", "bob greeting").await?;
    assert_eq!(listing, "Connected users: [alice]");
    bob.send_line("bob").await?;

    alice
        .wait_for("User set their name to bob", "alice sees bob join")
        .await?;

    alice.send_line("hello").await?;
    let heard = bob.wait_for("hello", "bob hears alice").await?;
    assert_eq!(heard, "alice: hello");

    alice.send_line("bye").await?;
    bob.wait_for("alice has quit.", "bob sees alice leave").await?;
    ensure_success(&mut alice.child, "alice client").await?;

    bob.send_line("bye").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // Server stays up after clients disconnect; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    let log = std::fs::read_to_string(&log_path).context("read event log")?;
    for event in [
        "User set their name to alice",
        "User set their name to bob",
        "alice: hello",
        "alice has quit.",
        "bob has quit.",
    ] {
        assert!(
            log.lines().any(|line| line.ends_with(&format!("]{event}"))),
            "event log is missing '{event}':\n{log}"
        );
    }

    Ok(())
}

#[tokio::test]
async fn invalid_port_is_a_startup_error() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("line-chat");
    let log_dir = tempfile::tempdir()?;

    let mut child = Command::new(&binary)
        .arg("server")
        .arg("--log-file")
        .arg(log_dir.path().join("serverlog.txt"))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn server")?;

    let mut stdin = child.stdin.take().context("server stdin missing")?;
    stdin.write_all(b"not-a-port\n").await?;
    drop(stdin);

    let output = timeout(READ_TIMEOUT, child.wait_with_output()).await??;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("An invalid port was entered"),
        "unexpected stderr: {stderr}"
    );
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

    /// Reads stdout until a line containing `needle` shows up.
    ///
    /// The printer task and the username prompt share stdout, so unrelated
    /// lines may interleave. The prompt has no newline and ends up glued to
    /// whichever line is printed after it.
    async fn wait_for(&mut self, needle: &str, description: &str) -> Result<String> {
        loop {
            let line = read_line_expect(&mut self.stdout, description).await?;
            if line.contains(needle) {
                return Ok(strip_prompt(&line).to_string());
            }
        }
    }
}

fn strip_prompt(line: &str) -> &str {
    line.strip_prefix("Enter username: ").unwrap_or(line)
}

async fn spawn_server(binary: &Path, log_path: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--port")
        .arg("0")
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--log-file")
        .arg(log_path)
        .env("NO_COLOR", "1")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_port(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("server did not emit listening address")?;
        let trimmed = line.trim();
        if !trimmed.contains("Server is listening on") {
            continue;
        }
        let addr = trimmed
            .split_whitespace()
            .last()
            .context("unexpected server banner format")?;
        let (_, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("server banner missing socket: {trimmed}"))?;
        return Ok(port.to_string());
    }
}

async fn spawn_client(binary: &Path, port: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn client")?;

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

    process
        .wait_for("Connected to the chat server", "waiting for connect banner")
        .await?;

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn wait_for_event(log_path: &Path, event: &str) -> Result<()> {
    let suffix = format!("]{event}");
    timeout(READ_TIMEOUT, async {
        loop {
            let log = tokio::fs::read_to_string(log_path).await.unwrap_or_default();
            if log.lines().any(|line| line.ends_with(&suffix)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .with_context(|| format!("event log never recorded '{event}'"))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
