use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
};
use tracing::{debug, info, warn};

use crate::{
    connection::{read_line, write_line},
    session::SENTINEL,
};

/// Connects to `host:port` and runs until the user sends the sentinel.
///
/// Incoming lines are printed from a separate task; the current task forwards
/// `input`. Returning drops the printer, so the process can exit right after
/// the sentinel goes out.
pub async fn run<I>(host: &str, port: u16, input: &mut I) -> Result<()>
where
    I: AsyncBufRead + Unpin,
{
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    info!("connected to {host}:{port}");

    let mut stdout = tokio::io::stdout();
    write_line(&mut stdout, "Connected to the chat server").await?;

    let (reader, mut writer) = stream.into_split();
    let printer = tokio::spawn(print_incoming(BufReader::new(reader), tokio::io::stdout()));

    let forwarded = forward_input(input, &mut writer, &mut stdout).await;
    shutdown_connection(&mut writer).await;
    printer.abort();

    forwarded
}

/// Prompts for a username, sends it once, then relays every line as
/// `username: text` until the user types the sentinel or input ends.
pub async fn forward_input<I, W, P>(input: &mut I, writer: &mut W, prompt: &mut P) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    P: AsyncWrite + Unpin,
{
    prompt.write_all(b"Enter username: ").await?;
    prompt.flush().await?;

    let Some(username) = read_line(input).await? else {
        return Ok(());
    };
    let username = username.trim().to_string();
    write_line(writer, &username)
        .await
        .context("failed to send username")?;

    loop {
        let Some(text) = read_line(input).await? else {
            break;
        };
        if text.trim() == SENTINEL {
            break;
        }
        write_line(writer, &format!("{username}: {text}"))
            .await
            .context("error writing to server")?;
    }

    write_line(writer, SENTINEL)
        .await
        .context("error writing to server")?;
    Ok(())
}

/// Prints lines from the server until the stream ends or fails.
pub async fn print_incoming<R, O>(mut reader: R, mut out: O)
where
    R: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    loop {
        match read_line(&mut reader).await {
            Ok(Some(line)) => {
                if let Err(err) = write_line(&mut out, &line).await {
                    debug!(?err, "failed to print server line");
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(?err, "error reading from server");
                return;
            }
        }
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}
