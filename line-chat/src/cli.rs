use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server and relay lines between connected clients.
    Server(ServerArgs),
    /// Connect to a chat server from this terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Prompted for on stdin when omitted; 0 picks an ephemeral port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface the listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Append-only event log.
    #[arg(long, default_value = "serverlog.txt")]
    pub log_file: PathBuf,

    /// Refuse connections beyond this many concurrent clients.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Prefix relayed chat lines with the sender's username.
    #[arg(long)]
    pub prefix_usernames: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Hostname or IP of the server. Prompted for on stdin when omitted.
    #[arg(long)]
    pub host: Option<String>,

    /// Server port. Prompted for on stdin when omitted.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("An invalid port was entered: '{0}'")]
    InvalidPort(String),

    #[error("input closed before {0} was entered")]
    MissingInput(&'static str),

    #[error("failed to read startup input: {0}")]
    Io(#[from] std::io::Error),
}

/// Uses `port` when given, otherwise asks for one on `input`.
pub async fn resolve_port<I, P>(
    port: Option<u16>,
    label: &str,
    input: &mut I,
    prompt: &mut P,
) -> Result<u16, StartupError>
where
    I: AsyncBufRead + Unpin,
    P: AsyncWrite + Unpin,
{
    if let Some(port) = port {
        return Ok(port);
    }

    let reply = ask(label, "a port", input, prompt).await?;
    parse_port(&reply)
}

pub async fn resolve_host<I, P>(
    host: Option<String>,
    input: &mut I,
    prompt: &mut P,
) -> Result<String, StartupError>
where
    I: AsyncBufRead + Unpin,
    P: AsyncWrite + Unpin,
{
    match host {
        Some(host) => Ok(host),
        None => ask("Enter IP: ", "a host", input, prompt).await,
    }
}

pub fn parse_port(text: &str) -> Result<u16, StartupError> {
    let text = text.trim();
    text.parse::<u16>()
        .map_err(|_| StartupError::InvalidPort(text.to_string()))
}

async fn ask<I, P>(
    label: &str,
    what: &'static str,
    input: &mut I,
    prompt: &mut P,
) -> Result<String, StartupError>
where
    I: AsyncBufRead + Unpin,
    P: AsyncWrite + Unpin,
{
    prompt.write_all(label.as_bytes()).await?;
    prompt.flush().await?;

    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Err(StartupError::MissingInput(what));
    }
    Ok(line.trim().to_string())
}
