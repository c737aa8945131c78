use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Outbox, read_line, spawn_writer},
    event_log::EventLog,
    registry::{Registry, SessionId, departure_notice, join_notice},
};

/// Line a client sends to leave the chat on purpose.
pub const SENTINEL: &str = "bye";

/// How long a terminated session waits for queued lines to reach the peer.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a session needs from the server that spawned it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub event_log: EventLog,
    /// Prefix relayed chat lines with `username: ` on the server side.
    pub prefix_usernames: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingUsername,
    Active,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Sentinel,
    StreamClosed,
}

/// Server-side handler for one client connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    username: Option<String>,
    state: SessionState,
    ctx: SessionContext,
}

impl Session {
    pub fn new(ctx: SessionContext, peer: Option<SocketAddr>) -> Self {
        Self {
            id: ctx.registry.next_id(),
            peer,
            username: None,
            state: SessionState::Connecting,
            ctx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the connection until the client quits or the stream fails.
    ///
    /// Never returns an error: every failure ends in the same termination
    /// sequence, which deregisters the session at most once.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let (outbox, mut writer_task) = spawn_writer(writer);

        let outcome = self.serve(&mut reader, &outbox).await;
        self.terminate(outcome).await;

        // Dropping the last outbox lets the writer flush what is queued and close.
        // A peer that stopped reading would block that flush forever.
        drop(outbox);
        match timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(session = self.id, ?err, "writer task ended abnormally");
            }
            Err(_) => {
                warn!(session = self.id, "peer stopped reading; dropping connection");
                writer_task.abort();
            }
        }
    }

    async fn serve<R>(&mut self, reader: &mut R, outbox: &Outbox) -> Result<Exit>
    where
        R: AsyncBufRead + Unpin,
    {
        self.transition(SessionState::AwaitingUsername);
        outbox.send(self.greeting().await);

        let Some(username) = read_line(reader).await? else {
            return Ok(Exit::StreamClosed);
        };
        self.register(username, outbox).await;

        loop {
            match read_line(reader).await? {
                None => return Ok(Exit::StreamClosed),
                Some(line) if line == SENTINEL => return Ok(Exit::Sentinel),
                Some(line) => self.relay(line).await,
            }
        }
    }

    async fn greeting(&self) -> String {
        let users = self.ctx.registry.list_usernames().await;
        if users.is_empty() {
            "No other users connected".to_string()
        } else {
            let users: Vec<String> = users.into_iter().collect();
            format!("Connected users: [{}]", users.join(", "))
        }
    }

    async fn register(&mut self, username: String, outbox: &Outbox) {
        let unique = self
            .ctx
            .registry
            .register(self.id, &username, outbox.clone())
            .await;
        self.ctx.event_log.record(join_notice(&username));
        if !unique {
            self.ctx
                .event_log
                .record_error(format!("Username {username} is already in use"));
        }
        info!(session = self.id, peer = ?self.peer, %username, "session registered");

        self.username = Some(username);
        self.transition(SessionState::Active);
    }

    async fn relay(&self, line: String) {
        let message = match (&self.username, self.ctx.prefix_usernames) {
            (Some(username), true) => format!("{username}: {line}"),
            _ => line,
        };
        self.ctx.registry.broadcast(&message, Some(self.id)).await;
        self.ctx.event_log.record(&message);
    }

    async fn terminate(&mut self, outcome: Result<Exit>) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.transition(SessionState::Terminated);

        let who = self.username.as_deref().unwrap_or("User");
        match outcome {
            Ok(Exit::Sentinel) => {}
            Ok(Exit::StreamClosed) => {
                self.ctx.event_log.record(format!("{who} has disconnected."));
            }
            Err(err) => {
                self.ctx
                    .event_log
                    .record_error(format!("{who} has disconnected: {err}"));
            }
        }

        let Some(username) = self.username.as_deref() else {
            return;
        };
        if self.ctx.registry.remove(username, self.id).await {
            self.ctx.event_log.record(departure_notice(username));
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session = self.id, from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }
}
