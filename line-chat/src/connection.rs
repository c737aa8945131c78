use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::debug;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Lines that may wait for a slow peer before further deliveries are dropped.
pub const OUTBOX_CAPACITY: usize = 128;

/// Reads the next non-empty line, without its terminator.
///
/// Returns `Ok(None)` once the peer closes its side of the stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // Plain newline framing keeps interoperability with netcat-style tools.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Sending side of a connection's outbound queue.
///
/// Clones are handed to the registry so other sessions can deliver lines
/// without touching the socket directly. Only the writer task spawned by
/// [`spawn_writer`] ever writes to the underlying stream.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

/// Outcome of queueing one line on an [`Outbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The peer has [`OUTBOX_CAPACITY`] lines pending; this one was dropped.
    Full,
    /// The writer task has stopped, which means the peer is gone.
    Closed,
}

impl Outbox {
    /// Queues a line without waiting. A peer that stopped reading never
    /// holds up the caller.
    pub fn send(&self, line: impl Into<String>) -> Delivery {
        match self.tx.try_send(line.into()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

/// Moves `writer` into a task that drains the returned [`Outbox`] in order.
///
/// The task stops on the first write error or once every `Outbox` clone is
/// dropped, then shuts the write half down.
pub fn spawn_writer<W>(mut writer: W) -> (Outbox, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(err) = write_line(&mut writer, &line).await {
                debug!(?err, "failed to deliver line to peer");
                break;
            }
        }
        rx.close();
        if let Err(err) = writer.shutdown().await {
            debug!(?err, "failed to shut down writer cleanly");
        }
    });

    (Outbox { tx }, handle)
}
