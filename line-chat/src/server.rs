use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, warn};

use crate::{
    connection::write_line,
    event_log::EventLog,
    registry::Registry,
    session::{Session, SessionContext},
};

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub event_log: EventLog,
    /// Upper bound on concurrently connected clients. `None` accepts without limit.
    pub max_connections: Option<usize>,
    pub prefix_usernames: bool,
}

pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
    admission: Option<Arc<Semaphore>>,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            ctx: SessionContext {
                registry: Arc::new(Registry::new()),
                event_log: config.event_log,
                prefix_usernames: config.prefix_usernames,
            },
            admission: config
                .max_connections
                .map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accepts connections until `shutdown` resolves or accepting fails.
    ///
    /// A failed accept is the only error that ends the loop; session failures
    /// stay inside their own task.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            ctx,
            admission,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    ctx.event_log.record("Server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => handle_accept(stream, peer, &ctx, admission.as_ref()),
                        Err(err) => {
                            ctx.event_log.record_error(format!("Error in the server: {err}"));
                            return Err(err).context("failed to accept connection");
                        }
                    }
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

fn handle_accept(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    admission: Option<&Arc<Semaphore>>,
) {
    let permit = match admission.map(|limit| Arc::clone(limit).try_acquire_owned()) {
        None => None,
        Some(Ok(permit)) => Some(permit),
        Some(Err(_)) => {
            ctx.event_log
                .record_error(format!("Rejected connection from {peer}: server is full"));
            tokio::spawn(reject(stream));
            return;
        }
    };

    ctx.event_log.record("New user connected");
    spawn_session(stream, peer, ctx, permit);
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    permit: Option<OwnedSemaphorePermit>,
) {
    let session = Session::new(ctx.clone(), Some(peer));
    debug!(session = session.id(), %peer, "spawning session");
    tokio::spawn(async move {
        session.run(stream).await;
        drop(permit);
    });
}

async fn reject(mut stream: TcpStream) {
    if let Err(err) = write_line(&mut stream, "Server is full").await {
        debug!(?err, "failed to notify rejected client");
    }
}
