//! TCP listener, admission and graceful shutdown.

use crate::channel::MailItemSender;
use crate::config::ServerConfig;
use crate::connection::{ConnectionContext, handle_connection, load_tls_acceptor};
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::types::{Reply, ReplyCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time a rejected client gets to receive its `421`.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Time handlers get to unwind once forced.
const FORCE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A bound SMTP listener.
#[derive(Debug)]
pub struct SmtpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    manager: ConnectionManager,
    ctx: ConnectionContext,
}

impl SmtpServer {
    /// Binds the listener and loads TLS material if configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound, or
    /// [`Error::Certificate`] if the TLS files are unusable.
    pub async fn bind(config: ServerConfig, sender: MailItemSender) -> Result<Self> {
        let tls = config.tls.as_ref().map(load_tls_acceptor).transpose()?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            starttls = tls.is_some(),
            max_connections = config.max_connections,
            "SMTP listener bound"
        );

        Ok(Self {
            listener,
            local_addr,
            manager: ConnectionManager::new(config.max_connections),
            ctx: ConnectionContext {
                sender: sender.with_push_timeout(config.push_timeout),
                config: Arc::new(config),
                tls,
                shutdown: CancellationToken::new(),
                force: CancellationToken::new(),
            },
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the connection registry.
    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Returns a handle that can stop the server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.ctx.shutdown.clone(),
            force: self.ctx.force.clone(),
            manager: self.manager.clone(),
        }
    }

    /// Accepts connections until [`ServerHandle::stop`] is called.
    ///
    /// Each admitted connection runs on its own task; clients beyond the
    /// connection limit get `421` and are closed unregistered.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and retried; this currently always
    /// returns `Ok`.
    pub async fn serve(self) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                () = self.ctx.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            if let Some(guard) = self.manager.admit(peer) {
                let ctx = self.ctx.clone();
                // Detached: the handler logs its own outcome and releases the slot.
                tokio::spawn(handle_connection(socket, peer, guard, ctx));
            } else {
                warn!(
                    %peer,
                    limit = self.manager.max_connections(),
                    "connection rejected, at capacity"
                );
                tokio::spawn(reject(socket, self.ctx.config.hostname.clone()));
            }
        }

        info!(addr = %self.local_addr, "SMTP listener stopped");
        Ok(())
    }
}

async fn reject(mut socket: TcpStream, hostname: String) {
    let reply = Reply::single(
        ReplyCode::SERVICE_UNAVAILABLE,
        format!("{hostname} Too many connections, try again later"),
    );
    let write = async {
        socket.write_all(&reply.serialize()).await?;
        socket.shutdown().await
    };
    match timeout(REJECT_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "failed to send rejection"),
        Err(_) => debug!("rejection write timed out"),
    }
}

/// Outcome of [`ServerHandle::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every connection closed within the grace period.
    pub drained: bool,
    /// Connections still open at the deadline and force closed.
    pub forced: usize,
}

/// Stops a running [`SmtpServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
    force: CancellationToken,
    manager: ConnectionManager,
}

impl ServerHandle {
    /// Returns `true` once a stop has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.manager.live_count()
    }

    /// Stops accepting and waits up to `grace` for connections to close.
    ///
    /// Idle sessions are closed with `421` right away; sessions inside a
    /// transaction may finish it. Whatever is still open at the deadline
    /// is aborted, and no mail item is queued after that point.
    pub async fn stop(&self, grace: Duration) -> ShutdownReport {
        info!(
            live = self.manager.live_count(),
            grace_secs = grace.as_secs(),
            "SMTP server shutting down"
        );
        self.shutdown.cancel();

        if self.manager.drain_wait(Instant::now() + grace).await {
            info!("all connections closed");
            return ShutdownReport {
                drained: true,
                forced: 0,
            };
        }

        let forced = self.manager.live_count();
        warn!(forced, "shutdown grace period elapsed, forcing connections closed");
        self.force.cancel();

        if !self
            .manager
            .drain_wait(Instant::now() + FORCE_DRAIN_TIMEOUT)
            .await
        {
            warn!(
                remaining = self.manager.live_count(),
                "connections still open after forced close"
            );
        }

        ShutdownReport {
            drained: false,
            forced,
        }
    }
}
