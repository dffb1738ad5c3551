//! Per-connection task driving a [`Session`] over a socket.

use super::stream::{Line, SmtpStream};
use crate::channel::{MailItemSender, PushError};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::mail::parse_mail;
use crate::manager::ConnectionGuard;
use crate::session::{Action, DeliveryOutcome, Session, SessionState, Transaction};
use crate::types::{Reply, ReplyCode};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Longest command line accepted, without its line break.
pub const MAX_COMMAND_LINE: usize = 4096;

/// Shared state every connection handler runs with.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Server settings.
    pub config: Arc<ServerConfig>,
    /// Where finished transactions go.
    pub sender: MailItemSender,
    /// STARTTLS acceptor, when TLS material is configured.
    pub tls: Option<TlsAcceptor>,
    /// Graceful shutdown: idle sessions close, open transactions may finish.
    pub shutdown: CancellationToken,
    /// Forced shutdown: every handler stops at its next await point.
    pub force: CancellationToken,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("config", &self.config)
            .field("sender", &self.sender)
            .field("tls", &self.tls.is_some())
            .field("shutdown", &self.shutdown.is_cancelled())
            .field("force", &self.force.is_cancelled())
            .finish()
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Session closed itself (QUIT, error budget, aborted delivery).
    Session,
    /// Client went away.
    PeerClosed,
    /// No line within the idle timeout.
    IdleTimeout,
    /// Graceful shutdown reached an idle session.
    Shutdown,
    /// Shutdown deadline passed.
    Forced,
}

/// Serves one admitted connection until it closes.
///
/// The guard is held for the whole lifetime of the connection and released
/// when this returns.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    guard: ConnectionGuard,
    ctx: ConnectionContext,
) -> Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let span = info_span!("smtp", id = guard.id().as_u64(), %peer);

    async move {
        debug!("connection admitted");
        let result = match serve(SmtpStream::new(stream), &ctx).await {
            Err(Error::Forced) => Ok(CloseReason::Forced),
            result => result,
        };
        match &result {
            Ok(CloseReason::Forced) => warn!("connection forced closed at shutdown deadline"),
            Ok(reason) => debug!(?reason, "connection closed"),
            Err(e) if e.is_connection_error() => debug!(error = %e, "connection dropped"),
            Err(e) => warn!(error = %e, "connection failed"),
        }
        guard.release();
        result
    }
    .instrument(span)
    .await
}

async fn serve<S>(mut stream: SmtpStream<S>, ctx: &ConnectionContext) -> Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = &ctx.config;
    let mut session = Session::new(config.session_config(ctx.tls.is_some()));
    let data_line_limit = config.max_message_size.max(MAX_COMMAND_LINE);

    write_reply(&mut stream, &session.greeting(), ctx).await?;

    loop {
        if ctx.shutdown.is_cancelled() && !session.in_transaction() {
            close(&mut stream, &session.shutdown(), ctx).await;
            return Ok(CloseReason::Shutdown);
        }

        let in_data = session.state() == SessionState::Data;
        let idle = !session.in_transaction();
        let next_line = async {
            if in_data {
                stream.read_data_line(data_line_limit).await
            } else {
                let line = stream.read_line(MAX_COMMAND_LINE).await;
                line.map(|line| line.map(Line::Complete))
            }
        };

        let read = tokio::select! {
            biased;
            () = ctx.force.cancelled() => return Ok(CloseReason::Forced),
            () = ctx.shutdown.cancelled(), if idle => continue,
            read = timeout(config.idle_timeout, next_line) => read,
        };

        let line = match read {
            Err(_) => {
                debug!("idle timeout");
                close(&mut stream, &session.timeout(), ctx).await;
                return Ok(CloseReason::IdleTimeout);
            }
            Ok(Err(Error::LineTooLong(max))) => {
                let reply = Reply::single(ReplyCode::SYNTAX_ERROR, "Line too long");
                close(&mut stream, &reply, ctx).await;
                return Err(Error::LineTooLong(max));
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(None)) => return Ok(CloseReason::PeerClosed),
            Ok(Ok(Some(Line::Oversized))) => {
                debug!(limit = data_line_limit, "data line over limit, discarding message");
                session.data_line_overflowed();
                continue;
            }
            Ok(Ok(Some(Line::Complete(line)))) => line,
        };

        if !in_data {
            debug!(command = %String::from_utf8_lossy(&line), "command received");
        }

        let mut next = session.handle_line(&line);
        while let Some(action) = next.take() {
            match action {
                Action::Reply(reply) => write_reply(&mut stream, &reply, ctx).await?,
                Action::Close(reply) => {
                    close(&mut stream, &reply, ctx).await;
                    return Ok(CloseReason::Session);
                }
                Action::StartTls(reply) => {
                    write_reply(&mut stream, &reply, ctx).await?;
                    let acceptor = ctx
                        .tls
                        .as_ref()
                        .ok_or_else(|| Error::Protocol("TLS is not configured".into()))?;
                    stream = bounded(ctx, "TLS handshake", stream.upgrade_to_tls(acceptor)).await?;
                    session.tls_established();
                    debug!("TLS established");
                }
                Action::Deliver(transaction) => {
                    let outcome = deliver(transaction, ctx).await;
                    next = Some(session.delivered(outcome));
                }
            }
        }
    }
}

async fn deliver(transaction: Transaction, ctx: &ConnectionContext) -> DeliveryOutcome {
    let item = match parse_mail(&transaction.envelope, &transaction.data) {
        Ok(item) => item,
        Err(e) => {
            warn!(error = %e, "message rejected");
            return DeliveryOutcome::Rejected(e.to_string());
        }
    };

    let id = item.id.clone();
    let from = item.from_address.clone();
    let recipients = item.to_addresses.len();
    let size = item.size;

    match ctx.sender.push(item, &ctx.force).await {
        Ok(()) => {
            info!(%id, %from, recipients, size, "mail captured");
            DeliveryOutcome::Queued { id }
        }
        Err(PushError::Saturated) => {
            warn!(%id, "mail dropped, channel saturated");
            DeliveryOutcome::Deferred
        }
        Err(e) => {
            warn!(%id, error = %e, "mail dropped");
            DeliveryOutcome::Aborted
        }
    }
}

/// Runs a socket operation until it completes, the idle timeout elapses or
/// shutdown is forced.
///
/// A client that stops reading would otherwise block a reply write forever.
async fn bounded<T>(
    ctx: &ConnectionContext,
    what: &'static str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = ctx.force.cancelled() => Err(Error::Forced),
        result = timeout(ctx.config.idle_timeout, operation) => match result {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out")).into()),
        },
    }
}

async fn write_reply<S>(stream: &mut SmtpStream<S>, reply: &Reply, ctx: &ConnectionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if reply.code.is_refusal() {
        debug!(code = %reply.code, text = %reply.message_text(), "command refused");
    }
    bounded(ctx, "reply write", stream.write_all(&reply.serialize())).await
}

/// Best effort: the peer may already be gone.
async fn close<S>(stream: &mut SmtpStream<S>, reply: &Reply, ctx: &ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = write_reply(stream, reply, ctx).await {
        debug!(error = %e, "failed to write closing reply");
        return;
    }
    if let Err(e) = bounded(ctx, "shutdown", stream.shutdown()).await {
        debug!(error = %e, "failed to shut down connection");
    }
}
