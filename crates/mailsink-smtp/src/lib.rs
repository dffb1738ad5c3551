//! # mailsink-smtp
//!
//! An SMTP capture server. It accepts mail from any client, turns every
//! completed transaction into a [`MailItem`] and hands it to a bounded
//! channel. Nothing is ever relayed.
//!
//! ## Features
//!
//! - **Sans-I/O session**: the protocol state machine in [`session`] never
//!   touches a socket, so every transition is testable on its own
//! - **Bounded resources**: a hard connection cap with `421` rejection, an
//!   idle timeout, message and line size limits, and a protocol error budget
//! - **Graceful shutdown**: idle sessions close at once, open transactions
//!   get a grace period, stragglers are aborted
//! - **STARTTLS**: optional, from PEM files
//! - **MIME aware**: multipart bodies split into text, HTML and attachments
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsink_smtp::{ServerConfig, SmtpServer, mail_channel};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> mailsink_smtp::Result<()> {
//!     let (sender, mut receiver) = mail_channel(64);
//!     let server = SmtpServer::bind(ServerConfig::default(), sender).await?;
//!     let handle = server.handle();
//!     tokio::spawn(server.serve());
//!
//!     while let Some(item) = receiver.recv().await {
//!         println!("{} -> {:?}: {}", item.from_address, item.to_addresses, item.subject);
//!     }
//!
//!     handle.stop(Duration::from_secs(20)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! GREETING ── HELO/EHLO ──→ READY ── MAIL ──→ MAIL ── RCPT ──→ RCPT ── DATA ──→ DATA
//!                             ↑                                                  │
//!                             └────────────── "." / RSET ────────────────────────┘
//! ```
//!
//! Any state reaches CLOSED through QUIT, the error budget, an idle timeout
//! or shutdown.
//!
//! ## Modules
//!
//! - [`command`]: command line parsing
//! - [`session`]: protocol state machine
//! - [`mail`]: mail item construction
//! - [`channel`]: hand-off queue to storage
//! - [`manager`]: connection registry and cap
//! - [`connection`]: per-connection I/O
//! - [`server`]: listener and shutdown
//! - [`types`]: addresses, extensions, replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod command;
mod config;
pub mod connection;
mod error;
pub mod mail;
pub mod manager;
pub mod server;
pub mod session;
pub mod types;

pub use channel::{MailItemReceiver, MailItemSender, PushError, mail_channel};
pub use config::{ServerConfig, TlsConfig};
pub use error::{Error, Result};
pub use mail::{Attachment, MailBody, MailItem, parse_mail};
pub use manager::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionManager};
pub use server::{ServerHandle, ShutdownReport, SmtpServer};
pub use types::{Address, Extension, Reply, ReplyClass, ReplyCode, ReversePath};
