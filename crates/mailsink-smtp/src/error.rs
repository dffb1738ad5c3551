//! Error types for the SMTP capture server.

use std::io;
use std::net::SocketAddr;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
///
/// Client mistakes never surface here; they are answered with a reply code
/// and the session carries on. These are the failures that end a connection
/// or stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Certificate or key material could not be loaded.
    #[error("Invalid TLS material: {0}")]
    Certificate(String),

    /// Listener could not bind.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Protocol error (unexpected client behavior).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Shutdown deadline passed while the connection was still busy.
    #[error("Connection closed at the shutdown deadline")]
    Forced,

    /// Client sent a line longer than the permitted maximum.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message could not be parsed.
    #[error("Mail parse error: {0}")]
    MailParse(#[from] mailsink_mime::Error),

    /// Envelope is missing a sender or recipients.
    #[error("Envelope has no {0}")]
    MissingEnvelope(&'static str),
}

impl Error {
    /// Returns true if the error ends only the connection it occurred on.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Protocol(_) | Self::Forced | Self::LineTooLong(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_connection_error());
        assert!(Error::LineTooLong(10).is_connection_error());
        assert!(Error::Forced.is_connection_error());
        assert!(!Error::Certificate("bad".into()).is_connection_error());
        assert!(!Error::MissingEnvelope("sender").is_connection_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::MissingEnvelope("recipients").to_string(),
            "Envelope has no recipients"
        );
        let err = Error::Bind {
            addr: "127.0.0.1:25".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:25: in use");
    }
}
