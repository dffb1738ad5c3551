//! Immutable server settings.

use crate::session::SessionConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// PEM certificate chain and private key enabling STARTTLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate chain file.
    pub cert_file: PathBuf,
    /// Private key file.
    pub key_file: PathBuf,
}

/// Settings read once when the server binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Name used in the banner and replies.
    pub hostname: String,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed between two complete lines from a client.
    pub idle_timeout: Duration,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Maximum recipients per transaction.
    pub max_recipients: usize,
    /// Consecutive protocol errors tolerated per connection.
    pub max_errors: usize,
    /// How long a finished transaction may wait for channel capacity.
    pub push_timeout: Duration,
    /// STARTTLS material, if any.
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 2500)),
            hostname: session.hostname,
            max_connections: 100,
            idle_timeout: Duration::from_secs(300),
            max_message_size: session.max_message_size,
            max_recipients: session.max_recipients,
            max_errors: session.max_errors,
            push_timeout: crate::channel::DEFAULT_PUSH_TIMEOUT,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Builds the per-connection session settings.
    #[must_use]
    pub fn session_config(&self, tls_available: bool) -> SessionConfig {
        SessionConfig {
            hostname: self.hostname.clone(),
            max_message_size: self.max_message_size,
            max_recipients: self.max_recipients,
            max_errors: self.max_errors,
            tls_available,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), 2500);
        assert_eq!(config.session_config(false), SessionConfig::default());
        assert!(config.session_config(true).tls_available);
    }
}
