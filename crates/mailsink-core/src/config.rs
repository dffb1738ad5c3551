//! Configuration file loading and validation.
//!
//! The file is JSON with camelCase keys. Every key is optional; a missing
//! file means all defaults.

use crate::{Error, Result};
use mailsink_smtp::{ServerConfig, TlsConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Storage backend selected by `dbEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEngine {
    /// Items live in process memory.
    Memory,
    /// Items are stored in a `SQLite` file.
    Sqlite,
}

impl StorageEngine {
    /// Parses a `dbEngine` value, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /// Address the SMTP listener binds to.
    pub smtp_address: String,
    /// Port the SMTP listener binds to.
    pub smtp_port: u16,
    /// Name used in the banner and EHLO reply.
    pub hostname: String,
    /// Maximum concurrent SMTP connections.
    pub max_connections: usize,
    /// Idle timeout per connection.
    pub idle_timeout_seconds: u64,
    /// Maximum message size.
    pub max_message_size_bytes: usize,
    /// Maximum recipients per transaction.
    pub max_recipients: usize,
    /// Consecutive bad commands tolerated per connection.
    pub max_protocol_errors: usize,
    /// Capacity of the mail item channel.
    pub channel_capacity: usize,
    /// How long a connection waits for channel capacity.
    pub push_timeout_seconds: u64,
    /// Time connections get to finish at shutdown.
    pub shutdown_grace_seconds: u64,
    /// PEM certificate chain for STARTTLS.
    pub cert_file: String,
    /// PEM private key for STARTTLS.
    pub key_file: String,
    /// `memory` or `sqlite`.
    pub db_engine: String,
    /// `SQLite` database path.
    pub db_database: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            smtp_address: "127.0.0.1".to_string(),
            smtp_port: 2500,
            hostname: "mailsink".to_string(),
            max_connections: 100,
            idle_timeout_seconds: 300,
            max_message_size_bytes: 10 * 1024 * 1024,
            max_recipients: 100,
            max_protocol_errors: 10,
            channel_capacity: 64,
            push_timeout_seconds: 5,
            shutdown_grace_seconds: 20,
            cert_file: String::new(),
            key_file: String::new(),
            db_engine: "memory".to_string(),
            db_database: "mailsink.db".to_string(),
        }
    }
}

/// A configuration value that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `smtpAddress` is not an IP address.
    InvalidAddress,
    /// `maxConnections` is zero.
    ZeroMaxConnections,
    /// `idleTimeoutSeconds` is zero.
    ZeroIdleTimeout,
    /// `maxMessageSizeBytes` is zero.
    ZeroMessageSize,
    /// `channelCapacity` is zero.
    ZeroChannelCapacity,
    /// Only one of `certFile` and `keyFile` is set.
    IncompleteTls,
    /// `dbEngine` is not a known engine.
    UnknownEngine,
    /// `dbDatabase` is empty while `dbEngine` is `sqlite`.
    EmptyDatabase,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "SMTP address must be an IP address",
            Self::ZeroMaxConnections => "Max connections must be at least 1",
            Self::ZeroIdleTimeout => "Idle timeout must be at least 1 second",
            Self::ZeroMessageSize => "Max message size must be at least 1 byte",
            Self::ZeroChannelCapacity => "Channel capacity must be at least 1",
            Self::IncompleteTls => "Cert file and key file must be set together",
            Self::UnknownEngine => "DB engine must be 'memory' or 'sqlite'",
            Self::EmptyDatabase => "DB database path is required for sqlite",
        }
    }

    /// Get the configuration key this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "smtpAddress",
            Self::ZeroMaxConnections => "maxConnections",
            Self::ZeroIdleTimeout => "idleTimeoutSeconds",
            Self::ZeroMessageSize => "maxMessageSizeBytes",
            Self::ZeroChannelCapacity => "channelCapacity",
            Self::IncompleteTls => "certFile",
            Self::UnknownEngine => "dbEngine",
            Self::EmptyDatabase => "dbDatabase",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

impl std::error::Error for ValidationError {}

impl Configuration {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                info!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every problem with this configuration.
    #[must_use]
    pub fn problems(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.smtp_address.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress);
        }
        if self.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections);
        }
        if self.idle_timeout_seconds == 0 {
            errors.push(ValidationError::ZeroIdleTimeout);
        }
        if self.max_message_size_bytes == 0 {
            errors.push(ValidationError::ZeroMessageSize);
        }
        if self.channel_capacity == 0 {
            errors.push(ValidationError::ZeroChannelCapacity);
        }
        if self.cert_file.trim().is_empty() != self.key_file.trim().is_empty() {
            errors.push(ValidationError::IncompleteTls);
        }
        match StorageEngine::parse(&self.db_engine) {
            None => errors.push(ValidationError::UnknownEngine),
            Some(StorageEngine::Sqlite) if self.db_database.trim().is_empty() => {
                errors.push(ValidationError::EmptyDatabase);
            }
            Some(_) => {}
        }

        errors
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = problems.iter().map(ToString::to_string).collect();
        Err(Error::Config(messages.join("; ")))
    }

    /// Returns the selected storage engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `dbEngine` is unknown.
    pub fn storage_engine(&self) -> Result<StorageEngine> {
        StorageEngine::parse(&self.db_engine).ok_or_else(|| {
            Error::Config(format!("unknown dbEngine '{}'", self.db_engine))
        })
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Returns `true` when STARTTLS material is configured.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.trim().is_empty() && !self.key_file.trim().is_empty()
    }

    /// Converts to the SMTP server settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the listen address is invalid.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let ip: IpAddr = self.smtp_address.parse().map_err(|_| {
            Error::Config(format!("invalid smtpAddress '{}'", self.smtp_address))
        })?;

        let tls = self.tls_enabled().then(|| TlsConfig {
            cert_file: PathBuf::from(&self.cert_file),
            key_file: PathBuf::from(&self.key_file),
        });

        Ok(ServerConfig {
            listen_addr: SocketAddr::new(ip, self.smtp_port),
            hostname: self.hostname.clone(),
            max_connections: self.max_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            max_message_size: self.max_message_size_bytes,
            max_recipients: self.max_recipients,
            max_errors: self.max_protocol_errors,
            push_timeout: Duration::from_secs(self.push_timeout_seconds),
            tls,
        })
    }
}
