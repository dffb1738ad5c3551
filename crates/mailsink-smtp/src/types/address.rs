//! Envelope address types.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Email address from an SMTP path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Parses an angle-bracketed path such as `<user@example.com>`.
    ///
    /// A source route (`<@relay1,@relay2:user@example.com>`) is accepted and
    /// stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the brackets are missing or the address is invalid.
    pub fn parse_path(path: &str) -> Result<Self> {
        let inner = strip_brackets(path)?;
        if inner.is_empty() {
            return Err(Error::InvalidAddress("Path cannot be empty".into()));
        }
        Self::new(strip_source_route(inner)?)
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Validates an email address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidAddress(
                "Address cannot contain whitespace".into(),
            ));
        }

        // The local part may be quoted and contain '@', so split on the last one.
        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress("Address must contain @".into()));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        if domain.contains(['<', '>', '@']) {
            return Err(Error::InvalidAddress(format!("Invalid domain: {domain}")));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reverse path of a `MAIL FROM` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversePath {
    /// The null path `<>` used by bounces and notifications.
    Null,
    /// A sender mailbox.
    Mailbox(Address),
}

impl ReversePath {
    /// Parses a reverse path; `<>` is the null path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn parse(path: &str) -> Result<Self> {
        if strip_brackets(path)?.trim().is_empty() {
            return Ok(Self::Null);
        }
        Address::parse_path(path).map(Self::Mailbox)
    }

    /// Returns the sender address, or an empty string for the null path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Null => "",
            Self::Mailbox(address) => address.as_str(),
        }
    }

    /// Returns true for the null path.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for ReversePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.as_str())
    }
}

fn strip_brackets(path: &str) -> Result<&str> {
    path.trim()
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(|| Error::InvalidAddress(format!("Path must be enclosed in <>: {path}")))
}

fn strip_source_route(inner: &str) -> Result<&str> {
    if !inner.starts_with('@') {
        return Ok(inner);
    }
    inner
        .split_once(':')
        .map(|(_, mailbox)| mailbox)
        .ok_or_else(|| Error::InvalidAddress(format!("Unterminated source route: {inner}")))
}
