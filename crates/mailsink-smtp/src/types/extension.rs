//! Service extensions listed in the EHLO reply.

use std::fmt;

/// One EHLO extension line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// `SIZE n`: largest message accepted, in bytes.
    Size(usize),
    /// `8BITMIME`
    EightBitMime,
    /// `PIPELINING`
    Pipelining,
    /// `SMTPUTF8`
    SmtpUtf8,
    /// `STARTTLS`, only offered on a plain connection with TLS configured.
    StartTls,
}

impl Extension {
    /// Extensions this server advertises, in reply order.
    #[must_use]
    pub fn advertised(max_message_size: usize, offer_starttls: bool) -> Vec<Self> {
        let mut extensions = vec![
            Self::Size(max_message_size),
            Self::EightBitMime,
            Self::Pipelining,
            Self::SmtpUtf8,
        ];
        if offer_starttls {
            extensions.push(Self::StartTls);
        }
        extensions
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(size) => write!(f, "SIZE {size}"),
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::Pipelining => f.write_str("PIPELINING"),
            Self::SmtpUtf8 => f.write_str("SMTPUTF8"),
            Self::StartTls => f.write_str("STARTTLS"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn advertised_without_tls() {
        let lines: Vec<String> = Extension::advertised(1024, false)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, vec!["SIZE 1024", "8BITMIME", "PIPELINING", "SMTPUTF8"]);
    }

    #[test]
    fn advertised_with_tls() {
        let extensions = Extension::advertised(1024, true);
        assert_eq!(extensions.len(), 5);
        assert_eq!(extensions.last(), Some(&Extension::StartTls));
        assert_eq!(extensions[4].to_string(), "STARTTLS");
    }
}
