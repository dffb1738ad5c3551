//! `Content-Disposition` handling (RFC 2183).

use crate::params::{parse_parameters, split_unquoted};
use std::collections::HashMap;

/// Disposition type of a body part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionKind {
    /// Displayed as part of the message.
    Inline,
    /// Offered as a separate file.
    Attachment,
    /// Unknown disposition type, treated as an attachment.
    Other(String),
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type.
    pub kind: DispositionKind,
    /// Parameters (e.g., filename, size).
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parses a `Content-Disposition` value. Parsing never fails; an empty
    /// type is read as `attachment`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut parts = split_unquoted(s, ';').into_iter();
        let kind = match parts.next().unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "inline" => DispositionKind::Inline,
            "attachment" | "" => DispositionKind::Attachment,
            other => DispositionKind::Other(other.to_string()),
        };

        Self {
            kind,
            parameters: parse_parameters(parts),
        }
    }

    /// Returns true unless the disposition is `inline`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind != DispositionKind::Inline
    }

    /// Returns the filename parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}
