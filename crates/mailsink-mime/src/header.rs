//! MIME header handling.

use crate::encoding::decode_rfc2047;
use std::fmt;

/// A single header field as it appeared in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Field name with its original capitalization.
    pub name: String,
    /// Unfolded field value.
    pub value: String,
}

/// Ordered collection of email headers.
///
/// Lookups are case-insensitive. Repeated fields (`Received`, `To`, ...)
/// are all kept, in the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns the number of header fields, counting repeats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }

    /// Groups the headers by lowercase name.
    ///
    /// Names are ordered by first appearance and values keep their order.
    #[must_use]
    pub fn grouped(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for header in &self.entries {
            let key = header.name.to_ascii_lowercase();
            match groups.iter_mut().find(|(name, _)| *name == key) {
                Some((_, values)) => values.push(header.value.clone()),
                None => groups.push((key, vec![header.value.clone()])),
            }
        }
        groups
    }

    /// Parses headers from raw text.
    ///
    /// Headers are in the format:
    /// ```text
    /// Header-Name: value
    ///   folded continuation
    /// ```
    ///
    /// Parsing stops at the first empty line. Lines that are neither a
    /// field nor a continuation are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current_name: Option<String> = None;
        let mut current_value = String::new();

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            // Continuation line (starts with space or tab)
            if line.starts_with(' ') || line.starts_with('\t') {
                if current_name.is_some() {
                    current_value.push(' ');
                    current_value.push_str(line.trim());
                }
                continue;
            }

            if let Some(name) = current_name.take() {
                headers.add(name, current_value.trim());
                current_value.clear();
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim_end();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current_name = Some(name.to_string());
                    current_value = value.trim().to_string();
                }
            }
        }

        if let Some(name) = current_name {
            headers.add(name, current_value.trim());
        }

        headers
    }

    /// Decodes a header value from RFC 2047 if encoded.
    ///
    /// Encoded words that cannot be decoded are left as they are.
    #[must_use]
    pub fn decode_value(value: &str) -> String {
        decode_rfc2047(value)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.entries {
            write!(f, "{}: {}\r\n", header.name, header.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Not-A-Header: body text\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("Not-A-Header").is_none());
    }

    #[test]
    fn test_headers_parse_keeps_repeats_in_order() {
        let text = concat!(
            "Received: from a\r\n",
            "Subject: x\r\n",
            "Received: from b\r\n",
            "\tby c\r\n",
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("received"), Some("from a"));
        assert_eq!(
            headers.grouped(),
            vec![
                (
                    "received".to_string(),
                    vec!["from a".to_string(), "from b by c".to_string()]
                ),
                ("subject".to_string(), vec!["x".to_string()]),
            ]
        );
    }

    #[test]
    fn test_headers_parse_skips_garbage() {
        let text = "garbage line\r\nBad Name: x\r\nGood: y\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Good"), Some("y"));
    }

    #[test]
    fn test_headers_display() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("To", "recipient@example.com");

        let s = headers.to_string();
        assert_eq!(s, "From: sender@example.com\r\nTo: recipient@example.com\r\n");
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(Headers::decode_value("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(Headers::decode_value("plain"), "plain");
    }
}
