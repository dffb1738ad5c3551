//! MIME message structure and handling.

use crate::content_type::ContentType;
use crate::disposition::ContentDisposition;
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::multipart::split_multipart;
use std::fmt;

/// Nesting limit for multipart bodies. Deeper parts stay opaque.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Decodes a body encoded with this transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for the encoding.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            Self::QuotedPrintable => decode_quoted_printable(body),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME body part.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw bytes, still transfer-encoded).
    pub body: Vec<u8>,
    /// Nested parts when this part is itself multipart.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    /// Parses a raw body part (headers, blank line, body).
    ///
    /// A part without a blank line is read as a body with no headers.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_nested(raw, 0)
    }

    fn parse_nested(raw: &[u8], depth: usize) -> Self {
        let (headers, body) = match split_head_body(raw) {
            Some((head, body)) => (Headers::parse(&String::from_utf8_lossy(head)), body),
            None => (Headers::new(), raw),
        };
        let parts = parse_children(&headers, body, depth);
        Self {
            headers,
            body: body.to_vec(),
            parts,
        }
    }

    /// Gets the content type (`text/plain` when absent).
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        content_type_of(&self.headers)
    }

    /// Gets the content disposition, if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        transfer_encoding_of(&self.headers)
    }

    /// Returns the attachment file name, from `Content-Disposition` first and
    /// the `Content-Type` name parameter second.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let from_disposition = self
            .disposition()
            .and_then(|cd| cd.filename().map(str::to_string));
        let name = from_disposition.or_else(|| {
            self.content_type()
                .ok()
                .and_then(|ct| ct.name().map(str::to_string))
        })?;

        let name = Headers::decode_value(name.trim());
        if name.is_empty() { None } else { Some(name) }
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        self.transfer_encoding().decode(&self.body)
    }

    /// Gets the decoded body as a string, honoring the charset parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if transfer decoding fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        Ok(text_in_charset(&self.headers, &decoded))
    }

    /// Returns the leaf parts of this part, depth-first.
    #[must_use]
    pub fn leaf_parts(&self) -> Vec<&Self> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Self>) {
        if self.parts.is_empty() {
            leaves.push(self);
        } else {
            for part in &self.parts {
                part.collect_leaves(leaves);
            }
        }
    }
}

/// MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Message parts (empty for single-part messages).
    pub parts: Vec<Part>,
    /// Body for single-part messages.
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Creates a single-part message.
    #[must_use]
    pub const fn single_part(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: Some(body),
        }
    }

    /// Creates a multipart message.
    #[must_use]
    pub const fn multipart(headers: Headers, parts: Vec<Part>) -> Self {
        Self {
            headers,
            parts,
            body: None,
        }
    }

    /// Parses a raw RFC 5322 message.
    ///
    /// The header block ends at the first empty line. Multipart bodies are
    /// split recursively; when the boundary is missing or never appears the
    /// body is kept as a single part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSeparator`] if there is no empty line
    /// separating headers from the body.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (head, body) = split_head_body(raw).ok_or(Error::MissingSeparator)?;
        let headers = Headers::parse(&String::from_utf8_lossy(head));

        let parts = parse_children(&headers, body, 0);
        if parts.is_empty() {
            Ok(Self::single_part(headers, body.to_vec()))
        } else {
            Ok(Self::multipart(headers, parts))
        }
    }

    /// Gets the content type (`text/plain` when absent).
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        content_type_of(&self.headers)
    }

    /// Checks if the body was split into parts.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Gets the Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Returns every leaf part, depth-first.
    #[must_use]
    pub fn leaf_parts(&self) -> Vec<&Part> {
        let mut leaves = Vec::new();
        for part in &self.parts {
            part.collect_leaves(&mut leaves);
        }
        leaves
    }
}

fn content_type_of(headers: &Headers) -> Result<ContentType> {
    headers
        .get("content-type")
        .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
}

fn transfer_encoding_of(headers: &Headers) -> TransferEncoding {
    headers
        .get("content-transfer-encoding")
        .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
}

fn text_in_charset(headers: &Headers, bytes: &[u8]) -> String {
    let content_type = content_type_of(headers).ok();
    let charset = content_type
        .as_ref()
        .and_then(ContentType::charset)
        .unwrap_or("utf-8");
    decode_charset(charset, bytes)
}

fn parse_children(headers: &Headers, body: &[u8], depth: usize) -> Vec<Part> {
    if depth >= MAX_DEPTH {
        return Vec::new();
    }
    let Ok(content_type) = content_type_of(headers) else {
        return Vec::new();
    };
    if !content_type.is_multipart() {
        return Vec::new();
    }
    let Some(boundary) = content_type.boundary() else {
        return Vec::new();
    };

    split_multipart(body, boundary)
        .map(|sections| {
            sections
                .into_iter()
                .map(|section| Part::parse_nested(section, depth + 1))
                .collect()
        })
        .unwrap_or_default()
}

/// Splits at the first empty line. The head keeps its final line break.
fn split_head_body(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(body) = raw.strip_prefix(b"\r\n") {
        return Some((&[], body));
    }
    if let Some(body) = raw.strip_prefix(b"\n") {
        return Some((&[], body));
    }

    for (i, byte) in raw.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let rest = &raw[i + 1..];
        if rest.starts_with(b"\r\n") {
            return Some((&raw[..=i], &raw[i + 3..]));
        }
        if rest.starts_with(b"\n") {
            return Some((&raw[..=i], &raw[i + 2..]));
        }
    }

    None
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
    use crate::encoding::encode_base64;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" Base64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-unknown"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_parse_single_part() {
        let raw = b"From: sender@example.com\r\nSubject: Test\r\n\r\nHello, World!\r\n";
        let message = Message::parse(raw).unwrap();

        assert_eq!(message.headers.get("from"), Some("sender@example.com"));
        assert_eq!(message.subject(), Some("Test"));
        assert!(!message.is_multipart());
        assert_eq!(message.body.as_deref(), Some(&b"Hello, World!\r\n"[..]));
    }

    #[test]
    fn test_parse_lf_only() {
        let raw = b"Subject: Unix\n\nbody\n";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.subject(), Some("Unix"));
        assert_eq!(message.body.as_deref(), Some(&b"body\n"[..]));
    }

    #[test]
    fn test_parse_no_headers() {
        let message = Message::parse(b"\r\njust a body").unwrap();
        assert!(message.headers.is_empty());
        assert_eq!(message.body.as_deref(), Some(&b"just a body"[..]));
    }

    #[test]
    fn test_parse_missing_separator() {
        let result = Message::parse(b"Subject: no body\r\n");
        assert!(matches!(result, Err(Error::MissingSeparator)));
    }

    #[test]
    fn test_parse_base64_single_part() {
        let raw = format!(
            "Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            encode_base64("Grüße".as_bytes())
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        let part = Part::new(message.headers, message.body.unwrap());
        assert_eq!(part.body_text().unwrap(), "Grüße");
    }

    #[test]
    fn test_parse_multipart_nested() {
        let raw = concat!(
            "Subject: Nested\r\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Disposition: attachment; filename=\"data.bin\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "AAEC\r\n",
            "--outer--\r\n",
        );

        let message = Message::parse(raw.as_bytes()).unwrap();
        assert!(message.is_multipart());
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.parts[0].parts.len(), 2);

        let leaves = message.leaf_parts();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].body_text().unwrap(), "plain");
        assert!(leaves[1].content_type().unwrap().is("text", "html"));
        assert_eq!(leaves[2].file_name().as_deref(), Some("data.bin"));
        assert_eq!(leaves[2].decode_body().unwrap(), vec![0, 1, 2]);
        assert!(leaves[2].disposition().unwrap().is_attachment());
    }

    #[test]
    fn test_multipart_without_boundary_stays_single_part() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--x\r\n\r\nhi\r\n--x--\r\n";
        let message = Message::parse(raw).unwrap();
        assert!(!message.is_multipart());
        assert!(message.body.is_some());
    }

    #[test]
    fn test_multipart_boundary_never_found_stays_single_part() {
        let raw = b"Content-Type: multipart/mixed; boundary=zzz\r\n\r\nno delimiters\r\n";
        let message = Message::parse(raw).unwrap();
        assert!(!message.is_multipart());
        assert_eq!(message.body.as_deref(), Some(&b"no delimiters\r\n"[..]));
    }

    #[test]
    fn test_part_file_name_fallbacks() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "image/png; name=\"=?utf-8?B?w6kucG5n?=\"");
        let part = Part::new(headers, Vec::new());
        assert_eq!(part.file_name().as_deref(), Some("é.png"));

        let part = Part::new(Headers::new(), Vec::new());
        assert!(part.file_name().is_none());
    }

    #[test]
    fn test_part_body_text_latin1() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain; charset=iso-8859-1");
        headers.add("Content-Transfer-Encoding", "quoted-printable");
        let part = Part::new(headers, b"Caf=E9".to_vec());
        assert_eq!(part.body_text().unwrap(), "Café");
    }

    #[test]
    fn test_part_decode_failure_is_reported() {
        let mut headers = Headers::new();
        headers.add("Content-Transfer-Encoding", "base64");
        let part = Part::new(headers, b"!!!not base64!!!".to_vec());
        assert!(part.decode_body().is_err());
    }

    #[test]
    fn test_part_without_headers() {
        let part = Part::parse(b"only body");
        assert!(part.headers.is_empty());
        assert_eq!(part.body, b"only body");
    }

    #[test]
    fn test_depth_limit() {
        let mut raw = String::new();
        for level in 0..(MAX_DEPTH + 4) {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n"
            ));
        }
        raw.push_str("\r\nleaf\r\n");

        let message = Message::parse(raw.as_bytes()).unwrap();
        let mut depth = 0;
        let mut part = message.parts.first();
        while let Some(current) = part {
            depth += 1;
            part = current.parts.first();
        }
        assert_eq!(depth, MAX_DEPTH);
    }

    proptest::proptest! {
        #[test]
        fn prop_multipart_leaf_bodies_survive(
            bodies in proptest::collection::vec("[a-zA-Z0-9 .,]{0,40}", 1..5)
        ) {
            let mut raw = String::from("Content-Type: multipart/mixed; boundary=\"=sep=\"\r\n\r\n");
            for body in &bodies {
                raw.push_str("--=sep=\r\nContent-Type: text/plain\r\n\r\n");
                raw.push_str(body);
                raw.push_str("\r\n");
            }
            raw.push_str("--=sep=--\r\n");

            let message = Message::parse(raw.as_bytes()).unwrap();
            let leaves: Vec<String> = message
                .leaf_parts()
                .into_iter()
                .map(|part| part.body_text().unwrap())
                .collect();
            proptest::prop_assert_eq!(leaves, bodies);
        }
    }
}
