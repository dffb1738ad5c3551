//! Mail items built from completed SMTP transactions.
//!
//! [`parse_mail`] turns an envelope plus the raw DATA bytes into a
//! [`MailItem`]. Parsing favors keeping the message over rejecting it: a
//! part that fails to decode keeps its raw bytes, an unreadable content type
//! becomes `application/octet-stream`, and a multipart body without a usable
//! boundary is kept as text.

use crate::error::{Error, Result};
use crate::session::Envelope;
use chrono::{DateTime, Utc};
use mailsink_mime::encoding::decode_charset;
use mailsink_mime::{ContentType, Headers, Message, Part};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject used when a message has none.
pub const NO_SUBJECT: &str = "(No Subject)";

/// A captured message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailItem {
    /// Identifier generated at capture time.
    pub id: String,
    /// Envelope sender; empty for the null reverse path.
    pub from_address: String,
    /// Envelope recipients in the order they were accepted.
    pub to_addresses: Vec<String>,
    /// Decoded subject.
    pub subject: String,
    /// Message headers in order of appearance.
    pub headers: Headers,
    /// Text and HTML bodies.
    pub body: MailBody,
    /// Attachments in order of appearance.
    pub attachments: Vec<Attachment>,
    /// Capture time.
    pub received_at: DateTime<Utc>,
    /// Size of the raw message in bytes.
    pub size: usize,
}

impl MailItem {
    /// Returns header values grouped by lowercase name.
    #[must_use]
    pub fn header_map(&self) -> Vec<(String, Vec<String>)> {
        self.headers.grouped()
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Body variants of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBody {
    /// `text/plain` body.
    pub text: Option<String>,
    /// `text/html` body.
    pub html: Option<String>,
}

/// A non-body MIME part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// File name from the part headers, or a generated one.
    pub file_name: String,
    /// MIME type without parameters.
    pub content_type: String,
    /// Decoded payload.
    #[serde(with = "base64_bytes")]
    pub contents: Vec<u8>,
}

/// Builds a [`MailItem`] from an envelope and the raw DATA content.
///
/// # Errors
///
/// Returns an error if the envelope has no sender or no recipients, or the
/// data has no header/body separator.
pub fn parse_mail(envelope: &Envelope, raw: &[u8]) -> Result<MailItem> {
    let sender = envelope
        .sender
        .as_ref()
        .ok_or(Error::MissingEnvelope("sender"))?;
    if envelope.recipients.is_empty() {
        return Err(Error::MissingEnvelope("recipients"));
    }

    let message = Message::parse(raw)?;

    let subject = message
        .subject()
        .map(Headers::decode_value)
        .filter(|subject| !subject.trim().is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let mut contents = Contents::default();
    if message.is_multipart() {
        for part in message.leaf_parts() {
            contents.add(part);
        }
    } else {
        let root = Part::new(
            message.headers.clone(),
            message.body.clone().unwrap_or_default(),
        );
        contents.add(&root);
    }

    Ok(MailItem {
        id: Uuid::new_v4().to_string(),
        from_address: sender.as_str().to_string(),
        to_addresses: envelope
            .recipients
            .iter()
            .map(ToString::to_string)
            .collect(),
        subject,
        headers: message.headers,
        body: contents.body,
        attachments: contents.attachments,
        received_at: Utc::now(),
        size: raw.len(),
    })
}

#[derive(Default)]
struct Contents {
    body: MailBody,
    attachments: Vec<Attachment>,
}

impl Contents {
    fn add(&mut self, part: &Part) {
        let content_type = part
            .content_type()
            .unwrap_or_else(|_| ContentType::octet_stream());
        let is_attachment = part.disposition().is_some_and(|cd| cd.is_attachment());

        if !is_attachment {
            // Multipart leaf: the boundary could not be used, keep it as text
            if content_type.is_multipart() && self.body.text.is_none() {
                self.body.text = Some(trim_body(String::from_utf8_lossy(&part.body).into_owned()));
                return;
            }
            if content_type.is("text", "plain") && self.body.text.is_none() {
                self.body.text = Some(body_text(part, &content_type));
                return;
            }
            if content_type.is("text", "html") && self.body.html.is_none() {
                self.body.html = Some(body_text(part, &content_type));
                return;
            }
        }

        let file_name = part
            .file_name()
            .unwrap_or_else(|| format!("attachment-{}", self.attachments.len() + 1));
        let contents = part.decode_body().unwrap_or_else(|_| part.body.clone());

        self.attachments.push(Attachment {
            file_name,
            content_type: content_type.mime_type(),
            contents,
        });
    }
}

fn body_text(part: &Part, content_type: &ContentType) -> String {
    let bytes = part.decode_body().unwrap_or_else(|_| part.body.clone());
    let charset = content_type.charset().unwrap_or("utf-8");
    trim_body(decode_charset(charset, &bytes))
}

/// Drops the line break that precedes the end-of-data marker.
fn trim_body(text: String) -> String {
    let trimmed = text.trim_end_matches(['\r', '\n']);
    if trimmed.len() == text.len() {
        text
    } else {
        trimmed.to_string()
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
