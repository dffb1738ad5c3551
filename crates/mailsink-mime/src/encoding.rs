//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 encoded words.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// Whitespace (including the line breaks of a wrapped body) is ignored.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Encodes bytes that are not printable ASCII or would interfere
/// with email transmission.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::new();
    let mut line_length = 0;

    for byte in text.as_bytes() {
        // Check if we need soft line break
        if line_length >= MAX_LINE_LENGTH - 3 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        match byte {
            // Printable ASCII except '=' and space (handle separately)
            b'!'..=b'<' | b'>'..=b'~' => {
                result.push(*byte as char);
                line_length += 1;
            }
            // Space needs special handling (encode at line end)
            b' ' => {
                if line_length >= MAX_LINE_LENGTH - 1 {
                    result.push_str("=20");
                    line_length += 3;
                } else {
                    result.push(' ');
                    line_length += 1;
                }
            }
            // Everything else gets encoded
            _ => {
                result.push('=');
                let _ = write!(result, "{byte:02X}");
                line_length += 3;
            }
        }
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045) into raw bytes.
///
/// Soft line breaks may carry trailing whitespace before the line ending.
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(input: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        if j == input.len() {
            i = j;
            continue;
        }
        if input[j] == b'\n' {
            i = j + 1;
            continue;
        }
        if input[j] == b'\r' && input.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }

        // Hex encoded byte
        match (input.get(i + 1), input.get(i + 2)) {
            (Some(&high), Some(&low)) if high.is_ascii_hexdigit() && low.is_ascii_hexdigit() => {
                result.push((hex_value(high) << 4) | hex_value(low));
                i += 3;
            }
            _ => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(result)
}

const fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

/// Converts bytes in the named charset to a string.
///
/// UTF-8 and ISO-8859-1 are decoded exactly; any other charset is read as
/// UTF-8 with invalid sequences replaced.
#[must_use]
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 allows a language suffix: utf-8*en
    let charset = charset.split('*').next().unwrap_or(charset);
    match charset.trim().to_ascii_lowercase().as_str() {
        "iso-8859-1" | "iso8859-1" | "latin1" | "l1" => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes RFC 2047 encoded words in a header value.
///
/// Format: `=?charset?encoding?encoded-text?=`
///
/// Whitespace between two adjacent encoded words is dropped. Anything that
/// does not decode is kept verbatim.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_encoded_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = decode_encoded_word(candidate) {
            if !(after_encoded_word && before.chars().all(char::is_whitespace)) {
                result.push_str(before);
            }
            result.push_str(&decoded);
            rest = &candidate[consumed..];
            after_encoded_word = true;
        } else {
            result.push_str(before);
            result.push_str("=?");
            rest = &candidate[2..];
            after_encoded_word = false;
        }
    }

    result.push_str(rest);
    result
}

/// Decodes one encoded word at the start of `word`.
///
/// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(word: &str) -> Option<(String, usize)> {
    let inner = word.strip_prefix("=?")?;
    let (charset, after_charset) = inner.split_once('?')?;
    let (encoding, after_encoding) = after_charset.split_once('?')?;
    let end = after_encoding.find("?=")?;
    let payload = &after_encoding[..end];

    if charset.is_empty() || payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(payload).ok()?,
        // Q encoding: quoted-printable with underscore for space
        "Q" => decode_quoted_printable(payload.replace('_', " ").as_bytes()).ok()?,
        _ => return None,
    };

    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(charset, &bytes), consumed))
}
