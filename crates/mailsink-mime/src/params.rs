//! Header parameter lists (`; key=value; key2="quoted"`).
//!
//! Handles quoted strings and RFC 2231 extended and continued values.

use crate::encoding::decode_charset;
use std::collections::HashMap;

/// Splits `s` on `separator`, ignoring separators inside quoted strings.
pub(crate) fn split_unquoted(s: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                segments.push(&s[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }

    segments.push(&s[start..]);
    segments
}

/// Parses `key=value` segments into a lowercase-keyed map.
pub(crate) fn parse_parameters<'a>(
    segments: impl IntoIterator<Item = &'a str>,
) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut continuations: HashMap<String, Vec<(u32, bool, String)>> = HashMap::new();

    for segment in segments {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value.trim());

        let (name, extended) = match key.strip_suffix('*') {
            Some(name) => (name.to_string(), true),
            None => (key, false),
        };

        // name*0, name*1*, ...
        if let Some((base, index)) = name.split_once('*') {
            if let Ok(index) = index.parse::<u32>() {
                continuations
                    .entry(base.to_string())
                    .or_default()
                    .push((index, extended, value));
                continue;
            }
        }

        let value = if extended {
            decode_extended_value(&value)
        } else {
            value
        };
        params.insert(name, value);
    }

    for (name, mut pieces) in continuations {
        pieces.sort_by_key(|(index, _, _)| *index);

        let mut charset = None;
        let mut bytes = Vec::new();
        for (position, (_, extended, value)) in pieces.iter().enumerate() {
            if *extended {
                let mut encoded = value.as_str();
                if position == 0 {
                    if let Some((cs, rest)) = split_charset_prefix(value) {
                        charset = Some(cs);
                        encoded = rest;
                    }
                }
                bytes.extend(percent_decode(encoded));
            } else {
                bytes.extend_from_slice(value.as_bytes());
            }
        }

        let value = decode_charset(charset.unwrap_or("utf-8"), &bytes);
        params.entry(name).or_insert(value);
    }

    params
}

/// Removes surrounding quotes and backslash escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// Splits `charset'language'value`.
fn split_charset_prefix(value: &str) -> Option<(&str, &str)> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let rest = parts.next()?;
    Some((charset, rest))
}

fn decode_extended_value(value: &str) -> String {
    match split_charset_prefix(value) {
        Some((charset, rest)) => decode_charset(charset, &percent_decode(rest)),
        None => value.to_string(),
    }
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                result.push(byte);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }

    result
}
