//! Multipart body splitting (RFC 2046 section 5.1).

use crate::error::{Error, Result};

/// Splits a multipart body into its raw body parts.
///
/// The preamble before the first delimiter and the epilogue after the close
/// delimiter are discarded. The line break preceding each delimiter belongs
/// to the delimiter, not to the part. A missing close delimiter is
/// tolerated: the last part runs to the end of the body.
///
/// # Errors
///
/// Returns an error if the boundary is empty or no delimiter line is found.
pub fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    if boundary.is_empty() {
        return Err(Error::MissingBoundary);
    }

    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut found = false;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |offset| pos + offset);
        let next = line_end + 1;
        let line = strip_cr(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let (is_close, rest) = match rest.strip_prefix(b"--") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };

            // Transport padding only; anything else is part content.
            if rest.iter().all(|b| *b == b' ' || *b == b'\t') {
                found = true;
                if let Some(start) = part_start.take() {
                    parts.push(trim_line_break(&body[start..pos.max(start)]));
                }
                if is_close {
                    break;
                }
                part_start = Some(next.min(body.len()));
            }
        }

        pos = next;
    }

    if let Some(start) = part_start {
        parts.push(trim_line_break(&body[start..]));
    }

    if !found {
        return Err(Error::InvalidMultipart(format!(
            "boundary {boundary:?} not found"
        )));
    }

    Ok(parts)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Removes one trailing CRLF or LF.
fn trim_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}
