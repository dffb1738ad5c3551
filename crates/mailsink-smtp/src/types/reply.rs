//! Replies written back to the client.

use std::fmt;

/// First digit of a reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReplyClass {
    /// 2xx: the command was accepted.
    Completed,
    /// 3xx: more input is expected (only `354` here).
    Intermediate,
    /// 4xx: refused for now, the client may retry.
    Transient,
    /// 5xx: refused.
    Permanent,
    /// Anything outside 200..=599.
    Unknown,
}

/// Three digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 214 help text.
    pub const HELP: Self = Self(214);
    /// 220 greeting, also the go-ahead for STARTTLS.
    pub const SERVICE_READY: Self = Self(220);
    /// 221 goodbye.
    pub const CLOSING: Self = Self(221);
    /// 250 ok.
    pub const OK: Self = Self(250);
    /// 252 VRFY answer: address not checked, mail accepted anyway.
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 354 send the message body.
    pub const START_DATA: Self = Self(354);
    /// 421 the server is closing the connection.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 451 the message could not be queued.
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 too many recipients.
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 unknown command or line too long.
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 bad arguments.
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 command known but not supported.
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 command out of order.
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 552 message too large.
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 554 message rejected.
    pub const TRANSACTION_FAILED: Self = Self(554);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Class given by the first digit.
    #[must_use]
    pub const fn class(self) -> ReplyClass {
        match self.0 / 100 {
            2 => ReplyClass::Completed,
            3 => ReplyClass::Intermediate,
            4 => ReplyClass::Transient,
            5 => ReplyClass::Permanent,
            _ => ReplyClass::Unknown,
        }
    }

    /// True for 4xx and 5xx codes.
    #[must_use]
    pub const fn is_refusal(self) -> bool {
        matches!(self.class(), ReplyClass::Transient | ReplyClass::Permanent)
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// A possibly multi-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code shared by every line.
    pub code: ReplyCode,
    /// Text of each line, without code or separator.
    pub message: Vec<String>,
}

impl Reply {
    /// Builds a reply from its lines.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Builds a one-line reply.
    #[must_use]
    pub fn single(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::new(code, vec![text.into()])
    }

    /// Lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Wire form: `250-first\r\n250 last\r\n`.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code;
        match self.message.split_last() {
            None => write!(f, "{code}\r\n"),
            Some((last, rest)) => {
                for line in rest {
                    write!(f, "{code}-{line}\r\n")?;
                }
                write!(f, "{code} {last}\r\n")
            }
        }
    }
}
