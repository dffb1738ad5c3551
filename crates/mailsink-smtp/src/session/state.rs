//! Session state types.

use std::fmt;

/// SMTP session state.
///
/// ```text
/// GREETING --HELO/EHLO--> READY --MAIL--> MAIL --RCPT--> RCPT --DATA--> DATA
///                           ^                                           |
///                           +------------- RSET / end of data ----------+
/// ```
///
/// `Closed` is reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Banner sent, waiting for HELO/EHLO.
    #[default]
    Greeting,
    /// Waiting for a command.
    Ready,
    /// Sender accepted, waiting for recipients.
    Mail,
    /// At least one recipient accepted.
    Rcpt,
    /// Reading message data.
    Data,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` while a mail transaction is open.
    #[must_use]
    pub const fn in_transaction(self) -> bool {
        matches!(self, Self::Mail | Self::Rcpt | Self::Data)
    }

    /// Returns `true` once the session has ended.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Greeting => "GREETING",
            Self::Ready => "READY",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_greeting() {
        assert_eq!(SessionState::default(), SessionState::Greeting);
    }

    #[test]
    fn test_in_transaction() {
        assert!(!SessionState::Greeting.in_transaction());
        assert!(!SessionState::Ready.in_transaction());
        assert!(SessionState::Mail.in_transaction());
        assert!(SessionState::Rcpt.in_transaction());
        assert!(SessionState::Data.in_transaction());
        assert!(!SessionState::Closed.in_transaction());
        assert!(SessionState::Closed.is_closed());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Rcpt.to_string(), "RCPT");
    }
}
