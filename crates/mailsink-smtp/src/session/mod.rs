//! Sans-I/O SMTP session.
//!
//! [`Session`] is a pure state machine: the connection handler feeds it
//! lines read from the socket and performs the [`Action`]s it returns. It
//! never touches the network, which keeps every state transition and reply
//! code testable without sockets.
//!
//! # Example
//!
//! ```
//! use mailsink_smtp::session::{Action, Session, SessionConfig, SessionState};
//!
//! let mut session = Session::new(SessionConfig::default());
//! assert_eq!(session.greeting().code.as_u16(), 220);
//!
//! let Some(Action::Reply(reply)) = session.handle_line(b"HELO client") else {
//!     panic!("expected a reply");
//! };
//! assert_eq!(reply.code.as_u16(), 250);
//! assert_eq!(session.state(), SessionState::Ready);
//! ```

// Allow missing_const_for_fn since accessors on non-Copy fields can't be const.
#![allow(clippy::missing_const_for_fn)]

mod envelope;
mod state;

pub use envelope::Envelope;
pub use state::SessionState;

use crate::command::Command;
use crate::types::{Extension, Reply, ReplyCode};

/// Limits and identity a session runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name used in the banner and EHLO reply.
    pub hostname: String,
    /// Maximum accepted message size in bytes (after dot-unstuffing).
    pub max_message_size: usize,
    /// Maximum recipients per transaction.
    pub max_recipients: usize,
    /// Consecutive protocol errors tolerated before the session is closed.
    pub max_errors: usize,
    /// Whether STARTTLS can be offered.
    pub tls_available: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: "mailsink".to_string(),
            max_message_size: 10 * 1024 * 1024,
            max_recipients: 100,
            max_errors: 10,
            tls_available: false,
        }
    }
}

/// What the connection handler must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write the reply and keep reading.
    Reply(Reply),
    /// Write the reply, then perform the TLS handshake.
    StartTls(Reply),
    /// Data phase finished; build and hand off the mail item, then report
    /// back through [`Session::delivered`].
    Deliver(Transaction),
    /// Write the reply and close the connection.
    Close(Reply),
}

/// A completed DATA phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Envelope of the transaction.
    pub envelope: Envelope,
    /// Message content, dot-unstuffed, CRLF line endings.
    pub data: Vec<u8>,
}

/// Result of handing a transaction to the mail item channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Mail item accepted.
    Queued {
        /// Identifier of the captured item.
        id: String,
    },
    /// Message could not be turned into a mail item.
    Rejected(String),
    /// Channel stayed full past the push timeout.
    Deferred,
    /// Channel closed or server is forcing shutdown.
    Aborted,
}

/// Protocol state of one SMTP connection.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    envelope: Envelope,
    data: Vec<u8>,
    data_overflow: bool,
    errors: usize,
    client_name: Option<String>,
    tls_active: bool,
}

impl Session {
    /// Creates a session in the `Greeting` state.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Greeting,
            envelope: Envelope::default(),
            data: Vec::new(),
            data_overflow: false,
            errors: 0,
            client_name: None,
            tls_active: false,
        }
    }

    /// Returns the banner sent when the connection opens.
    #[must_use]
    pub fn greeting(&self) -> Reply {
        Reply::single(
            ReplyCode::SERVICE_READY,
            format!("{} ESMTP mailsink ready", self.config.hostname),
        )
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the envelope of the open transaction.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Returns the name the client gave in HELO/EHLO.
    #[must_use]
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Returns `true` once STARTTLS has completed.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls_active
    }

    /// Returns the number of consecutive protocol errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Returns `true` while a mail transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.in_transaction()
    }

    /// Feeds one line (without its line break) to the session.
    ///
    /// Returns `None` while message data is being accumulated.
    pub fn handle_line(&mut self, line: &[u8]) -> Option<Action> {
        if self.state == SessionState::Data {
            self.data_line(line)
        } else {
            Some(self.command(&String::from_utf8_lossy(line)))
        }
    }

    /// Handles a command line.
    pub fn command(&mut self, line: &str) -> Action {
        if self.state.is_closed() {
            return Action::Close(self.closing_reply());
        }

        match Command::parse(line) {
            Ok(command) => self.dispatch(command),
            Err(err) => self.protocol_error(err.reply()),
        }
    }

    /// Handles one line of message data.
    ///
    /// Lines are dot-unstuffed; a line holding only `.` ends the data phase.
    /// Once the size limit is crossed the rest of the message is discarded
    /// and the terminator is answered with `552`.
    pub fn data_line(&mut self, line: &[u8]) -> Option<Action> {
        if line == b"." {
            self.state = SessionState::Ready;
            let data = std::mem::take(&mut self.data);
            let envelope = std::mem::take(&mut self.envelope);

            if std::mem::take(&mut self.data_overflow) {
                return Some(Action::Reply(Reply::single(
                    ReplyCode::EXCEEDED_STORAGE,
                    "Message size exceeds fixed maximum message size",
                )));
            }
            return Some(Action::Deliver(Transaction { envelope, data }));
        }

        if self.data_overflow {
            return None;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.data.len() + line.len() + 2 > self.config.max_message_size {
            self.data_overflow = true;
            self.data = Vec::new();
            return None;
        }

        self.data.extend_from_slice(line);
        self.data.extend_from_slice(b"\r\n");
        None
    }

    /// Records a data line that was too long to be read at all.
    ///
    /// Such a line already exceeds the message size limit, so the message is
    /// discarded and the terminator is answered with `552`. Outside the data
    /// phase this does nothing.
    pub fn data_line_overflowed(&mut self) {
        if self.state == SessionState::Data {
            self.data_overflow = true;
            self.data = Vec::new();
        }
    }

    /// Reports how the hand-off of a [`Transaction`] went.
    pub fn delivered(&mut self, outcome: DeliveryOutcome) -> Action {
        match outcome {
            DeliveryOutcome::Queued { id } => {
                Action::Reply(Reply::single(ReplyCode::OK, format!("Ok: queued as {id}")))
            }
            DeliveryOutcome::Rejected(reason) => Action::Reply(Reply::single(
                ReplyCode::TRANSACTION_FAILED,
                format!("Transaction failed: {reason}"),
            )),
            DeliveryOutcome::Deferred => Action::Reply(Reply::single(
                ReplyCode::LOCAL_ERROR,
                "Requested action aborted: mail queue full, try again later",
            )),
            DeliveryOutcome::Aborted => {
                self.state = SessionState::Closed;
                Action::Close(self.closing_reply())
            }
        }
    }

    /// Marks the TLS handshake as complete. The client must greet again.
    pub fn tls_established(&mut self) {
        self.tls_active = true;
        self.state = SessionState::Greeting;
        self.client_name = None;
        self.envelope.reset();
    }

    /// Closes the session for server shutdown.
    pub fn shutdown(&mut self) -> Reply {
        self.close()
    }

    /// Closes the session after an idle timeout.
    pub fn timeout(&mut self) -> Reply {
        self.state = SessionState::Closed;
        Reply::single(
            ReplyCode::SERVICE_UNAVAILABLE,
            format!("{} Idle timeout, closing connection", self.config.hostname),
        )
    }

    fn dispatch(&mut self, command: Command) -> Action {
        match command {
            Command::Helo { hostname } => {
                let reply = Reply::single(
                    ReplyCode::OK,
                    format!("{} Hello {hostname}", self.config.hostname),
                );
                self.greeted(hostname);
                self.ok(reply)
            }
            Command::Ehlo { hostname } => {
                let mut lines = vec![format!("{} greets {hostname}", self.config.hostname)];
                let offer_tls = self.config.tls_available && !self.tls_active;
                lines.extend(
                    Extension::advertised(self.config.max_message_size, offer_tls)
                        .iter()
                        .map(ToString::to_string),
                );
                self.greeted(hostname);
                self.ok(Reply::new(ReplyCode::OK, lines))
            }
            Command::MailFrom { from, size } => match self.state {
                SessionState::Greeting => self.bad_sequence("Send HELO/EHLO first"),
                SessionState::Ready => {
                    if size.is_some_and(|declared| declared > self.config.max_message_size) {
                        return Action::Reply(Reply::single(
                            ReplyCode::EXCEEDED_STORAGE,
                            "Message size exceeds fixed maximum message size",
                        ));
                    }
                    self.envelope.reset();
                    self.envelope.sender = Some(from);
                    self.state = SessionState::Mail;
                    self.ok(Reply::single(ReplyCode::OK, "Ok"))
                }
                _ => self.bad_sequence("Sender already specified"),
            },
            Command::RcptTo { to } => match self.state {
                SessionState::Mail | SessionState::Rcpt => {
                    if self.envelope.recipients.len() >= self.config.max_recipients {
                        return Action::Reply(Reply::single(
                            ReplyCode::INSUFFICIENT_STORAGE,
                            "Too many recipients",
                        ));
                    }
                    self.envelope.recipients.push(to);
                    self.state = SessionState::Rcpt;
                    self.ok(Reply::single(ReplyCode::OK, "Ok"))
                }
                _ => self.bad_sequence("Need MAIL command before RCPT"),
            },
            Command::Data => match self.state {
                SessionState::Rcpt => {
                    self.state = SessionState::Data;
                    self.data.clear();
                    self.data_overflow = false;
                    self.ok(Reply::single(
                        ReplyCode::START_DATA,
                        "End data with <CR><LF>.<CR><LF>",
                    ))
                }
                SessionState::Mail => self.bad_sequence("Need RCPT command before DATA"),
                _ => self.bad_sequence("Need MAIL command before DATA"),
            },
            Command::Rset => {
                self.envelope.reset();
                if self.state != SessionState::Greeting {
                    self.state = SessionState::Ready;
                }
                self.ok(Reply::single(ReplyCode::OK, "Ok"))
            }
            Command::Noop => self.ok(Reply::single(ReplyCode::OK, "Ok")),
            Command::Vrfy { .. } => self.ok(Reply::single(
                ReplyCode::CANNOT_VERIFY,
                "Cannot VRFY user, but will accept message and attempt delivery",
            )),
            Command::Help => self.ok(Reply::single(
                ReplyCode::HELP,
                "Supported commands: HELO EHLO MAIL RCPT DATA RSET NOOP VRFY HELP STARTTLS QUIT",
            )),
            Command::StartTls => {
                if !self.config.tls_available {
                    Action::Reply(Reply::single(
                        ReplyCode::NOT_IMPLEMENTED,
                        "STARTTLS not available",
                    ))
                } else if self.tls_active {
                    self.bad_sequence("TLS already active")
                } else if self.state.in_transaction() {
                    self.bad_sequence("STARTTLS not allowed during a mail transaction")
                } else {
                    self.errors = 0;
                    Action::StartTls(Reply::single(
                        ReplyCode::SERVICE_READY,
                        "Ready to start TLS",
                    ))
                }
            }
            Command::Quit => {
                self.state = SessionState::Closed;
                self.envelope.reset();
                Action::Close(Reply::single(
                    ReplyCode::CLOSING,
                    format!("{} Service closing transmission channel", self.config.hostname),
                ))
            }
            Command::NotImplemented { verb } => Action::Reply(Reply::single(
                ReplyCode::NOT_IMPLEMENTED,
                format!("{verb} not implemented"),
            )),
        }
    }

    fn greeted(&mut self, hostname: String) {
        self.client_name = Some(hostname);
        self.envelope.reset();
        self.state = SessionState::Ready;
    }

    fn ok(&mut self, reply: Reply) -> Action {
        self.errors = 0;
        Action::Reply(reply)
    }

    fn bad_sequence(&mut self, text: &str) -> Action {
        self.protocol_error(Reply::single(ReplyCode::BAD_SEQUENCE, text))
    }

    fn protocol_error(&mut self, reply: Reply) -> Action {
        self.errors += 1;
        if self.errors >= self.config.max_errors.max(1) {
            self.state = SessionState::Closed;
            self.envelope.reset();
            return Action::Close(Reply::single(
                ReplyCode::SERVICE_UNAVAILABLE,
                format!("{} Too many errors, closing connection", self.config.hostname),
            ));
        }
        Action::Reply(reply)
    }

    fn close(&mut self) -> Reply {
        self.state = SessionState::Closed;
        self.envelope.reset();
        self.data = Vec::new();
        self.closing_reply()
    }

    fn closing_reply(&self) -> Reply {
        Reply::single(
            ReplyCode::SERVICE_UNAVAILABLE,
            format!(
                "{} Service not available, closing transmission channel",
                self.config.hostname
            ),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::ReversePath;
    use proptest::prelude::*;

    fn session() -> Session {
        Session::new(SessionConfig {
            hostname: "test.local".to_string(),
            max_message_size: 64,
            max_recipients: 3,
            max_errors: 3,
            tls_available: false,
        })
    }

    fn reply_code(action: Action) -> u16 {
        match action {
            Action::Reply(reply) | Action::StartTls(reply) | Action::Close(reply) => {
                reply.code.as_u16()
            }
            Action::Deliver(_) => panic!("unexpected delivery"),
        }
    }

    fn send(session: &mut Session, line: &str) -> u16 {
        reply_code(session.command(line))
    }

    fn ready_with_recipient(session: &mut Session) {
        assert_eq!(send(session, "HELO x"), 250);
        assert_eq!(send(session, "MAIL FROM:<a@b.com>"), 250);
        assert_eq!(send(session, "RCPT TO:<c@d.com>"), 250);
    }

    fn feed_data(session: &mut Session, lines: &[&str]) -> Option<Action> {
        let mut last = None;
        for line in lines {
            last = session.handle_line(line.as_bytes());
        }
        last
    }

    mod transitions {
        use super::*;

        #[test]
        fn full_transaction() {
            let mut s = session();
            ready_with_recipient(&mut s);
            assert_eq!(s.state(), SessionState::Rcpt);
            assert_eq!(send(&mut s, "DATA"), 354);
            assert_eq!(s.state(), SessionState::Data);

            let action = feed_data(&mut s, &["Subject: Hi", "", "Hello", "."]).unwrap();
            let Action::Deliver(transaction) = action else {
                panic!("expected delivery");
            };
            assert_eq!(transaction.data, b"Subject: Hi\r\n\r\nHello\r\n");
            assert_eq!(
                transaction.envelope.sender,
                Some(ReversePath::parse("<a@b.com>").unwrap())
            );
            assert_eq!(transaction.envelope.recipients[0].as_str(), "c@d.com");
            assert_eq!(s.state(), SessionState::Ready);
            assert!(s.envelope().is_empty());

            let action = s.delivered(DeliveryOutcome::Queued { id: "42".into() });
            let Action::Reply(reply) = action else {
                panic!("expected reply");
            };
            assert_eq!(reply.code, ReplyCode::OK);
            assert!(reply.message_text().contains("42"));
        }

        #[test]
        fn ehlo_advertises_extensions() {
            let mut s = session();
            let Action::Reply(reply) = s.command("EHLO client") else {
                panic!("expected reply");
            };
            assert_eq!(reply.code, ReplyCode::OK);
            assert_eq!(reply.message[0], "test.local greets client");
            assert!(reply.message.contains(&"SIZE 64".to_string()));
            assert!(reply.message.contains(&"8BITMIME".to_string()));
            assert!(!reply.message.contains(&"STARTTLS".to_string()));
            assert_eq!(s.client_name(), Some("client"));
        }

        #[test]
        fn mail_before_helo_is_bad_sequence() {
            let mut s = session();
            assert_eq!(send(&mut s, "MAIL FROM:<a@b.com>"), 503);
            assert_eq!(s.state(), SessionState::Greeting);
        }

        #[test]
        fn out_of_sequence_commands() {
            let mut s = session();
            send(&mut s, "HELO x");
            assert_eq!(send(&mut s, "RCPT TO:<c@d.com>"), 503);
            assert_eq!(send(&mut s, "DATA"), 503);
            assert_eq!(s.state(), SessionState::Ready);

            assert_eq!(send(&mut s, "MAIL FROM:<a@b.com>"), 250);
            assert_eq!(send(&mut s, "DATA"), 503);
            assert_eq!(s.state(), SessionState::Mail);
        }

        #[test]
        fn second_mail_from_is_bad_sequence() {
            let mut s = session();
            ready_with_recipient(&mut s);
            assert_eq!(send(&mut s, "MAIL FROM:<other@b.com>"), 503);
            assert_eq!(s.state(), SessionState::Rcpt);
            assert_eq!(s.envelope().sender.as_ref().unwrap().as_str(), "a@b.com");
        }

        #[test]
        fn rset_discards_envelope() {
            let mut s = session();
            ready_with_recipient(&mut s);
            assert_eq!(send(&mut s, "RSET"), 250);
            assert_eq!(s.state(), SessionState::Ready);
            assert!(s.envelope().is_empty());

            assert_eq!(send(&mut s, "MAIL FROM:<new@b.com>"), 250);
            assert!(s.envelope().recipients.is_empty());
        }

        #[test]
        fn rset_before_helo_keeps_greeting() {
            let mut s = session();
            assert_eq!(send(&mut s, "RSET"), 250);
            assert_eq!(s.state(), SessionState::Greeting);
        }

        #[test]
        fn helo_mid_transaction_resets() {
            let mut s = session();
            ready_with_recipient(&mut s);
            assert_eq!(send(&mut s, "EHLO again"), 250);
            assert_eq!(s.state(), SessionState::Ready);
            assert!(s.envelope().is_empty());
        }

        #[test]
        fn null_sender_accepted() {
            let mut s = session();
            send(&mut s, "HELO x");
            assert_eq!(send(&mut s, "MAIL FROM:<>"), 250);
            assert_eq!(s.envelope().sender, Some(ReversePath::Null));
        }

        #[test]
        fn declared_size_too_large() {
            let mut s = session();
            send(&mut s, "HELO x");
            assert_eq!(send(&mut s, "MAIL FROM:<a@b.com> SIZE=65"), 552);
            assert_eq!(s.state(), SessionState::Ready);
            assert_eq!(send(&mut s, "MAIL FROM:<a@b.com> SIZE=64"), 250);
        }

        #[test]
        fn too_many_recipients() {
            let mut s = session();
            ready_with_recipient(&mut s);
            assert_eq!(send(&mut s, "RCPT TO:<e@f.com>"), 250);
            assert_eq!(send(&mut s, "RCPT TO:<g@h.com>"), 250);
            assert_eq!(send(&mut s, "RCPT TO:<i@j.com>"), 452);
            assert_eq!(s.envelope().recipients.len(), 3);
            assert_eq!(s.state(), SessionState::Rcpt);
        }

        #[test]
        fn informational_commands() {
            let mut s = session();
            assert_eq!(send(&mut s, "NOOP"), 250);
            assert_eq!(send(&mut s, "VRFY someone"), 252);
            assert_eq!(send(&mut s, "HELP"), 214);
            assert_eq!(send(&mut s, "AUTH PLAIN"), 502);
            assert_eq!(s.state(), SessionState::Greeting);
        }

        #[test]
        fn quit_closes() {
            let mut s = session();
            ready_with_recipient(&mut s);
            let action = s.command("QUIT");
            assert!(matches!(action, Action::Close(ref r) if r.code == ReplyCode::CLOSING));
            assert!(s.state().is_closed());
            assert!(matches!(s.command("NOOP"), Action::Close(_)));
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn malformed_commands_keep_state() {
            let mut s = session();
            send(&mut s, "HELO x");
            assert_eq!(send(&mut s, "BOGUS"), 500);
            assert_eq!(send(&mut s, "MAIL FROM:nobrackets"), 501);
            assert_eq!(s.state(), SessionState::Ready);
            assert_eq!(s.error_count(), 2);
        }

        #[test]
        fn error_budget_closes_session() {
            let mut s = session();
            assert_eq!(send(&mut s, "BOGUS"), 500);
            assert_eq!(send(&mut s, "BOGUS"), 500);
            let action = s.command("BOGUS");
            assert!(matches!(action, Action::Close(ref r) if r.code == ReplyCode::SERVICE_UNAVAILABLE));
            assert!(s.state().is_closed());
        }

        #[test]
        fn success_resets_error_budget() {
            let mut s = session();
            send(&mut s, "BOGUS");
            send(&mut s, "BOGUS");
            assert_eq!(send(&mut s, "NOOP"), 250);
            assert_eq!(s.error_count(), 0);
            assert_eq!(send(&mut s, "BOGUS"), 500);
        }

        #[test]
        fn bad_sequence_counts_against_budget() {
            let mut s = session();
            send(&mut s, "DATA");
            send(&mut s, "DATA");
            assert!(matches!(s.command("DATA"), Action::Close(_)));
        }
    }

    mod data {
        use super::*;

        #[test]
        fn dot_unstuffing() {
            let mut s = session();
            ready_with_recipient(&mut s);
            send(&mut s, "DATA");
            assert!(s.handle_line(b"..leading dot").is_none());
            assert!(s.handle_line(b".x").is_none());
            assert!(s.handle_line(b". ").is_none());
            let Some(Action::Deliver(t)) = s.handle_line(b".") else {
                panic!("expected delivery");
            };
            assert_eq!(t.data, b".leading dot\r\nx\r\n \r\n");
        }

        #[test]
        fn oversized_message_is_discarded() {
            let mut s = session();
            ready_with_recipient(&mut s);
            send(&mut s, "DATA");
            let long = "x".repeat(40);
            assert!(s.handle_line(long.as_bytes()).is_none());
            assert!(s.handle_line(long.as_bytes()).is_none());
            assert!(s.handle_line(b"more").is_none());
            let Some(Action::Reply(reply)) = s.handle_line(b".") else {
                panic!("expected 552");
            };
            assert_eq!(reply.code, ReplyCode::EXCEEDED_STORAGE);
            assert_eq!(s.state(), SessionState::Ready);
            assert!(s.envelope().is_empty());

            // A fresh transaction works afterwards
            assert_eq!(send(&mut s, "MAIL FROM:<a@b.com>"), 250);
        }

        #[test]
        fn unreadable_line_discards_message() {
            let mut s = session();
            ready_with_recipient(&mut s);
            send(&mut s, "DATA");
            assert!(s.handle_line(b"Subject: big").is_none());
            s.data_line_overflowed();
            assert!(s.handle_line(b"tail").is_none());
            let Some(Action::Reply(reply)) = s.handle_line(b".") else {
                panic!("expected 552");
            };
            assert_eq!(reply.code, ReplyCode::EXCEEDED_STORAGE);
            assert_eq!(s.state(), SessionState::Ready);
        }

        #[test]
        fn overflow_outside_data_is_ignored() {
            let mut s = session();
            ready_with_recipient(&mut s);
            s.data_line_overflowed();
            send(&mut s, "DATA");
            assert!(s.handle_line(b"short").is_none());
            assert!(matches!(s.handle_line(b"."), Some(Action::Deliver(_))));
        }

        #[test]
        fn message_at_limit_is_accepted() {
            let mut s = session();
            ready_with_recipient(&mut s);
            send(&mut s, "DATA");
            // 62 bytes + CRLF = 64
            let line = "y".repeat(62);
            assert!(s.handle_line(line.as_bytes()).is_none());
            assert!(matches!(s.handle_line(b"."), Some(Action::Deliver(_))));
        }

        #[test]
        fn delivery_outcomes() {
            let mut s = session();
            assert_eq!(reply_code(s.delivered(DeliveryOutcome::Rejected("bad".into()))), 554);
            assert_eq!(reply_code(s.delivered(DeliveryOutcome::Deferred)), 451);
            assert!(!s.state().is_closed());
            let action = s.delivered(DeliveryOutcome::Aborted);
            assert!(matches!(action, Action::Close(ref r) if r.code == ReplyCode::SERVICE_UNAVAILABLE));
            assert!(s.state().is_closed());
        }
    }

    mod tls {
        use super::*;

        fn tls_session() -> Session {
            Session::new(SessionConfig {
                tls_available: true,
                ..SessionConfig::default()
            })
        }

        #[test]
        fn not_configured() {
            let mut s = session();
            assert_eq!(send(&mut s, "STARTTLS"), 502);
        }

        #[test]
        fn advertised_until_active() {
            let mut s = tls_session();
            let Action::Reply(reply) = s.command("EHLO x") else {
                panic!("expected reply");
            };
            assert!(reply.message.contains(&"STARTTLS".to_string()));

            assert!(matches!(s.command("STARTTLS"), Action::StartTls(_)));
            s.tls_established();
            assert!(s.is_tls());
            assert_eq!(s.state(), SessionState::Greeting);
            assert!(s.client_name().is_none());

            let Action::Reply(reply) = s.command("EHLO x") else {
                panic!("expected reply");
            };
            assert!(!reply.message.contains(&"STARTTLS".to_string()));
            assert_eq!(send(&mut s, "STARTTLS"), 503);
        }

        #[test]
        fn refused_mid_transaction() {
            let mut s = tls_session();
            send(&mut s, "EHLO x");
            send(&mut s, "MAIL FROM:<a@b.com>");
            assert_eq!(send(&mut s, "STARTTLS"), 503);
            assert_eq!(s.state(), SessionState::Mail);
        }
    }

    #[test]
    fn shutdown_and_timeout_close() {
        let mut s = session();
        ready_with_recipient(&mut s);
        let reply = s.shutdown();
        assert_eq!(reply.code, ReplyCode::SERVICE_UNAVAILABLE);
        assert!(s.state().is_closed());
        assert!(s.envelope().is_empty());

        let mut s = session();
        assert_eq!(s.timeout().code, ReplyCode::SERVICE_UNAVAILABLE);
        assert!(s.state().is_closed());
    }

    proptest! {
        #[test]
        fn recipients_kept_in_order(locals in proptest::collection::vec("[a-z]{1,8}", 1..4)) {
            let mut s = session();
            send(&mut s, "HELO x");
            send(&mut s, "MAIL FROM:<a@b.com>");
            for local in &locals {
                prop_assert_eq!(send(&mut s, &format!("RCPT TO:<{local}@example.com>")), 250);
            }
            send(&mut s, "DATA");
            let Some(Action::Deliver(t)) = feed_data(&mut s, &["body", "."]) else {
                panic!("expected delivery");
            };
            let got: Vec<String> = t.envelope.recipients.iter().map(ToString::to_string).collect();
            let want: Vec<String> = locals.iter().map(|l| format!("{l}@example.com")).collect();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn rset_always_starts_fresh(before_rset in 0usize..4, after_rset in 1usize..3) {
            let mut s = session();
            send(&mut s, "HELO x");
            if before_rset > 0 {
                send(&mut s, "MAIL FROM:<a@b.com>");
                for n in 1..before_rset {
                    send(&mut s, &format!("RCPT TO:<r{n}@example.com>"));
                }
            }
            prop_assert_eq!(send(&mut s, "RSET"), 250);
            prop_assert!(s.envelope().is_empty());

            prop_assert_eq!(send(&mut s, "MAIL FROM:<z@b.com>"), 250);
            for n in 0..after_rset {
                send(&mut s, &format!("RCPT TO:<n{n}@example.com>"));
            }
            prop_assert_eq!(s.envelope().recipients.len(), after_rset);
        }
    }
}
