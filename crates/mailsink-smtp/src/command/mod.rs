//! SMTP command parsing.
//!
//! Commands arrive as single lines with the CRLF already stripped. Verbs are
//! case insensitive; `MAIL FROM:` and `RCPT TO:` take an angle-bracketed path
//! followed by optional `KEY=VALUE` parameters.

use crate::types::{Address, Reply, ReplyCode, ReversePath};

/// SMTP command received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Reverse path (may be null)
        from: ReversePath,
        /// Declared SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address or name to verify
        argument: String,
    },
    /// HELP - Help text
    Help,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// Known verb this server does not implement (AUTH, EXPN, TURN).
    NotImplemented {
        /// Upper-cased verb
        verb: String,
    },
}

/// Reason a command line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Unknown verb or empty line.
    #[error("Syntax error, command unrecognized")]
    Unrecognized(String),
    /// Known verb with a missing or malformed argument.
    #[error("Syntax error in parameters or arguments: {0}")]
    Syntax(String),
}

impl CommandError {
    /// Returns the reply sent to the client for this error.
    #[must_use]
    pub fn reply(&self) -> Reply {
        match self {
            Self::Unrecognized(_) => {
                Reply::single(ReplyCode::SYNTAX_ERROR, "Syntax error, command unrecognized")
            }
            Self::Syntax(detail) => Reply::single(ReplyCode::PARAMETER_ERROR, detail.clone()),
        }
    }
}

impl Command {
    /// Parses a command line (without the trailing CRLF).
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Unrecognized`] for unknown verbs and
    /// [`CommandError::Syntax`] for malformed arguments.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end();
        let (verb, args) = line
            .split_once(' ')
            .map_or((line, ""), |(verb, args)| (verb, args.trim()));
        let verb = verb.to_ascii_uppercase();

        match verb.as_str() {
            "HELO" => Ok(Self::Helo {
                hostname: required(args, "Syntax: HELO <hostname>")?,
            }),
            "EHLO" => Ok(Self::Ehlo {
                hostname: required(args, "Syntax: EHLO <hostname>")?,
            }),
            "MAIL" => parse_mail(args),
            "RCPT" => parse_rcpt(args),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            "HELP" => Ok(Self::Help),
            "STARTTLS" => Ok(Self::StartTls),
            "VRFY" => Ok(Self::Vrfy {
                argument: required(args, "Syntax: VRFY <address>")?,
            }),
            "AUTH" | "EXPN" | "TURN" => Ok(Self::NotImplemented { verb }),
            _ => Err(CommandError::Unrecognized(verb)),
        }
    }

    /// Returns the command verb, for logging.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy { .. } => "VRFY",
            Self::Help => "HELP",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::NotImplemented { verb } => verb.as_str(),
        }
    }
}

fn required(args: &str, usage: &str) -> Result<String, CommandError> {
    if args.is_empty() {
        Err(CommandError::Syntax(usage.to_string()))
    } else {
        Ok(args.to_string())
    }
}

/// Strips a case-insensitive `FROM:`/`TO:` keyword.
fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| args[keyword.len()..].trim_start())
}

/// Splits `<path> PARAM=VALUE ...` into the path and its parameters.
fn split_path(rest: &str) -> Option<(&str, &str)> {
    if !rest.starts_with('<') {
        return None;
    }
    let end = rest.find('>')?;
    Some((&rest[..=end], rest[end + 1..].trim()))
}

fn parse_mail(args: &str) -> Result<Command, CommandError> {
    const USAGE: &str = "Syntax: MAIL FROM:<address>";

    let rest = strip_keyword(args, "FROM:").ok_or_else(|| CommandError::Syntax(USAGE.into()))?;
    let (path, params) = split_path(rest).ok_or_else(|| CommandError::Syntax(USAGE.into()))?;
    let from = ReversePath::parse(path).map_err(|e| CommandError::Syntax(e.to_string()))?;

    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key.to_ascii_uppercase().as_str() {
            "SIZE" => {
                let declared = value
                    .parse::<usize>()
                    .map_err(|_| CommandError::Syntax(format!("Invalid SIZE value: {value}")))?;
                size = Some(declared);
            }
            "BODY" => {
                if !value.eq_ignore_ascii_case("7BIT") && !value.eq_ignore_ascii_case("8BITMIME")
                {
                    return Err(CommandError::Syntax(format!("Unsupported BODY value: {value}")));
                }
            }
            // SMTPUTF8 and unknown parameters are accepted without effect
            _ => {}
        }
    }

    Ok(Command::MailFrom { from, size })
}

fn parse_rcpt(args: &str) -> Result<Command, CommandError> {
    const USAGE: &str = "Syntax: RCPT TO:<address>";

    let rest = strip_keyword(args, "TO:").ok_or_else(|| CommandError::Syntax(USAGE.into()))?;
    let (path, _params) = split_path(rest).ok_or_else(|| CommandError::Syntax(USAGE.into()))?;
    let to = Address::parse_path(path).map_err(|e| CommandError::Syntax(e.to_string()))?;

    Ok(Command::RcptTo { to })
}
