//! # mailsink-mime
//!
//! MIME message parsing for mail captured by the mailsink SMTP server.
//!
//! ## Features
//!
//! - **Message parsing**: Split the header block from the body, unfold
//!   headers, and walk nested multipart bodies
//! - **Ordered headers**: Repeated headers keep their order of appearance
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 encoded words
//! - **Content types**: `Content-Type` and `Content-Disposition` with
//!   parameters (including RFC 2231 extended values)
//!
//! ## Quick Start
//!
//! ```
//! use mailsink_mime::Message;
//!
//! let raw = b"From: sender@example.com\r\n\
//!             Subject: Test\r\n\
//!             Content-Type: text/plain\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.subject(), Some("Test"));
//! assert_eq!(message.body.as_deref(), Some(&b"Hello, World!"[..]));
//! ```
//!
//! ### Multipart Messages
//!
//! ```ignore
//! use mailsink_mime::Message;
//!
//! let message = Message::parse(raw)?;
//! for part in message.leaf_parts() {
//!     println!("{} ({} bytes)", part.content_type()?, part.body.len());
//! }
//! ```
//!
//! Parsing is lenient: only input without a header/body separator is
//! rejected. Multipart bodies whose boundary cannot be found are kept as a
//! single opaque body instead.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod disposition;
mod error;
mod header;
mod message;
mod multipart;
mod params;

pub mod encoding;

pub use content_type::ContentType;
pub use disposition::{ContentDisposition, DispositionKind};
pub use error::{Error, Result};
pub use header::{Header, Headers};
pub use message::{Message, Part, TransferEncoding};
pub use multipart::split_multipart;
