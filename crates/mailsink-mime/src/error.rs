//! Errors raised while taking a message apart.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Ways a message can fail to parse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `Content-Type` value without a `type/subtype` pair.
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    /// Transfer encoding the decoder does not understand, or a body that
    /// does not match its declared encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 body that fails to decode.
    #[error("base64 decode failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Empty multipart boundary.
    #[error("multipart content type without boundary")]
    MissingBoundary,

    /// Multipart body that cannot be split into parts.
    #[error("invalid multipart body: {0}")]
    InvalidMultipart(String),

    /// No blank line separates the header block from the body.
    #[error("no header/body separator found")]
    MissingSeparator,
}
