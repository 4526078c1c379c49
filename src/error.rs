use std::io;

use thiserror::Error;

/// Errors raised by the record codec, the connection and the server.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer closed the stream on a record boundary.
    #[error("stream closed by peer")]
    Eof,

    /// The stream ended in the middle of a record.
    #[error("stream truncated in {what}: expected {expected} bytes, got {got}")]
    Truncated {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("stream fault: {0}")]
    Io(#[from] io::Error),

    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("invalid name-value stream: {0}")]
    NameValue(String),

    #[error("record content too long: {0} bytes")]
    ContentTooLong(usize),

    #[error("{what} exceeds the limit of {limit} bytes")]
    LimitExceeded { what: &'static str, limit: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for both a clean close and a truncated record: the stream is gone either way.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof | Error::Truncated { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by applications.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;
