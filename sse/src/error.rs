//! Error types for the `sse` crate.
//!
//! Follows the same pattern as the other layers: a root `Error` struct holding an
//! error kind and the optional source error that caused it.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the connection layer.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    /// The manager's worker task panicked or was cancelled.
    Worker,
}

/// Errors raised by a streaming transport. These never reach the application;
/// the manager consumes them through its reconnect policy.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    InvalidUrl,
    InvalidHeader,
    Request,
    StreamEnded,
}

impl Error {
    pub fn transport(kind: TransportErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Transport(kind),
        }
    }

    pub fn stream_ended() -> Self {
        Self::transport(TransportErrorKind::StreamEnded)
    }

    /// Keeps only the rendered message of the underlying failure; transport
    /// client errors may carry response bodies that are not `Sync`.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.source = Some(cause.to_string().into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ErrorKind::Worker => write!(f, "Connection manager worker failed")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Worker,
        }
    }
}
