//! Error types for the `sse` crate.
//!
//! Follows the layered error pattern: a root `Error` struct holding an
//! `error_kind` tree plus an optional `source` for chaining. The transport
//! layer (`web`) turns the kinds into HTTP status codes.
use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error type for the `sse` crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised while serving a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Admission(AdmissionErrorKind),
    Transport(TransportErrorKind),
}

/// Reasons a client may be turned away before any stream is established.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionErrorKind {
    /// The declared `Origin` is not on the channel's CORS allow-list.
    OriginNotAllowed(String),
}

/// Failures writing to an individual connection's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportErrorKind {
    /// The receiving side of the sink has gone away.
    Closed,
    Io,
}

impl Error {
    pub fn origin_not_allowed(origin: impl Into<String>) -> Self {
        Self::from(ErrorKind::Admission(AdmissionErrorKind::OriginNotAllowed(
            origin.into(),
        )))
    }

    pub fn closed() -> Self {
        Self::from(ErrorKind::Transport(TransportErrorKind::Closed))
    }
}

impl From<ErrorKind> for Error {
    fn from(error_kind: ErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Transport(TransportErrorKind::Io),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Admission(AdmissionErrorKind::OriginNotAllowed(origin)) => {
                write!(f, "origin {origin} is not allowed to connect")
            }
            ErrorKind::Transport(TransportErrorKind::Closed) => write!(f, "connection closed"),
            ErrorKind::Transport(TransportErrorKind::Io) => match &self.source {
                Some(source) => write!(f, "connection write failed: {source}"),
                None => write!(f, "connection write failed"),
            },
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
