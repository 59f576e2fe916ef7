//! Error types for the streaming library.

use std::fmt;

/// Errors that can occur while setting up or running a stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Control protocol**: [`Parse`](Self::Parse): malformed RTSP messages.
/// - **Data protocol**: [`TruncatedPacket`](Self::TruncatedPacket): a datagram
///   shorter than the fixed RTP header.
/// - **Transport**: [`Io`](Self::Io): socket/network failures.
/// - **Resources**: [`SourceNotFound`](Self::SourceNotFound),
///   [`EmptySource`](Self::EmptySource): reported to the peer as 404.
/// - **Lifecycle**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotConnected`](Self::NotConnected).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a control message.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Datagram shorter than the 12-byte RTP header.
    #[error("truncated RTP packet ({0} bytes)")]
    TruncatedPacket(usize),

    /// The requested resource does not name a readable video file.
    #[error("video source not found: {0}")]
    SourceNotFound(String),

    /// The resource was read but no frames could be extracted from it.
    #[error("no frames found in video source: {0}")]
    EmptySource(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The control connection has already been closed.
    #[error("control connection closed")]
    NotConnected,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl StreamError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Specific kind of control-message parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyMessage,
    /// Request line did not have the expected `Method Resource Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Method is not one of SETUP, PLAY, PAUSE, TEARDOWN.
    UnknownMethod,
    /// `CSeq` header absent or not an integer.
    MissingCSeq,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::MissingCSeq => write!(f, "missing or invalid CSeq"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
