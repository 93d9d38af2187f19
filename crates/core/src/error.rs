//! Error types for the streaming library.

use thiserror::Error;

/// Errors surfaced to embedders of the library.
///
/// Client-side protocol violations (unknown method, bad CSeq, wrong
/// stream path) are not represented here. Those are answered on the wire
/// with an RTSP status line and recorded as session state, because the
/// peer is the one at fault and the server keeps running.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Underlying socket or I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// A buffered request could not be parsed as an RTSP message.
    #[error("failed to parse RTSP request: {kind}")]
    Parse {
        /// What part of the message was malformed.
        kind: ParseErrorKind,
    },
}

/// Specific reasons an RTSP message failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The message contained no request line at all.
    EmptyRequest,
    /// The request line did not have exactly method, URI and version.
    InvalidRequestLine,
    /// A header line was missing the `:` separator.
    InvalidHeader,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ParseErrorKind::EmptyRequest => "empty request",
            ParseErrorKind::InvalidRequestLine => "invalid request line",
            ParseErrorKind::InvalidHeader => "invalid header",
        };
        write!(f, "{}", text)
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, StreamError>;
