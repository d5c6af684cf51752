//! Error types returned from stream operations.
//!
//! There are two axes: expected peer conditions (timeout, peer close)
//! that callers are meant to handle, and invariant violations, which are
//! programmer errors and therefore panic rather than return a `Result`.

use std::io;

use thiserror::Error;

/// An expected peer condition, or a fatal transport error.
///
/// `TimedOut` and `Eof` never indicate a bug: they are the `ETIMEDOUT`
/// and `EPIPE` conditions an ordinary HTTP exchange can hit, and may
/// legitimately advance the stream state machine (see
/// `Stream::get_next_chunk`). Any other transport error is fatal -- the
/// state machine does not attempt recovery, it is simply returned to
/// the caller once.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The operation's deadline elapsed before it could complete.
    #[error("timed out")]
    TimedOut,
    /// The peer closed its side of the connection.
    #[error("connection closed by peer")]
    Eof,
    /// Any other transport failure. Treated as fatal; the connection
    /// should be torn down.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// True for the two conditions that are expected in normal operation
    /// (as opposed to `Io`, which is always fatal).
    pub fn is_expected(&self) -> bool {
        matches!(self, StreamError::TimedOut | StreamError::Eof)
    }
}

/// A programmer error: calling an operation in a state the contract
/// forbids. These are not recoverable and always panic at the call site
/// via `ProtocolError::panic`, they exist as a type mostly so the
/// violated invariant has a name in backtraces and tests.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("write_chunk called before body framing was chosen")]
    FramingNotChosen,
    #[error(":method is required before write_headers on a client stream")]
    MissingMethod,
    #[error("CONNECT requests must not carry a :path")]
    ConnectWithPath,
    #[error("Content-Length is not numeric: {0:?}")]
    NonNumericContentLength(String),
    #[error("unsupported Transfer-Encoding: {0:?}")]
    UnknownTransferEncoding(String),
    #[error("Content-Length left {left} bytes unwritten at end_stream")]
    ContentLengthMismatch { left: u64 },
    #[error("no framing could be determined for an outgoing client request")]
    NoFramingHint,
    #[error("get_headers called on a client stream in `idle` state")]
    ClientReadBeforeWrite,
    #[error("operation requires the stream to be at the head of the pipeline")]
    NotPipelineHead,
    #[error("operation called on stream in state {state}")]
    WrongState { state: &'static str },
}

impl ProtocolError {
    /// Fail the current call with this invariant violation.
    ///
    /// Invariant violations are bugs in the caller, not conditions that
    /// can be handled, so we panic rather than propagate a `Result`.
    #[track_caller]
    pub fn panic(self) -> ! {
        panic!("tk-http1 protocol violation: {self}")
    }
}
