//! Error types shared across the engine.
//!
//! Mirrors the layering the teacher uses for `io::Error`/`OperationError`: a small set of
//! narrow, named variants rather than a single opaque string, so callers can match on the
//! specific failure instead of parsing messages.

use std::io;
use thiserror::Error;

/// Top-level error surfaced by the engine's public API (configuration, startup).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("socket operation failed: {0}")]
    Socket(#[from] SocketError),

    #[error("media-stream server error: {0}")]
    MediaStream(#[from] MediaStreamError),
}

/// Errors raised while validating or building a [`crate::config::Settings`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("exactly one of `connect` or `accept` must be set, not both or neither")]
    ModeAmbiguous,

    #[error("`create` functor must be set")]
    MissingCreate,

    #[error("`io` functor must be set")]
    MissingIo,

    #[error("connection_limit must be greater than zero")]
    ZeroConnectionLimit,

    #[error("accept_limit must be greater than zero for server configurations")]
    ZeroAcceptLimit,
}

/// Errors raised by [`crate::socket::ConnectionSocket`] and the I/O drivers.
///
/// This is the engine's analogue of the source's transport-error surface (connection reset,
/// aborted, no buffer space, message too large) plus the invariant violations that are fatal
/// rather than recoverable (see the crate's `EXPECT ONCE` style panics at the fatal sites
/// themselves; only the recoverable half lives here).
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket handle was already set")]
    AlreadySet,

    #[error("socket is not yet set")]
    NotSet,

    #[error("connection was aborted")]
    Aborted,

    #[error("connection was reset by peer")]
    Reset,

    #[error("no buffer space available")]
    NoBufferSpace,

    #[error("message too large for the underlying transport")]
    MessageTooLarge,

    #[error("address already in use")]
    AddressInUse,

    #[error("underlying I/O error: {0}")]
    Io(#[from] io::Error),

    /// Raised by an [`crate::io::IoPattern`] when data arrived but failed the pattern's own
    /// validation (bad sequence number, corrupted payload, unexpected frame) rather than a
    /// transport-level failure. Mirrors `ctsIOPattern::IsProtocolError`'s split between protocol
    /// and network errors.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SocketError {
    /// Classifies this error the way `ctsIOPattern::IsProtocolError` distinguishes protocol
    /// failures (bad sequence numbers, corrupted payloads) from ordinary transport failures.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, SocketError::Protocol(_))
    }
}

/// Errors raised by the UDP media-stream demultiplexer.
#[derive(Debug, Error)]
pub enum MediaStreamError {
    #[error("no listen addresses configured")]
    NoListenAddresses,

    #[error("unknown control action code {0}")]
    UnknownAction(u8),

    #[error("frame size {0} is below the minimum frame size of 40 bytes")]
    FrameTooSmall(usize),

    #[error("underlying I/O error: {0}")]
    Io(#[from] io::Error),
}
