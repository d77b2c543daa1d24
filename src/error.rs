//! # Error Types
//!
//! This module defines all error types used throughout the library.
//!
//! ## Error Hierarchy
//!
//! The main [`Error`] enum covers all possible failure modes:
//!
//! | Variant | Cause | Delivered |
//! |---------|-------|-----------|
//! | [`Error::InvalidParam`] | Caller contract violation | Synchronously, nothing queued |
//! | [`Error::Busy`] | Task queue not running | Synchronously, nothing queued |
//! | [`Error::Shutdown`] | Engine stopped with the operation in flight | Completion |
//! | [`Error::Socket`] | LLCP socket failure (timeout, rejected frame, link loss) | Completion |
//! | [`Error::Protocol`] | SNEP / Handover / NDEF protocol violation | Completion |
//! | [`Error::AlreadyRegistered`] | Duplicate service registration | Completion |
//! | [`Error::NotRegistered`] | Unknown service registration | Completion |
//! | [`Error::Config`] | Invalid engine configuration | Synchronously |
//!
//! Once an operation has been queued, failures only surface through its
//! completion. A context that observes a socket error fails every job it
//! still holds with that same error.
//!
//! ## Usage Pattern
//!
//! ```no_run
//! use nfc_p2p::prelude::*;
//!
//! async fn push(client: &SnepClient, ndef: bytes::Bytes) -> Result<()> {
//!     match client.put(ndef).await {
//!         Ok(_) => Ok(()),
//!         Err(Error::Socket(SocketError::Disconnected)) => {
//!             // Peer left the field, retrying is up to the caller
//!             Ok(())
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! # fn main() {}
//! ```

use std::fmt;

/// Result type alias using the library's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for all library operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A parameter was rejected before anything was queued.
    ///
    /// Empty payloads, frames larger than the socket MIU, operations on a
    /// socket in the wrong state.
    InvalidParam(&'static str),

    /// The controller task queue is not accepting work.
    ///
    /// Returned when the engine was never started or has already shut down.
    Busy,

    /// The engine shut down while the operation was pending.
    Shutdown,

    /// LLCP socket-level failure.
    Socket(SocketError),

    /// Protocol-level failure (SNEP response codes, malformed handover or
    /// NDEF messages).
    Protocol(ProtocolError),

    /// A service is already registered on this SAP / service name.
    AlreadyRegistered,

    /// No service is registered for this client, SAP and service name.
    NotRegistered,

    /// Configuration error.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam(what) => write!(f, "Invalid parameter: {what}"),
            Self::Busy => write!(f, "Controller task queue is not running"),
            Self::Shutdown => write!(f, "Engine has shut down"),
            Self::Socket(e) => write!(f, "Socket error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::AlreadyRegistered => write!(f, "Service already registered"),
            Self::NotRegistered => write!(f, "Service not registered"),
            Self::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<SocketError> for Error {
    fn from(e: SocketError) -> Self {
        Self::Socket(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// LLCP socket failure reported by the controller.
///
/// A socket error is delivered exactly once per socket and is terminal:
/// the only operation still accepted afterwards is `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketError {
    /// The peer did not answer within the link timeout.
    Timeout,
    /// The peer or the controller rejected the frame (FRMR, oversized I-PDU).
    FrameRejected,
    /// The data link or the logical connection went away.
    Disconnected,
    /// The peer refused the connection (DM).
    ConnectRejected,
    /// No LLCP link is active.
    NoLink,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::FrameRejected => write!(f, "frame rejected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::ConnectRejected => write!(f, "connection rejected"),
            Self::NoLink => write!(f, "no active LLCP link"),
        }
    }
}

/// Protocol-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolError {
    /// Message could not be parsed or failed validation.
    InvalidFormat,
    /// Peer speaks an unsupported major version.
    UnsupportedVersion,
    /// Message exceeds the negotiated or configured maximum.
    ExcessData,
    /// The peer had nothing to return.
    NotFound,
    /// The operation is not allowed in the current state.
    NotAllowed,
    /// The peer reported a malformed request.
    BadRequest,
    /// The peer does not implement the request.
    NotImplemented,
    /// The peer rejected a fragmented transfer.
    Rejected,
    /// A response code that is not valid at this point of the exchange.
    UnexpectedResponse(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "invalid format"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::ExcessData => write!(f, "excess data"),
            Self::NotFound => write!(f, "not found"),
            Self::NotAllowed => write!(f, "not allowed"),
            Self::BadRequest => write!(f, "bad request"),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::Rejected => write!(f, "rejected by peer"),
            Self::UnexpectedResponse(code) => write!(f, "unexpected response 0x{code:02X}"),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
