//! Error types for the viewer runtime.
//!
//! Errors are split by the component that raises them. [`SessionError`] is what
//! the host application sees; [`ErrorClass`] is the coarse classification used
//! for user-facing messages.

use std::io;

use thiserror::Error;

use super::session::SessionState;

/// A store lock was requested by a thread that already holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store lock is already held by the current thread")]
    Reentrant,
}

/// Errors raised by the framebuffer store.
#[derive(Debug, Error)]
pub enum FramebufferError {
    /// The server asked for dimensions whose byte size overflows or exceeds
    /// the allocation cap. Fatal to the connection.
    #[error("framebuffer of {width}x{height} exceeds the {limit} byte limit")]
    TooLarge { width: u32, height: u32, limit: u64 },

    /// The buffer could not be allocated. A zero-sized framebuffer is published.
    #[error("failed to allocate {bytes} bytes for a {width}x{height} framebuffer")]
    Allocation { width: u32, height: u32, bytes: usize },

    #[error(
        "rectangle {width}x{height}+{x}+{y} lies outside the {fb_width}x{fb_height} framebuffer"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        fb_width: u32,
        fb_height: u32,
    },

    #[error("pixel data holds {actual} bytes, expected at least {expected}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the cursor store. None of them are fatal; the previous
/// cursor stays installed.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("failed to allocate {bytes} bytes for the cursor")]
    Allocation { bytes: usize },

    #[error("cursor {what} holds {actual} bytes, expected at least {expected}")]
    ShortBuffer {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authentication failures, reported separately from network errors so the
/// host can prompt for credentials again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("credential request was declined")]
    Aborted,

    #[error("unsupported credential type {0}")]
    UnsupportedCredential(u32),

    #[error("authentication rejected by server: {0}")]
    Rejected(String),
}

/// Errors returned by a [`ProtocolEngine`](super::ProtocolEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Framebuffer(#[from] FramebufferError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server closed the connection")]
    Closed,
}

/// Top-level error for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not valid in the current lifecycle state. The session
    /// itself is unchanged.
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to allocate {0}")]
    Allocation(&'static str),

    #[error(transparent)]
    Framebuffer(#[from] FramebufferError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("network error ({class:?}): {source}")]
    Network { class: ErrorClass, source: io::Error },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server closed the connection")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Builds the session error for an engine failure.
    ///
    /// `auth_failure` is the credential failure the dispatcher recorded during
    /// this call (a declined request or an unsupported credential type). It
    /// takes precedence over whatever the engine made of it.
    pub(crate) fn from_engine(err: EngineError, auth_failure: Option<AuthError>) -> Self {
        if let Some(auth) = auth_failure {
            return SessionError::Auth(auth);
        }
        match err {
            EngineError::Io(source) => SessionError::Network {
                class: ErrorClass::from_io(&source),
                source,
            },
            EngineError::Resolve { source, .. } => SessionError::Network {
                class: ErrorClass::AddressResolution,
                source,
            },
            EngineError::Auth(e) => SessionError::Auth(e),
            EngineError::Framebuffer(e) => SessionError::Framebuffer(e),
            EngineError::Protocol(msg) => SessionError::Protocol(msg),
            EngineError::Closed => SessionError::Closed,
        }
    }

    /// Classification for [`last_error_description`], or `None` for errors
    /// that are not I/O failures (state misuse, reentrant locking).
    ///
    /// [`last_error_description`]: super::SessionHandle::last_error_description
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            SessionError::InvalidState { .. } | SessionError::Store(_) => None,
            SessionError::Allocation(_) => Some(ErrorClass::OutOfMemory),
            SessionError::Framebuffer(FramebufferError::Allocation { .. }) => {
                Some(ErrorClass::OutOfMemory)
            }
            SessionError::Framebuffer(FramebufferError::Store(_)) => None,
            SessionError::Framebuffer(_) => Some(ErrorClass::Protocol),
            SessionError::Auth(_) => Some(ErrorClass::Authentication),
            SessionError::Network { class, .. } => Some(*class),
            SessionError::Protocol(_) => Some(ErrorClass::Protocol),
            SessionError::Closed => Some(ErrorClass::ConnectionReset),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SessionError::Auth(_))
    }
}

/// Coarse classification of the most recent failure, for user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AddressResolution,
    ConnectionRefused,
    ConnectionReset,
    Authentication,
    Timeout,
    Unreachable,
    HostDown,
    OutOfMemory,
    Protocol,
    Io,
    /// Interrupted or would-block; logged but never shown to the user.
    Transient,
}

impl ErrorClass {
    /// Classifies an I/O error by its OS error code, falling back to its kind.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            match code {
                libc::ECONNREFUSED => return ErrorClass::ConnectionRefused,
                libc::ECONNRESET | libc::ECONNABORTED | libc::EPIPE => {
                    return ErrorClass::ConnectionReset;
                }
                libc::ETIMEDOUT => return ErrorClass::Timeout,
                libc::EHOSTUNREACH | libc::ENETUNREACH | libc::ENETDOWN => {
                    return ErrorClass::Unreachable;
                }
                libc::EHOSTDOWN => return ErrorClass::HostDown,
                libc::ENOMEM | libc::ENOBUFS => return ErrorClass::OutOfMemory,
                libc::EINTR | libc::EAGAIN => return ErrorClass::Transient,
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::ConnectionRefused => ErrorClass::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorClass::ConnectionReset,
            io::ErrorKind::TimedOut => ErrorClass::Timeout,
            io::ErrorKind::OutOfMemory => ErrorClass::OutOfMemory,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => ErrorClass::Transient,
            io::ErrorKind::InvalidData => ErrorClass::Protocol,
            _ => ErrorClass::Io,
        }
    }

    /// Human-readable description. Empty for [`ErrorClass::Transient`].
    pub fn description(&self) -> &'static str {
        match self {
            ErrorClass::AddressResolution => "Could not resolve the server address",
            ErrorClass::ConnectionRefused => "Connection refused by the server",
            ErrorClass::ConnectionReset => "Connection reset by peer",
            ErrorClass::Authentication => "Authentication failed",
            ErrorClass::Timeout => "Connection timed out",
            ErrorClass::Unreachable => "Server is unreachable",
            ErrorClass::HostDown => "Server host is down",
            ErrorClass::OutOfMemory => "Out of memory",
            ErrorClass::Protocol => "Protocol error",
            ErrorClass::Io => "I/O error",
            ErrorClass::Transient => "",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}
