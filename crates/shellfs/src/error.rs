//! Error types for the filesystem, session and environment layers.
//!
//! Each layer has its own enum. Everything a filesystem caller can see
//! converts into [`std::io::Error`], so callers have one failure category
//! regardless of the SSH transport's internals.

use std::io;
use std::num::ParseIntError;

use thiserror::Error;

/// Failure to coerce an environment value to the requested type.
///
/// Local to the lookup that produced it: the filesystem stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The value's text is not a base-10 integer.
    #[error("{key}: {value:?} is not a valid integer: {source}")]
    Format {
        key: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// The value's text does not name a known enumerator.
    #[error("{key}: {value:?} is not a known {kind}")]
    UnknownEnumValue {
        key: String,
        value: String,
        kind: &'static str,
    },

    /// A duration amount below zero.
    #[error("{key}: {value} is negative")]
    Negative { key: String, value: i64 },
}

/// SSH session failures, from factory derivation through command execution.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("invalid hostname: {0:?}")]
    InvalidHostname(String),
    #[error("invalid port: {0}")]
    InvalidPort(u16),
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("proxy handshake failed: {0}")]
    ProxyFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("host key rejected for {0}")]
    HostKeyRejected(String),
    #[error("auth failed: {0}")]
    AuthFailed(String),
    #[error("SSH agent error: {0}")]
    AgentFailed(String),
    #[error("No SSH keys available in agent")]
    NoKeysAvailable,
    #[error("failed to load key {path}: {reason}")]
    KeyLoad { path: String, reason: String },
    #[error("channel failed: {0}")]
    ChannelFailed(String),
}

impl From<russh::Error> for SessionError {
    fn from(e: russh::Error) -> Self {
        SessionError::ConnectionFailed(e.to_string())
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::ConnectionFailed(e.to_string())
    }
}

impl From<SessionError> for io::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, e),
            SessionError::HostKeyRejected(_)
            | SessionError::AuthFailed(_)
            | SessionError::NoKeysAvailable => io::Error::new(io::ErrorKind::PermissionDenied, e),
            SessionError::InvalidHostname(_)
            | SessionError::InvalidPort(_)
            | SessionError::InvalidUsername(_)
            | SessionError::InvalidProxy(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            other => io::Error::other(other),
        }
    }
}

/// Filesystem construction failure.
#[derive(Debug, Error)]
pub enum FsError {
    /// A mandatory environment entry is missing or has the wrong type.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The session plumbing could not be set up.
    #[error("transport setup failed: {0}")]
    TransportSetup(#[from] SessionError),

    /// No filesystem variant is registered for the URI scheme.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

impl FsError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Configuration(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::TransportSetup(inner) => inner.into(),
            FsError::UnsupportedScheme(scheme) => io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported scheme: {scheme}"),
            ),
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_io_error() {
        let err = FsError::TransportSetup(SessionError::InvalidProxy("bogus".into()));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
        assert!(io_err.to_string().contains("bogus"));
    }

    #[test]
    fn test_configuration_error_message() {
        let err = FsError::configuration("defaultSessionFactory is required");
        assert_eq!(
            err.to_string(),
            "configuration error: defaultSessionFactory is required"
        );
    }

    #[test]
    fn test_timeout_maps_to_timed_out() {
        let io_err: io::Error =
            SessionError::Timeout(std::time::Duration::from_secs(3)).into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }
}
