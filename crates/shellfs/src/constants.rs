//! Filesystem configuration constants.
//!
//! Centralizes default session values and the recognized environment keys.

use std::time::Duration;

/// URI scheme for remote filesystems with POSIX path conventions.
pub const UNIX_SCHEME: &str = "ssh.unix";

/// Default SSH host for a template session factory.
pub const DEFAULT_SSH_HOST: &str = "localhost";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default time allowed for TCP connect, proxy handshake and key exchange.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH inactivity timeout.
pub const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// SSH keep-alive interval.
pub const SSH_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// SSH keep-alive max retries.
pub const SSH_KEEPALIVE_MAX: usize = 3;

/// Default HTTP proxy port.
pub const DEFAULT_HTTP_PROXY_PORT: u16 = 80;

/// Default SOCKS5 proxy port.
pub const DEFAULT_SOCKS5_PROXY_PORT: u16 = 1080;

/// Upper bound on an HTTP CONNECT response header.
pub const MAX_PROXY_RESPONSE_LEN: usize = 8192;

/// Recognized environment keys.
pub mod keys {
    /// Template session factory (mandatory).
    pub const DEFAULT_SESSION_FACTORY: &str = "defaultSessionFactory";

    /// Transport proxy, a `Proxy` value or a `scheme://host:port` string.
    pub const PROXY: &str = "proxy";

    /// Remote directory prepended to unresolved command names.
    pub const BIN_DIR: &str = "dir.bin";

    /// Prefix of per-command overrides, `command.<name>`.
    pub const COMMAND_PREFIX: &str = "command.";

    /// Connect timeout amount.
    pub const CONNECT_TIMEOUT: &str = "session.connect.timeout";

    /// Unit of [`CONNECT_TIMEOUT`], milliseconds when absent.
    pub const CONNECT_TIMEOUT_UNIT: &str = "session.connect.timeout.unit";
}
