//! # shellfs
//!
//! Filesystems whose backing store is a remote host reached over SSH. All
//! I/O is done by running shell commands on the remote side; this crate is
//! the bootstrap that turns a URI plus an environment map into:
//!
//! - an authenticated [`SessionFactory`] (template + URI user/host/port + proxy)
//! - a [`CommandRunner`] bound to that factory
//! - a per-filesystem command name policy (`command.<name>`, `dir.bin`)
//!
//! Path objects, directory streams and attribute views build on
//! [`FilesystemCore`].

pub mod command;
pub mod constants;
pub mod environment;
pub mod error;
pub mod filesystem;
pub mod runner;
pub mod session;

pub use command::resolve_command;
pub use environment::{EnvValue, Environment, TimeUnit};
pub use error::{EnvError, FsError, FsResult, SessionError};
pub use filesystem::{
    FileSystemProvider, FilesystemCore, PathStyle, SshFileSystem, Unix, UnixSshFileSystem,
    open_filesystem,
};
pub use runner::{CommandOutput, CommandRunner};
pub use session::{
    ClientHandler, HostKeyPolicy, Identity, Proxy, ProxyKind, SessionFactory, SessionOverrides,
    build_session_factory,
};
