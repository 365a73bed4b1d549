//! Remote filesystem instances.
//!
//! An [`SshFileSystem`] is built once per URI + environment and is immutable
//! afterwards. Path, directory-stream and attribute-view implementations
//! drive it through the [`FilesystemCore`] trait: they run commands through
//! [`FilesystemCore::command_runner`], name them with
//! [`FilesystemCore::command`], and read their own settings with the typed
//! environment lookups.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellfs::{Environment, FileSystemProvider, SessionFactory, open_filesystem};
//!
//! #[derive(Debug)]
//! struct Provider;
//!
//! impl FileSystemProvider for Provider {
//!     fn scheme(&self) -> &str {
//!         "ssh.unix"
//!     }
//! }
//!
//! # async fn demo() -> std::io::Result<()> {
//! let env = Environment::new()
//!     .with("defaultSessionFactory", SessionFactory::default())
//!     .with("dir.bin", "/usr/bin");
//! let uri = url::Url::parse("ssh.unix://alice@files.example/").unwrap();
//! let fs = open_filesystem(Arc::new(Provider), uri, env)?;
//! let output = fs.command_runner().execute(&fs.command("ls")).await?;
//! println!("{}", output.stdout_lossy());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use tracing::info;
use url::Url;

use crate::command::resolve_command;
use crate::constants::{UNIX_SCHEME, keys};
use crate::environment::{EnvValue, Environment, TimeUnit};
use crate::error::{EnvError, FsError, FsResult, SessionError};
use crate::runner::CommandRunner;
use crate::session::build_session_factory;

static SUPPORTED_FILE_ATTRIBUTE_VIEWS: LazyLock<BTreeSet<&'static str>> =
    LazyLock::new(|| BTreeSet::from(["basic"]));

/// The provider that opened a filesystem. Held for identity only.
pub trait FileSystemProvider: Send + Sync + fmt::Debug {
    /// URI scheme this provider serves.
    fn scheme(&self) -> &str;
}

/// Remote path convention of a filesystem variant.
pub trait PathStyle: Send + Sync + 'static {
    const NAME: &'static str;
    const SEPARATOR: &'static str;
}

/// POSIX paths: `/`-separated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unix;

impl PathStyle for Unix {
    const NAME: &'static str = "unix";
    const SEPARATOR: &'static str = "/";
}

/// What path and attribute implementations need from a filesystem.
pub trait FilesystemCore: Send + Sync + fmt::Debug {
    fn uri(&self) -> &Url;

    fn provider(&self) -> &Arc<dyn FileSystemProvider>;

    /// The one command runner bound to this filesystem.
    fn command_runner(&self) -> &CommandRunner;

    /// Literal executable for a logical command name.
    fn command(&self, name: &str) -> String;

    fn environment(&self) -> &Environment;

    /// Path separator of the remote host.
    fn separator(&self) -> &'static str;

    /// Always exactly `{"basic"}`.
    fn supported_file_attribute_views(&self) -> &'static BTreeSet<&'static str> {
        &SUPPORTED_FILE_ATTRIBUTE_VIEWS
    }

    fn get_from_environment(&self, key: &str) -> Option<&EnvValue> {
        self.environment().get(key)
    }

    fn get_string_from_environment(&self, key: &str) -> Option<String> {
        self.environment().get_string(key)
    }

    fn get_long_from_environment(&self, key: &str) -> Result<Option<i64>, EnvError> {
        self.environment().get_long(key)
    }

    fn get_time_unit_from_environment(&self, key: &str) -> Result<Option<TimeUnit>, EnvError> {
        self.environment().get_time_unit(key)
    }
}

/// A filesystem on a remote host reached over SSH.
pub struct SshFileSystem<S: PathStyle> {
    uri: Url,
    provider: Arc<dyn FileSystemProvider>,
    environment: Arc<Environment>,
    bin_dir: Option<String>,
    command_runner: CommandRunner,
    _style: PhantomData<S>,
}

/// SSH filesystem with POSIX paths, served under `ssh.unix://`.
pub type UnixSshFileSystem = SshFileSystem<Unix>;

impl<S: PathStyle> SshFileSystem<S> {
    /// Build a filesystem for `uri`.
    ///
    /// Derives the session factory from `defaultSessionFactory` (mandatory),
    /// the URI's user, host and port, and the optional `proxy`. No
    /// connection is made here; the runner connects on first use.
    pub fn new(
        provider: Arc<dyn FileSystemProvider>,
        uri: Url,
        environment: impl Into<Arc<Environment>>,
    ) -> FsResult<Self> {
        let environment = environment.into();
        let bin_dir = environment.get_string(keys::BIN_DIR);
        let factory = build_session_factory(&uri, &environment)?;

        info!(
            uri = %uri,
            style = S::NAME,
            session = %factory,
            bin_dir = bin_dir.as_deref().unwrap_or("<PATH>"),
            "opened remote filesystem"
        );

        Ok(Self {
            uri,
            provider,
            environment,
            bin_dir,
            command_runner: CommandRunner::new(factory),
            _style: PhantomData,
        })
    }

    pub fn bin_dir(&self) -> Option<&str> {
        self.bin_dir.as_deref()
    }

    /// Release the session. The filesystem stays usable and reconnects on
    /// the next command.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.command_runner.close().await
    }
}

impl<S: PathStyle> FilesystemCore for SshFileSystem<S> {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn provider(&self) -> &Arc<dyn FileSystemProvider> {
        &self.provider
    }

    fn command_runner(&self) -> &CommandRunner {
        &self.command_runner
    }

    fn command(&self, name: &str) -> String {
        resolve_command(&self.environment, self.bin_dir.as_deref(), S::SEPARATOR, name)
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }

    fn separator(&self) -> &'static str {
        S::SEPARATOR
    }
}

impl<S: PathStyle> fmt::Debug for SshFileSystem<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshFileSystem")
            .field("style", &S::NAME)
            .field("uri", &self.uri.as_str())
            .field("provider", &self.provider)
            .field("bin_dir", &self.bin_dir)
            .field("command_runner", &self.command_runner)
            .finish()
    }
}

/// Open a filesystem, picking the variant from the URI scheme.
pub fn open_filesystem(
    provider: Arc<dyn FileSystemProvider>,
    uri: Url,
    environment: impl Into<Arc<Environment>>,
) -> FsResult<Box<dyn FilesystemCore>> {
    match uri.scheme() {
        UNIX_SCHEME => Ok(Box::new(UnixSshFileSystem::new(provider, uri, environment)?)),
        other => Err(FsError::UnsupportedScheme(other.to_string())),
    }
}
