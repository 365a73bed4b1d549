//! Session factories: immutable descriptions of how to open an SSH session.
//!
//! A filesystem never builds a factory from scratch. It derives one from the
//! template in its environment, overriding user, host and port from the URI
//! and the proxy from the environment.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use russh::client::{self, Handle};
use tracing::{info, warn};
use url::Url;

use super::client::{ClientHandler, HostKeyPolicy, authenticate};
use super::proxy::Proxy;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_SSH_HOST, DEFAULT_SSH_PORT, SSH_INACTIVITY_TIMEOUT,
    SSH_KEEPALIVE_INTERVAL, SSH_KEEPALIVE_MAX, keys,
};
use crate::environment::{EnvValue, Environment, TimeUnit};
use crate::error::{FsError, FsResult, SessionError};

/// Credentials presented to the SSH server.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Keys offered by the agent at `SSH_AUTH_SOCK`.
    #[default]
    Agent,
    /// A private key file.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Agent => f.write_str("Agent"),
            Identity::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Identity::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Per-filesystem overrides applied to a template factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOverrides {
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<Proxy>,
    pub connect_timeout: Option<Duration>,
}

impl SessionOverrides {
    /// Overrides carried by a URI: user-info, host and explicit port.
    ///
    /// The username is percent-decoded. A password in the user-info is not
    /// used; credentials come from the template's [`Identity`].
    pub fn from_uri(uri: &Url) -> Result<Self, SessionError> {
        let username = match uri.username() {
            "" => None,
            raw => Some(
                percent_decode_str(raw)
                    .decode_utf8()
                    .map_err(|_| SessionError::InvalidUsername(raw.to_string()))?
                    .into_owned(),
            ),
        };
        let hostname = uri
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        Ok(Self {
            username,
            hostname,
            port: uri.port(),
            ..Default::default()
        })
    }
}

/// How to open an authenticated SSH session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFactory {
    hostname: String,
    port: u16,
    username: String,
    proxy: Option<Proxy>,
    identity: Identity,
    host_key_policy: HostKeyPolicy,
    connect_timeout: Duration,
    inactivity_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    keepalive_max: usize,
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_SSH_HOST.into(),
            port: DEFAULT_SSH_PORT,
            username: whoami::username(),
            proxy: None,
            identity: Identity::default(),
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
        }
    }
}

impl SessionFactory {
    pub fn new(hostname: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>, max: usize) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_max = max;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_key_policy
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Derive a factory from this template.
    ///
    /// Every override that is set replaces the template's value; everything
    /// else is inherited. The template itself is left untouched.
    pub fn derive(&self, overrides: &SessionOverrides) -> Result<SessionFactory, SessionError> {
        let mut factory = self.clone();
        if let Some(username) = &overrides.username {
            factory.username = username.clone();
        }
        if let Some(hostname) = &overrides.hostname {
            factory.hostname = hostname.clone();
        }
        if let Some(port) = overrides.port {
            factory.port = port;
        }
        if let Some(proxy) = &overrides.proxy {
            factory.proxy = Some(proxy.clone());
        }
        if let Some(timeout) = overrides.connect_timeout {
            factory.connect_timeout = timeout;
        }
        factory.validate()?;
        Ok(factory)
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.hostname.is_empty() || self.hostname.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidHostname(self.hostname.clone()));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidPort(self.port));
        }
        if self.username.is_empty() {
            return Err(SessionError::InvalidUsername(self.username.clone()));
        }
        if let Some(proxy) = &self.proxy {
            proxy.validate()?;
        }
        Ok(())
    }

    fn client_config(&self) -> client::Config {
        client::Config {
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_max: self.keepalive_max,
            ..<_>::default()
        }
    }

    /// Open and authenticate a new session.
    ///
    /// Connect, proxy handshake and key exchange share the connect timeout.
    pub async fn connect(&self) -> Result<Handle<ClientHandler>, SessionError> {
        let config = Arc::new(self.client_config());
        let handler = ClientHandler::new(
            self.hostname.clone(),
            self.port,
            self.host_key_policy.clone(),
        );

        let connecting = async {
            match &self.proxy {
                Some(proxy) => {
                    let stream = proxy.connect(&self.hostname, self.port).await?;
                    client::connect_stream(config, stream, handler).await
                }
                None => client::connect(config, (self.hostname.as_str(), self.port), handler).await,
            }
        };
        let mut session = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| SessionError::Timeout(self.connect_timeout))??;

        info!("Connected to {}, attempting authentication", self);
        authenticate(&mut session, &self.username, &self.identity).await?;
        Ok(session)
    }
}

impl fmt::Display for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh://{}@", self.username)?;
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)?;
        } else {
            write!(f, "{}:{}", self.hostname, self.port)?;
        }
        if let Some(proxy) = &self.proxy {
            write!(f, " via {proxy}")?;
        }
        Ok(())
    }
}

/// Build the session factory for a filesystem at `uri`.
///
/// The template comes from `defaultSessionFactory`, which is mandatory.
pub fn build_session_factory(uri: &Url, environment: &Environment) -> FsResult<SessionFactory> {
    let template = match environment.get(keys::DEFAULT_SESSION_FACTORY) {
        Some(EnvValue::SessionFactory(factory)) => factory,
        None | Some(EnvValue::Null) => {
            return Err(FsError::configuration(format!(
                "{} environment parameter is required",
                keys::DEFAULT_SESSION_FACTORY
            )));
        }
        Some(other) => {
            return Err(FsError::configuration(format!(
                "{} must be a session factory, got {}",
                keys::DEFAULT_SESSION_FACTORY,
                other.kind()
            )));
        }
    };

    let mut overrides = SessionOverrides::from_uri(uri)?;
    if !uri.password().unwrap_or_default().is_empty() {
        warn!("Ignoring password in filesystem URI; credentials come from the template identity");
    }
    overrides.proxy = proxy_from_environment(environment)?;
    overrides.connect_timeout = match environment.get_duration(
        keys::CONNECT_TIMEOUT,
        keys::CONNECT_TIMEOUT_UNIT,
        TimeUnit::Milliseconds,
    ) {
        Ok(timeout) => timeout,
        Err(e) => {
            warn!("Ignoring connect timeout: {}", e);
            None
        }
    };

    Ok(template.derive(&overrides)?)
}

fn proxy_from_environment(environment: &Environment) -> Result<Option<Proxy>, SessionError> {
    match environment.get(keys::PROXY) {
        None | Some(EnvValue::Null) => Ok(None),
        Some(EnvValue::Proxy(proxy)) => Ok(Some(proxy.clone())),
        Some(EnvValue::String(text)) => text.parse().map(Some),
        Some(other) => Err(SessionError::InvalidProxy(format!(
            "expected a proxy, got {}",
            other.kind()
        ))),
    }
}
