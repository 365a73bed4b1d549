//! russh client plumbing: server key verification and authentication.

use std::path::PathBuf;
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use tracing::{debug, info, warn};

use super::factory::Identity;
use crate::error::SessionError;

/// How server host keys are verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum HostKeyPolicy {
    /// Check against `~/.ssh/known_hosts`.
    #[default]
    KnownHosts,
    /// Check against the given known_hosts file.
    KnownHostsFile(PathBuf),
    /// Accept any key. Logs the fingerprint.
    AcceptAny,
}

/// Client handler for russh - handles server key verification
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub(crate) fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SessionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        let known = match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    host = %self.host,
                    "Accepting server key without verification: {}",
                    fingerprint
                );
                return Ok(true);
            }
            HostKeyPolicy::KnownHosts => {
                russh::keys::check_known_hosts(&self.host, self.port, server_public_key)
            }
            HostKeyPolicy::KnownHostsFile(path) => russh::keys::check_known_hosts_path(
                &self.host,
                self.port,
                server_public_key,
                path,
            ),
        };

        match known {
            Ok(true) => {
                debug!(host = %self.host, "Server key verified: {}", fingerprint);
                Ok(true)
            }
            Ok(false) => {
                warn!(host = %self.host, "Unknown server key: {}", fingerprint);
                Err(SessionError::HostKeyRejected(format!(
                    "{}:{} is not in known_hosts ({})",
                    self.host, self.port, fingerprint
                )))
            }
            Err(e) => Err(SessionError::HostKeyRejected(format!(
                "{}:{}: {}",
                self.host, self.port, e
            ))),
        }
    }
}

/// Authenticate an open connection as `username`.
pub(crate) async fn authenticate(
    session: &mut Handle<ClientHandler>,
    username: &str,
    identity: &Identity,
) -> Result<(), SessionError> {
    match identity {
        Identity::Agent => authenticate_with_agent(session, username).await,
        Identity::KeyFile { path, passphrase } => {
            let key = russh::keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                SessionError::KeyLoad {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            let result = session
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await?;
            if !result.success() {
                return Err(SessionError::AuthFailed(format!(
                    "key {} rejected for {}",
                    path.display(),
                    username
                )));
            }
            info!("Authenticated as {} with key file {}", username, path.display());
            Ok(())
        }
        Identity::Password(password) => {
            let result = session.authenticate_password(username, password).await?;
            if !result.success() {
                return Err(SessionError::AuthFailed(format!(
                    "password rejected for {username}"
                )));
            }
            info!("Authenticated as {} with password", username);
            Ok(())
        }
    }
}

async fn authenticate_with_agent(
    session: &mut Handle<ClientHandler>,
    username: &str,
) -> Result<(), SessionError> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| SessionError::AgentFailed(e.to_string()))?;

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| SessionError::AgentFailed(e.to_string()))?;

    if keys.is_empty() {
        return Err(SessionError::NoKeysAvailable);
    }

    debug!("Found {} keys in SSH agent", keys.len());

    // Try each key until one works
    for key in &keys {
        debug!("Trying key: {}", key.fingerprint(HashAlg::Sha256));

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let result = session
            .authenticate_publickey_with(username, key.clone(), hash_alg, &mut agent)
            .await;

        match result {
            Ok(auth_result) if auth_result.success() => {
                info!(
                    "Authenticated as {} with key {}",
                    username,
                    key.fingerprint(HashAlg::Sha256)
                );
                return Ok(());
            }
            Ok(_) => {
                debug!("Key rejected, trying next...");
            }
            Err(e) => {
                warn!("Auth error with key: {}", e);
            }
        }
    }

    Err(SessionError::AuthFailed("No keys accepted by server".into()))
}
