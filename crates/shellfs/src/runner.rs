//! Remote command execution over a filesystem's SSH session.
//!
//! A [`CommandRunner`] owns one [`SessionFactory`]. The session is opened on
//! first use and shared by every command until it closes, at which point the
//! next command reconnects. Each command runs on its own channel.

use std::fmt;
use std::io;

use russh::ChannelMsg;
use russh::Disconnect;
use russh::client::Handle;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SessionError;
use crate::session::{ClientHandler, SessionFactory};

/// Everything a remote command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the server sent no exit status (e.g. killed by a signal).
    pub exit_status: Option<u32>,
    pub exit_signal: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout of a successful command; anything else becomes an error
    /// carrying stderr.
    pub fn into_stdout(self) -> io::Result<Vec<u8>> {
        if self.success() {
            return Ok(self.stdout);
        }
        let status = match (&self.exit_status, &self.exit_signal) {
            (Some(code), _) => format!("exit status {code}"),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => "no exit status".to_string(),
        };
        Err(io::Error::other(format!(
            "remote command failed ({status}): {}",
            self.stderr_lossy().trim_end()
        )))
    }
}

/// Executes commands on the remote host of one session factory.
pub struct CommandRunner {
    factory: SessionFactory,
    session: Mutex<Option<Handle<ClientHandler>>>,
}

impl CommandRunner {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            session: Mutex::new(None),
        }
    }

    pub fn session_factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Check if a live session is held.
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    /// Run `command` with no input.
    pub async fn execute(&self, command: &str) -> Result<CommandOutput, SessionError> {
        self.run(command, None).await
    }

    /// Run `command`, writing `stdin` to it before EOF.
    pub async fn execute_with_input(
        &self,
        command: &str,
        stdin: &[u8],
    ) -> Result<CommandOutput, SessionError> {
        self.run(command, Some(stdin)).await
    }

    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, SessionError> {
        debug!(target_host = %self.factory, command, "executing remote command");

        let mut channel = {
            let mut guard = self.session.lock().await;
            let session = match guard.take() {
                Some(session) if !session.is_closed() => session,
                stale => {
                    if stale.is_some() {
                        debug!("Session to {} closed, reconnecting", self.factory);
                    }
                    self.factory.connect().await?
                }
            };
            let opened = session.channel_open_session().await;
            *guard = Some(session);
            opened.map_err(|e| SessionError::ChannelFailed(e.to_string()))?
        };

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::ChannelFailed(format!("exec: {e}")))?;
        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| SessionError::ChannelFailed(format!("stdin: {e}")))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| SessionError::ChannelFailed(format!("eof: {e}")))?;

        let mut output = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    output.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    output.exit_signal = Some(format!("{signal_name:?}"))
                }
                _ => {}
            }
        }

        debug!(
            command,
            exit_status = ?output.exit_status,
            stdout_len = output.stdout.len(),
            "remote command finished"
        );
        Ok(output)
    }

    /// Disconnect the session, if any. The next command reconnects.
    pub async fn close(&self) -> Result<(), SessionError> {
        if let Some(session) = self.session.lock().await.take() {
            session
                .disconnect(Disconnect::ByApplication, "Filesystem closed", "en")
                .await?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRunner")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}
