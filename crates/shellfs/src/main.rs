//! shellfs binary.
//!
//! Opens a remote filesystem and runs one command on it, resolved through the
//! filesystem's command policy (`command.<name>`, `dir.bin`).
//!
//! Usage:
//!   shellfs ssh.unix://alice@files.example/ ls -la /srv
//!   shellfs --env remote.toml --set dir.bin=/usr/gnu/bin ssh.unix://files.example/ stat /etc/hosts
//!   shellfs --proxy socks5://bastion:1080 --identity ~/.ssh/id_ed25519 ssh.unix://files.example/ df -h

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};
use url::Url;

use shellfs::constants::{UNIX_SCHEME, keys};
use shellfs::{
    Environment, FileSystemProvider, HostKeyPolicy, Identity, SessionFactory, open_filesystem,
};

/// Run a command on an SSH-backed filesystem.
#[derive(Parser, Debug)]
#[command(name = "shellfs")]
#[command(about = "Run a resolved remote command on an SSH-backed filesystem")]
struct Args {
    /// TOML file with environment entries (dir.bin, command.<name>, proxy, ...)
    #[arg(long, value_name = "FILE")]
    env: Option<PathBuf>,

    /// Extra environment entry, applied after --env
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Private key file (default: ssh-agent)
    #[arg(long, value_name = "PATH", conflicts_with = "password_env")]
    identity: Option<PathBuf>,

    /// Environment variable holding the password
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long, value_name = "PATH", conflicts_with = "insecure")]
    known_hosts: Option<PathBuf>,

    /// Accept any server host key
    #[arg(long)]
    insecure: bool,

    /// Proxy URL, e.g. socks5://bastion:1080 or http://proxy:3128
    #[arg(long)]
    proxy: Option<String>,

    /// Filesystem URI, e.g. ssh.unix://user@host:22/
    uri: Url,

    /// Logical command name
    command: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug)]
struct CliProvider;

impl FileSystemProvider for CliProvider {
    fn scheme(&self) -> &str {
        UNIX_SCHEME
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let environment = build_environment(&args)?;
    let fs = open_filesystem(Arc::new(CliProvider), args.uri.clone(), environment)
        .with_context(|| format!("opening {}", args.uri))?;

    let mut command_line = fs.command(&args.command);
    for arg in &args.args {
        command_line.push(' ');
        command_line.push_str(&shell_quote(arg));
    }

    let output = fs
        .command_runner()
        .execute(&command_line)
        .await
        .with_context(|| format!("running {command_line:?}"))?;
    fs.command_runner().close().await.ok();

    std::io::stdout().write_all(&output.stdout)?;
    std::io::stderr().write_all(&output.stderr)?;

    Ok(match output.exit_status {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        None => ExitCode::FAILURE,
    })
}

fn build_environment(args: &Args) -> Result<Environment> {
    let mut environment = match &args.env {
        Some(path) => Environment::from_toml_file(path)
            .with_context(|| format!("reading environment {}", path.display()))?,
        None => Environment::new(),
    };

    for entry in &args.set {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("--set expects KEY=VALUE, got {entry:?}");
        };
        environment.insert(key, value);
    }

    if let Some(proxy) = &args.proxy {
        environment.insert(keys::PROXY, proxy.as_str());
    }

    let mut template = SessionFactory::default();
    if let Some(path) = &args.identity {
        template = template.with_identity(Identity::KeyFile {
            path: path.clone(),
            passphrase: None,
        });
    }
    if let Some(var) = &args.password_env {
        let password = std::env::var(var).with_context(|| format!("reading password from ${var}"))?;
        template = template.with_identity(Identity::Password(password));
    }
    if args.insecure {
        template = template.with_host_key_policy(HostKeyPolicy::AcceptAny);
    } else if let Some(path) = &args.known_hosts {
        template = template.with_host_key_policy(HostKeyPolicy::KnownHostsFile(path.clone()));
    }
    environment.insert(keys::DEFAULT_SESSION_FACTORY, template);

    Ok(environment)
}

/// Single-quote `arg` for a POSIX shell unless it is plainly safe.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
