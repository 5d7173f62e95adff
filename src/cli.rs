// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Parses the destination, credentials, environment, and command words.

use clap::Parser;
use sshrun::error::{Error, Result};
use sshrun::ssh::{Credential, StreamPolicy, Target};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sshrun")]
#[command(about = "Run a command on a remote host over SSH")]
#[command(version)]
pub struct Cli {
    /// Run in development mode (more logging)
    #[arg(short, long)]
    pub dev: bool,

    /// Remote SSH port
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// Remote user (overrides user@ in the destination)
    #[arg(short = 'l', long)]
    pub user: Option<String>,

    /// Private key file to offer after the SSH agent (repeatable)
    #[arg(short = 'i', long = "identity")]
    pub identities: Vec<PathBuf>,

    /// Environment variable to set remotely, as KEY=VALUE (repeatable)
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Do not forward local standard input
    #[arg(short = 'n', long)]
    pub no_stdin: bool,

    /// Wait for all remote output to be written before exiting
    #[arg(long)]
    pub drain: bool,

    /// Give up if the connection is not established within this many seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Drop the connection after this many seconds without traffic
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Remote host, optionally prefixed with user@
    pub destination: String,

    /// Command to run; words are joined with spaces
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Resolve the target, falling back to `default_user` when none is given.
    pub fn target(&self, default_user: Option<String>) -> Result<Target> {
        let (user, host) = match self.destination.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, self.destination.as_str()),
        };

        if host.is_empty() || user.as_deref() == Some("") {
            return Err(Error::InvalidDestination(self.destination.clone()));
        }

        let user = self
            .user
            .clone()
            .or(user)
            .or(default_user)
            .ok_or(Error::MissingUser)?;

        Ok(Target::new(host, user).port(self.port))
    }

    /// Agent first, then explicit identities, or the default key files.
    pub fn credentials(&self, home: Option<&Path>) -> Vec<Credential> {
        if !self.identities.is_empty() {
            return std::iter::once(Credential::Agent)
                .chain(self.identities.iter().cloned().map(Credential::KeyFile))
                .collect();
        }
        match home {
            Some(home) => Credential::default_chain(home),
            None => vec![Credential::Agent],
        }
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn stream_policy(&self) -> StreamPolicy {
        if self.drain {
            StreamPolicy::Drain
        } else {
            StreamPolicy::Detached
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.map(Duration::from_secs)
    }
}
