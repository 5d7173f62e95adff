// ABOUTME: Description of one remote command: line, environment, and local streams.
// ABOUTME: Also holds the lenient KEY=VALUE environment entry parser.

use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A command to run on a [`RemoteSession`](super::RemoteSession).
///
/// `command_line` goes to the remote shell verbatim.
pub struct Command {
    pub command_line: String,
    pub env: Vec<String>,
    pub stdin: Option<Reader>,
    pub stdout: Option<Writer>,
    pub stderr: Option<Writer>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command_line", &self.command_line)
            .field("env", &self.env)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl Command {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            env: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Add a `KEY=VALUE` entry. Malformed entries are skipped at run time.
    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// Well-formed environment pairs, in order.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| {
            let pair = parse_env_entry(entry);
            if pair.is_none() {
                tracing::debug!("skipping malformed environment entry {:?}", entry);
            }
            pair
        })
    }
}

/// Split `KEY=VALUE` on the first `=`. Both sides must be non-empty.
pub fn parse_env_entry(entry: &str) -> Option<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Some((key, value)),
        _ => None,
    }
}
