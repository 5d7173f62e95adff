// ABOUTME: SSH-specific error types.
// ABOUTME: One variant per step of dial, authentication, session setup, and command run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error("failed to open session: {0}")]
    Session(String),

    #[error("request for pseudo terminal failed: {0}")]
    Pty(String),

    #[error("failed to set environment variable {name}: {reason}")]
    Environment { name: String, reason: String },

    #[error("command failed: {0}")]
    Command(#[from] CommandFailure),
}

impl Error {
    /// Remote exit status, when the command ran to completion.
    pub fn exit_status(&self) -> Option<u32> {
        match self {
            Error::Command(CommandFailure::ExitStatus(code)) => Some(*code),
            _ => None,
        }
    }
}

/// Why a remote command did not succeed.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("remote command exited with status {0}")]
    ExitStatus(u32),

    #[error("remote command killed by signal {0}")]
    Signal(String),

    #[error("exec request rejected by server")]
    Rejected,

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("transport error: {0}")]
    Transport(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
