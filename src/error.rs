// ABOUTME: Application-wide error types for sshrun.
// ABOUTME: Uses thiserror for ergonomic error handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("no user given and USER is not set")]
    MissingUser,

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),
}

impl Error {
    /// Process exit code for this error: the remote status when known, else 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Ssh(e) => e
                .exit_status()
                .and_then(|code| i32::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
