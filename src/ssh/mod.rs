// ABOUTME: SSH remote command execution.
// ABOUTME: Credential resolution, connection, pty session, and command run over russh.

mod auth;
mod client;
mod command;
mod error;
mod exec;
mod session;

pub use auth::{AGENT_SOCK_ENV, Credential, Proof, resolve_all};
pub use client::{ClientConfig, Connection, StreamPolicy, Target};
pub use command::{Command, parse_env_entry};
pub use error::{CommandFailure, Error, Result};
pub use exec::run;
pub use session::RemoteSession;

/// Run one command on `target` over a fresh connection.
///
/// Resolves `credentials` in order, dials, opens a pty session, runs the
/// command and disconnects. Nothing is reused between calls.
pub async fn run_command(
    target: &Target,
    credentials: &[Credential],
    command: Command,
    config: &ClientConfig,
) -> Result<()> {
    let proofs = resolve_all(credentials).await;
    if proofs.is_empty() {
        tracing::warn!("no usable credentials for {}", target.addr());
    }

    let connection = Connection::connect(target, proofs, config).await?;

    let result = match RemoteSession::open(&connection).await {
        Ok(session) => run(session, command, config.stream_policy).await,
        Err(e) => Err(e),
    };

    if let Err(e) = connection.disconnect().await {
        tracing::warn!("failed to disconnect from {}: {}", target.addr(), e);
    }
    result
}
