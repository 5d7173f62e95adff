// ABOUTME: Credential resolution for SSH authentication.
// ABOUTME: Agent and key-file credentials resolve best-effort to optional proofs.

use russh::keys::agent::client::AgentClient;
use russh::keys::{load_secret_key, ssh_key};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;

/// Environment variable naming the local SSH agent socket.
pub const AGENT_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// Key files tried after the agent when no identity is given explicitly.
const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// A source of authentication material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// The SSH agent reachable through `SSH_AUTH_SOCK`.
    Agent,
    /// An unencrypted private key on disk.
    KeyFile(PathBuf),
}

/// Material offered to the server during authentication.
pub enum Proof {
    /// Connected agent; signatures are produced inside the agent process.
    Agent(AgentClient<UnixStream>),
    /// Parsed private key.
    Key(Arc<ssh_key::PrivateKey>),
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proof::Agent(_) => f.write_str("Proof::Agent(<agent>)"),
            Proof::Key(key) => f
                .debug_tuple("Proof::Key")
                .field(&key.algorithm().as_str())
                .finish(),
        }
    }
}

impl Credential {
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credential::KeyFile(path.into())
    }

    /// Agent first, then the usual key files under `home/.ssh`.
    pub fn default_chain(home: &Path) -> Vec<Credential> {
        let ssh_dir = home.join(".ssh");
        std::iter::once(Credential::Agent)
            .chain(
                DEFAULT_KEY_FILES
                    .iter()
                    .map(|name| Credential::KeyFile(ssh_dir.join(name))),
            )
            .collect()
    }

    /// Resolve to a usable proof, or `None` when this method is unavailable.
    pub async fn resolve(&self) -> Option<Proof> {
        match self {
            Credential::Agent => resolve_agent(std::env::var_os(AGENT_SOCK_ENV)).await,
            Credential::KeyFile(path) => resolve_key_file(path),
        }
    }
}

/// Resolve every credential in order, dropping the unavailable ones.
pub async fn resolve_all(credentials: &[Credential]) -> Vec<Proof> {
    let mut proofs = Vec::with_capacity(credentials.len());
    for credential in credentials {
        if let Some(proof) = credential.resolve().await {
            proofs.push(proof);
        }
    }
    proofs
}

async fn resolve_agent(socket: Option<OsString>) -> Option<Proof> {
    let Some(socket) = socket.filter(|s| !s.is_empty()) else {
        tracing::debug!("{} not set, skipping agent authentication", AGENT_SOCK_ENV);
        return None;
    };

    match AgentClient::connect_uds(&socket).await {
        Ok(agent) => Some(Proof::Agent(agent)),
        Err(e) => {
            tracing::debug!("SSH agent at {:?} unavailable: {}", socket, e);
            None
        }
    }
}

fn resolve_key_file(path: &Path) -> Option<Proof> {
    match load_secret_key(path, None) {
        Ok(key) => Some(Proof::Key(Arc::new(key))),
        Err(e) => {
            tracing::debug!("skipping key {}: {}", path.display(), e);
            None
        }
    }
}
