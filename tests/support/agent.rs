// ABOUTME: In-process SSH agent listening on a temporary Unix socket.
// ABOUTME: Loaded with fixture keys so tests can authenticate through SSH_AUTH_SOCK.

use super::ssh_container::fixture_path;
use russh::keys::agent::client::AgentClient;
use russh::keys::agent::server;
use russh::keys::load_secret_key;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Signs every request without asking.
#[derive(Clone)]
struct Unattended;

impl server::Agent for Unattended {}

/// Agent serving until dropped.
pub struct TestAgent {
    socket: PathBuf,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl TestAgent {
    /// Start an agent holding the named fixture keys.
    pub async fn start(keys: &[&str]) -> Result<Self, BoxError> {
        let dir = tempfile::tempdir()?;
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket)?;

        let connections = Box::pin(futures::stream::unfold(listener, |listener| async move {
            let next = listener.accept().await.map(|(stream, _)| stream);
            Some((next, listener))
        }));
        let task = tokio::spawn(async move {
            if let Err(e) = server::serve(connections, Unattended).await {
                tracing::debug!("test agent stopped: {}", e);
            }
        });

        let mut client = AgentClient::connect_uds(&socket).await?;
        for name in keys {
            let key = load_secret_key(fixture_path(name), None)?;
            client.add_identity(&key, &[]).await?;
        }

        Ok(Self {
            socket,
            task,
            _dir: dir,
        })
    }

    /// Value for `SSH_AUTH_SOCK`.
    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}
