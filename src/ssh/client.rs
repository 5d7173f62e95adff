// ABOUTME: SSH transport connection using russh.
// ABOUTME: Dials the target, runs the handshake, and authenticates with ordered proofs.

use super::auth::Proof;
use super::error::{Error, Result};
use russh::client::{self, Config, Handle};
use russh::keys::ssh_key::{self, HashAlg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;

/// Remote endpoint and login for one execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
}

impl Target {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` as used for dialing and in error messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Whether the executor waits for output forwarders before returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPolicy {
    /// Return as soon as the remote command finishes; trailing output may be lost.
    #[default]
    Detached,
    /// Wait until stdout and stderr forwarders have flushed everything received.
    Drain,
}

/// Client-side knobs threaded in by the caller.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Bound on dial plus handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Close the connection after this much inactivity. `None` disables it.
    pub inactivity_timeout: Option<Duration>,
    /// Output forwarding policy for commands run through [`run_command`](super::run_command).
    pub stream_policy: StreamPolicy,
}

impl ClientConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn stream_policy(mut self, policy: StreamPolicy) -> Self {
        self.stream_policy = policy;
        self
    }
}

/// russh handler. Server host keys are accepted without verification.
pub(crate) struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH connection. Never shared between requests.
pub struct Connection {
    target: Target,
    handle: Handle<ClientHandler>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Connection {
    /// Dial the target and authenticate with the first accepted proof.
    pub async fn connect(target: &Target, proofs: Vec<Proof>, config: &ClientConfig) -> Result<Self> {
        let russh_config = Config {
            inactivity_timeout: config.inactivity_timeout,
            ..Default::default()
        };

        let dial = client::connect(
            Arc::new(russh_config),
            (target.host.as_str(), target.port),
            ClientHandler,
        );

        let dialed = match config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dial).await.map_err(|_| Error::Dial {
                addr: target.addr(),
                reason: format!("timed out after {:?}", timeout),
            })?,
            None => dial.await,
        };

        let mut handle = dialed.map_err(|e| Error::Dial {
            addr: target.addr(),
            reason: e.to_string(),
        })?;
        tracing::debug!("connected to {}", target.addr());

        if !authenticate(&mut handle, &target.user, proofs).await {
            return Err(Error::AuthenticationFailed);
        }
        tracing::info!("authenticated to {} as {}", target.addr(), target.user);

        Ok(Self {
            target: target.clone(),
            handle,
        })
    }

    pub(crate) fn handle(&self) -> &Handle<ClientHandler> {
        &self.handle
    }

    /// Disconnect the connection.
    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| Error::Session(format!("disconnect failed: {}", e)))
    }
}

/// Offer each proof in order; returns whether one was accepted.
async fn authenticate(handle: &mut Handle<ClientHandler>, user: &str, proofs: Vec<Proof>) -> bool {
    if proofs.is_empty() {
        return false;
    }

    // RSA keys sign with the strongest hash the server advertises.
    let rsa_hash = match handle.best_supported_rsa_hash().await {
        Ok(alg) => alg.flatten(),
        Err(e) => {
            tracing::debug!("failed to negotiate RSA hash: {}", e);
            None
        }
    };

    for proof in proofs {
        let accepted = match proof {
            Proof::Agent(mut agent) => {
                let keys = match agent.request_identities().await {
                    Ok(keys) => keys,
                    Err(e) => {
                        tracing::debug!("failed to list agent keys: {}", e);
                        continue;
                    }
                };

                let mut accepted = false;
                for key in keys {
                    let hash_alg = rsa_hash_for(key.algorithm(), rsa_hash);
                    match handle
                        .authenticate_publickey_with(user, key, hash_alg, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => {
                            accepted = true;
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => tracing::debug!("agent authentication error: {:?}", e),
                    }
                }
                accepted
            }
            Proof::Key(key) => {
                let hash_alg = rsa_hash_for(key.algorithm(), rsa_hash);
                match handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
                {
                    Ok(result) => result.success(),
                    Err(e) => {
                        tracing::debug!("key authentication error: {}", e);
                        false
                    }
                }
            }
        };

        if accepted {
            return true;
        }
    }
    false
}

/// Hash to request for a signature by a key of `algorithm`; only RSA takes one.
fn rsa_hash_for(algorithm: ssh_key::Algorithm, negotiated: Option<HashAlg>) -> Option<HashAlg> {
    if algorithm.is_rsa() { negotiated } else { None }
}
