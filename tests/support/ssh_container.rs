// ABOUTME: OpenSSH server container shared by the integration tests.
// ABOUTME: Started once through bollard, removed at process exit.

use bollard::Docker;
use bollard::exec::StartExecOptions;
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures::StreamExt;
use sshrun::ssh::{Credential, Target};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
const CONTAINER_SSH_PORT: u16 = 2222;
const TEST_USER: &str = "ci";

/// Prepends `AcceptEnv LC_*` to the sshd config and has sshd reload it.
const ACCEPT_LC_ENV: &str = r#"for f in /config/sshd/sshd_config /etc/ssh/sshd_config; do
  [ -f "$f" ] || continue
  { echo 'AcceptEnv LC_*'; cat "$f"; } > "$f.new" && cat "$f.new" > "$f" && rm "$f.new"
done
pkill -HUP -f '^sshd'"#;

/// Id of the started container, removed by [`remove_on_exit`].
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

static SHARED_CONTAINER: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

#[ctor::dtor]
fn remove_on_exit() {
    let Some(id) = CONTAINER_ID.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            let _ = docker.remove_container(id, Some(options)).await;
        }
    });
}

/// Get the shared SSH container, starting it on first use.
pub async fn shared_container() -> &'static SshContainer {
    SHARED_CONTAINER
        .get_or_init(|| async {
            super::init_tracing();
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

/// Running OpenSSH server reachable on a local port.
pub struct SshContainer {
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, BoxError> {
        let docker = Docker::connect_with_local_defaults()?;
        let mut authorized_keys = Vec::new();
        for name in ["test_key.pub", "rsa_key.pub"] {
            authorized_keys.push(std::fs::read_to_string(fixture_path(name))?.trim().to_string());
        }

        let mut pull = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress?;
        }

        let port = free_port().await?;
        let port_bindings = HashMap::from([(
            format!("{}/tcp", CONTAINER_SSH_PORT),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        )]);

        let body = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(vec![
                "PUID=1000".to_string(),
                "PGID=1000".to_string(),
                format!("USER_NAME={}", TEST_USER),
                format!("PUBLIC_KEY={}", authorized_keys.join("\n")),
            ]),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(format!("sshrun-test-{}", std::process::id())),
            ..Default::default()
        };
        let container = docker.create_container(Some(options), body).await?;
        let _ = CONTAINER_ID.set(container.id.clone());

        docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await?;

        wait_for_banner(port).await?;
        accept_lc_env(&docker, &container.id).await?;
        // sshd re-executes itself on SIGHUP; let the old listener go away first.
        tokio::time::sleep(Duration::from_secs(1)).await;
        wait_for_banner(port).await?;
        Ok(Self { port })
    }

    /// Target for the test user on this container.
    pub fn target(&self) -> Target {
        Target::new("127.0.0.1", TEST_USER).port(self.port)
    }

    /// The key installed as the test user's authorized key.
    pub fn authorized_credentials(&self) -> Vec<Credential> {
        vec![Credential::key_file(fixture_path("test_key"))]
    }

    /// An RSA key, also authorized for the test user.
    pub fn rsa_key_path(&self) -> String {
        fixture_path("rsa_key")
    }

    /// A valid key the server does not know.
    pub fn unauthorized_credentials(&self) -> Vec<Credential> {
        vec![Credential::key_file(fixture_path("unauthorized_key"))]
    }
}

/// Absolute path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

/// Let clients set `LC_*` variables, as stock distribution configs do.
async fn accept_lc_env(docker: &Docker, container_id: &str) -> Result<(), BoxError> {
    let exec = docker
        .create_exec(
            container_id,
            ExecConfig {
                cmd: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    ACCEPT_LC_ENV.to_string(),
                ]),
                ..Default::default()
            },
        )
        .await?;

    docker
        .start_exec(
            &exec.id,
            Some(StartExecOptions {
                detach: true,
                ..Default::default()
            }),
        )
        .await?;

    for _ in 0..50 {
        let details = docker.inspect_exec(&exec.id).await?;
        if !details.running.unwrap_or(false) {
            return match details.exit_code {
                Some(0) | None => Ok(()),
                Some(code) => Err(format!("sshd reconfiguration exited with {}", code).into()),
            };
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err("sshd reconfiguration did not finish in time".into())
}

async fn free_port() -> Result<u16, BoxError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Poll until sshd answers with its version banner.
async fn wait_for_banner(port: u16) -> Result<(), BoxError> {
    let addr = format!("127.0.0.1:{}", port);
    for _ in 0..60 {
        if let Ok(mut stream) = tokio::net::TcpStream::connect(&addr).await {
            let mut buf = [0u8; 32];
            let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
            if let Ok(Ok(n)) = read {
                if buf[..n].starts_with(b"SSH-") {
                    // The user and key are set up just after sshd starts.
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("SSH container did not become ready in time".into())
}
