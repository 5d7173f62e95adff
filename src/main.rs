// ABOUTME: Entry point for the sshrun CLI application.
// ABOUTME: Builds the target and command from arguments and runs it over SSH.

mod cli;

use clap::Parser;
use cli::Cli;
use sshrun::error::Result;
use sshrun::ssh::{self, ClientConfig, Command};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Development mode turns on debug logging
    let filter = if cli.dev {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    // Exit directly: a pending stdin read would otherwise block runtime shutdown
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let target = cli.target(env::var("USER").ok())?;
    let home = env::var_os("HOME").map(PathBuf::from);
    let credentials = cli.credentials(home.as_deref());

    let mut config = ClientConfig::default().stream_policy(cli.stream_policy());
    if let Some(timeout) = cli.connect_timeout() {
        config = config.connect_timeout(timeout);
    }
    if let Some(timeout) = cli.idle_timeout() {
        config = config.inactivity_timeout(timeout);
    }

    let mut command = Command::new(cli.command_line())
        .envs(cli.env.iter().cloned())
        .stdout(tokio::io::stdout())
        .stderr(tokio::io::stderr());
    if !cli.no_stdin {
        command = command.stdin(tokio::io::stdin());
    }

    ssh::run_command(&target, &credentials, command, &config).await?;
    Ok(())
}
