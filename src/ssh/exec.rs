// ABOUTME: Runs one command over a session: environment, stream forwarding, exec.
// ABOUTME: Always closes the session, whichever step fails.

use super::client::StreamPolicy;
use super::command::{Command, Reader, Writer};
use super::error::{CommandFailure, Error, Result};
use super::session::{RemoteSession, await_reply};
use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Extended data type carrying the remote stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Chunks buffered per output stream before channel reads stall.
const OUTPUT_QUEUE_DEPTH: usize = 16;

/// Run `command` on `session`, then close the session.
///
/// Succeeds only when the remote command exits with status 0. The stdin
/// forwarder is never joined; output forwarders are joined only under
/// [`StreamPolicy::Drain`].
pub async fn run(mut session: RemoteSession, command: Command, policy: StreamPolicy) -> Result<()> {
    let result = execute(session.channel_mut(), command, policy).await;

    if let Err(e) = session.close().await {
        tracing::debug!("{}", e);
    }
    result
}

async fn execute(channel: &mut Channel<Msg>, command: Command, policy: StreamPolicy) -> Result<()> {
    for (name, value) in command.env_pairs() {
        set_env(channel, name, value).await?;
    }

    let Command {
        command_line,
        stdin,
        stdout,
        stderr,
        ..
    } = command;

    let stdout = stdout.map(|w| OutputForwarder::spawn("stdout", w));
    let stderr = stderr.map(|w| OutputForwarder::spawn("stderr", w));

    tracing::info!("running {:?}", command_line);
    channel
        .exec(true, command_line.as_str())
        .await
        .map_err(CommandFailure::Transport)?;

    // Stdin must not precede the exec request.
    if let Some(reader) = stdin {
        let _detached = spawn_stdin(reader, channel.make_writer());
    }

    let outcome = wait_for_exit(channel, stdout.as_ref(), stderr.as_ref()).await;

    if policy == StreamPolicy::Drain {
        for forwarder in [stdout, stderr].into_iter().flatten() {
            forwarder.finish().await;
        }
    }

    outcome
}

async fn set_env(channel: &mut Channel<Msg>, name: &str, value: &str) -> Result<()> {
    let env_error = |reason: String| Error::Environment {
        name: name.to_string(),
        reason,
    };

    channel
        .set_env(true, name, value)
        .await
        .map_err(|e| env_error(e.to_string()))?;

    match await_reply(channel).await {
        Some(true) => {
            tracing::debug!("set remote environment variable {}", name);
            Ok(())
        }
        Some(false) => Err(env_error("refused by server".to_string())),
        None => Err(env_error("channel closed".to_string())),
    }
}

/// Read channel messages until the command has exited and output is done.
async fn wait_for_exit(
    channel: &mut Channel<Msg>,
    stdout: Option<&OutputForwarder>,
    stderr: Option<&OutputForwarder>,
) -> Result<()> {
    let mut exit: Option<std::result::Result<(), CommandFailure>> = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                if let Some(forwarder) = stdout {
                    forwarder.send(&data).await;
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == SSH_EXTENDED_DATA_STDERR {
                    if let Some(forwarder) = stderr {
                        forwarder.send(&data).await;
                    }
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit = Some(if exit_status == 0 {
                    Ok(())
                } else {
                    Err(CommandFailure::ExitStatus(exit_status))
                });
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                exit = Some(Err(CommandFailure::Signal(format!("{:?}", signal_name))));
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Failure) => return Err(CommandFailure::Rejected.into()),
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    match exit {
        Some(Ok(())) => {
            tracing::debug!("remote command exited successfully");
            Ok(())
        }
        Some(Err(failure)) => Err(failure.into()),
        None => Err(CommandFailure::ChannelClosed.into()),
    }
}

/// Copy `reader` into the channel, then send EOF. Not joined by the caller.
fn spawn_stdin<W>(mut reader: Reader, writer: W) -> JoinHandle<()>
where
    W: AsyncWrite + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = Box::pin(writer);
        match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(n) => tracing::debug!("forwarded {} bytes of stdin", n),
            Err(e) => tracing::debug!("stdin forwarding stopped: {}", e),
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("failed to send EOF on stdin: {}", e);
        }
    })
}

/// Background task writing channel output into a local sink.
///
/// The queue is bounded: a slow sink stalls [`wait_for_exit`], which stops
/// reading the channel and lets the SSH window hold back the remote side.
struct OutputForwarder {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<()>,
}

impl OutputForwarder {
    fn spawn(stream: &'static str, mut writer: Writer) -> Self {
        let (tx, mut rx) = mpsc::channel::<Bytes>(OUTPUT_QUEUE_DEPTH);
        let task = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = writer.write_all(&chunk).await {
                    tracing::debug!("{} forwarding stopped: {}", stream, e);
                    return;
                }
                if let Err(e) = writer.flush().await {
                    tracing::debug!("{} flush failed: {}", stream, e);
                    return;
                }
            }
        });
        Self { tx, task }
    }

    async fn send(&self, data: &[u8]) {
        // The task only goes away after a write error; the output is dropped then.
        let _ = self.tx.send(Bytes::copy_from_slice(data)).await;
    }

    /// Wait until everything sent so far has been written.
    async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::debug!("output forwarder panicked: {}", e);
        }
    }
}
