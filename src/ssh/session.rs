// ABOUTME: Session channel lifecycle on an established connection.
// ABOUTME: Opens a channel, requests a fixed-size pty, and closes it exactly once.

use super::client::Connection;
use super::error::{Error, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};

/// Terminal type requested for every session.
pub const TERM: &str = "xterm";
/// Fixed pty width in columns.
pub const COLUMNS: u32 = 80;
/// Fixed pty height in rows.
pub const ROWS: u32 = 40;
/// Input and output baud rate.
pub const BAUD: u32 = 14400;

/// Terminal modes sent with the pty request.
pub fn terminal_modes() -> [(Pty, u32); 2] {
    [(Pty::TTY_OP_ISPEED, BAUD), (Pty::TTY_OP_OSPEED, BAUD)]
}

/// One command-execution channel with a pty attached.
///
/// Consumed by [`close`](RemoteSession::close), so a session cannot be
/// closed twice or reused for a second command.
pub struct RemoteSession {
    channel: Channel<Msg>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("channel", &self.channel.id())
            .finish()
    }
}

impl RemoteSession {
    /// Open a session channel and request the pty.
    ///
    /// If the pty request fails the channel is closed before returning, so
    /// callers only own a session when this returns `Ok`.
    pub async fn open(connection: &Connection) -> Result<Self> {
        let mut channel = connection
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| Error::Session(e.to_string()))?;

        if let Err(e) = request_pty(&mut channel).await {
            if let Err(close_err) = channel.close().await {
                tracing::debug!("failed to close channel after pty error: {}", close_err);
            }
            return Err(e);
        }

        tracing::debug!("opened session channel {}", channel.id());
        Ok(Self { channel })
    }

    pub(crate) fn channel_mut(&mut self) -> &mut Channel<Msg> {
        &mut self.channel
    }

    /// Close the channel.
    pub async fn close(self) -> Result<()> {
        let id = self.channel.id();
        self.channel
            .close()
            .await
            .map_err(|e| Error::Session(format!("failed to close channel {}: {}", id, e)))?;
        tracing::debug!("closed session channel {}", id);
        Ok(())
    }
}

async fn request_pty(channel: &mut Channel<Msg>) -> Result<()> {
    channel
        .request_pty(true, TERM, COLUMNS, ROWS, 0, 0, &terminal_modes())
        .await
        .map_err(|e| Error::Pty(e.to_string()))?;

    match await_reply(channel).await {
        Some(true) => Ok(()),
        Some(false) => Err(Error::Pty("refused by server".to_string())),
        None => Err(Error::Pty("channel closed".to_string())),
    }
}

/// Wait for the server's answer to a request sent with `want_reply`.
///
/// Returns `None` if the channel closes first.
pub(crate) async fn await_reply(channel: &mut Channel<Msg>) -> Option<bool> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Some(true),
            Some(ChannelMsg::Failure) => return Some(false),
            Some(ChannelMsg::Close) | None => return None,
            Some(_) => {}
        }
    }
}
