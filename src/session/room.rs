//! One room at a time.
//!
//! `ActiveRoom` holds at most one open session and closes it before the
//! next room's session is created, so two rooms never receive events for the
//! same user concurrently.

use tracing::{info, warn};

use crate::connection::Connection;
use crate::session::channel::ChannelSession;
use crate::utils::error::{AttachError, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Attach(#[from] AttachError),
}

#[derive(Debug, Default)]
pub struct ActiveRoom {
    current: Option<ChannelSession>,
}

impl ActiveRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ChannelSession> {
        self.current.as_ref()
    }

    /// Leave the current room (if any), then join and open `room`.
    pub async fn switch(
        &mut self,
        connection: &Connection,
        room: &str,
    ) -> Result<&ChannelSession, JoinError> {
        let next = connection.join(room)?;
        self.leave().await;

        info!(channel = %next.channel_name(), "joining room {room}");
        next.open().await?;
        Ok(&*self.current.insert(next))
    }

    pub async fn leave(&mut self) {
        let Some(session) = self.current.take() else {
            return;
        };
        // a failed or already-closed session has nothing left to tear down
        if session.state().is_terminal() {
            return;
        }
        if let Err(e) = session.close().await {
            warn!(channel = %session.channel_name(), "leaving room failed: {e}");
        }
    }
}
