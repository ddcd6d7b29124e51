//! Connection manager
//!
//! Turns a username into a live transport connection:
//! 1. reject blank usernames before any network call
//! 2. exchange the username for a credential through a `CredentialProvider`
//! 3. open the transport connection and wait (bounded) until it reports
//!    `connected`
//!
//! The resulting `Connection` is the only owner of the transport connection.
//! It hands out channel handles (one per name), answers latency probes and
//! builds channel sessions for rooms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::CredentialProvider;
use crate::config::SessionSettings;
use crate::latency::{Milliseconds, Probe};
use crate::session::{AttachEpoch, ChannelSession, Identity, SessionOptions};
use crate::transport::{ConnectionState, Transport, TransportChannel, TransportConnection};
use crate::utils::error::{AuthError, ProbeError, SessionError};

pub type ChannelHandle = Arc<dyn TransportChannel>;

/// Channel name for a room: the namespace prefix followed by the room name
/// verbatim (surrounding whitespace included), so distinct rooms never share
/// a channel.
pub fn channel_name(prefix: &str, room: &str) -> String {
    format!("{prefix}{room}")
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub channel_prefix: String,
    pub session: SessionOptions,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&crate::config::Settings::default().session)
    }
}

impl From<&SessionSettings> for ConnectionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            channel_prefix: settings.channel_prefix.clone(),
            session: SessionOptions::from(settings),
        }
    }
}

pub struct ConnectionManager {
    provider: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            provider,
            transport,
            options,
        }
    }

    pub async fn authenticate(&self, username: &str) -> Result<Connection, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }

        let credential = self.provider.request(username).await?;
        debug!(client = %credential.client_id, "credential obtained for {username}");

        let transport = self
            .transport
            .connect(&credential)
            .await
            .map_err(|e| AuthError::TransportUnreachable(e.to_string()))?;

        let mut state = transport.state();
        let reached = tokio::time::timeout(
            self.options.connect_timeout,
            state.wait_for(|s| {
                matches!(
                    s,
                    ConnectionState::Connected
                        | ConnectionState::Failed
                        | ConnectionState::Closed
                )
            }),
        )
        .await;

        let outcome = match reached {
            Ok(Ok(s)) => *s,
            Ok(Err(_)) => ConnectionState::Closed,
            Err(_) => {
                transport.close();
                warn!("connection for {username} did not connect in time");
                return Err(AuthError::TransportUnreachable(format!(
                    "not connected after {:?}",
                    self.options.connect_timeout
                )));
            }
        };
        if outcome != ConnectionState::Connected {
            transport.close();
            return Err(AuthError::TransportUnreachable(format!(
                "connection ended in state {outcome:?}"
            )));
        }

        info!(client = %transport.client_id(), "connected as {username}");
        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                username: username.to_string(),
                transport,
                channels: Mutex::new(HashMap::new()),
                options: self.options.clone(),
            }),
        })
    }
}

struct ConnectionInner {
    username: String,
    transport: Arc<dyn TransportConnection>,
    channels: Mutex<HashMap<String, (ChannelHandle, AttachEpoch)>>,
    options: ConnectionOptions,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// An authenticated transport connection. Cloning shares the connection;
/// it is closed when the last clone is dropped or `close` is called.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn client_id(&self) -> &str {
        self.inner.transport.client_id()
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.transport.state().borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.state()
    }

    /// Handle to the named channel; repeated calls share one channel.
    pub fn channel(&self, name: &str) -> ChannelHandle {
        self.cached_channel(name).0
    }

    fn cached_channel(&self, name: &str) -> (ChannelHandle, AttachEpoch) {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(|| (self.inner.transport.channel(name), AttachEpoch::default()))
            .clone()
    }

    pub async fn ping(&self) -> Result<Milliseconds, ProbeError> {
        if self.state() != ConnectionState::Connected {
            return Err(ProbeError::NotConnected);
        }

        match tokio::time::timeout(self.inner.options.probe_timeout, self.inner.transport.ping())
            .await
        {
            Ok(Ok(rtt)) => Ok(u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX)),
            Ok(Err(e)) => Err(ProbeError::from(e)),
            Err(_) => Err(ProbeError::Timeout),
        }
    }

    /// Build an unopened session for `room` on this connection.
    pub fn join(&self, room: &str) -> Result<ChannelSession, SessionError> {
        if room.trim().is_empty() {
            return Err(SessionError::EmptyRoom);
        }

        let (channel, epoch) =
            self.cached_channel(&channel_name(&self.inner.options.channel_prefix, room));
        let identity = Identity {
            client_id: self.client_id().to_string(),
            username: self.username().to_string(),
        };
        Ok(ChannelSession::new(
            channel,
            epoch,
            identity,
            Arc::new(self.clone()),
            self.inner.options.session.clone(),
        ))
    }

    pub fn close(&self) {
        info!(client = %self.client_id(), "closing connection");
        self.inner.transport.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id())
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Probe for Connection {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn ping(&self) -> Result<Milliseconds, ProbeError> {
        Connection::ping(self).await
    }
}
