//! The seam between the session core and the realtime backbone.
//!
//! The backbone (connection establishment, delivery, presence primitives) is
//! an external collaborator. Everything above this module talks to it only
//! through [`Transport`], [`TransportConnection`] and [`TransportChannel`].
//! [`local::LocalBackbone`] is an in-process implementation used by the demo
//! command and the tests.

pub mod local;
pub mod message;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::auth::Credential;
use crate::utils::error::TransportError;

pub use message::{
    ChannelEvent, InboundMessage, MemberData, MessagePayload, PresenceAction, PresenceEvent,
    PresenceMember,
};
pub use state::{ChannelState, ConnectionState};

pub type SubscriptionId = String;

/// A live listener registration on a channel. Events stop arriving once the
/// id is passed to [`TransportChannel::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection bound to the credential's identity. The returned
    /// connection may still be `connecting`.
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn TransportConnection>, TransportError>;
}

#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn client_id(&self) -> &str;

    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Same name, same underlying channel.
    fn channel(&self, name: &str) -> Arc<dyn TransportChannel>;

    async fn ping(&self) -> Result<Duration, TransportError>;

    fn close(&self);
}

#[async_trait]
pub trait TransportChannel: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ChannelState;

    async fn attach(&self) -> Result<(), TransportError>;

    async fn detach(&self) -> Result<(), TransportError>;

    fn subscribe(&self) -> Subscription;

    fn unsubscribe(&self, id: &SubscriptionId);

    async fn publish(&self, name: &str, data: Value) -> Result<(), TransportError>;

    async fn presence_enter(&self, data: Value) -> Result<(), TransportError>;

    async fn presence_update(&self, data: Value) -> Result<(), TransportError>;

    async fn presence_leave(&self) -> Result<(), TransportError>;

    async fn presence_get(&self) -> Result<Vec<PresenceMember>, TransportError>;
}
