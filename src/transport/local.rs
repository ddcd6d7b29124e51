//! In-process realtime backbone
//!
//! `LocalBackbone` implements the transport traits entirely in memory:
//! - topics hold subscriber senders and the presence set of the channel
//! - every publish is fanned out to all subscribers of the topic, the
//!   publisher included
//! - presence enter/update/leave is broadcast as a presence event
//! - credentials are verified with the same `TokenIssuer` that signs them
//!
//! Concurrency notes:
//! - broker state lives behind one `std::sync::Mutex` and the lock is never
//!   held across an `.await`; fan-out happens while holding it, so every
//!   subscriber observes the same delivery order
//! - fault switches (`set_reachable`, `refuse_attach`, ...) exist so callers
//!   can exercise failure paths of the session core

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Credential, TokenIssuer};
use crate::transport::{
    ChannelEvent, ChannelState, ConnectionState, InboundMessage, PresenceAction, PresenceEvent,
    PresenceMember, Subscription, SubscriptionId, Transport, TransportChannel,
    TransportConnection,
};
use crate::utils::error::TransportError;

type ConnectionId = String;

#[derive(Debug)]
struct Subscriber {
    connection_id: ConnectionId,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Debug, Default)]
struct Topic {
    name: String,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    members: Vec<PresenceMember>,
}

impl Topic {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn broadcast(&self, event: ChannelEvent) {
        for (sub_id, subscriber) in &self.subscribers {
            if subscriber.sender.send(event.clone()).is_err() {
                debug!(topic = %self.name, subscription = %sub_id, "subscriber receiver dropped");
            }
        }
    }

    /// Insert or replace the member entry for `client_id`.
    fn upsert_member(&mut self, member: PresenceMember) -> PresenceAction {
        match self
            .members
            .iter_mut()
            .find(|m| m.client_id == member.client_id)
        {
            Some(existing) => {
                *existing = member;
                PresenceAction::Update
            }
            None => {
                self.members.push(member);
                PresenceAction::Enter
            }
        }
    }

    fn remove_member(&mut self, client_id: &str) -> Option<PresenceMember> {
        let idx = self.members.iter().position(|m| m.client_id == client_id)?;
        Some(self.members.remove(idx))
    }
}

#[derive(Debug)]
struct Broker {
    topics: HashMap<String, Topic>,
    connections: HashMap<ConnectionId, String>,
    reachable: bool,
    stall_connect: bool,
    refused_channels: HashSet<String>,
    failing_presence_get: bool,
    ping_script: VecDeque<Option<u64>>,
    base_latency_ms: u64,
}

impl Broker {
    fn new() -> Self {
        Self {
            topics: HashMap::new(),
            connections: HashMap::new(),
            reachable: true,
            stall_connect: false,
            refused_channels: HashSet::new(),
            failing_presence_get: false,
            ping_script: VecDeque::new(),
            base_latency_ms: 1,
        }
    }

    fn topic_mut(&mut self, name: &str) -> &mut Topic {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(name))
    }

    fn cleanup_connection(&mut self, connection_id: &str) {
        let Some(client_id) = self.connections.remove(connection_id) else {
            return;
        };

        for topic in self.topics.values_mut() {
            topic
                .subscribers
                .retain(|_, sub| sub.connection_id != connection_id);
            if let Some(member) = topic.remove_member(&client_id) {
                topic.broadcast(ChannelEvent::Presence(PresenceEvent {
                    action: PresenceAction::Leave,
                    member,
                }));
            }
        }

        info!(client = %client_id, "cleaned up connection {connection_id}");
    }
}

/// In-memory backbone shared by every connection made through it.
#[derive(Clone)]
pub struct LocalBackbone {
    broker: Arc<Mutex<Broker>>,
    issuer: TokenIssuer,
}

impl LocalBackbone {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self {
            broker: Arc::new(Mutex::new(Broker::new())),
            issuer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When unreachable, `connect` fails outright.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// New connections stay `connecting` forever.
    pub fn stall_connect(&self, stall: bool) {
        self.lock().stall_connect = stall;
    }

    pub fn refuse_attach(&self, channel: &str) {
        self.lock().refused_channels.insert(channel.to_string());
    }

    pub fn fail_presence_get(&self, fail: bool) {
        self.lock().failing_presence_get = fail;
    }

    /// Queue ping outcomes: `Some(ms)` succeeds, `None` times out. Once the
    /// script is exhausted pings report the base latency.
    pub fn script_pings(&self, outcomes: impl IntoIterator<Item = Option<u64>>) {
        self.lock().ping_script.extend(outcomes);
    }

    pub fn set_base_latency(&self, ms: u64) {
        self.lock().base_latency_ms = ms;
    }

    /// Current presence set of a channel, as the broker sees it.
    pub fn members(&self, channel: &str) -> Vec<PresenceMember> {
        self.lock()
            .topics
            .get(channel)
            .map(|t| t.members.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .topics
            .get(channel)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    /// Deliver a raw event to every subscriber of `channel`, bypassing the
    /// publish path.
    pub fn inject(&self, channel: &str, event: ChannelEvent) {
        if let Some(topic) = self.lock().topics.get(channel) {
            topic.broadcast(event);
        }
    }
}

impl std::fmt::Debug for LocalBackbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackbone")
            .field("broker", &"Arc<Mutex<Broker>>")
            .finish()
    }
}

#[async_trait]
impl Transport for LocalBackbone {
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn TransportConnection>, TransportError> {
        let stall = {
            let broker = self.lock();
            if !broker.reachable {
                return Err(TransportError::Unreachable(
                    "local backbone is offline".to_string(),
                ));
            }
            broker.stall_connect
        };

        let claims = self
            .issuer
            .verify(&credential.token)
            .map_err(|e| TransportError::Unauthorized(e.to_string()))?;
        if claims.sub != credential.client_id {
            return Err(TransportError::Unauthorized(format!(
                "token subject '{}' does not match client id '{}'",
                claims.sub, credential.client_id
            )));
        }

        let connection_id = format!("conn-{}", Uuid::new_v4());
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let connection = Arc::new(LocalConnection {
            id: connection_id.clone(),
            client_id: claims.sub.clone(),
            backbone: self.clone(),
            state: state_tx,
            channels: Mutex::new(HashMap::new()),
        });

        self.lock()
            .connections
            .insert(connection_id.clone(), claims.sub.clone());

        if !stall {
            // establishment completes asynchronously, like a real socket handshake
            let state = connection.state.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                state.send_if_modified(|s| {
                    if *s == ConnectionState::Connecting {
                        *s = ConnectionState::Connected;
                        true
                    } else {
                        false
                    }
                });
            });
        }

        debug!(client = %claims.sub, "connection {connection_id} opened");
        Ok(connection)
    }
}

pub struct LocalConnection {
    id: ConnectionId,
    client_id: String,
    backbone: LocalBackbone,
    state: watch::Sender<ConnectionState>,
    channels: Mutex<HashMap<String, Arc<LocalChannel>>>,
}

#[async_trait]
impl TransportConnection for LocalConnection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn channel(&self, name: &str) -> Arc<dyn TransportChannel> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(LocalChannel {
                    name: name.to_string(),
                    connection_id: self.id.clone(),
                    client_id: self.client_id.clone(),
                    backbone: self.backbone.clone(),
                    connection_state: self.state.subscribe(),
                    state: Mutex::new(ChannelState::Initialized),
                })
            })
            .clone()
    }

    async fn ping(&self) -> Result<Duration, TransportError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let outcome = {
            let mut broker = self.backbone.lock();
            let base = broker.base_latency_ms;
            broker.ping_script.pop_front().unwrap_or(Some(base))
        };

        match outcome {
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Err(TransportError::Timeout),
        }
    }

    fn close(&self) {
        let changed = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Closed {
                false
            } else {
                *s = ConnectionState::Closed;
                true
            }
        });
        if !changed {
            return;
        }

        for channel in self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            channel.set_state(ChannelState::Detached);
        }
        self.backbone.lock().cleanup_connection(&self.id);
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct LocalChannel {
    name: String,
    connection_id: ConnectionId,
    client_id: String,
    backbone: LocalBackbone,
    connection_state: watch::Receiver<ConnectionState>,
    state: Mutex<ChannelState>,
}

impl LocalChannel {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if *self.connection_state.borrow() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn ensure_attached(&self) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if self.state() == ChannelState::Attached {
            Ok(())
        } else {
            Err(TransportError::NotAttached(self.name.clone()))
        }
    }

    fn announce(&self, data: Value) -> Result<(), TransportError> {
        self.ensure_attached()?;
        let member = PresenceMember {
            client_id: self.client_id.clone(),
            data,
        };

        let mut broker = self.backbone.lock();
        let topic = broker.topic_mut(&self.name);
        let action = topic.upsert_member(member.clone());
        topic.broadcast(ChannelEvent::Presence(PresenceEvent { action, member }));
        Ok(())
    }
}

#[async_trait]
impl TransportChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn attach(&self) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.set_state(ChannelState::Attaching);

        // attach acknowledgement arrives on a later turn of the event loop
        tokio::task::yield_now().await;

        let refused = {
            let mut broker = self.backbone.lock();
            broker.topic_mut(&self.name);
            broker.refused_channels.contains(&self.name)
        };
        if refused {
            self.set_state(ChannelState::Failed);
            return Err(TransportError::AttachRefused(self.name.clone()));
        }

        self.set_state(ChannelState::Attached);
        debug!(client = %self.client_id, "attached to {}", self.name);
        Ok(())
    }

    async fn detach(&self) -> Result<(), TransportError> {
        self.set_state(ChannelState::Detaching);

        let mut broker = self.backbone.lock();
        if let Some(topic) = broker.topics.get_mut(&self.name) {
            if let Some(member) = topic.remove_member(&self.client_id) {
                topic.broadcast(ChannelEvent::Presence(PresenceEvent {
                    action: PresenceAction::Leave,
                    member,
                }));
            }
        }
        drop(broker);

        self.set_state(ChannelState::Detached);
        debug!(client = %self.client_id, "detached from {}", self.name);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();

        self.backbone.lock().topic_mut(&self.name).subscribers.insert(
            id.clone(),
            Subscriber {
                connection_id: self.connection_id.clone(),
                sender: tx,
            },
        );

        Subscription { id, events: rx }
    }

    fn unsubscribe(&self, id: &SubscriptionId) {
        if let Some(topic) = self.backbone.lock().topics.get_mut(&self.name) {
            topic.subscribers.remove(id);
        }
    }

    async fn publish(&self, name: &str, data: Value) -> Result<(), TransportError> {
        self.ensure_connected()?;

        let broker = self.backbone.lock();
        match broker.topics.get(&self.name) {
            Some(topic) => topic.broadcast(ChannelEvent::Message(InboundMessage {
                name: name.to_string(),
                client_id: Some(self.client_id.clone()),
                data,
            })),
            None => warn!("publish to '{}' with no topic state", self.name),
        }
        Ok(())
    }

    async fn presence_enter(&self, data: Value) -> Result<(), TransportError> {
        self.announce(data)
    }

    async fn presence_update(&self, data: Value) -> Result<(), TransportError> {
        self.announce(data)
    }

    async fn presence_leave(&self) -> Result<(), TransportError> {
        self.ensure_attached()?;

        let mut broker = self.backbone.lock();
        let topic = broker.topic_mut(&self.name);
        if let Some(member) = topic.remove_member(&self.client_id) {
            topic.broadcast(ChannelEvent::Presence(PresenceEvent {
                action: PresenceAction::Leave,
                member,
            }));
        }
        Ok(())
    }

    async fn presence_get(&self) -> Result<Vec<PresenceMember>, TransportError> {
        self.ensure_attached()?;

        // the member list is answered on a later turn, after the triggering event
        tokio::task::yield_now().await;

        let mut broker = self.backbone.lock();
        if broker.failing_presence_get {
            return Err(TransportError::Timeout);
        }
        Ok(broker.topic_mut(&self.name).members.clone())
    }
}
