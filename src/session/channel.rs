//! Channel session
//!
//! Attach/detach state machine for one channel, plus the gate that makes
//! publishing safe:
//!
//! ```text
//! Initialized -> Attaching -> Attached -> Detaching -> Detached
//!                    |            |
//!                    +-> Failed <-+
//! ```
//!
//! Concurrency notes:
//! - every transport event for the session is handled by one pump task, the
//!   only writer of the presence tracker and the message stream
//! - presence resyncs run in a `JoinSet` owned by the pump, so aborting the
//!   pump cancels them too
//! - `Core` is behind a `std::sync::Mutex` that is never held across an
//!   `.await`; events are only applied while the state is `Attached`, which
//!   is what keeps a closed session from changing after `close` returns
//! - sessions on one connection share the channel handle for a name; each
//!   `open` bumps the handle's `AttachEpoch`, and the background teardown of
//!   a dropped session only runs while no later session has opened

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::SessionSettings;
use crate::connection::ChannelHandle;
use crate::latency::{LatencyProber, LatencyTier, Milliseconds, Probe};
use crate::messages::{ChatMessage, LatencyMode, MESSAGE_EVENT, MessageStream};
use crate::presence::{Member, PresenceTracker, ResyncTicket};
use crate::transport::{
    ChannelEvent, ChannelState, InboundMessage, MessagePayload, PresenceMember, Subscription,
    SubscriptionId,
};
use crate::utils::error::{AttachError, SendError, SessionError, TransportError};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ping_interval: Duration,
    pub latency_mode: LatencyMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ping_interval: crate::latency::DEFAULT_INTERVAL,
            latency_mode: LatencyMode::default(),
        }
    }
}

impl From<&SessionSettings> for SessionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            latency_mode: settings.latency_mode,
        }
    }
}

/// Attach counter shared by every session built on one channel handle.
pub type AttachEpoch = Arc<AtomicU64>;

/// Who this session speaks as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub username: String,
}

/// Everything a consumer renders, republished on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub channel: String,
    pub state: ChannelState,
    pub messages: Arc<Vec<ChatMessage>>,
    pub members: Vec<Member>,
    pub latency: Option<Milliseconds>,
}

impl SessionSnapshot {
    pub fn latency_tier(&self) -> LatencyTier {
        LatencyTier::classify(self.latency)
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Attached
    }
}

struct Core {
    state: ChannelState,
    // this session's value of the channel's attach epoch, 0 before `open`
    epoch: u64,
    presence: PresenceTracker,
    stream: MessageStream,
    latency: Option<Milliseconds>,
}

#[derive(Default)]
struct Resources {
    subscription: Option<SubscriptionId>,
    pump: Option<JoinHandle<()>>,
    prober: Option<LatencyProber>,
}

type ResyncResult = (ResyncTicket, Result<Vec<PresenceMember>, TransportError>);

struct Shared {
    channel: ChannelHandle,
    epoch: AttachEpoch,
    identity: Identity,
    // lock order: core, then resources, then view
    core: Mutex<Core>,
    resources: Mutex<Resources>,
    view: watch::Sender<SessionSnapshot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Shared {
    fn publish(&self, core: &Core) {
        self.view.send_replace(SessionSnapshot {
            channel: self.channel.name().to_string(),
            state: core.state,
            messages: core.stream.shared_history(),
            members: core.presence.snapshot(),
            latency: core.latency,
        });
    }

    fn set_state(&self, core: &mut Core, state: ChannelState) {
        debug!(channel = %self.channel.name(), "{:?} -> {:?}", core.state, state);
        core.state = state;
        self.publish(core);
    }

    /// Remove the listener, cancel the pump (and its pending resyncs) and
    /// stop the prober. Synchronous and idempotent.
    fn release(&self) {
        let mut resources = lock(&self.resources);
        if let Some(id) = resources.subscription.take() {
            self.channel.unsubscribe(&id);
        }
        if let Some(pump) = resources.pump.take() {
            pump.abort();
        }
        if let Some(mut prober) = resources.prober.take() {
            prober.stop();
        }
    }

    fn latest_latency(&self) -> Option<Milliseconds> {
        lock(&self.resources)
            .prober
            .as_ref()
            .and_then(LatencyProber::latest)
    }

    fn on_message(&self, raw: InboundMessage) {
        if raw.name != MESSAGE_EVENT {
            debug!(channel = %self.channel.name(), "ignoring '{}' event", raw.name);
            return;
        }

        let mut core = lock(&self.core);
        if core.state != ChannelState::Attached {
            return;
        }
        let arrival = now_ms();
        self.view.send_if_modified(|snapshot| {
            // release the view's reference so the append does not copy history
            snapshot.messages = Arc::default();
            let appended = core.stream.on_message(&raw, arrival).is_ok();
            snapshot.messages = core.stream.shared_history();
            appended
        });
    }

    fn spawn_resync(&self, resyncs: &mut JoinSet<ResyncResult>) {
        let ticket = {
            let mut core = lock(&self.core);
            if core.state != ChannelState::Attached {
                return;
            }
            core.presence.begin_resync()
        };

        let channel = self.channel.clone();
        resyncs.spawn(async move { (ticket, channel.presence_get().await) });
    }

    fn on_resync(&self, (ticket, result): ResyncResult) {
        let mut core = lock(&self.core);
        if core.state != ChannelState::Attached {
            return;
        }
        match result {
            Ok(members) => {
                if core.presence.apply(ticket, members) {
                    self.publish(&core);
                }
            }
            Err(e) => core.presence.fail(ticket, &e),
        }
    }

    fn on_latency(&self, sample: Option<Milliseconds>) {
        let mut core = lock(&self.core);
        if core.state != ChannelState::Attached {
            return;
        }
        core.latency = sample;
        self.publish(&core);
    }
}

async fn run_pump(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut latency: watch::Receiver<Option<Milliseconds>>,
) {
    let mut resyncs = JoinSet::new();
    let mut latency_open = true;

    // members that entered before our subscription existed
    shared.spawn_resync(&mut resyncs);
    shared.on_latency(*latency.borrow_and_update());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Message(raw)) => shared.on_message(raw),
                Some(ChannelEvent::Presence(event)) => {
                    debug!(
                        channel = %shared.channel.name(),
                        client = %event.member.client_id,
                        "presence {:?}", event.action
                    );
                    shared.spawn_resync(&mut resyncs);
                }
                None => {
                    debug!(channel = %shared.channel.name(), "event stream closed");
                    break;
                }
            },
            Some(joined) = resyncs.join_next(), if !resyncs.is_empty() => match joined {
                Ok(result) => shared.on_resync(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("presence resync task failed: {e}"),
            },
            changed = latency.changed(), if latency_open => match changed {
                Ok(()) => shared.on_latency(*latency.borrow_and_update()),
                Err(_) => latency_open = false,
            },
        }
    }
}

/// A session on one channel. Create it with `Connection::join`, then `open`.
///
/// Dropping an open session removes its listeners and stops its prober
/// immediately; presence leave and detach are then sent in the background.
pub struct ChannelSession {
    shared: Arc<Shared>,
    probe: Arc<dyn Probe>,
    options: SessionOptions,
}

impl ChannelSession {
    pub fn new(
        channel: ChannelHandle,
        epoch: AttachEpoch,
        identity: Identity,
        probe: Arc<dyn Probe>,
        options: SessionOptions,
    ) -> Self {
        let core = Core {
            state: ChannelState::Initialized,
            epoch: 0,
            presence: PresenceTracker::new(),
            stream: MessageStream::new(options.latency_mode),
            latency: None,
        };
        let (view, _) = watch::channel(SessionSnapshot {
            channel: channel.name().to_string(),
            state: core.state,
            messages: Arc::default(),
            members: Vec::new(),
            latency: None,
        });

        Self {
            shared: Arc::new(Shared {
                channel,
                epoch,
                identity,
                core: Mutex::new(core),
                resources: Mutex::new(Resources::default()),
                view,
            }),
            probe,
            options,
        }
    }

    pub fn channel_name(&self) -> &str {
        self.shared.channel.name()
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub async fn open(&self) -> Result<(), AttachError> {
        let shared = &self.shared;
        {
            let mut core = lock(&shared.core);
            if core.state != ChannelState::Initialized {
                return Err(AttachError::InvalidState(core.state));
            }
            core.epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            shared.set_state(&mut core, ChannelState::Attaching);
        }

        let prober = LatencyProber::start(self.probe.clone(), self.options.ping_interval);
        let latency = prober.subscribe();
        lock(&shared.resources).prober = Some(prober);

        info!(
            channel = %self.channel_name(),
            "attaching as {} ({:?} latency)",
            shared.identity.username,
            lock(&shared.core).stream.mode()
        );
        if let Err(e) = shared.channel.attach().await {
            error!(channel = %self.channel_name(), "attach failed: {e}");
            shared.release();
            let mut core = lock(&shared.core);
            if core.state == ChannelState::Attaching {
                shared.set_state(&mut core, ChannelState::Failed);
            }
            return Err(AttachError::Rejected(e));
        }

        let Subscription { id, events } = shared.channel.subscribe();
        let aborted = {
            let mut core = lock(&shared.core);
            if core.state == ChannelState::Attaching {
                shared.set_state(&mut core, ChannelState::Attached);
                let pump = tokio::spawn(run_pump(shared.clone(), events, latency));
                let mut resources = lock(&shared.resources);
                resources.subscription = Some(id.clone());
                resources.pump = Some(pump);
                false
            } else {
                true
            }
        };

        if aborted {
            // close() ran while the attach was in flight
            shared.channel.unsubscribe(&id);
            shared.release();
            if let Err(e) = shared.channel.detach().await {
                warn!(channel = %self.channel_name(), "detach after aborted attach failed: {e}");
            }
            return Err(AttachError::Aborted);
        }

        let data = json!({ "username": shared.identity.username });
        if let Err(e) = shared.channel.presence_enter(data).await {
            warn!(channel = %self.channel_name(), "presence enter failed: {e}");
        }

        info!(channel = %self.channel_name(), "attached");
        Ok(())
    }

    /// Leave presence, drop listeners, then detach. Listener removal and
    /// prober cancellation are complete when this returns, whatever the
    /// transport answers to leave/detach.
    pub async fn close(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        {
            let mut core = lock(&shared.core);
            match core.state {
                ChannelState::Attached | ChannelState::Attaching => {}
                from => return Err(SessionError::InvalidTransition { from, op: "close" }),
            }
            shared.set_state(&mut core, ChannelState::Detaching);
        }

        info!(channel = %self.channel_name(), "detaching");
        if let Err(e) = shared.channel.presence_leave().await {
            warn!(channel = %self.channel_name(), "presence leave failed: {e}");
        }
        shared.release();
        if let Err(e) = shared.channel.detach().await {
            warn!(channel = %self.channel_name(), "detach failed: {e}");
        }

        let mut core = lock(&shared.core);
        shared.set_state(&mut core, ChannelState::Detached);
        Ok(())
    }

    /// Publish `text`. The message shows up in history only once it comes
    /// back through the subscription.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyText);
        }
        if self.state() != ChannelState::Attached {
            return Err(SendError::NotReady);
        }

        let payload = MessagePayload {
            text: text.to_string(),
            username: self.shared.identity.username.clone(),
            timestamp: now_ms(),
            rtt: self.shared.latest_latency(),
        };
        let data = serde_json::to_value(&payload)
            .map_err(|e| SendError::Publish(TransportError::Publish(e.to_string())))?;

        self.shared
            .channel
            .publish(MESSAGE_EVENT, data)
            .await
            .map_err(|e| {
                warn!(channel = %self.channel_name(), "publish failed: {e}");
                SendError::Publish(e)
            })
    }

    /// Re-announce the local member under a new display name.
    pub async fn update_presence(&self, username: &str) -> Result<(), SendError> {
        if self.state() != ChannelState::Attached {
            return Err(SendError::NotReady);
        }
        self.shared
            .channel
            .presence_update(json!({ "username": username }))
            .await
            .map_err(SendError::Publish)
    }

    /// Open, run `body`, and close on the way out even if `body` ends the
    /// session early.
    pub async fn scoped<T>(
        self,
        body: impl AsyncFnOnce(&ChannelSession) -> T,
    ) -> Result<T, AttachError> {
        self.open().await?;
        let out = body(&self).await;
        if let Err(e) = self.close().await {
            debug!(channel = %self.channel_name(), "scoped close skipped: {e}");
        }
        Ok(out)
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.shared.core).state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Attached
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.view.subscribe()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        lock(&self.shared.core).stream.history().to_vec()
    }

    pub fn members(&self) -> Vec<Member> {
        lock(&self.shared.core).presence.snapshot()
    }

    /// Latest latency sample of this session's prober.
    pub fn latency(&self) -> Option<Milliseconds> {
        self.shared.latest_latency()
    }

    pub fn latency_tier(&self) -> LatencyTier {
        lock(&self.shared.resources)
            .prober
            .as_ref()
            .map_or(LatencyTier::Unknown, LatencyProber::tier)
    }

    /// Whether the local identity appears in the latest member list.
    pub fn is_present(&self) -> bool {
        lock(&self.shared.core)
            .presence
            .contains(&self.shared.identity.client_id)
    }

    pub fn is_probing(&self) -> bool {
        lock(&self.shared.resources)
            .prober
            .as_ref()
            .is_some_and(LatencyProber::is_running)
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        let opened_at = {
            let mut core = lock(&self.shared.core);
            let open = matches!(
                core.state,
                ChannelState::Attached | ChannelState::Attaching
            );
            if open {
                self.shared.set_state(&mut core, ChannelState::Detached);
            }
            open.then_some(core.epoch)
        };
        self.shared.release();

        let Some(mine) = opened_at else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let channel = self.shared.channel.clone();
            let epoch = self.shared.epoch.clone();
            handle.spawn(async move {
                let superseded = || epoch.load(Ordering::SeqCst) != mine;
                if superseded() {
                    debug!(channel = %channel.name(), "channel reopened, skipping teardown");
                    return;
                }
                let _ = channel.presence_leave().await;
                if !superseded() {
                    let _ = channel.detach().await;
                }
            });
        }
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = lock(&self.shared.core);
        f.debug_struct("ChannelSession")
            .field("channel", &self.channel_name())
            .field("identity", &self.shared.identity)
            .field("state", &core.state)
            .field("latency_mode", &core.stream.mode())
            .field("messages", &core.stream.len())
            .field("members", &core.presence.len())
            .finish()
    }
}
