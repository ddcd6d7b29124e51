//! Message stream
//!
//! Append-only log of chat messages for one channel session, in the order
//! the transport delivered them. Entries are never reordered by their
//! embedded timestamp.
//!
//! The log is an `Arc<Vec<_>>` shared with snapshots; appending copies it
//! only while an older snapshot still holds a reference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::transport::{InboundMessage, MessagePayload};
use crate::utils::error::StreamError;

/// Event name chat messages are published under.
pub const MESSAGE_EVENT: &str = "message";

/// How the latency annotation of a received message is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Trust the `rtt` the sender embedded at publish time.
    #[default]
    SenderEmbedded,
    /// `arrival - timestamp`: a delivery delay for display, not a round trip.
    ReceiverComputed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ms", rename_all = "snake_case")]
pub enum LatencyAnnotation {
    RoundTrip(u64),
    Delay(u64),
}

impl LatencyAnnotation {
    pub fn millis(self) -> u64 {
        match self {
            LatencyAnnotation::RoundTrip(ms) | LatencyAnnotation::Delay(ms) => ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub client_id: Option<String>,
    pub username: String,
    pub text: String,
    /// Sender wall clock, ms since epoch.
    pub timestamp: i64,
    /// Local arrival, ms since epoch.
    pub received_at: i64,
    pub latency: Option<LatencyAnnotation>,
}

#[derive(Debug, Default)]
pub struct MessageStream {
    mode: LatencyMode,
    log: Arc<Vec<ChatMessage>>,
}

impl MessageStream {
    pub fn new(mode: LatencyMode) -> Self {
        Self {
            mode,
            log: Arc::default(),
        }
    }

    pub fn mode(&self) -> LatencyMode {
        self.mode
    }

    /// Decode one message event and append it.
    pub fn on_message(
        &mut self,
        raw: &InboundMessage,
        arrival_ms: i64,
    ) -> Result<&ChatMessage, StreamError> {
        let payload: MessagePayload = serde_json::from_value(raw.data.clone()).map_err(|e| {
            warn!("dropping undecodable '{}' event: {e}", raw.name);
            StreamError::Malformed(e.to_string())
        })?;

        let latency = match self.mode {
            LatencyMode::SenderEmbedded => payload.rtt.map(LatencyAnnotation::RoundTrip),
            LatencyMode::ReceiverComputed => {
                let delay = arrival_ms.saturating_sub(payload.timestamp).max(0);
                Some(LatencyAnnotation::Delay(delay as u64))
            }
        };

        Arc::make_mut(&mut self.log).push(ChatMessage {
            client_id: raw.client_id.clone(),
            username: payload.username,
            text: payload.text,
            timestamp: payload.timestamp,
            received_at: arrival_ms,
            latency,
        });

        Ok(&self.log[self.log.len() - 1])
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.log
    }

    /// The log itself, without copying it.
    pub fn shared_history(&self) -> Arc<Vec<ChatMessage>> {
        Arc::clone(&self.log)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
