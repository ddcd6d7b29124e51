//! Wire and event types exchanged with the realtime backbone.
//!
//! Notes on the chat payload:
//! - `timestamp`: sender wall clock, milliseconds since UNIX epoch
//! - `rtt`: the sender's latest latency sample at publish time, or `null`.
//!   Any JSON number is accepted on the way in; negative or non-finite values
//!   read as `null`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Published/received chat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    pub username: String,
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub rtt: Option<u64>,
}

/// Member data announced through presence, keyed externally by client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberData {
    pub username: String,
}

/// One entry of a channel's presence set as reported by the backbone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub client_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub member: PresenceMember,
}

/// A message event as delivered on a channel subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub name: String,
    pub client_id: Option<String>,
    pub data: Value,
}

/// Everything a channel subscription can deliver, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(InboundMessage),
    Presence(PresenceEvent),
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| ms.round() as u64))
}
