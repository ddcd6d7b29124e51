//! Error types shared across `roomlink`.
//!
//! Every failure of an external collaborator (token service, transport) is
//! converted into one of these kinds at the boundary where it is observed.

use crate::transport::ChannelState;

/// Failures reported by the realtime backbone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unreachable: {0}")]
    Unreachable(String),
    #[error("credential refused by transport: {0}")]
    Unauthorized(String),
    #[error("channel '{0}' is not attached")]
    NotAttached(String),
    #[error("connection is not connected")]
    NotConnected,
    #[error("transport operation timed out")]
    Timeout,
    #[error("attach refused for channel '{0}'")]
    AttachRefused(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Failures while turning a username into a live connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("credential rejected: {0}")]
    CredentialRejected(String),
    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),
}

/// Failures of a single latency probe. Never fatal: the prober records
/// "no sample" instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("connection is not connected")]
    NotConnected,
    #[error("probe timed out")]
    Timeout,
}

impl From<TransportError> for ProbeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ProbeError::NotConnected,
            _ => ProbeError::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("channel is not attached")]
    NotReady,
    #[error("message text is empty")]
    EmptyText,
    #[error(transparent)]
    Publish(#[from] TransportError),
}

/// Fatal to the owning session: it must be discarded and recreated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("cannot open a session in state {0:?}")]
    InvalidState(ChannelState),
    #[error("attach failed: {0}")]
    Rejected(#[source] TransportError),
    #[error("session was closed while attaching")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {op} a session in state {from:?}")]
    InvalidTransition {
        from: ChannelState,
        op: &'static str,
    },
    #[error("room name must not be empty")]
    EmptyRoom,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("username required")]
    EmptyUsername,
    #[error("failed to sign credential: {0}")]
    Signing(String),
    #[error("invalid credential: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("malformed message payload: {0}")]
    Malformed(String),
}
