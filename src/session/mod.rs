//! Channel sessions: the attach/detach lifecycle, publish gating and the
//! observable state consumers render from.

pub mod channel;
pub mod room;

pub use channel::{AttachEpoch, ChannelSession, Identity, SessionOptions, SessionSnapshot};
pub use room::{ActiveRoom, JoinError};
