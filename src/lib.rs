//! # roomlink
//!
//! `roomlink` is the session core of a realtime chat client: users join named
//! rooms over a pub/sub backbone, see who else is present, exchange text
//! messages and watch their connection latency.
//!
//! ## Core Modules
//!
//! - `connection`: authenticates a username and owns the transport connection.
//! - `session`: channel attach/detach lifecycle, publish gating, observable state.
//! - `presence`: the deduplicated member set, resynchronized on every change.
//! - `messages`: the append-only message log and its latency annotations.
//! - `latency`: the periodic round-trip prober and its display tiers.
//! - `transport`: the seam to the realtime backbone, plus an in-process backbone.
//! - `auth`: credential issuance, the token endpoint and its clients.
//! - `config`: loading settings from files and the environment.
//! - `utils`: error types and logging setup.

pub mod auth;
pub mod config;
pub mod connection;
pub mod latency;
pub mod messages;
pub mod presence;
pub mod session;
pub mod transport;
pub mod utils;

pub use connection::{Connection, ConnectionManager};
pub use session::{ChannelSession, SessionSnapshot};
