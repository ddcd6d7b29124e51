//! The `connection` module owns the single authenticated transport
//! connection and derives channel handles and sessions from it.

pub mod manager;

pub use manager::{ChannelHandle, Connection, ConnectionManager, ConnectionOptions, channel_name};

#[cfg(test)]
mod tests;
