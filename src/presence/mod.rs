pub mod tracker;

pub use tracker::{Member, PresenceTracker, ResyncTicket};
