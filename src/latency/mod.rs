pub mod prober;

pub use prober::{DEFAULT_INTERVAL, LatencyProber, LatencyTier, Milliseconds, Probe};

#[cfg(test)]
mod tests;
