pub mod stream;

pub use stream::{ChatMessage, LatencyAnnotation, LatencyMode, MESSAGE_EVENT, MessageStream};

#[cfg(test)]
mod tests;
