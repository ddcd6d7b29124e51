use super::{LatencyAnnotation, LatencyMode, MESSAGE_EVENT, MessageStream};
use crate::transport::InboundMessage;
use crate::utils::error::StreamError;
use serde_json::{Value, json};

fn event(data: Value) -> InboundMessage {
    InboundMessage {
        name: MESSAGE_EVENT.to_string(),
        client_id: Some("alice".to_string()),
        data,
    }
}

#[test]
fn test_sender_embedded_latency_is_taken_from_payload() {
    let mut stream = MessageStream::new(LatencyMode::SenderEmbedded);
    let msg = stream
        .on_message(
            &event(json!({ "text": "hi", "username": "alice", "timestamp": 1_000, "rtt": 42 })),
            1_500,
        )
        .unwrap();

    assert_eq!(msg.text, "hi");
    assert_eq!(msg.username, "alice");
    assert_eq!(msg.client_id.as_deref(), Some("alice"));
    assert_eq!(msg.latency, Some(LatencyAnnotation::RoundTrip(42)));
}

#[test]
fn test_sender_embedded_tolerates_null_and_missing_rtt() {
    let mut stream = MessageStream::new(LatencyMode::SenderEmbedded);
    let with_null = stream
        .on_message(
            &event(json!({ "text": "a", "username": "bob", "timestamp": 0, "rtt": null })),
            0,
        )
        .unwrap()
        .clone();
    let missing = stream
        .on_message(
            &event(json!({ "text": "b", "username": "bob", "timestamp": 0 })),
            0,
        )
        .unwrap()
        .clone();

    assert_eq!(with_null.latency, None);
    assert_eq!(missing.latency, None);
}

#[test]
fn test_fractional_rtt_is_rounded() {
    let mut stream = MessageStream::new(LatencyMode::SenderEmbedded);
    let msg = stream
        .on_message(
            &event(json!({ "text": "a", "username": "bob", "timestamp": 0, "rtt": 12.6 })),
            0,
        )
        .unwrap();
    assert_eq!(msg.latency, Some(LatencyAnnotation::RoundTrip(13)));
}

#[test]
fn test_receiver_computed_latency_uses_arrival_time() {
    let mut stream = MessageStream::new(LatencyMode::ReceiverComputed);
    let msg = stream
        .on_message(
            &event(json!({ "text": "hi", "username": "alice", "timestamp": 10_000, "rtt": 5 })),
            10_250,
        )
        .unwrap();
    assert_eq!(msg.latency, Some(LatencyAnnotation::Delay(250)));
    assert_eq!(msg.received_at, 10_250);
}

#[test]
fn test_receiver_computed_clamps_clock_skew() {
    let mut stream = MessageStream::new(LatencyMode::ReceiverComputed);
    let msg = stream
        .on_message(
            &event(json!({ "text": "hi", "username": "alice", "timestamp": 9_000, "rtt": null })),
            8_000,
        )
        .unwrap();
    assert_eq!(msg.latency.map(LatencyAnnotation::millis), Some(0));
}

#[test]
fn test_history_keeps_delivery_order_not_timestamp_order() {
    let mut stream = MessageStream::default();
    for (text, ts) in [("third", 3), ("first", 1), ("second", 2)] {
        stream
            .on_message(
                &event(json!({ "text": text, "username": "alice", "timestamp": ts })),
                100,
            )
            .unwrap();
    }

    let texts: Vec<_> = stream.history().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["third", "first", "second"]);
}

#[test]
fn test_malformed_payload_is_rejected_without_touching_history() {
    let mut stream = MessageStream::default();
    stream
        .on_message(
            &event(json!({ "text": "ok", "username": "alice", "timestamp": 1 })),
            1,
        )
        .unwrap();

    let err = stream.on_message(&event(json!({ "body": "nope" })), 2);
    assert!(matches!(err, Err(StreamError::Malformed(_))));
    assert_eq!(stream.len(), 1);
    assert_eq!(stream.history()[0].text, "ok");
}

#[test]
fn test_shared_history_is_a_stable_view() {
    let mut stream = MessageStream::default();
    stream
        .on_message(
            &event(json!({ "text": "one", "username": "alice", "timestamp": 1 })),
            1,
        )
        .unwrap();

    let earlier = stream.shared_history();
    assert!(std::sync::Arc::ptr_eq(&earlier, &stream.shared_history()));

    stream
        .on_message(
            &event(json!({ "text": "two", "username": "alice", "timestamp": 2 })),
            2,
        )
        .unwrap();

    // a held view keeps its contents, the stream moves on
    assert_eq!(earlier.len(), 1);
    assert_eq!(stream.len(), 2);
    assert_eq!(stream.shared_history()[1].text, "two");
}
