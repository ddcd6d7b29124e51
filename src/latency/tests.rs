use super::{LatencyProber, LatencyTier, Milliseconds, Probe};
use crate::utils::error::ProbeError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedProbe {
    connected: AtomicBool,
    outcomes: Mutex<VecDeque<Result<Milliseconds, ProbeError>>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    fn new(outcomes: Vec<Result<Milliseconds, ProbeError>>) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<Milliseconds, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProbeError::Timeout))
    }
}

#[test]
fn test_tier_boundaries() {
    assert_eq!(LatencyTier::classify(Some(0)), LatencyTier::Good);
    assert_eq!(LatencyTier::classify(Some(49)), LatencyTier::Good);
    assert_eq!(LatencyTier::classify(Some(50)), LatencyTier::Fair);
    assert_eq!(LatencyTier::classify(Some(99)), LatencyTier::Fair);
    assert_eq!(LatencyTier::classify(Some(100)), LatencyTier::Poor);
    assert_eq!(LatencyTier::classify(None), LatencyTier::Unknown);
    assert_eq!(LatencyTier::Unknown.label(), "unknown");
}

#[tokio::test(start_paused = true)]
async fn test_alternating_outcomes_store_latest_sample_only() {
    let probe = ScriptedProbe::new(vec![Ok(30), Err(ProbeError::Timeout), Ok(120)]);
    let prober = LatencyProber::start(probe.clone(), Duration::from_millis(5000));
    let mut rx = prober.subscribe();

    let mut samples = Vec::new();
    let mut tiers = Vec::new();
    for _ in 0..3 {
        rx.changed().await.unwrap();
        let sample = *rx.borrow_and_update();
        samples.push(sample);
        tiers.push(LatencyTier::classify(sample));
    }

    assert_eq!(samples, vec![Some(30), None, Some(120)]);
    assert_eq!(
        tiers,
        vec![LatencyTier::Good, LatencyTier::Unknown, LatencyTier::Poor]
    );
    assert_eq!(prober.latest(), Some(120));
}

#[tokio::test(start_paused = true)]
async fn test_first_probe_runs_immediately() {
    let probe = ScriptedProbe::new(vec![Ok(10)]);
    let prober = LatencyProber::start(probe.clone(), Duration::from_secs(60));
    let mut rx = prober.subscribe();

    tokio::time::timeout(Duration::from_millis(1), rx.changed())
        .await
        .expect("first probe should not wait for the interval")
        .unwrap();
    assert_eq!(prober.latest(), Some(10));
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_ticks_are_skipped() {
    let probe = ScriptedProbe::new(vec![Ok(10)]);
    probe.connected.store(false, Ordering::SeqCst);
    let prober = LatencyProber::start(probe.clone(), Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert_eq!(prober.latest(), None);
}

#[tokio::test(start_paused = true)]
async fn test_losing_the_connection_clears_the_sample() {
    let probe = ScriptedProbe::new(vec![Ok(30), Ok(40)]);
    let prober = LatencyProber::start(probe.clone(), Duration::from_millis(100));
    let mut rx = prober.subscribe();

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(30));

    probe.connected.store(false, Ordering::SeqCst);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), None);
    assert_eq!(prober.tier(), LatencyTier::Unknown);

    // further disconnected ticks do not notify again
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!rx.has_changed().unwrap());
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

    probe.connected.store(true, Ordering::SeqCst);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(40));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_the_timer() {
    let probe = ScriptedProbe::new(vec![Ok(10), Ok(11), Ok(12), Ok(13)]);
    let mut prober = LatencyProber::start(probe.clone(), Duration::from_millis(100));
    let mut rx = prober.subscribe();
    rx.changed().await.unwrap();

    prober.stop();
    tokio::task::yield_now().await;
    assert!(!prober.is_running());

    let calls = probe.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    assert!(rx.changed().await.is_err());
}
