//! Integration tests for the background checker loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use stagewatch::alerts::{AlertChannel, AlertMessage, ExceptionChecker, NotifierError, StateTracker};
use stagewatch::source::{SnapshotRow, SnapshotSource, SourceError};

/// Serves the script in order, then repeats the last entry
struct ScriptedSource {
    script: Vec<Vec<SnapshotRow>>,
    fetches: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedSource {
    fn new(script: Vec<Vec<SnapshotRow>>) -> Self {
        Self {
            script,
            fetches: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<SnapshotRow>, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.script.len().saturating_sub(1));
        Ok(self.script.get(idx).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
struct RecordingChannel {
    sent: Arc<Mutex<Vec<AlertMessage>>>,
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    async fn notify(&self, message: &AlertMessage) -> Result<(), NotifierError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

fn alpha(count: u64, stage: &str) -> Vec<SnapshotRow> {
    vec![SnapshotRow::new(count, stage, "Alpha")]
}

async fn wait_for_fetches(fetches: &AtomicUsize, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while fetches.load(Ordering::SeqCst) < n {
        assert!(Instant::now() < deadline, "timed out waiting for {} fetches", n);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_loop_alerts_once_per_change() {
    let source = ScriptedSource::new(vec![
        alpha(3, "In Exceptions Review"),
        alpha(3, "In Exceptions Review"),
        alpha(5, "In Exceptions Review"),
        alpha(1, "Processing"),
    ]);
    let fetches = Arc::clone(&source.fetches);
    let channel = RecordingChannel::default();

    let handle = ExceptionChecker::new(
        source,
        channel.clone(),
        StateTracker::default(),
        Duration::from_millis(20),
    )
    .start();

    wait_for_fetches(&fetches, 7).await;
    let tracked = handle.stop().await.unwrap();

    assert!(tracked.is_empty());

    let sent = channel.sent.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].observations[0].count, 3);
    assert_eq!(sent[1].observations[0].count, 5);
    assert_eq!(sent[1].observations[0].stage_label, "In Exceptions Review");
}

#[tokio::test]
async fn test_stop_does_not_wait_for_interval() {
    let source = ScriptedSource::new(vec![alpha(2, "Exceptions")]);
    let fetches = Arc::clone(&source.fetches);
    let channel = RecordingChannel::default();

    let handle = ExceptionChecker::new(
        source,
        channel.clone(),
        StateTracker::default(),
        Duration::from_secs(60),
    )
    .start();

    // First tick fires immediately
    wait_for_fetches(&fetches, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let tracked = tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("checker did not stop within a second")
        .unwrap();

    assert_eq!(tracked.get("Alpha").unwrap().count, 2);
    assert_eq!(channel.sent.lock().len(), 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_abandons_slow_fetch() {
    let mut source = ScriptedSource::new(vec![alpha(2, "Exceptions")]);
    source.delay = Duration::from_secs(30);
    let channel = RecordingChannel::default();

    let handle = ExceptionChecker::new(
        source,
        channel.clone(),
        StateTracker::default(),
        Duration::from_secs(60),
    )
    .start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    let tracked = tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("checker did not stop within a second")
        .unwrap();

    assert!(tracked.is_empty());
    assert!(channel.sent.lock().is_empty());
}

#[tokio::test]
async fn test_external_shutdown_token() {
    let token = tokio_util::sync::CancellationToken::new();
    let source = ScriptedSource::new(vec![alpha(1, "Processing")]);
    let fetches = Arc::clone(&source.fetches);

    let handle = ExceptionChecker::new(
        source,
        RecordingChannel::default(),
        StateTracker::default(),
        Duration::from_millis(10),
    )
    .with_shutdown(token.clone())
    .start();

    wait_for_fetches(&fetches, 2).await;
    token.cancel();

    let tracked = tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("checker ignored cancelled token")
        .unwrap();
    assert!(tracked.is_empty());
}
