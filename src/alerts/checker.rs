//! Background exception checker
//!
//! Runs fetch, diff and notify once per poll interval. Stop requests are
//! observed immediately while idle, while a fetch is outstanding and while
//! an alert is being delivered. The diff itself always runs to completion.

use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::DEFAULT_DELIVERY_TIMEOUT;
use super::format::{AlertMessage, DEFAULT_SUBJECT};
use super::notifier::{AlertChannel, NotifierError};
use super::tracker::{Change, StateTracker, TrackedSet};
use crate::source::SnapshotSource;

/// What a single cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Stop requested before the snapshot arrived
    Interrupted,
    /// Fetch failed; state untouched
    SourceFailed,
    /// Fetch returned no rows; state untouched
    NoRows,
    /// Nothing alert-worthy changed
    Unchanged,
    /// No exception rows; tracked groups dropped
    Cleared { groups: usize },
    /// A group appeared or its count moved
    Alerted { delivered: bool },
}

/// Owns the tracked set and drives it from a snapshot source
pub struct ExceptionChecker<S, N> {
    source: S,
    channel: N,
    tracker: StateTracker,
    tracked: TrackedSet,
    poll_interval: Duration,
    delivery_timeout: Duration,
    subject: String,
    shutdown: CancellationToken,
}

impl<S, N> ExceptionChecker<S, N>
where
    S: SnapshotSource + 'static,
    N: AlertChannel + 'static,
{
    pub fn new(source: S, channel: N, tracker: StateTracker, poll_interval: Duration) -> Self {
        Self {
            source,
            channel,
            tracker,
            tracked: TrackedSet::new(),
            poll_interval,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            subject: DEFAULT_SUBJECT.to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bound on one delivery attempt across every target
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Use an externally owned token to request shutdown
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Fetch and diff without notifying. The tracked set is updated.
    pub async fn observe(&mut self) -> Result<Vec<Change>, crate::source::SourceError> {
        let rows = self.source.fetch().await?;
        let step = self.tracker.step(&self.tracked, Some(&rows));
        self.tracked = step.next;
        Ok(step.changes)
    }

    /// Run one fetch, diff and (if warranted) notify sequence
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return CycleOutcome::Interrupted,
            result = self.source.fetch() => result,
        };

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                if e.is_unavailable() {
                    tracing::error!(error = %e, "Connection failure, skipping cycle");
                } else {
                    tracing::error!(error = %e, "Query error, skipping cycle");
                }
                return CycleOutcome::SourceFailed;
            }
        };

        if rows.is_empty() {
            tracing::debug!("Snapshot returned no rows, keeping tracked state");
            return CycleOutcome::NoRows;
        }

        let step = self.tracker.step(&self.tracked, Some(&rows));
        self.tracked = step.next;

        for change in &step.changes {
            log_change(change);
        }

        if !step.alert {
            return match step.changes.as_slice() {
                [Change::Cleared { groups }] => CycleOutcome::Cleared { groups: *groups },
                _ => {
                    tracing::debug!(tracked = self.tracked.len(), "No change in exception state");
                    CycleOutcome::Unchanged
                }
            };
        }

        // State is already committed; a stop request only drops the send
        let message = AlertMessage::compose(self.subject.as_str(), &self.tracked, Local::now());
        let delivered = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::warn!("Stop requested, abandoning alert delivery");
                false
            }
            result = self.deliver(&message) => match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to send alert");
                    false
                }
            },
        };

        CycleOutcome::Alerted { delivered }
    }

    async fn deliver(&self, message: &AlertMessage) -> Result<(), NotifierError> {
        tokio::time::timeout(self.delivery_timeout, self.channel.notify(message))
            .await
            .map_err(|_| NotifierError::Timeout(self.delivery_timeout))?
    }

    /// Run cycles on the poll interval until shutdown is requested.
    /// Returns the tracked set as it stood at shutdown.
    pub async fn run(mut self) -> TrackedSet {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            marker = %self.tracker.marker(),
            "Exception checker started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.run_cycle().await == CycleOutcome::Interrupted {
                        break;
                    }
                }
            }
        }

        tracing::info!(tracked = self.tracked.len(), "Exception checker stopped");
        self.tracked
    }

    /// Spawn the checker loop
    pub fn start(self) -> CheckerHandle {
        let shutdown = self.shutdown.clone();
        let join = tokio::spawn(self.run());
        CheckerHandle { shutdown, join }
    }
}

fn log_change(change: &Change) {
    match change {
        Change::Added { group_key, count } => {
            tracing::info!(group = %group_key, count, "Exceptions found, tracking group");
        }
        Change::CountChanged {
            group_key,
            from,
            to,
        } => {
            tracing::info!(group = %group_key, from, to, "Exception count changed");
        }
        Change::Cleared { groups } => {
            tracing::info!(groups, "No exceptions reported, clearing tracked state");
        }
    }
}

/// Handle to a running checker
pub struct CheckerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<TrackedSet>,
}

impl CheckerHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request shutdown and wait for the loop to exit
    pub async fn stop(self) -> Result<TrackedSet, tokio::task::JoinError> {
        self.shutdown.cancel();
        self.join.await
    }

    /// Wait for the loop to exit without requesting shutdown
    pub async fn join(self) -> Result<TrackedSet, tokio::task::JoinError> {
        self.join.await
    }
}
