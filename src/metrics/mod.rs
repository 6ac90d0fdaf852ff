//! Rolling feed metrics
//!
//! Counters derived from store notifications plus two narrow entry
//! points (`record_workflow_started` / `record_workflow_resolved`) the
//! surrounding business layer drives so its verification and automation
//! activity is observable without coupling this module to its
//! semantics. Nothing here is durable; the aggregator reseeds from a
//! store snapshot at boot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Notification, StoreSnapshot};

/// Which workflow family a business-layer call refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Verification,
    Automation,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "totalEvents")]
    pub total_events: u64,
    #[serde(rename = "channelUpdates")]
    pub channel_updates: u64,
    #[serde(rename = "batchUpdates")]
    pub batch_updates: u64,
    #[serde(rename = "balanceUpdates")]
    pub balance_updates: u64,
    #[serde(rename = "lastEventAt", skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(rename = "trackedChannels")]
    pub tracked_channels: usize,
    pub verification: VerificationCounters,
    pub automation: AutomationCounters,
}

/// Verification workflow counters (driven by the business layer)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationCounters {
    pub started: u64,
    pub resolved: u64,
    #[serde(rename = "byOutcome")]
    pub by_outcome: HashMap<String, u64>,
}

/// Automation workflow counters (driven by the business layer)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationCounters {
    pub triggered: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Running mean of completion latency in milliseconds
    #[serde(rename = "meanCompletionMs")]
    pub mean_completion_ms: f64,
}

#[derive(Default)]
struct Counters {
    total_events: u64,
    channel_updates: u64,
    batch_updates: u64,
    balance_updates: u64,
    last_event_at: Option<DateTime<Utc>>,
    tracked_channels: usize,
    verification: VerificationCounters,
    automation: AutomationCounters,
}

/// Stateful aggregator; safe to read concurrently while the single
/// feed writer updates it.
pub struct MetricsAggregator {
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// One-time catch-up from a store snapshot at boot. Counts are set
    /// to the snapshot's sizes, not replayed from history.
    pub fn seed(&self, snapshot: &StoreSnapshot) {
        let mut counters = self.counters.lock();
        counters.channel_updates = snapshot.channels.len() as u64;
        counters.batch_updates = snapshot.batches.len() as u64;
        counters.balance_updates = snapshot.balances.len() as u64;
        counters.total_events = counters.channel_updates
            + counters.batch_updates
            + counters.balance_updates;
        counters.tracked_channels = snapshot.channels.len();
        debug!(total = counters.total_events, "metrics seeded from snapshot");
    }

    /// Update counters from one store notification
    pub fn observe(&self, notification: &Notification) {
        let mut counters = self.counters.lock();
        counters.total_events += 1;
        match notification {
            Notification::Single { .. } => counters.channel_updates += 1,
            Notification::Batch { .. } => counters.batch_updates += 1,
            Notification::Aggregate { .. } => counters.balance_updates += 1,
        }
        counters.last_event_at = Some(notification.occurred_at());
        counters.tracked_channels = notification.snapshot().channels.len();
    }

    /// Business layer hook: a workflow began
    pub fn record_workflow_started(&self, kind: WorkflowKind) {
        let mut counters = self.counters.lock();
        match kind {
            WorkflowKind::Verification => counters.verification.started += 1,
            WorkflowKind::Automation => {
                counters.automation.triggered += 1;
                counters.automation.pending += 1;
            }
        }
    }

    /// Business layer hook: a workflow finished with `outcome`
    /// (`completed` / `failed` / `skipped` for automation, free-form for
    /// verification) after `latency_ms`.
    pub fn record_workflow_resolved(&self, kind: WorkflowKind, outcome: &str, latency_ms: f64) {
        let mut counters = self.counters.lock();
        match kind {
            WorkflowKind::Verification => {
                counters.verification.resolved += 1;
                *counters
                    .verification
                    .by_outcome
                    .entry(outcome.to_string())
                    .or_insert(0) += 1;
            }
            WorkflowKind::Automation => {
                counters.automation.pending = counters.automation.pending.saturating_sub(1);
                match outcome {
                    "failed" => counters.automation.failed += 1,
                    "skipped" => counters.automation.skipped += 1,
                    _ => {
                        counters.automation.completed += 1;
                        let n = counters.automation.completed as f64;
                        let mean = counters.automation.mean_completion_ms;
                        counters.automation.mean_completion_ms = mean + (latency_ms - mean) / n;
                    }
                }
            }
        }
    }

    /// Pure read of the current counters with a fresh generation stamp
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        MetricsSnapshot {
            started_at: self.started_at,
            generated_at: Utc::now(),
            total_events: counters.total_events,
            channel_updates: counters.channel_updates,
            batch_updates: counters.batch_updates,
            balance_updates: counters.balance_updates,
            last_event_at: counters.last_event_at,
            tracked_channels: counters.tracked_channels,
            verification: counters.verification.clone(),
            automation: counters.automation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventRecord;
    use serde_json::json;

    fn snapshot_with_channels(n: usize) -> StoreSnapshot {
        let channels = (0..n)
            .map(|i| EventRecord::single(json!({"channelId": format!("chan-{}", i)}), Utc::now()))
            .collect();
        StoreSnapshot {
            channels,
            batches: vec![],
            balances: vec![],
        }
    }

    #[test]
    fn test_seed_sets_counts_to_snapshot_sizes() {
        let metrics = MetricsAggregator::new();
        metrics.seed(&snapshot_with_channels(4));

        let snap = metrics.snapshot();
        assert_eq!(snap.channel_updates, 4);
        assert_eq!(snap.total_events, 4);
        assert_eq!(snap.tracked_channels, 4);
    }

    #[test]
    fn test_observe_increments_per_kind() {
        let metrics = MetricsAggregator::new();
        let at = Utc::now();
        metrics.observe(&Notification::Single {
            partition_key: "chan-1".to_string(),
            occurred_at: at,
            snapshot: snapshot_with_channels(1),
        });
        metrics.observe(&Notification::Aggregate {
            count: 2,
            occurred_at: at,
            snapshot: snapshot_with_channels(1),
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.total_events, 2);
        assert_eq!(snap.channel_updates, 1);
        assert_eq!(snap.balance_updates, 1);
        assert_eq!(snap.last_event_at, Some(at));
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let metrics = MetricsAggregator::new();
        metrics.observe(&Notification::Batch {
            count: 1,
            occurred_at: Utc::now(),
            snapshot: StoreSnapshot::default(),
        });
        let a = metrics.snapshot();
        let b = metrics.snapshot();
        assert_eq!(a.total_events, b.total_events);
        assert_eq!(a.batch_updates, b.batch_updates);
    }

    #[test]
    fn test_verification_outcomes() {
        let metrics = MetricsAggregator::new();
        metrics.record_workflow_started(WorkflowKind::Verification);
        metrics.record_workflow_resolved(WorkflowKind::Verification, "valid", 0.0);
        metrics.record_workflow_resolved(WorkflowKind::Verification, "invalid", 0.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.verification.started, 1);
        assert_eq!(snap.verification.resolved, 2);
        assert_eq!(snap.verification.by_outcome["valid"], 1);
        assert_eq!(snap.verification.by_outcome["invalid"], 1);
    }

    #[test]
    fn test_automation_running_mean() {
        let metrics = MetricsAggregator::new();
        for latency in [100.0, 200.0, 300.0] {
            metrics.record_workflow_started(WorkflowKind::Automation);
            metrics.record_workflow_resolved(WorkflowKind::Automation, "completed", latency);
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.automation.triggered, 3);
        assert_eq!(snap.automation.completed, 3);
        assert_eq!(snap.automation.pending, 0);
        assert!((snap.automation.mean_completion_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_automation_failed_and_skipped() {
        let metrics = MetricsAggregator::new();
        metrics.record_workflow_started(WorkflowKind::Automation);
        metrics.record_workflow_started(WorkflowKind::Automation);
        metrics.record_workflow_resolved(WorkflowKind::Automation, "failed", 50.0);
        metrics.record_workflow_resolved(WorkflowKind::Automation, "skipped", 0.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.automation.failed, 1);
        assert_eq!(snap.automation.skipped, 1);
        assert_eq!(snap.automation.completed, 0);
        assert_eq!(snap.automation.pending, 0);
    }
}
