//! Router counters.
//!
//! Plain atomics, one set per backend, allocated up front so recording
//! never takes a lock. [`RouterMetrics::snapshot`] is what `/metrics` serves.

use crate::outcome::{DispatchOutcome, Overall, TargetStatus};
use crate::target::BackendId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
struct BackendCounters {
    published: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    attempts: AtomicU64,
}

#[derive(Debug)]
pub struct RouterMetrics {
    events_received: AtomicU64,
    success: AtomicU64,
    partial: AtomicU64,
    failure: AtomicU64,
    backends: BTreeMap<BackendId, BackendCounters>,
    start_time: Instant,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            success: AtomicU64::new(0),
            partial: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            backends: BackendId::ALL
                .iter()
                .map(|b| (*b, BackendCounters::default()))
                .collect(),
            start_time: Instant::now(),
        }
    }

    pub fn increment_events(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one finished outcome and each of its targets.
    pub fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome.overall {
            Overall::Success => &self.success,
            Overall::Partial => &self.partial,
            Overall::Failure => &self.failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        for result in &outcome.per_target {
            let Some(counters) = self.backends.get(&result.backend_id) else {
                continue;
            };
            let status = match result.status {
                TargetStatus::Ok => &counters.published,
                TargetStatus::Failed => &counters.failed,
                TargetStatus::Skipped => &counters.skipped,
            };
            status.fetch_add(1, Ordering::Relaxed);
            counters
                .attempts
                .fetch_add(u64::from(result.attempts), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let uptime = self.uptime_seconds();

        MetricsSnapshot {
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: uptime,
            uptime: format_uptime(uptime),
            events: EventCounts {
                received: load(&self.events_received),
                success: load(&self.success),
                partial: load(&self.partial),
                failure: load(&self.failure),
            },
            backends: self
                .backends
                .iter()
                .map(|(backend, c)| {
                    (
                        *backend,
                        BackendCounts {
                            published: load(&c.published),
                            failed: load(&c.failed),
                            skipped: load(&c.skipped),
                            attempts: load(&c.attempts),
                        },
                    )
                })
                .collect(),
        }
    }
}

fn format_uptime(uptime: u64) -> String {
    if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub uptime: String,
    pub events: EventCounts,
    pub backends: BTreeMap<BackendId, BackendCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub received: u64,
    pub success: u64,
    pub partial: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendCounts {
    pub published: u64,
    pub failed: u64,
    pub skipped: u64,
    pub attempts: u64,
}
