//! Router - the public entry point of Skyrelay.
//!
//! The [`Router`] takes an [`Event`] and runs it through the pipeline:
//!
//! ```text
//! Event (type: "coffee.order.created")
//!     │
//!     ▼
//! ┌──────────────────────────────────────────────┐
//! │                  ROUTER                      │
//! │                                              │
//! │  1. Envelope: ids, source cloud, payload text│
//! │  2. Table:    exact key, else longest prefix │
//! │  3. Selector: enabled, filtered, strategy    │
//! │  4. Engine:   concurrent publish + retry     │
//! └──────────────────────────────────────────────┘
//!     │
//!     ▼
//! DispatchOutcome { overall, per_target[] }
//! ```
//!
//! `route` never fails: rejected events and dispatch errors come back
//! inside the [`DispatchOutcome`].
//!
//! # Example
//!
//! ```rust,ignore
//! use skyrelay::{Event, Router};
//!
//! let router = Router::new(envelopes, table, registry)?;
//! let outcome = router.route(Event::new("coffee.order.created", "pos", payload)).await;
//! println!("{}", outcome.overall);
//! ```

use crate::adapters::{AdapterRegistry, HealthStatus};
use crate::dispatch::DispatchEngine;
use crate::envelope::{Envelope, EnvelopeBuilder, EnvelopeError};
use crate::event::Event;
use crate::metrics::RouterMetrics;
use crate::outcome::{DispatchOutcome, FailureReason, Overall, TargetStatus};
use crate::selector::select;
use crate::table::{RoutingError, RoutingTable};
use crate::target::BackendId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Errors raised while constructing a router.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid routing table: {0}")]
    Routing(#[from] RoutingError),

    #[error("default source cloud must not be empty")]
    MissingDefaultSourceCloud,
}

/// Health of one registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub enabled: bool,
    pub region: String,
}

/// Aggregate health across registered backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Worst status among enabled backends; `down` when none is enabled
    pub overall: HealthStatus,
    pub per_backend: BTreeMap<BackendId, BackendHealth>,
}

/// Routes events to cloud backends.
///
/// # Thread Safety
///
/// Wrap in `Arc` and call `route` from any number of tasks. The table and
/// registry are read-only after construction; only adapter enable flags
/// change at runtime.
pub struct Router {
    envelopes: EnvelopeBuilder,
    table: RoutingTable,
    registry: AdapterRegistry,
    engine: DispatchEngine,
    metrics: Arc<RouterMetrics>,
}

impl Router {
    /// Build a router, checking that every backend a route targets has an
    /// adapter.
    pub fn new(
        envelopes: EnvelopeBuilder,
        table: RoutingTable,
        registry: AdapterRegistry,
    ) -> Result<Self, RouterError> {
        if envelopes.default_source_cloud().trim().is_empty() {
            return Err(RouterError::MissingDefaultSourceCloud);
        }
        table.validate_backends(&registry)?;

        info!(
            routes = table.len(),
            backends = ?registry.list(),
            default_source_cloud = %envelopes.default_source_cloud(),
            "Router initialised"
        );

        Ok(Self {
            envelopes,
            table,
            registry,
            engine: DispatchEngine::default(),
            metrics: Arc::new(RouterMetrics::new()),
        })
    }

    /// Bound on concurrently running publish tasks.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.engine = DispatchEngine::new(max_concurrency);
        self
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    pub fn max_concurrency(&self) -> usize {
        self.engine.max_concurrency()
    }

    /// Enable or disable a backend; read by every later dispatch.
    pub fn set_backend_enabled(&self, backend: BackendId, enabled: bool) -> bool {
        self.registry.set_enabled(backend, enabled)
    }

    /// Route one event with no external cancellation.
    pub async fn route(&self, event: Event) -> DispatchOutcome {
        self.route_with_cancel(event, &CancellationToken::new()).await
    }

    /// Route one event. Cancelling `cancel` stops in-flight publishes and
    /// pending backoffs; unfinished targets are reported as cancelled.
    pub async fn route_with_cancel(&self, event: Event, cancel: &CancellationToken) -> DispatchOutcome {
        self.metrics.increment_events();
        let event_type = event.event_type.clone();

        let envelope = match self.envelopes.build(event) {
            Ok(envelope) => Arc::new(envelope),
            Err(err) => {
                let reason = match err {
                    EnvelopeError::InvalidEvent(_) => FailureReason::InvalidEvent,
                    EnvelopeError::InvalidPayload(_) => FailureReason::InvalidPayload,
                };
                warn!(event_type = %event_type, reason = %reason, error = %err, "Event rejected");
                let outcome = DispatchOutcome::rejected(event_type, reason, err.to_string());
                self.metrics.record(&outcome);
                return outcome;
            }
        };

        let span = info_span!(
            "route",
            correlation_id = %envelope.correlation_id(),
            trace_id = %envelope.trace_id(),
            event_type = %envelope.event_type(),
        );
        self.dispatch_envelope(envelope, cancel).instrument(span).await
    }

    async fn dispatch_envelope(&self, envelope: Arc<Envelope>, cancel: &CancellationToken) -> DispatchOutcome {
        let outcome = match self.table.lookup(envelope.event_type()) {
            Err(err) => {
                warn!(error = %err, "No route for event");
                DispatchOutcome::rejected(envelope.event_type(), FailureReason::NoRoute, err.to_string())
                    .with_ids(envelope.correlation_id(), envelope.trace_id())
            }
            Ok(route) => {
                let selection = select(&envelope, route, &self.registry);
                for skipped in &selection.skipped {
                    debug!(
                        backend = %skipped.backend_id,
                        reason = ?skipped.skip_reason,
                        "Target skipped"
                    );
                }

                if selection.is_empty() {
                    warn!(
                        source_cloud = %envelope.source_cloud(),
                        skipped = selection.skipped.len(),
                        "No targets left after selection"
                    );
                    DispatchOutcome::rejected(
                        envelope.event_type(),
                        FailureReason::NoTargets,
                        "no enabled target remains after filtering",
                    )
                    .with_ids(envelope.correlation_id(), envelope.trace_id())
                    .with_targets(selection.skipped)
                } else {
                    debug!(
                        strategy = %selection.strategy,
                        targets = ?selection.backends(),
                        "Targets selected"
                    );
                    self.engine
                        .dispatch(Arc::clone(&envelope), selection, route, cancel)
                        .await
                }
            }
        };

        log_outcome(&outcome);
        self.metrics.record(&outcome);
        outcome
    }

    /// Query every registered adapter.
    pub async fn health(&self) -> HealthReport {
        let mut per_backend = BTreeMap::new();
        let mut overall: Option<HealthStatus> = None;

        for (backend, registered) in self.registry.iter() {
            let status = registered.adapter().health().await;
            let enabled = registered.is_enabled();
            if enabled {
                overall = Some(overall.map_or(status, |worst| worst.max(status)));
            }
            per_backend.insert(
                backend,
                BackendHealth {
                    status,
                    enabled,
                    region: registered.region().to_string(),
                },
            );
        }

        HealthReport {
            overall: overall.unwrap_or(HealthStatus::Down),
            per_backend,
        }
    }
}

fn log_outcome(outcome: &DispatchOutcome) {
    let ok = outcome.count(TargetStatus::Ok);
    let failed = outcome.count(TargetStatus::Failed);
    let skipped = outcome.count(TargetStatus::Skipped);

    match outcome.overall {
        Overall::Success => info!(
            overall = %outcome.overall,
            ok, failed, skipped,
            "Event routed"
        ),
        _ => warn!(
            overall = %outcome.overall,
            reason = ?outcome.reason,
            ok, failed, skipped,
            "Event routed with failures"
        ),
    }
}
