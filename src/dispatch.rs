//! Dispatch Engine - concurrent publish with retry, timeout and cancellation.
//!
//! One task per selected target, bounded by a shared semaphore. Each task
//! runs its own attempts sequentially and reports a single [`TargetResult`]
//! over a channel; aggregation happens in the caller's task.
//!
//! ```text
//!  pending ──permit──▶ in_flight ──ok──────────────────────▶ ok
//!                         │
//!                         ├─ transient, attempts left ─▶ backoff ─▶ in_flight
//!                         │                                  └─ cancel ─▶ failed
//!                         ├─ transient, none left ─────▶ failed
//!                         └─ permanent / panic ────────▶ failed
//! ```

use crate::adapters::{AdapterError, FailureKind};
use crate::envelope::Envelope;
use crate::event::Strategy;
use crate::outcome::{DispatchOutcome, SkipReason, TargetError, TargetResult};
use crate::selector::{SelectedTarget, Selection};
use crate::table::{RetryPolicy, RouteEntry};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default bound on concurrently running publish tasks
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Runs publish tasks for selected targets.
///
/// Shared by every `route` call on a router; the semaphore bounds in-flight
/// publishes across all of them.
#[derive(Debug, Clone)]
pub struct DispatchEngine {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl DispatchEngine {
    /// A zero bound is raised to one.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Free task slots right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Publish `envelope` to every target in `selection` and collect the
    /// outcome. Adapter errors never escape; they become per-target results.
    ///
    /// For `primary_only` with `failover_enabled`, a failed primary is
    /// followed by the standbys one at a time until one succeeds.
    pub async fn dispatch(
        &self,
        envelope: Arc<Envelope>,
        selection: Selection,
        route: &RouteEntry,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let policy = route.retry_policy;
        let worst_case = (policy.attempt_timeout() + policy.max_delay()) * policy.max_attempts();
        debug!(
            targets = selection.targets.len(),
            standby = selection.standby.len(),
            max_attempts = policy.max_attempts(),
            worst_case_ms = worst_case.as_millis() as u64,
            "Dispatching"
        );

        let mut per_target = selection.skipped;
        let mut results = self
            .run_all(&envelope, selection.targets, policy, cancel)
            .await;

        let failover = selection.strategy == Strategy::PrimaryOnly
            && envelope.routing_info().failover_enabled;
        let mut standby = selection.standby.into_iter();

        if failover {
            while !results.iter().any(TargetResult::is_ok) && !cancel.is_cancelled() {
                let Some(next) = standby.next() else { break };
                warn!(
                    backend = %next.backend_id,
                    "Primary target failed, failing over to standby"
                );
                let mut attempt = self.run_all(&envelope, vec![next], policy, cancel).await;
                results.append(&mut attempt);
            }
        }

        per_target.extend(standby.map(|s| TargetResult::skipped(s.backend_id, s.label, SkipReason::Strategy)));
        per_target.append(&mut results);

        DispatchOutcome::dispatched(
            envelope.event_type(),
            envelope.correlation_id(),
            envelope.trace_id(),
            per_target,
            &route.required,
        )
    }

    async fn run_all(
        &self,
        envelope: &Arc<Envelope>,
        targets: Vec<SelectedTarget>,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Vec<TargetResult> {
        let total = targets.len();
        if total == 0 {
            return Vec::new();
        }

        // Cancelled when this call is dropped, so no task outlives its caller.
        let scope = cancel.child_token();
        let _guard = scope.clone().drop_guard();

        let (tx, mut rx) = mpsc::channel(total);
        let mut slots: Vec<Option<TargetResult>> = vec![None; total];
        let mut labels = Vec::with_capacity(total);

        for (index, selected) in targets.into_iter().enumerate() {
            labels.push((selected.backend_id, selected.label.clone()));

            let permit = tokio::select! {
                biased;
                _ = scope.cancelled() => None,
                permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                slots[index] = Some(TargetResult::failed(
                    selected.backend_id,
                    selected.label,
                    0,
                    TargetError::Cancelled,
                ));
                continue;
            };

            let tx = tx.clone();
            let envelope = Arc::clone(envelope);
            let cancel = scope.clone();
            let span = info_span!("target", backend = %selected.backend_id, target = %selected.label);

            tokio::spawn(
                async move {
                    let result = {
                        let _permit = permit;
                        run_target(&envelope, &selected, policy, &cancel).await
                    };
                    let _ = tx.send((index, result)).await;
                }
                .instrument(span),
            );
        }
        drop(tx);

        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .zip(labels)
            .map(|(slot, (backend, label))| {
                slot.unwrap_or_else(|| {
                    error!(backend = %backend, "Dispatch task ended without a result");
                    TargetResult::failed(
                        backend,
                        label,
                        0,
                        TargetError::InternalError("dispatch task ended without a result".into()),
                    )
                })
            })
            .collect()
    }
}

/// What one attempt came to.
enum Attempt {
    Published(Option<String>),
    Retryable(String),
    Terminal(TargetError),
}

async fn run_target(
    envelope: &Envelope,
    selected: &SelectedTarget,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> TargetResult {
    let max_attempts = policy.max_attempts();
    let mut delay = policy.initial_delay();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match attempt(envelope, selected, policy, cancel).await {
            Attempt::Published(message_id) => {
                info!(attempts, message_id = ?message_id, status = "ok", "Published");
                return TargetResult::ok(selected.backend_id, selected.label.clone(), attempts);
            }
            Attempt::Terminal(error) => {
                warn!(attempts, status = "failed", error = %error, "Publish failed");
                return TargetResult::failed(selected.backend_id, selected.label.clone(), attempts, error);
            }
            Attempt::Retryable(message) => {
                let wait = match delay {
                    Some(wait) if attempts < max_attempts => wait,
                    _ => {
                        warn!(attempts, status = "failed", error = %message, "Retries exhausted");
                        return TargetResult::failed(
                            selected.backend_id,
                            selected.label.clone(),
                            attempts,
                            TargetError::Transient(message),
                        );
                    }
                };

                debug!(attempt = attempts, delay_ms = wait.as_millis() as u64, error = %message, "Backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        warn!(attempts, status = "failed", "Cancelled during backoff");
                        return TargetResult::failed(
                            selected.backend_id,
                            selected.label.clone(),
                            attempts,
                            TargetError::Cancelled,
                        );
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                delay = Some(policy.next_delay(wait));
            }
        }
    }
}

/// One adapter call under the attempt timeout, with panics caught.
async fn attempt(
    envelope: &Envelope,
    selected: &SelectedTarget,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Attempt {
    let timeout = policy.attempt_timeout();
    let call = AssertUnwindSafe(selected.adapter.publish(envelope, &selected.target.descriptor, cancel))
        .catch_unwind();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Attempt::Terminal(TargetError::Cancelled),
        result = tokio::time::timeout(timeout, call) => result,
    };

    match result {
        Err(_) => {
            let error = AdapterError::Timeout(timeout.as_millis() as u64);
            selected.adapter.record_failure(&error);
            Attempt::Retryable(error.to_string())
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Adapter panicked");
            selected.adapter.record_failure(&AdapterError::Failed(message.clone()));
            Attempt::Terminal(TargetError::InternalError(message))
        }
        Ok(Ok(Ok(receipt))) => Attempt::Published(receipt.message_id),
        Ok(Ok(Err(AdapterError::Cancelled))) if cancel.is_cancelled() => {
            Attempt::Terminal(TargetError::Cancelled)
        }
        Ok(Ok(Err(error))) => match selected.adapter.classify(&error) {
            FailureKind::Transient => Attempt::Retryable(error.to_string()),
            FailureKind::Permanent => Attempt::Terminal(TargetError::Permanent(error.to_string())),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "adapter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::{StubAdapter, Step};
    use crate::adapters::gcp::{PubSubClient, PublishRequest, PublishResponse};
    use crate::adapters::{Adapter, HealthStatus, HealthTracker, PubSubAdapter};
    use crate::envelope::EnvelopeBuilder;
    use crate::event::Event;
    use crate::outcome::{Overall, TargetStatus};
    use crate::table::RouteTarget;
    use crate::target::{AwsTarget, AzureTarget, BackendId, GcpTarget, TargetDescriptor};
    use serde_json::json;
    use std::time::Duration;

    fn descriptor(backend: BackendId) -> TargetDescriptor {
        match backend {
            BackendId::Aws => TargetDescriptor::Aws(AwsTarget {
                event_bus_name: "bus".into(),
                detail_type: None,
                source_literal: "src".into(),
                resource_arns: vec![],
            }),
            BackendId::Gcp => TargetDescriptor::Gcp(GcpTarget {
                topic_name: Some("topic".into()),
                attributes: Default::default(),
            }),
            BackendId::Azure => TargetDescriptor::Azure(AzureTarget {
                topic_endpoint: Some("https://endpoint".into()),
                subject: None,
                event_type_literal: None,
            }),
        }
    }

    fn selected<A: Adapter + 'static>(adapter: Arc<A>) -> SelectedTarget {
        let backend = adapter.backend_id();
        SelectedTarget {
            backend_id: backend,
            label: backend.to_string(),
            target: RouteTarget {
                priority: 1,
                descriptor: descriptor(backend),
            },
            adapter,
        }
    }

    fn selection(strategy: Strategy, targets: Vec<SelectedTarget>) -> Selection {
        Selection {
            strategy,
            targets,
            standby: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn envelope(event: Event) -> Arc<Envelope> {
        Arc::new(EnvelopeBuilder::new("go-coffee", "aws").build(event).unwrap())
    }

    fn event() -> Event {
        Event::new("coffee.order.created", "test", json!({})).with_correlation_id("c1")
    }

    fn fixed(max_attempts: u32, delay_ms: u64) -> RetryPolicy {
        RetryPolicy::Fixed {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn route(policy: RetryPolicy) -> RouteEntry {
        RouteEntry::new(1)
            .with_target(descriptor(BackendId::Aws))
            .with_retry_policy(policy)
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let stub = Arc::new(StubAdapter::scripted(BackendId::Aws, [Step::Transient, Step::Transient]));
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(3, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.overall, Overall::Success);
        assert_eq!(outcome.per_target[0].attempts, 3);
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_respected() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Transient));
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(4, 1)),
                &CancellationToken::new(),
            )
            .await;

        let result = &outcome.per_target[0];
        assert_eq!(result.status, TargetStatus::Failed);
        assert_eq!(result.attempts, 4);
        assert!(matches!(result.error, Some(TargetError::Transient(_))));
        assert_eq!(stub.calls(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Permanent));
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(5, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.per_target[0].attempts, 1);
        assert!(matches!(outcome.per_target[0].error, Some(TargetError::Permanent(_))));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_never_sleeps() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Transient));
        let started = std::time::Instant::now();
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(1, 10_000)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.per_target[0].attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Panic));
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(3, 1)),
                &CancellationToken::new(),
            )
            .await;

        let result = &outcome.per_target[0];
        assert_eq!(result.status, TargetStatus::Failed);
        assert_eq!(
            result.error,
            Some(TargetError::InternalError("stub adapter panicked".into()))
        );
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Hang));
        let policy = RetryPolicy::Fixed {
            max_attempts: 2,
            delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(20),
        };
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(policy),
                &CancellationToken::new(),
            )
            .await;

        let result = &outcome.per_target[0];
        assert_eq!(result.attempts, 2);
        match &result.error {
            Some(TargetError::Transient(message)) => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_adapter_failures_are_isolated() {
        let aws = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Permanent));
        let azure = Arc::new(StubAdapter::failing(BackendId::Azure, Step::Panic));
        let gcp = Arc::new(StubAdapter::ok(BackendId::Gcp));

        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(
                    Strategy::Broadcast,
                    vec![selected(aws), selected(azure), selected(gcp)],
                ),
                &route(fixed(2, 1)),
                &CancellationToken::new(),
            )
            .await;

        let statuses: Vec<_> = outcome.per_target.iter().map(|r| (r.backend_id, r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (BackendId::Aws, TargetStatus::Failed),
                (BackendId::Azure, TargetStatus::Failed),
                (BackendId::Gcp, TargetStatus::Ok),
            ]
        );
        assert_eq!(outcome.overall, Overall::Success);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let shared = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Delay(Duration::from_millis(30))));
        let targets: Vec<_> = (0..4).map(|_| selected(shared.clone())).collect();

        let engine = DispatchEngine::new(1);
        let outcome = engine
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, targets),
                &route(fixed(1, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.count(TargetStatus::Ok), 4);
        assert_eq!(shared.max_in_flight(), 1);
        assert_eq!(engine.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_parallel_dispatch_up_to_bound() {
        let shared = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Delay(Duration::from_millis(100))));
        let targets: Vec<_> = (0..3).map(|_| selected(shared.clone())).collect();

        DispatchEngine::new(3)
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, targets),
                &route(fixed(1, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(shared.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let stub = Arc::new(StubAdapter::ok(BackendId::Aws));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(1, 1)),
                &cancel,
            )
            .await;

        assert_eq!(outcome.per_target[0].error, Some(TargetError::Cancelled));
        assert_eq!(outcome.per_target[0].attempts, 0);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reaches_running_publish() {
        let stub = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Hang));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event()),
                selection(Strategy::Broadcast, vec![selected(stub.clone())]),
                &route(fixed(3, 1)),
                &cancel,
            )
            .await;

        let result = &outcome.per_target[0];
        assert_eq!(result.status, TargetStatus::Failed);
        assert_eq!(result.error, Some(TargetError::Cancelled));
        assert_eq!(result.attempts, 1);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let running = Arc::new(StubAdapter::failing(BackendId::Aws, Step::Hang));
        let queued = Arc::new(StubAdapter::ok(BackendId::Gcp));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let engine = DispatchEngine::new(1);
        let outcome = engine
            .dispatch(
                envelope(event()),
                selection(
                    Strategy::Broadcast,
                    vec![selected(running.clone()), selected(queued.clone())],
                ),
                &route(fixed(1, 1)),
                &cancel,
            )
            .await;

        let first = outcome.target(BackendId::Aws).unwrap();
        assert_eq!(first.error, Some(TargetError::Cancelled));
        assert_eq!(first.attempts, 1);

        let second = outcome.target(BackendId::Gcp).unwrap();
        assert_eq!(second.error, Some(TargetError::Cancelled));
        assert_eq!(second.attempts, 0);
        assert_eq!(queued.calls(), 0);
        assert_eq!(outcome.overall, Overall::Failure);
        assert_eq!(engine.available_permits(), 1);
    }

    struct HangingPubSub;

    #[async_trait::async_trait]
    impl PubSubClient for HangingPubSub {
        async fn publish(&self, _topic: &str, _request: PublishRequest) -> Result<PublishResponse, AdapterError> {
            std::future::pending().await
        }
    }

    struct PanickingPubSub;

    #[async_trait::async_trait]
    impl PubSubClient for PanickingPubSub {
        async fn publish(&self, _topic: &str, _request: PublishRequest) -> Result<PublishResponse, AdapterError> {
            panic!("client blew up")
        }
    }

    #[tokio::test]
    async fn test_timeouts_count_against_adapter_health() {
        let adapter = Arc::new(PubSubAdapter::new(Arc::new(HangingPubSub), "go-coffee"));
        let policy = RetryPolicy::Fixed {
            max_attempts: 3,
            delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(5),
        };
        let engine = DispatchEngine::default();

        for round in 1..=4 {
            let outcome = engine
                .dispatch(
                    envelope(event()),
                    selection(Strategy::Broadcast, vec![selected(adapter.clone())]),
                    &route(policy),
                    &CancellationToken::new(),
                )
                .await;
            assert_eq!(outcome.per_target[0].attempts, 3);
            if round == 1 {
                assert_eq!(adapter.health().await, HealthStatus::Degraded);
            }
        }
        assert_eq!(adapter.health().await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_panics_count_against_adapter_health() {
        let adapter = Arc::new(PubSubAdapter::new(Arc::new(PanickingPubSub), "go-coffee"));
        let engine = DispatchEngine::default();

        for _ in 0..HealthTracker::DEGRADED_AFTER {
            let outcome = engine
                .dispatch(
                    envelope(event()),
                    selection(Strategy::Broadcast, vec![selected(adapter.clone())]),
                    &route(fixed(1, 1)),
                    &CancellationToken::new(),
                )
                .await;
            assert!(matches!(outcome.per_target[0].error, Some(TargetError::InternalError(_))));
        }
        assert_eq!(adapter.health().await, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_failover_to_standby() {
        let primary = Arc::new(StubAdapter::failing(BackendId::Gcp, Step::Permanent));
        let standby = Arc::new(StubAdapter::ok(BackendId::Azure));
        let last = Arc::new(StubAdapter::ok(BackendId::Aws));

        let selection = Selection {
            strategy: Strategy::PrimaryOnly,
            targets: vec![selected(primary.clone())],
            standby: vec![selected(standby.clone()), selected(last.clone())],
            skipped: Vec::new(),
        };
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event().with_strategy(Strategy::PrimaryOnly).with_failover()),
                selection,
                &route(fixed(1, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.target(BackendId::Gcp).unwrap().status, TargetStatus::Failed);
        assert_eq!(outcome.target(BackendId::Azure).unwrap().status, TargetStatus::Ok);
        assert_eq!(outcome.target(BackendId::Aws).unwrap().status, TargetStatus::Skipped);
        assert_eq!(last.calls(), 0);
        assert_eq!(outcome.overall, Overall::Success);
    }

    #[tokio::test]
    async fn test_no_failover_without_flag() {
        let primary = Arc::new(StubAdapter::failing(BackendId::Gcp, Step::Permanent));
        let standby = Arc::new(StubAdapter::ok(BackendId::Azure));

        let selection = Selection {
            strategy: Strategy::PrimaryOnly,
            targets: vec![selected(primary)],
            standby: vec![selected(standby.clone())],
            skipped: Vec::new(),
        };
        let outcome = DispatchEngine::default()
            .dispatch(
                envelope(event().with_strategy(Strategy::PrimaryOnly)),
                selection,
                &route(fixed(1, 1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(standby.calls(), 0);
        assert_eq!(
            outcome.target(BackendId::Azure).unwrap().skip_reason,
            Some(SkipReason::Strategy)
        );
        assert_eq!(outcome.overall, Overall::Failure);
    }
}
