//! Dispatch outcomes.
//!
//! A [`DispatchOutcome`] is the only thing `route` ever returns. Per-target
//! errors live inside it as values; [`rollup`] is the single place the
//! overall verdict is computed.

use crate::target::BackendId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Terminal state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Ok,
    Failed,
    Skipped,
}

/// Why a target failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TargetError {
    /// Retryable failure; the last one seen once attempts ran out
    Transient(String),
    Permanent(String),
    Cancelled,
    /// The adapter panicked or its task died
    InternalError(String),
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::Transient(m) => write!(f, "transient: {}", m),
            TargetError::Permanent(m) => write!(f, "permanent: {}", m),
            TargetError::Cancelled => f.write_str("cancelled"),
            TargetError::InternalError(m) => write!(f, "internal_error: {}", m),
        }
    }
}

/// Why the selector left a target out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Adapter registered but switched off
    Disabled,
    /// Backend is the event's source cloud
    SourceCloud,
    /// Not in the event's `target_clouds`
    NotRequested,
    /// Dropped by `load_balance` or held back by `primary_only`
    Strategy,
}

/// Result for one target of a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetResult {
    pub backend_id: BackendId,
    pub target: String,
    pub status: TargetStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TargetError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl TargetResult {
    pub fn ok(backend_id: BackendId, target: impl Into<String>, attempts: u32) -> Self {
        Self {
            backend_id,
            target: target.into(),
            status: TargetStatus::Ok,
            attempts,
            error: None,
            skip_reason: None,
        }
    }

    pub fn failed(
        backend_id: BackendId,
        target: impl Into<String>,
        attempts: u32,
        error: TargetError,
    ) -> Self {
        Self {
            backend_id,
            target: target.into(),
            status: TargetStatus::Failed,
            attempts,
            error: Some(error),
            skip_reason: None,
        }
    }

    pub fn skipped(backend_id: BackendId, target: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            backend_id,
            target: target.into(),
            status: TargetStatus::Skipped,
            attempts: 0,
            error: None,
            skip_reason: Some(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TargetStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    Success,
    Partial,
    Failure,
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Overall::Success => "success",
            Overall::Partial => "partial",
            Overall::Failure => "failure",
        })
    }
}

/// Why an event failed before any target was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidEvent,
    InvalidPayload,
    NoRoute,
    NoTargets,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::InvalidEvent => "invalid_event",
            FailureReason::InvalidPayload => "invalid_payload",
            FailureReason::NoRoute => "no_route",
            FailureReason::NoTargets => "no_targets",
        })
    }
}

/// Aggregate verdict for a set of per-target results.
///
/// - `success`: at least one target ok and every required backend ok.
/// - `failure`: nothing ok, or a required backend was dispatched and failed.
/// - `partial`: at least one ok while a required backend never ran
///   (skipped or absent).
pub fn rollup(per_target: &[TargetResult], required: &BTreeSet<BackendId>) -> Overall {
    if !per_target.iter().any(TargetResult::is_ok) {
        return Overall::Failure;
    }

    let status_of = |backend: &BackendId| {
        per_target
            .iter()
            .find(|r| r.backend_id == *backend)
            .map(|r| r.status)
    };

    let mut all_required_ok = true;
    for backend in required {
        match status_of(backend) {
            Some(TargetStatus::Ok) => {}
            Some(TargetStatus::Failed) => return Overall::Failure,
            Some(TargetStatus::Skipped) | None => all_required_ok = false,
        }
    }

    if all_required_ok {
        Overall::Success
    } else {
        Overall::Partial
    }
}

/// Everything a caller learns about one routed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub overall: Overall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Human-readable detail for `reason`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub per_target: Vec<TargetResult>,
}

impl DispatchOutcome {
    /// Outcome of a completed dispatch; `overall` comes from [`rollup`].
    pub fn dispatched(
        event_type: impl Into<String>,
        correlation_id: impl Into<String>,
        trace_id: impl Into<String>,
        mut per_target: Vec<TargetResult>,
        required: &BTreeSet<BackendId>,
    ) -> Self {
        per_target.sort_by_key(|r| r.backend_id);
        let overall = rollup(&per_target, required);
        Self {
            event_type: event_type.into(),
            correlation_id: Some(correlation_id.into()),
            trace_id: Some(trace_id.into()),
            overall,
            reason: None,
            message: None,
            per_target,
        }
    }

    /// Outcome for an event rejected before dispatch.
    pub fn rejected(
        event_type: impl Into<String>,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            correlation_id: None,
            trace_id: None,
            overall: Overall::Failure,
            reason: Some(reason),
            message: Some(message.into()),
            per_target: Vec::new(),
        }
    }

    /// Attach identifiers to a rejection that happened after the envelope
    /// was built.
    pub fn with_ids(mut self, correlation_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Attach the selector's skipped targets to a rejection.
    pub fn with_targets(mut self, mut per_target: Vec<TargetResult>) -> Self {
        per_target.sort_by_key(|r| r.backend_id);
        self.per_target = per_target;
        self
    }

    pub fn is_success(&self) -> bool {
        self.overall == Overall::Success
    }

    pub fn count(&self, status: TargetStatus) -> usize {
        self.per_target.iter().filter(|r| r.status == status).count()
    }

    pub fn target(&self, backend: BackendId) -> Option<&TargetResult> {
        self.per_target.iter().find(|r| r.backend_id == backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(backends: &[BackendId]) -> BTreeSet<BackendId> {
        backends.iter().copied().collect()
    }

    #[test]
    fn test_rollup_success_needs_required_ok() {
        let results = vec![
            TargetResult::ok(BackendId::Aws, "bus", 1),
            TargetResult::failed(BackendId::Gcp, "topic", 3, TargetError::Transient("503".into())),
        ];

        assert_eq!(rollup(&results, &required(&[])), Overall::Success);
        assert_eq!(rollup(&results, &required(&[BackendId::Aws])), Overall::Success);
        assert_eq!(rollup(&results, &required(&[BackendId::Gcp])), Overall::Failure);
    }

    #[test]
    fn test_rollup_failure_without_any_ok() {
        let results = vec![
            TargetResult::failed(BackendId::Aws, "bus", 1, TargetError::Permanent("400".into())),
            TargetResult::skipped(BackendId::Gcp, "topic", SkipReason::Disabled),
        ];
        assert_eq!(rollup(&results, &required(&[])), Overall::Failure);
        assert_eq!(rollup(&[], &required(&[])), Overall::Failure);
    }

    #[test]
    fn test_required_backend_skipped_is_partial() {
        let results = vec![
            TargetResult::ok(BackendId::Aws, "bus", 1),
            TargetResult::skipped(BackendId::Azure, "endpoint", SkipReason::Strategy),
        ];
        assert_eq!(rollup(&results, &required(&[BackendId::Azure])), Overall::Partial);
    }

    #[test]
    fn test_dispatched_orders_by_backend() {
        let outcome = DispatchOutcome::dispatched(
            "coffee.order.created",
            "c1",
            "t1",
            vec![
                TargetResult::ok(BackendId::Gcp, "topic", 1),
                TargetResult::ok(BackendId::Aws, "bus", 1),
            ],
            &BTreeSet::new(),
        );
        let order: Vec<_> = outcome.per_target.iter().map(|r| r.backend_id).collect();
        assert_eq!(order, vec![BackendId::Aws, BackendId::Gcp]);
        assert_eq!(outcome.count(TargetStatus::Ok), 2);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = DispatchOutcome::dispatched(
            "coffee.order.created",
            "c1",
            "t1",
            vec![TargetResult::failed(BackendId::Aws, "bus", 2, TargetError::Cancelled)],
            &BTreeSet::new(),
        );
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["overall"], "failure");
        assert_eq!(value["per_target"][0]["backend_id"], "aws");
        assert_eq!(value["per_target"][0]["status"], "failed");
        assert_eq!(value["per_target"][0]["error"]["kind"], "cancelled");
        assert!(value.get("reason").is_none());

        let rejected = DispatchOutcome::rejected("unknown.event", FailureReason::NoRoute, "no route");
        let value = serde_json::to_value(&rejected).unwrap();
        assert_eq!(value["reason"], "no_route");
        assert_eq!(value["per_target"], serde_json::json!([]));
    }
}
