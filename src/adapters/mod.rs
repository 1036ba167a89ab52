//! Backend adapters for Skyrelay.
//!
//! An adapter publishes one envelope to one target on a single cloud
//! event bus. The [`Adapter`] trait is the only thing the router knows about
//! a backend; concrete cloud clients sit behind the adapters.
//!
//! ## Built-in Adapters
//!
//! - [`EventBridgeAdapter`]: AWS EventBridge `PutEvents`
//! - [`PubSubAdapter`]: Google Cloud Pub/Sub `publish`
//! - [`EventGridAdapter`]: Azure Event Grid topic delivery
//!
//! ## Contract
//!
//! - `publish` reports failure as an [`AdapterError`]; the adapter's
//!   [`Adapter::classify`] decides whether that failure is transient or
//!   permanent.
//! - Adapters never retry internally. Retry belongs to the dispatch engine.
//! - Adapters return promptly once the cancellation token fires.
//!
//! ```rust,ignore
//! use skyrelay::adapters::{Adapter, AdapterError, PublishReceipt};
//! use async_trait::async_trait;
//!
//! struct MyAdapter;
//!
//! #[async_trait]
//! impl Adapter for MyAdapter {
//!     fn backend_id(&self) -> BackendId { BackendId::Aws }
//!
//!     async fn publish(&self, envelope: &Envelope, target: &TargetDescriptor, cancel: &CancellationToken)
//!         -> Result<PublishReceipt, AdapterError> {
//!         Ok(PublishReceipt::accepted(None))
//!     }
//! }
//! ```

pub mod aws;
pub mod azure;
pub mod dry_run;
pub mod gcp;

#[cfg(test)]
pub(crate) mod stub;

use crate::envelope::Envelope;
use crate::target::{BackendId, TargetDescriptor};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use aws::EventBridgeAdapter;
pub use azure::EventGridAdapter;
pub use dry_run::DryRunClient;
pub use gcp::PubSubAdapter;

/// Errors an adapter can report for a single publish call.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport-level HTTP failure (connect, TLS, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend accepted the call but rejected entries
    #[error("{count} entries failed{}", code_suffix(.code))]
    FailedEntries { count: u32, code: Option<String> },

    /// Descriptor does not fit this backend
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Credentials missing or rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish timed out after {0}ms")]
    Timeout(u64),

    #[error("publish cancelled")]
    Cancelled,

    #[error("publish failed: {0}")]
    Failed(String),
}

impl AdapterError {
    /// Classification that holds for every backend.
    pub fn default_kind(&self) -> FailureKind {
        match self {
            AdapterError::Http(e) => {
                if e.is_builder() || e.is_redirect() {
                    FailureKind::Permanent
                } else {
                    FailureKind::Transient
                }
            }
            AdapterError::Status { status, .. } => classify_status(*status),
            AdapterError::FailedEntries { .. } => FailureKind::Transient,
            AdapterError::InvalidTarget(_)
            | AdapterError::Auth(_)
            | AdapterError::Serialization(_) => FailureKind::Permanent,
            AdapterError::Timeout(_) | AdapterError::Cancelled | AdapterError::Failed(_) => {
                FailureKind::Transient
            }
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default()
}

/// Whether a failed publish is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, 5xx-equivalent, network error
    Transient,
    /// Malformed request, auth failure, target not found
    Permanent,
}

/// HTTP status classification shared by the HTTP-backed clients.
///
/// 408 and 429 are retryable client errors; every other 4xx is permanent.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        408 | 429 => FailureKind::Transient,
        400..=499 => FailureKind::Permanent,
        _ => FailureKind::Transient,
    }
}

/// Successful publish of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Backend-assigned message or event id, when the backend returns one
    pub message_id: Option<String>,
}

impl PublishReceipt {
    pub fn accepted(message_id: Option<String>) -> Self {
        Self { message_id }
    }
}

/// Adapter health as reported to the router's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        })
    }
}

/// The uniform publish capability every backend implements.
///
/// # Thread Safety
///
/// Adapters are shared across dispatch tasks; their clients must be safe
/// for concurrent use.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Backend this adapter publishes to
    fn backend_id(&self) -> BackendId;

    /// Publish one envelope to one target.
    async fn publish(
        &self,
        envelope: &Envelope,
        target: &TargetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, AdapterError>;

    /// Decide whether `error` is transient or permanent.
    fn classify(&self, error: &AdapterError) -> FailureKind {
        error.default_kind()
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Ok
    }

    /// Called by the dispatch engine for failures `publish` never got to
    /// see: attempt timeouts and panics.
    fn record_failure(&self, _error: &AdapterError) {}
}

/// Race `call` against `cancel`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        result = call => result,
    }
}

/// Turn a non-success HTTP response into [`AdapterError::Status`].
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "Backend returned error status");
    Err(AdapterError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Consecutive-failure health tracking for the built-in adapters.
#[derive(Debug, Default)]
pub struct HealthTracker {
    consecutive_failures: AtomicU32,
}

impl HealthTracker {
    pub const DEGRADED_AFTER: u32 = 3;
    pub const DOWN_AFTER: u32 = 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&self, result: &Result<T, AdapterError>) {
        match result {
            Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(AdapterError::Cancelled) => {}
            Err(_) => self.record_failure(),
        }
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        match self.consecutive_failures.load(Ordering::Relaxed) {
            n if n >= Self::DOWN_AFTER => HealthStatus::Down,
            n if n >= Self::DEGRADED_AFTER => HealthStatus::Degraded,
            _ => HealthStatus::Ok,
        }
    }
}

/// An adapter plus the runtime state the router reads on every dispatch.
pub struct RegisteredAdapter {
    adapter: Arc<dyn Adapter>,
    enabled: AtomicBool,
    region: String,
}

impl RegisteredAdapter {
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Registry of adapters keyed by backend id.
///
/// Built at router construction; afterwards only the `enabled` flags change.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<BackendId, RegisteredAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same backend.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>, enabled: bool, region: impl Into<String>) {
        let backend = adapter.backend_id();
        let region = region.into();
        debug!(backend = %backend, enabled, region = %region, "Registering adapter");
        self.adapters.insert(
            backend,
            RegisteredAdapter {
                adapter,
                enabled: AtomicBool::new(enabled),
                region,
            },
        );
    }

    pub fn get(&self, backend: BackendId) -> Option<&RegisteredAdapter> {
        self.adapters.get(&backend)
    }

    pub fn contains(&self, backend: BackendId) -> bool {
        self.adapters.contains_key(&backend)
    }

    pub fn is_enabled(&self, backend: BackendId) -> bool {
        self.get(backend).is_some_and(RegisteredAdapter::is_enabled)
    }

    /// Enable or disable a backend. Returns false if it is not registered.
    pub fn set_enabled(&self, backend: BackendId, enabled: bool) -> bool {
        match self.adapters.get(&backend) {
            Some(registered) => {
                registered.enabled.store(enabled, Ordering::Release);
                info!(backend = %backend, enabled, "Adapter toggled");
                true
            }
            None => false,
        }
    }

    /// Registered backends in id order
    pub fn iter(&self) -> impl Iterator<Item = (BackendId, &RegisteredAdapter)> {
        self.adapters.iter().map(|(b, r)| (*b, r))
    }

    pub fn list(&self) -> Vec<BackendId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubAdapter;
    use super::*;

    #[test]
    fn test_registry() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::ok(BackendId::Aws)), true, "us-east-1");
        registry.register(Arc::new(StubAdapter::ok(BackendId::Gcp)), false, "europe-west1");

        assert!(registry.contains(BackendId::Aws));
        assert!(!registry.contains(BackendId::Azure));
        assert!(registry.is_enabled(BackendId::Aws));
        assert!(!registry.is_enabled(BackendId::Gcp));
        assert!(!registry.is_enabled(BackendId::Azure));
        assert_eq!(registry.list(), vec![BackendId::Aws, BackendId::Gcp]);
        assert_eq!(registry.get(BackendId::Gcp).unwrap().region(), "europe-west1");
    }

    #[test]
    fn test_toggle_is_read_live() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::ok(BackendId::Azure)), false, "westeurope");

        assert!(registry.set_enabled(BackendId::Azure, true));
        assert!(registry.is_enabled(BackendId::Azure));
        assert!(!registry.set_enabled(BackendId::Aws, true));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(400), FailureKind::Permanent);
        assert_eq!(classify_status(401), FailureKind::Permanent);
        assert_eq!(classify_status(404), FailureKind::Permanent);
        assert_eq!(classify_status(408), FailureKind::Transient);
        assert_eq!(classify_status(429), FailureKind::Transient);
        assert_eq!(classify_status(500), FailureKind::Transient);
        assert_eq!(classify_status(503), FailureKind::Transient);
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(
            AdapterError::FailedEntries { count: 1, code: None }.default_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            AdapterError::InvalidTarget("x".into()).default_kind(),
            FailureKind::Permanent
        );
        assert_eq!(AdapterError::Auth("x".into()).default_kind(), FailureKind::Permanent);
        assert_eq!(AdapterError::Timeout(5).default_kind(), FailureKind::Transient);
    }

    #[test]
    fn test_failed_entries_display() {
        let err = AdapterError::FailedEntries {
            count: 2,
            code: Some("InternalFailure".into()),
        };
        assert_eq!(err.to_string(), "2 entries failed (InternalFailure)");
        let err = AdapterError::FailedEntries { count: 1, code: None };
        assert_eq!(err.to_string(), "1 entries failed");
    }

    #[test]
    fn test_health_tracker() {
        let tracker = HealthTracker::new();
        let fail: Result<(), AdapterError> = Err(AdapterError::Failed("boom".into()));
        let ok: Result<(), AdapterError> = Ok(());

        assert_eq!(tracker.status(), HealthStatus::Ok);
        for _ in 0..HealthTracker::DEGRADED_AFTER {
            tracker.record(&fail);
        }
        assert_eq!(tracker.status(), HealthStatus::Degraded);
        for _ in HealthTracker::DEGRADED_AFTER..HealthTracker::DOWN_AFTER {
            tracker.record(&fail);
        }
        assert_eq!(tracker.status(), HealthStatus::Down);

        tracker.record(&Err::<(), _>(AdapterError::Cancelled));
        assert_eq!(tracker.status(), HealthStatus::Down);

        tracker.record(&ok);
        assert_eq!(tracker.status(), HealthStatus::Ok);
    }

    #[tokio::test]
    async fn test_cancellable_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), AdapterError> = cancellable(&cancel, async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Cancelled)));
    }
}
