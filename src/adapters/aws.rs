//! AWS EventBridge adapter.
//!
//! Builds one `PutEvents` entry per publish and hands it to an
//! [`EventBridgeClient`]. The client is the seam for the AWS SDK; the
//! built-in [`DryRunClient`](super::DryRunClient) logs entries instead of
//! sending them.

use super::{
    cancellable, Adapter, AdapterError, FailureKind, HealthStatus, HealthTracker, PublishReceipt,
};
use crate::envelope::Envelope;
use crate::target::{AwsTarget, BackendId, TargetDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Entry error codes that will fail the same way on every retry.
const PERMANENT_ERROR_CODES: &[&str] = &[
    "InvalidArgument",
    "MalformedDetail",
    "AccessDeniedException",
    "ResourceNotFoundException",
    "NotAuthorizedForSourceException",
    "NotAuthorizedForDetailTypeException",
];

/// One EventBridge event entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsRequestEntry {
    pub source: String,
    pub detail_type: String,
    pub detail: String,
    pub event_bus_name: String,
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_header: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsInput {
    pub entries: Vec<PutEventsRequestEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsOutput {
    #[serde(default)]
    pub failed_entry_count: u32,
    #[serde(default)]
    pub entries: Vec<PutEventsResultEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsResultEntry {
    pub event_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// The part of an EventBridge SDK client this adapter needs.
#[async_trait]
pub trait EventBridgeClient: Send + Sync {
    async fn put_events(&self, input: PutEventsInput) -> Result<PutEventsOutput, AdapterError>;
}

/// Publishes envelopes to EventBridge buses.
pub struct EventBridgeAdapter {
    client: Arc<dyn EventBridgeClient>,
    health: HealthTracker,
}

impl EventBridgeAdapter {
    pub fn new(client: Arc<dyn EventBridgeClient>) -> Self {
        Self {
            client,
            health: HealthTracker::new(),
        }
    }

    /// Build the entry for one envelope.
    ///
    /// `Detail` wraps the payload with the correlation and trace ids.
    pub fn build_entry(
        envelope: &Envelope,
        target: &AwsTarget,
    ) -> Result<PutEventsRequestEntry, AdapterError> {
        let detail = format!(
            r#"{{"correlation_id":{},"trace_id":{},"payload":{}}}"#,
            serde_json::to_string(envelope.correlation_id())?,
            serde_json::to_string(envelope.trace_id())?,
            envelope.serialized_detail()
        );

        Ok(PutEventsRequestEntry {
            source: target.source_literal.clone(),
            detail_type: target
                .detail_type
                .clone()
                .unwrap_or_else(|| envelope.event_type().to_string()),
            detail,
            event_bus_name: target.event_bus_name.clone(),
            resources: target.resource_arns.clone(),
            time: envelope.timestamp(),
            trace_header: Some(envelope.trace_id().to_string()),
        })
    }

    async fn put(&self, entry: PutEventsRequestEntry) -> Result<PublishReceipt, AdapterError> {
        let output = self
            .client
            .put_events(PutEventsInput {
                entries: vec![entry],
            })
            .await?;

        if output.failed_entry_count > 0 {
            let code = output.entries.iter().find_map(|e| e.error_code.clone());
            return Err(AdapterError::FailedEntries {
                count: output.failed_entry_count,
                code,
            });
        }

        let event_id = output.entries.into_iter().find_map(|e| e.event_id);
        Ok(PublishReceipt::accepted(event_id))
    }
}

#[async_trait]
impl Adapter for EventBridgeAdapter {
    fn backend_id(&self) -> BackendId {
        BackendId::Aws
    }

    async fn publish(
        &self,
        envelope: &Envelope,
        target: &TargetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, AdapterError> {
        let TargetDescriptor::Aws(target) = target else {
            return Err(AdapterError::InvalidTarget(format!(
                "expected an aws descriptor, got {}",
                target.backend()
            )));
        };

        let entry = Self::build_entry(envelope, target)?;
        debug!(
            event_bus = %entry.event_bus_name,
            detail_type = %entry.detail_type,
            correlation_id = %envelope.correlation_id(),
            "Putting event to EventBridge"
        );

        let result = cancellable(cancel, self.put(entry)).await;
        self.health.record(&result);
        result
    }

    fn classify(&self, error: &AdapterError) -> FailureKind {
        match error {
            AdapterError::FailedEntries {
                code: Some(code), ..
            } if PERMANENT_ERROR_CODES.contains(&code.as_str()) => FailureKind::Permanent,
            other => other.default_kind(),
        }
    }

    async fn health(&self) -> HealthStatus {
        self.health.status()
    }

    fn record_failure(&self, _error: &AdapterError) {
        self.health.record_failure();
    }
}
