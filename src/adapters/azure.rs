//! Azure Event Grid adapter.
//!
//! Sends one Event Grid schema event per envelope to a custom topic
//! endpoint, authenticated with the topic's access key.

use super::{
    cancellable, check_response, Adapter, AdapterError, HealthStatus, HealthTracker,
    PublishReceipt,
};
use crate::envelope::Envelope;
use crate::target::{derived_topic_name, AzureTarget, BackendId, TargetDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Data schema version stamped on every event
const DATA_VERSION: &str = "1.0";

/// One event in the Event Grid schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    pub id: String,
    pub event_type: String,
    pub subject: String,
    pub event_time: DateTime<Utc>,
    pub data: Value,
    pub data_version: String,
}

/// The part of an Event Grid publisher client this adapter needs.
#[async_trait]
pub trait EventGridClient: Send + Sync {
    async fn send(&self, endpoint: &str, events: Vec<EventGridEvent>) -> Result<(), AdapterError>;
}

/// Event Grid over HTTPS with an `aeg-sas-key` header.
#[derive(Debug, Clone)]
pub struct HttpEventGridClient {
    http: Client,
    access_key: String,
}

impl HttpEventGridClient {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            access_key: access_key.into(),
        }
    }
}

#[async_trait]
impl EventGridClient for HttpEventGridClient {
    async fn send(&self, endpoint: &str, events: Vec<EventGridEvent>) -> Result<(), AdapterError> {
        if self.access_key.is_empty() {
            return Err(AdapterError::Auth("no Event Grid access key configured".into()));
        }

        let response = self
            .http
            .post(endpoint)
            .header("aeg-sas-key", &self.access_key)
            .json(&events)
            .send()
            .await?;

        check_response(response).await?;
        Ok(())
    }
}

/// Publishes envelopes to Event Grid topics.
pub struct EventGridAdapter {
    client: Arc<dyn EventGridClient>,
    project_name: String,
    location: String,
    health: HealthTracker,
}

impl EventGridAdapter {
    pub fn new(
        client: Arc<dyn EventGridClient>,
        project_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            client,
            project_name: project_name.into(),
            location: location.into(),
            health: HealthTracker::new(),
        }
    }

    /// Endpoint for this envelope: the descriptor's, or the derived topic's
    /// endpoint in the configured location.
    pub fn endpoint_for(&self, envelope: &Envelope, target: &AzureTarget) -> String {
        target.topic_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.{}-1.eventgrid.azure.net/api/events",
                derived_topic_name(&self.project_name, envelope.event_type()),
                self.location
            )
        })
    }

    pub fn build_event(envelope: &Envelope, target: &AzureTarget) -> EventGridEvent {
        let subject = target.subject.clone().unwrap_or_else(|| {
            if envelope.source().is_empty() {
                envelope.event_type().to_string()
            } else {
                envelope.source().to_string()
            }
        });

        EventGridEvent {
            id: envelope.correlation_id().to_string(),
            event_type: target
                .event_type_literal
                .clone()
                .unwrap_or_else(|| envelope.event_type().to_string()),
            subject,
            event_time: envelope.timestamp().unwrap_or_else(|| envelope.received_at()),
            data: json!({
                "correlation_id": envelope.correlation_id(),
                "trace_id": envelope.trace_id(),
                "source_cloud": envelope.source_cloud(),
                "payload": envelope.payload(),
            }),
            data_version: DATA_VERSION.to_string(),
        }
    }

    async fn send(&self, endpoint: String, event: EventGridEvent) -> Result<PublishReceipt, AdapterError> {
        let id = event.id.clone();
        self.client.send(&endpoint, vec![event]).await?;
        Ok(PublishReceipt::accepted(Some(id)))
    }
}

#[async_trait]
impl Adapter for EventGridAdapter {
    fn backend_id(&self) -> BackendId {
        BackendId::Azure
    }

    async fn publish(
        &self,
        envelope: &Envelope,
        target: &TargetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, AdapterError> {
        let TargetDescriptor::Azure(target) = target else {
            return Err(AdapterError::InvalidTarget(format!(
                "expected an azure descriptor, got {}",
                target.backend()
            )));
        };

        let endpoint = self.endpoint_for(envelope, target);
        let event = Self::build_event(envelope, target);
        debug!(
            endpoint = %endpoint,
            subject = %event.subject,
            correlation_id = %envelope.correlation_id(),
            "Sending to Event Grid"
        );

        let result = cancellable(cancel, self.send(endpoint, event)).await;
        self.health.record(&result);
        result
    }

    async fn health(&self) -> HealthStatus {
        self.health.status()
    }

    fn record_failure(&self, _error: &AdapterError) {
        self.health.record_failure();
    }
}
