//! Google Cloud Pub/Sub adapter.
//!
//! Publishes one message per envelope. Message data is the serialised
//! payload; routing identifiers travel as message attributes so
//! subscribers can filter on them.

use super::{
    cancellable, check_response, Adapter, AdapterError, HealthStatus, HealthTracker,
    PublishReceipt,
};
use crate::envelope::Envelope;
use crate::target::{derived_topic_name, BackendId, GcpTarget, TargetDescriptor};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Global Pub/Sub REST endpoint
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Regional endpoint for `region`, or the global one.
pub fn endpoint_for_region(region: &str) -> String {
    if region.is_empty() {
        DEFAULT_ENDPOINT.to_string()
    } else {
        format!("https://{}-pubsub.googleapis.com", region)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PubsubMessage {
    /// Base64-encoded message body
    pub data: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<PubsubMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    pub message_ids: Vec<String>,
}

/// The part of a Pub/Sub client this adapter needs.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn publish(&self, topic: &str, request: PublishRequest)
        -> Result<PublishResponse, AdapterError>;
}

/// Pub/Sub over the REST API with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpPubSubClient {
    http: Client,
    endpoint: String,
    project_id: String,
    access_token: String,
}

impl HttpPubSubClient {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            access_token: access_token.into(),
        }
    }

    fn publish_url(&self, topic: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}:publish",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            topic
        )
    }
}

#[async_trait]
impl PubSubClient for HttpPubSubClient {
    async fn publish(
        &self,
        topic: &str,
        request: PublishRequest,
    ) -> Result<PublishResponse, AdapterError> {
        if self.access_token.is_empty() {
            return Err(AdapterError::Auth("no Pub/Sub access token configured".into()));
        }

        let response = self
            .http
            .post(self.publish_url(topic))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let response = check_response(response).await?;
        Ok(response.json::<PublishResponse>().await?)
    }
}

/// Publishes envelopes to Pub/Sub topics.
pub struct PubSubAdapter {
    client: Arc<dyn PubSubClient>,
    project_name: String,
    health: HealthTracker,
}

impl PubSubAdapter {
    pub fn new(client: Arc<dyn PubSubClient>, project_name: impl Into<String>) -> Self {
        Self {
            client,
            project_name: project_name.into(),
            health: HealthTracker::new(),
        }
    }

    /// Topic for this envelope: the descriptor's, or one derived from the
    /// event type.
    pub fn topic_for(&self, envelope: &Envelope, target: &GcpTarget) -> String {
        target
            .topic_name
            .clone()
            .unwrap_or_else(|| derived_topic_name(&self.project_name, envelope.event_type()))
    }

    pub fn build_message(envelope: &Envelope, target: &GcpTarget) -> PubsubMessage {
        let mut attributes = target.attributes.clone();
        attributes.insert("event_type".into(), envelope.event_type().to_string());
        attributes.insert("correlation_id".into(), envelope.correlation_id().to_string());
        attributes.insert("trace_id".into(), envelope.trace_id().to_string());
        attributes.insert("source".into(), envelope.source().to_string());
        attributes.insert("source_cloud".into(), envelope.source_cloud().to_string());

        PubsubMessage {
            data: STANDARD.encode(envelope.serialized_detail()),
            attributes,
        }
    }

    async fn send(&self, topic: String, message: PubsubMessage) -> Result<PublishReceipt, AdapterError> {
        let response = self
            .client
            .publish(
                &topic,
                PublishRequest {
                    messages: vec![message],
                },
            )
            .await?;

        match response.message_ids.into_iter().next() {
            Some(id) => Ok(PublishReceipt::accepted(Some(id))),
            None => Err(AdapterError::FailedEntries {
                count: 1,
                code: None,
            }),
        }
    }
}

#[async_trait]
impl Adapter for PubSubAdapter {
    fn backend_id(&self) -> BackendId {
        BackendId::Gcp
    }

    async fn publish(
        &self,
        envelope: &Envelope,
        target: &TargetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, AdapterError> {
        let TargetDescriptor::Gcp(target) = target else {
            return Err(AdapterError::InvalidTarget(format!(
                "expected a gcp descriptor, got {}",
                target.backend()
            )));
        };

        let topic = self.topic_for(envelope, target);
        let message = Self::build_message(envelope, target);
        debug!(
            topic = %topic,
            correlation_id = %envelope.correlation_id(),
            "Publishing to Pub/Sub"
        );

        let result = cancellable(cancel, self.send(topic, message)).await;
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
