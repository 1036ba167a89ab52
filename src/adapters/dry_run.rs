//! Dry-run client - logs outgoing requests instead of sending them.
//!
//! [`DryRunClient`] implements every backend client trait, so any adapter
//! can be wired to it. Useful for local development and for environments
//! without cloud credentials.
//!
//! ```rust,ignore
//! use skyrelay::adapters::{DryRunClient, EventBridgeAdapter};
//!
//! let client = Arc::new(DryRunClient::with_prefix("staging"));
//! let adapter = EventBridgeAdapter::new(client);
//! ```

use super::aws::{EventBridgeClient, PutEventsInput, PutEventsOutput, PutEventsResultEntry};
use super::azure::{EventGridClient, EventGridEvent};
use super::gcp::{PubSubClient, PublishRequest, PublishResponse};
use super::AdapterError;
use crate::envelope::IdGenerator;
use async_trait::async_trait;
use tracing::info;

/// Accepts every request and logs it with structured fields.
#[derive(Debug)]
pub struct DryRunClient {
    /// Prefix for log messages
    prefix: String,
    ids: IdGenerator,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::with_prefix("dry-run")
    }

    /// The prefix distinguishes several dry-run clients in the same log.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ids: IdGenerator::new(),
        }
    }

    fn next_id(&self, kind: &str) -> String {
        format!("{}-{}-{}", self.prefix, kind, self.ids.next_nanos())
    }
}

impl Default for DryRunClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBridgeClient for DryRunClient {
    async fn put_events(&self, input: PutEventsInput) -> Result<PutEventsOutput, AdapterError> {
        let mut entries = Vec::with_capacity(input.entries.len());
        for entry in &input.entries {
            info!(
                prefix = %self.prefix,
                event_bus = %entry.event_bus_name,
                source = %entry.source,
                detail_type = %entry.detail_type,
                detail = %entry.detail,
                "[{}] PutEvents", self.prefix
            );
            entries.push(PutEventsResultEntry {
                event_id: Some(self.next_id("evt")),
                ..Default::default()
            });
        }

        Ok(PutEventsOutput {
            failed_entry_count: 0,
            entries,
        })
    }
}

#[async_trait]
impl PubSubClient for DryRunClient {
    async fn publish(
        &self,
        topic: &str,
        request: PublishRequest,
    ) -> Result<PublishResponse, AdapterError> {
        let message_ids = request
            .messages
            .iter()
            .map(|message| {
                info!(
                    prefix = %self.prefix,
                    topic = %topic,
                    attributes = ?message.attributes,
                    "[{}] Pub/Sub publish", self.prefix
                );
                self.next_id("msg")
            })
            .collect();

        Ok(PublishResponse { message_ids })
    }
}

#[async_trait]
impl EventGridClient for DryRunClient {
    async fn send(&self, endpoint: &str, events: Vec<EventGridEvent>) -> Result<(), AdapterError> {
        for event in &events {
            info!(
                prefix = %self.prefix,
                endpoint = %endpoint,
                event_type = %event.event_type,
                subject = %event.subject,
                id = %event.id,
                "[{}] Event Grid send", self.prefix
            );
        }
        Ok(())
    }
}
