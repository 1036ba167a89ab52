//! Envelope Builder - canonical, immutable form of an input event.
//!
//! The [`EnvelopeBuilder`] validates an [`Event`], fills in identifiers and
//! the source cloud, and serialises the payload once so adapters can use the
//! text inline. An [`Envelope`] has no setters; the dispatch engine shares
//! it behind an `Arc`.

use crate::event::{Event, EventMetadata, RoutingInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that reject an event before routing.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Strictly increasing nanosecond readings for generated identifiers.
///
/// Wall-clock nanos since the epoch, bumped by one whenever the clock has not
/// advanced (or went backwards) since the previous reading.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_nanos(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// The router's canonical wrapper around an input event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    event_type: String,
    source: String,
    timestamp: Option<DateTime<Utc>>,
    payload: Value,
    metadata: EventMetadata,
    routing_info: RoutingInfo,
    correlation_id: String,
    trace_id: String,
    source_cloud: String,
    serialized_detail: String,
    received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn routing_info(&self) -> &RoutingInfo {
        &self.routing_info
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn source_cloud(&self) -> &str {
        &self.source_cloud
    }

    /// Payload serialised as canonical JSON text
    pub fn serialized_detail(&self) -> &str {
        &self.serialized_detail
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Builds envelopes for one router instance.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    project_name: String,
    default_source_cloud: String,
    ids: IdGenerator,
}

impl EnvelopeBuilder {
    /// `default_source_cloud` must be non-empty; the router's configuration
    /// layer rejects an empty value before getting here.
    pub fn new(project_name: impl Into<String>, default_source_cloud: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            default_source_cloud: default_source_cloud.into(),
            ids: IdGenerator::new(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn default_source_cloud(&self) -> &str {
        &self.default_source_cloud
    }

    /// Produce an envelope, or reject the event.
    pub fn build(&self, event: Event) -> Result<Envelope, EnvelopeError> {
        let received_at = Utc::now();

        if event.event_type.trim().is_empty() {
            return Err(EnvelopeError::InvalidEvent("event_type is empty".to_string()));
        }

        // serde_json's default map is ordered, so this text is stable.
        let serialized_detail = serde_json::to_string(&event.payload)?;

        let correlation_id = match non_empty(event.metadata.correlation_id.as_deref()) {
            Some(id) => id.to_string(),
            None => format!("{}-{}", self.project_name, self.ids.next_nanos()),
        };
        let trace_id = match non_empty(event.metadata.trace_id.as_deref()) {
            Some(id) => id.to_string(),
            None => format!("trace-{}", self.ids.next_nanos()),
        };
        let source_cloud = non_empty(event.routing_info.source_cloud.as_deref())
            .unwrap_or(&self.default_source_cloud)
            .to_string();

        let mut metadata = event.metadata;
        metadata.correlation_id = Some(correlation_id.clone());
        metadata.trace_id = Some(trace_id.clone());
        let mut routing_info = event.routing_info;
        routing_info.source_cloud = Some(source_cloud.clone());

        Ok(Envelope {
            event_type: event.event_type,
            source: event.source,
            timestamp: event.timestamp,
            payload: event.payload,
            metadata,
            routing_info,
            correlation_id,
            trace_id,
            source_cloud,
            serialized_detail,
            received_at,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}
