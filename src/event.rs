//! Input event types for Skyrelay.
//!
//! The [`Event`] struct is what producers hand to the router. It is
//! payload-agnostic: the router only reads `event_type` for routing and the
//! `metadata` / `routing_info` blocks for policy. Everything except
//! `event_type` may be absent and is filled in by the envelope builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// A domain event submitted for cross-cloud routing.
///
/// # Example
///
/// ```json
/// {
///   "event_type": "coffee.order.created",
///   "source": "go-coffee.platform",
///   "timestamp": "2025-12-11T10:00:00Z",
///   "payload": { "order_id": "test-order-123", "quantity": 2 },
///   "metadata": { "priority": 1, "correlation_id": "c1" },
///   "routing_info": { "source_cloud": "aws", "routing_strategy": "broadcast" }
/// }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Event {
    /// Dotted event type used as the routing key (e.g. "coffee.order.created")
    pub event_type: String,

    /// Origin identifier, free-form
    #[serde(default)]
    pub source: String,

    /// Producer-supplied instant; carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Opaque payload
    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub metadata: EventMetadata,

    #[serde(default)]
    pub routing_info: RoutingInfo,
}

impl Event {
    /// Create a new event with the required fields.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: None,
            payload,
            metadata: EventMetadata::default(),
            routing_info: RoutingInfo::default(),
        }
    }

    /// Set the producer timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(id.into());
        self
    }

    /// Set the trace ID
    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.trace_id = Some(id.into());
        self
    }

    /// Set the cloud the event originated from
    pub fn with_source_cloud(mut self, cloud: impl Into<String>) -> Self {
        self.routing_info.source_cloud = Some(cloud.into());
        self
    }

    /// Restrict routing to the given clouds
    pub fn with_target_clouds<I, S>(mut self, clouds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_info.target_clouds = Some(clouds.into_iter().map(Into::into).collect());
        self
    }

    /// Set the routing strategy
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.routing_info.strategy = strategy;
        self
    }

    /// Request deterministic load balancing across candidates
    pub fn with_load_balance(mut self) -> Self {
        self.routing_info.load_balance = true;
        self
    }

    /// Allow standby targets to take over when a primary-only dispatch fails
    pub fn with_failover(mut self) -> Self {
        self.routing_info.failover_enabled = true;
        self
    }
}

/// Event processing metadata.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct EventMetadata {
    #[serde(default)]
    pub priority: u32,

    /// Producer's retry hint. The route entry's policy governs dispatch.
    #[serde(default)]
    pub retry_policy: RetryPolicyName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Cross-cloud routing hints supplied by the producer.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RoutingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_cloud: Option<String>,

    /// When present, authoritative: only these clouds are considered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_clouds: Option<BTreeSet<String>>,

    #[serde(default, rename = "routing_strategy", alias = "strategy")]
    pub strategy: Strategy,

    #[serde(default)]
    pub failover_enabled: bool,

    #[serde(default, rename = "load_balancing", alias = "load_balance")]
    pub load_balance: bool,
}

impl RoutingInfo {
    /// The strategy actually applied: the `load_balance` flag wins over
    /// whatever `strategy` says.
    pub fn effective_strategy(&self) -> Strategy {
        if self.load_balance {
            Strategy::LoadBalance
        } else {
            self.strategy
        }
    }
}

/// How a route's candidates are narrowed down.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Broadcast,
    LoadBalance,
    PrimaryOnly,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Broadcast => "broadcast",
            Strategy::LoadBalance => "load_balance",
            Strategy::PrimaryOnly => "primary_only",
        })
    }
}

/// Retry policy names as they appear on the wire and in route configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyName {
    None,
    Fixed,
    #[default]
    ExponentialBackoff,
}

impl fmt::Display for RetryPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryPolicyName::None => "none",
            RetryPolicyName::Fixed => "fixed",
            RetryPolicyName::ExponentialBackoff => "exponential_backoff",
        })
    }
}
