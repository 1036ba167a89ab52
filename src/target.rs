//! Backend identifiers and per-backend target descriptors.
//!
//! A target is a `(backend, descriptor)` pair. The descriptor is opaque to
//! everything except the adapter for that backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A downstream cloud event-bus backend.
///
/// Variant order is lexicographic by id (`aws` < `azure` < `gcp`), so the
/// derived `Ord` matches the ordering the selector relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Aws,
    Azure,
    Gcp,
}

impl BackendId {
    pub const ALL: [BackendId; 3] = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Aws => "aws",
            BackendId::Azure => "azure",
            BackendId::Gcp => "gcp",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(BackendId::Aws),
            "azure" => Ok(BackendId::Azure),
            "gcp" => Ok(BackendId::Gcp),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// A backend name that is not one of `aws`, `azure`, `gcp`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend '{0}'")]
pub struct UnknownBackend(pub String);

/// Where to publish on a specific backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TargetDescriptor {
    Aws(AwsTarget),
    Gcp(GcpTarget),
    Azure(AzureTarget),
}

impl TargetDescriptor {
    /// The backend this descriptor belongs to.
    pub fn backend(&self) -> BackendId {
        match self {
            TargetDescriptor::Aws(_) => BackendId::Aws,
            TargetDescriptor::Gcp(_) => BackendId::Gcp,
            TargetDescriptor::Azure(_) => BackendId::Azure,
        }
    }

    /// Short human-readable label used in outcomes and logs.
    pub fn label(&self) -> String {
        match self {
            TargetDescriptor::Aws(t) => t.event_bus_name.clone(),
            TargetDescriptor::Gcp(t) => t
                .topic_name
                .clone()
                .unwrap_or_else(|| "<derived topic>".to_string()),
            TargetDescriptor::Azure(t) => t
                .topic_endpoint
                .clone()
                .unwrap_or_else(|| "<derived endpoint>".to_string()),
        }
    }
}

/// EventBridge entry fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsTarget {
    pub event_bus_name: String,

    /// `DetailType`; the envelope's event type when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<String>,

    /// `Source` literal
    pub source_literal: String,

    #[serde(default)]
    pub resource_arns: Vec<String>,
}

/// Pub/Sub topic and static message attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpTarget {
    /// Derived from the event type when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Event Grid topic and event fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureTarget {
    /// Derived from the event type and location when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// `eventType` literal; the envelope's event type when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_literal: Option<String>,
}

/// `{project}-{event_type with '.' replaced by '-'}`, the default Pub/Sub
/// topic and Event Grid topic name.
pub fn derived_topic_name(project_name: &str, event_type: &str) -> String {
    format!("{}-{}", project_name, event_type.replace('.', "-"))
}
