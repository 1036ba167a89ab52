//! EventBridge entry point.
//!
//! Events arriving from an EventBridge rule are wrapped in the CloudWatch
//! event envelope; the routable [`Event`] sits in `detail`.

use crate::event::Event;
use crate::outcome::{DispatchOutcome, TargetStatus};
use crate::router::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CloudWatch / EventBridge event envelope.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CloudWatchEvent {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "detail-type", default)]
    pub detail_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub detail: Value,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl HandlerResponse {
    fn from_outcome(outcome: &DispatchOutcome) -> Self {
        let ok = outcome.count(TargetStatus::Ok);
        let (status_code, message, error) = if ok > 0 {
            (
                200,
                Some(format!("Event routed to {} target(s), overall {}", ok, outcome.overall)),
                None,
            )
        } else {
            let detail = outcome
                .message
                .clone()
                .or_else(|| {
                    outcome
                        .per_target
                        .iter()
                        .find_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.backend_id, e)))
                })
                .unwrap_or_else(|| "no target accepted the event".to_string());
            (500, None, Some(format!("Failed to route event: {}", detail)))
        };

        Self {
            status_code,
            message,
            error,
            event_type: outcome.event_type.clone(),
            correlation_id: outcome.correlation_id.clone(),
            trace_id: outcome.trace_id.clone(),
        }
    }
}

/// Route the event carried in `detail`.
///
/// 400 when `detail` is not an event, 200 when at least one target took it,
/// 500 otherwise.
pub async fn handle_cloudwatch_event(
    router: &Router,
    event: CloudWatchEvent,
    cancel: &CancellationToken,
) -> HandlerResponse {
    info!(
        id = %event.id,
        detail_type = %event.detail_type,
        source = %event.source,
        region = %event.region,
        "Received EventBridge event"
    );

    let mut routed: Event = match serde_json::from_value(event.detail) {
        Ok(routed) => routed,
        Err(err) => {
            warn!(id = %event.id, error = %err, "Undecodable event detail");
            return HandlerResponse {
                status_code: 400,
                message: None,
                error: Some(format!("Failed to parse event: {}", err)),
                event_type: String::new(),
                correlation_id: None,
                trace_id: None,
            };
        }
    };

    if routed.timestamp.is_none() {
        routed.timestamp = event.time;
    }

    let outcome = router.route_with_cancel(routed, cancel).await;
    HandlerResponse::from_outcome(&outcome)
}
