//! Target Selector - narrows a route entry down to the targets to publish to.
//!
//! # Algorithm
//!
//! 1. Candidates are the route's backends whose adapter is enabled.
//! 2. Without an explicit `target_clouds`, the source cloud is dropped
//!    (except under `primary_only`). With one, only the listed clouds stay.
//! 3. The strategy picks from what is left:
//!    - `broadcast`: every candidate
//!    - `load_balance`: one candidate chosen by [`selection_hash`]
//!    - `primary_only`: the lowest priority, ties broken by backend id
//!
//! Every route backend that is not selected is reported back as skipped, so
//! an outcome always lists the whole route.

use crate::adapters::{Adapter, AdapterRegistry};
use crate::envelope::Envelope;
use crate::event::Strategy;
use crate::outcome::{SkipReason, TargetResult};
use crate::table::{RouteEntry, RouteTarget};
use crate::target::BackendId;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A target chosen for dispatch, with the adapter that will publish it.
#[derive(Clone)]
pub struct SelectedTarget {
    pub backend_id: BackendId,
    pub label: String,
    pub target: RouteTarget,
    pub adapter: Arc<dyn Adapter>,
}

impl SelectedTarget {
    fn skip(self, reason: SkipReason) -> TargetResult {
        TargetResult::skipped(self.backend_id, self.label, reason)
    }
}

/// The selector's answer for one envelope.
#[derive(Clone)]
pub struct Selection {
    pub strategy: Strategy,
    /// Targets to dispatch now, ordered by backend id
    pub targets: Vec<SelectedTarget>,
    /// `primary_only` fallbacks in failover order; empty for other strategies
    pub standby: Vec<SelectedTarget>,
    /// Route backends filtered out before dispatch
    pub skipped: Vec<TargetResult>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn backends(&self) -> Vec<BackendId> {
        self.targets.iter().map(|t| t.backend_id).collect()
    }
}

/// `h = h * 31 + c` over the code points of `event_type` then
/// `correlation_id`, wrapping on overflow.
pub fn selection_hash(event_type: &str, correlation_id: &str) -> i64 {
    event_type
        .chars()
        .chain(correlation_id.chars())
        .fold(0i64, |h, c| h.wrapping_mul(31).wrapping_add(c as i64))
}

/// Index into `len` candidates for `hash`; negative hashes still land in range.
pub fn pick_index(hash: i64, len: usize) -> usize {
    (hash.unsigned_abs() % len as u64) as usize
}

/// Cloud names from producers are matched case-insensitively.
fn parse_cloud(name: &str) -> Option<BackendId> {
    name.trim().to_ascii_lowercase().parse().ok()
}

/// Choose the targets for `envelope` from `route`.
///
/// Deterministic: the same envelope identifiers, route and enabled set
/// always produce the same selection.
pub fn select(envelope: &Envelope, route: &RouteEntry, registry: &AdapterRegistry) -> Selection {
    let info = envelope.routing_info();
    let strategy = info.effective_strategy();
    let source = parse_cloud(envelope.source_cloud());
    let requested: Option<BTreeSet<BackendId>> = info
        .target_clouds
        .as_ref()
        .map(|clouds| clouds.iter().filter_map(|c| parse_cloud(c)).collect());

    let mut skipped = Vec::new();
    let mut candidates = Vec::new();

    // per_backend is a BTreeMap, so candidates come out sorted by backend id.
    for (backend, target) in &route.per_backend {
        let label = target.descriptor.label();

        let adapter = match registry.get(*backend) {
            Some(registered) if registered.is_enabled() => registered.adapter().clone(),
            _ => {
                skipped.push(TargetResult::skipped(*backend, label, SkipReason::Disabled));
                continue;
            }
        };

        match &requested {
            Some(set) if !set.contains(backend) => {
                skipped.push(TargetResult::skipped(*backend, label, SkipReason::NotRequested));
                continue;
            }
            None if strategy != Strategy::PrimaryOnly && source == Some(*backend) => {
                skipped.push(TargetResult::skipped(*backend, label, SkipReason::SourceCloud));
                continue;
            }
            _ => {}
        }

        candidates.push(SelectedTarget {
            backend_id: *backend,
            label,
            target: target.clone(),
            adapter,
        });
    }

    let (targets, standby) = match strategy {
        Strategy::Broadcast => (candidates, Vec::new()),
        Strategy::LoadBalance if candidates.len() > 1 => {
            let hash = selection_hash(envelope.event_type(), envelope.correlation_id());
            let chosen = candidates.remove(pick_index(hash, candidates.len()));
            skipped.extend(candidates.into_iter().map(|c| c.skip(SkipReason::Strategy)));
            (vec![chosen], Vec::new())
        }
        Strategy::LoadBalance => (candidates, Vec::new()),
        Strategy::PrimaryOnly => {
            candidates.sort_by_key(|c| (c.target.priority, c.backend_id));
            let mut ordered = candidates.into_iter();
            let primary: Vec<_> = ordered.next().into_iter().collect();
            (primary, ordered.collect())
        }
    };

    skipped.sort_by_key(|r| r.backend_id);

    Selection {
        strategy,
        targets,
        standby,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::StubAdapter;
    use crate::envelope::EnvelopeBuilder;
    use crate::event::Event;
    use crate::target::{AwsTarget, AzureTarget, GcpTarget, TargetDescriptor};
    use serde_json::json;

    fn aws() -> TargetDescriptor {
        TargetDescriptor::Aws(AwsTarget {
            event_bus_name: "bus".into(),
            detail_type: None,
            source_literal: "src".into(),
            resource_arns: vec![],
        })
    }

    fn gcp() -> TargetDescriptor {
        TargetDescriptor::Gcp(GcpTarget {
            topic_name: Some("topic".into()),
            attributes: Default::default(),
        })
    }

    fn azure() -> TargetDescriptor {
        TargetDescriptor::Azure(AzureTarget {
            topic_endpoint: Some("https://endpoint".into()),
            subject: None,
            event_type_literal: None,
        })
    }

    fn route() -> RouteEntry {
        RouteEntry::new(1).with_target(aws()).with_target(gcp()).with_target(azure())
    }

    fn registry(enabled: &[BackendId]) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        for backend in BackendId::ALL {
            registry.register(
                Arc::new(StubAdapter::ok(backend)),
                enabled.contains(&backend),
                "",
            );
        }
        registry
    }

    fn envelope(event: Event) -> Envelope {
        EnvelopeBuilder::new("go-coffee", "aws").build(event).unwrap()
    }

    fn event() -> Event {
        Event::new("coffee.order.created", "test", json!({})).with_correlation_id("c1")
    }

    #[test]
    fn test_hash_known_values() {
        assert_eq!(selection_hash("", ""), 0);
        assert_eq!(selection_hash("a", ""), 97);
        assert_eq!(selection_hash("a", "b"), 97 * 31 + 98);
        assert_eq!(selection_hash("é", ""), 0xE9);
    }

    #[test]
    fn test_hash_wraps_and_index_stays_in_range() {
        let long = "z".repeat(200);
        let hash = selection_hash(&long, "c1");
        assert_eq!(hash, selection_hash(&long, "c1"));
        assert!(pick_index(hash, 3) < 3);
        assert_eq!(pick_index(i64::MIN, 3), (i64::MIN.unsigned_abs() % 3) as usize);
        assert_eq!(pick_index(-7, 3), 1);
    }

    #[test]
    fn test_broadcast_excludes_source_cloud() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let selection = select(&envelope(event()), &route(), &registry(&all));

        assert_eq!(selection.backends(), vec![BackendId::Azure, BackendId::Gcp]);
        assert_eq!(selection.skipped.len(), 1);
        assert_eq!(selection.skipped[0].backend_id, BackendId::Aws);
        assert_eq!(selection.skipped[0].skip_reason, Some(SkipReason::SourceCloud));
    }

    #[test]
    fn test_source_cloud_matches_case_insensitively() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let selection = select(
            &envelope(event().with_source_cloud(" GCP ")),
            &route(),
            &registry(&all),
        );

        assert_eq!(selection.backends(), vec![BackendId::Aws, BackendId::Azure]);
        assert_eq!(selection.skipped[0].backend_id, BackendId::Gcp);
        assert_eq!(selection.skipped[0].skip_reason, Some(SkipReason::SourceCloud));
    }

    #[test]
    fn test_disabled_adapters_are_skipped() {
        let selection = select(
            &envelope(event().with_source_cloud("azure")),
            &route(),
            &registry(&[BackendId::Aws]),
        );

        assert_eq!(selection.backends(), vec![BackendId::Aws]);
        let reasons: Vec<_> = selection.skipped.iter().map(|s| s.skip_reason).collect();
        assert_eq!(reasons, vec![Some(SkipReason::Disabled), Some(SkipReason::Disabled)]);
    }

    #[test]
    fn test_target_clouds_are_authoritative() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let selection = select(
            &envelope(event().with_target_clouds(["aws", "GCP"])),
            &route(),
            &registry(&all),
        );

        // The source cloud (aws) stays because it was asked for explicitly.
        assert_eq!(selection.backends(), vec![BackendId::Aws, BackendId::Gcp]);
        assert_eq!(selection.skipped[0].skip_reason, Some(SkipReason::NotRequested));
    }

    #[test]
    fn test_empty_target_clouds_selects_nothing() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let selection = select(
            &envelope(event().with_target_clouds(Vec::<String>::new())),
            &route(),
            &registry(&all),
        );
        assert!(selection.is_empty());
        assert_eq!(selection.skipped.len(), 3);
    }

    #[test]
    fn test_load_balance_picks_hashed_candidate() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let envelope = envelope(
            event()
                .with_load_balance()
                .with_target_clouds(["aws", "azure", "gcp"]),
        );
        let k = pick_index(selection_hash("coffee.order.created", "c1"), 3);
        let expected = [BackendId::Aws, BackendId::Azure, BackendId::Gcp][k];

        for _ in 0..10 {
            let selection = select(&envelope, &route(), &registry(&all));
            assert_eq!(selection.backends(), vec![expected]);
            assert_eq!(selection.skipped.len(), 2);
            assert!(selection
                .skipped
                .iter()
                .all(|s| s.skip_reason == Some(SkipReason::Strategy)));
        }
    }

    #[test]
    fn test_load_balance_single_candidate() {
        let selection = select(
            &envelope(event().with_strategy(Strategy::LoadBalance)),
            &route(),
            &registry(&[BackendId::Gcp]),
        );
        assert_eq!(selection.backends(), vec![BackendId::Gcp]);
    }

    #[test]
    fn test_primary_only_lowest_priority_then_backend_id() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let route = RouteEntry::new(1)
            .with_prioritized_target(5, aws())
            .with_prioritized_target(2, gcp())
            .with_prioritized_target(2, azure());

        let selection = select(
            &envelope(event().with_strategy(Strategy::PrimaryOnly)),
            &route,
            &registry(&all),
        );

        assert_eq!(selection.backends(), vec![BackendId::Azure]);
        let standby: Vec<_> = selection.standby.iter().map(|s| s.backend_id).collect();
        assert_eq!(standby, vec![BackendId::Gcp, BackendId::Aws]);
        assert!(selection.skipped.is_empty());
    }

    #[test]
    fn test_primary_only_keeps_source_cloud() {
        let selection = select(
            &envelope(event().with_strategy(Strategy::PrimaryOnly)),
            &RouteEntry::new(1).with_target(aws()),
            &registry(&[BackendId::Aws]),
        );
        assert_eq!(selection.backends(), vec![BackendId::Aws]);
    }

    #[test]
    fn test_selection_is_idempotent() {
        let all = [BackendId::Aws, BackendId::Azure, BackendId::Gcp];
        let registry = registry(&all);
        let envelope = envelope(event().with_source_cloud("azure"));

        let first = select(&envelope, &route(), &registry);
        let narrowed = first
            .targets
            .iter()
            .fold(RouteEntry::new(1), |entry, t| {
                entry.with_prioritized_target(t.target.priority, t.target.descriptor.clone())
            });
        let second = select(&envelope, &narrowed, &registry);

        assert_eq!(first.backends(), second.backends());
    }
}
