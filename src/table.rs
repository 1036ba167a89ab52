//! Routing Table - event type to route entry, exact or longest prefix.
//!
//! # Matching
//!
//! ```text
//! Key                  | Kind    | Matches
//! ---------------------|---------|------------------------------------
//! coffee.order.created | exact   | coffee.order.created only
//! coffee.*             | prefix  | coffee.order.created, coffee.refund
//! *                    | prefix  | everything
//! ```
//!
//! An exact key always beats a prefix; among prefixes the longest wins. The
//! table is built once and never mutated.

use crate::adapters::AdapterRegistry;
use crate::target::{BackendId, TargetDescriptor};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Upper bound on attempts for any policy
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Upper bound on any delay or attempt timeout
pub const MAX_DURATION_LIMIT: Duration = Duration::from_secs(300);

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while building a routing table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("route key is empty")]
    EmptyKey,

    #[error("route '{0}' has no targets")]
    NoTargets(String),

    #[error("route '{key}' targets backend '{backend}' which has no registered adapter")]
    UnregisteredBackend { key: String, backend: BackendId },

    #[error("route '{key}' requires backend '{backend}' but does not target it")]
    RequiredNotTargeted { key: String, backend: BackendId },

    #[error("route '{key}' maps backend '{backend}' to a {found} descriptor")]
    DescriptorMismatch {
        key: String,
        backend: BackendId,
        found: BackendId,
    },

    #[error("route '{key}' has an invalid retry policy: {reason}")]
    InvalidRetryPolicy { key: String, reason: String },

    #[error("ambiguous route: '{0}' is declared more than once")]
    AmbiguousRoute(String),
}

/// Errors from a table lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no route for event type '{0}'")]
    NoRoute(String),
}

/// Per-target retry behaviour, validated at table construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Single attempt
    None { attempt_timeout: Duration },

    Fixed {
        max_attempts: u32,
        delay: Duration,
        attempt_timeout: Duration,
    },

    ExponentialBackoff {
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        attempt_timeout: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::ExponentialBackoff {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None { .. } => 1,
            RetryPolicy::Fixed { max_attempts, .. }
            | RetryPolicy::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        match self {
            RetryPolicy::None { attempt_timeout }
            | RetryPolicy::Fixed { attempt_timeout, .. }
            | RetryPolicy::ExponentialBackoff { attempt_timeout, .. } => *attempt_timeout,
        }
    }

    /// Delay before the first retry. `None` never retries.
    pub fn initial_delay(&self) -> Option<Duration> {
        match self {
            RetryPolicy::None { .. } => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff { base_delay, .. } => Some(*base_delay),
        }
    }

    /// Delay that follows `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        match self {
            RetryPolicy::None { .. } | RetryPolicy::Fixed { .. } => current,
            RetryPolicy::ExponentialBackoff { max_delay, .. } => {
                current.saturating_mul(2).min(*max_delay)
            }
        }
    }

    /// Longest delay this policy can wait between attempts.
    pub fn max_delay(&self) -> Duration {
        match self {
            RetryPolicy::None { .. } => Duration::ZERO,
            RetryPolicy::Fixed { delay, .. } => *delay,
            RetryPolicy::ExponentialBackoff { max_delay, .. } => *max_delay,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let attempts = self.max_attempts();
        if attempts == 0 || attempts > MAX_ATTEMPTS_LIMIT {
            return Err(format!(
                "max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT, attempts
            ));
        }

        let timeout = self.attempt_timeout();
        if timeout.is_zero() || timeout > MAX_DURATION_LIMIT {
            return Err(format!(
                "attempt_timeout must be within (0, {}s], got {}ms",
                MAX_DURATION_LIMIT.as_secs(),
                timeout.as_millis()
            ));
        }

        match self {
            RetryPolicy::None { .. } => Ok(()),
            RetryPolicy::Fixed { delay, .. } => {
                if *delay > MAX_DURATION_LIMIT {
                    return Err(format!("delay exceeds {}s", MAX_DURATION_LIMIT.as_secs()));
                }
                Ok(())
            }
            RetryPolicy::ExponentialBackoff {
                base_delay,
                max_delay,
                ..
            } => {
                if *max_delay > MAX_DURATION_LIMIT {
                    return Err(format!("max_delay exceeds {}s", MAX_DURATION_LIMIT.as_secs()));
                }
                if base_delay > max_delay {
                    return Err("base_delay is greater than max_delay".to_string());
                }
                Ok(())
            }
        }
    }
}

/// A target in a route: the descriptor plus its selection priority.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    /// Lower is preferred by `primary_only`
    pub priority: i32,
    pub descriptor: TargetDescriptor,
}

/// Everything the router needs to dispatch one event type.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub per_backend: BTreeMap<BackendId, RouteTarget>,
    pub priority: i32,
    pub retry_policy: RetryPolicy,
    /// Backends that must succeed for the dispatch to count as a success
    pub required: BTreeSet<BackendId>,
}

impl RouteEntry {
    /// Entry with no targets yet and the default retry policy.
    pub fn new(priority: i32) -> Self {
        Self {
            per_backend: BTreeMap::new(),
            priority,
            retry_policy: RetryPolicy::default(),
            required: BTreeSet::new(),
        }
    }

    /// Add a target at the route's own priority.
    pub fn with_target(mut self, descriptor: TargetDescriptor) -> Self {
        let priority = self.priority;
        self.per_backend.insert(
            descriptor.backend(),
            RouteTarget {
                priority,
                descriptor,
            },
        );
        self
    }

    /// Add a target with its own priority.
    pub fn with_prioritized_target(mut self, priority: i32, descriptor: TargetDescriptor) -> Self {
        self.per_backend.insert(
            descriptor.backend(),
            RouteTarget {
                priority,
                descriptor,
            },
        );
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_required<I: IntoIterator<Item = BackendId>>(mut self, required: I) -> Self {
        self.required = required.into_iter().collect();
        self
    }

    fn validate(&self, key: &str) -> Result<(), RoutingError> {
        if self.per_backend.is_empty() {
            return Err(RoutingError::NoTargets(key.to_string()));
        }

        for (backend, target) in &self.per_backend {
            let found = target.descriptor.backend();
            if found != *backend {
                return Err(RoutingError::DescriptorMismatch {
                    key: key.to_string(),
                    backend: *backend,
                    found,
                });
            }
        }

        if let Some(missing) = self
            .required
            .iter()
            .find(|b| !self.per_backend.contains_key(b))
        {
            return Err(RoutingError::RequiredNotTargeted {
                key: key.to_string(),
                backend: *missing,
            });
        }

        self.retry_policy
            .validate()
            .map_err(|reason| RoutingError::InvalidRetryPolicy {
                key: key.to_string(),
                reason,
            })
    }
}

/// How a route key matches event types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Exact(String),
    Prefix(String),
}

impl RouteKey {
    /// Parse a configuration key. A trailing `*` marks a prefix key; the
    /// prefix is everything before it (`coffee.*` → `coffee.`).
    pub fn parse(key: &str) -> Self {
        match key.strip_suffix('*') {
            Some(prefix) => RouteKey::Prefix(prefix.to_string()),
            None => RouteKey::Exact(key.to_string()),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Exact(k) => f.write_str(k),
            RouteKey::Prefix(p) => write!(f, "{}*", p),
        }
    }
}

/// Immutable lookup structure built from configuration.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    exact: HashMap<String, RouteEntry>,
    prefixes: HashMap<String, RouteEntry>,
}

impl RoutingTable {
    /// Build a table, validating every entry.
    ///
    /// Fails if a key is declared twice (for prefixes, after normalisation),
    /// if an entry is empty, if `required` names an untargeted backend, or if
    /// a retry policy is out of bounds.
    pub fn build<I>(routes: I) -> Result<Self, RoutingError>
    where
        I: IntoIterator<Item = (RouteKey, RouteEntry)>,
    {
        let mut table = RoutingTable::default();

        for (key, entry) in routes {
            let name = key.to_string();
            entry.validate(&name)?;

            let slot = match key {
                RouteKey::Exact(k) => {
                    if k.is_empty() {
                        return Err(RoutingError::EmptyKey);
                    }
                    table.exact.entry(k)
                }
                RouteKey::Prefix(p) => table.prefixes.entry(p),
            };

            match slot {
                std::collections::hash_map::Entry::Occupied(_) => {
                    return Err(RoutingError::AmbiguousRoute(name));
                }
                std::collections::hash_map::Entry::Vacant(v) => {
                    debug!(route = %name, targets = entry.per_backend.len(), "Registered route");
                    v.insert(entry);
                }
            }
        }

        Ok(table)
    }

    /// Check that every backend a route targets has a registered adapter.
    pub fn validate_backends(&self, registry: &AdapterRegistry) -> Result<(), RoutingError> {
        let exact = self.exact.iter().map(|(k, e)| (k.clone(), e));
        let prefixes = self.prefixes.iter().map(|(p, e)| (format!("{}*", p), e));

        for (key, entry) in exact.chain(prefixes) {
            if let Some(backend) = entry
                .per_backend
                .keys()
                .find(|b| !registry.contains(**b))
            {
                return Err(RoutingError::UnregisteredBackend {
                    key,
                    backend: *backend,
                });
            }
        }
        Ok(())
    }

    /// Find the route for an event type: exact match, else longest prefix.
    pub fn lookup(&self, event_type: &str) -> Result<&RouteEntry, LookupError> {
        if let Some(entry) = self.exact.get(event_type) {
            return Ok(entry);
        }

        // One prefix per length, so walking lengths downward finds the
        // longest match first.
        let boundaries: Vec<usize> = std::iter::once(0)
            .chain(event_type.char_indices().map(|(i, c)| i + c.len_utf8()))
            .collect();
        for end in boundaries.into_iter().rev() {
            if let Some(entry) = self.prefixes.get(&event_type[..end]) {
                return Ok(entry);
            }
        }

        Err(LookupError::NoRoute(event_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, exact first then prefixes, each group sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut exact: Vec<String> = self.exact.keys().cloned().collect();
        exact.sort();
        let mut prefixes: Vec<String> = self.prefixes.keys().map(|p| format!("{}*", p)).collect();
        prefixes.sort();
        exact.extend(prefixes);
        exact
    }
}
