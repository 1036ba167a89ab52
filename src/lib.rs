//! # Skyrelay
//!
//! A cross-cloud event router: one domain event in, zero or more publishes
//! out to AWS EventBridge, GCP Pub/Sub and Azure Event Grid.
//!
//! ## Architecture
//!
//! ```text
//! Event -> Envelope -> Routing Table -> Selector -> Dispatch Engine -> Adapters
//!                                                        │
//!                                                        ▼
//!                                                 DispatchOutcome
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Input event, metadata and routing hints
//! - [`envelope`]: Correlation and trace ids, source cloud, serialized payload
//! - [`table`]: Routing table, route entries and retry policies
//! - [`target`]: Backend ids and per-backend target descriptors
//! - [`selector`]: Strategy and filter application
//! - [`dispatch`]: Bounded concurrent publish with retry, timeout and cancellation
//! - [`outcome`]: Per-target results and the overall verdict
//! - [`adapters`]: Adapter trait, registry and the three cloud adapters
//! - [`router`]: The facade tying it together
//! - [`config`]: Environment and TOML configuration
//! - [`handler`]: EventBridge (CloudWatch envelope) entry point

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod outcome;
pub mod router;
pub mod selector;
pub mod shutdown;
pub mod table;
pub mod target;

// Re-export commonly used types at crate root
pub use adapters::{Adapter, AdapterError, AdapterRegistry};
pub use event::Event;
pub use outcome::{DispatchOutcome, Overall, TargetResult};
pub use router::Router;
pub use table::{RetryPolicy, RouteEntry, RoutingTable};
pub use target::{BackendId, TargetDescriptor};
