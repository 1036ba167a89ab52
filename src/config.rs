//! Configuration module for Skyrelay.
//!
//! Settings come from the environment first, then an optional TOML file
//! (`SKYRELAY_CONFIG`, default `config/skyrelay.toml`) whose values win.
//! `${VAR}` placeholders in the file are substituted from the environment.
//!
//! # Example
//!
//! ```toml
//! [router]
//! project_name = "go-coffee"
//! environment = "prod"
//! max_concurrency = 32
//!
//! [backends.gcp]
//! enabled = true
//! region = "europe-west1"
//! access_token = "${GCP_ACCESS_TOKEN}"
//!
//! [routes."coffee.order.created"]
//! aws_target = "order-processor"
//! gcp_target = "order-handler"
//! priority = 1
//! retry_policy = "exponential_backoff"
//! required = ["aws"]
//!
//! [routes."coffee.*".azure_target]
//! target = "coffee-events"
//! topic_endpoint = "https://coffee.westeurope-1.eventgrid.azure.net/api/events"
//! ```
//!
//! Routes come from the file's `[routes]`, else from `EVENT_ROUTING_TABLE`
//! (inline JSON of the same shape), else from the built-in default table.

use crate::adapters::aws::EventBridgeAdapter;
use crate::adapters::azure::{EventGridAdapter, EventGridClient, HttpEventGridClient};
use crate::adapters::gcp::{endpoint_for_region, HttpPubSubClient, PubSubAdapter, PubSubClient};
use crate::adapters::{AdapterRegistry, DryRunClient};
use crate::dispatch::DEFAULT_MAX_CONCURRENCY;
use crate::envelope::EnvelopeBuilder;
use crate::event::RetryPolicyName;
use crate::router::{Router, RouterError};
use crate::table::{RetryPolicy, RouteEntry, RouteKey, RoutingError, RoutingTable, DEFAULT_ATTEMPT_TIMEOUT};
use crate::target::{AwsTarget, AzureTarget, BackendId, GcpTarget, TargetDescriptor};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/skyrelay.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse EVENT_ROUTING_TABLE: {0}")]
    RoutingTableJson(#[from] serde_json::Error),

    #[error("Invalid substitution pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid routing table: {0}")]
    Routing(#[from] RoutingError),

    #[error("Router construction failed: {0}")]
    Router(#[from] RouterError),
}

/// Where the routing table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutesSource {
    File,
    Environment,
    Default,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub environment: String,
    pub project_name: String,
    pub default_source_cloud: String,
    pub max_concurrency: usize,
    /// Log instead of calling the cloud APIs
    pub dry_run: bool,

    pub port: u16,
    pub api_key: Option<String>,

    pub aws_region: String,

    pub gcp_enabled: bool,
    pub gcp_region: String,
    pub gcp_project_id: Option<String>,
    pub gcp_access_token: Option<String>,
    pub gcp_endpoint: Option<String>,

    pub azure_enabled: bool,
    pub azure_location: String,
    pub azure_access_key: Option<String>,

    pub routes: BTreeMap<String, RouteConfig>,
    pub routes_source: RoutesSource,
}

impl RouterSettings {
    /// Settings from environment variables alone. `lookup` is `std::env::var`
    /// in production and a map in tests.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let flag = |name: &str| lookup(name).as_deref() == Some("true");

        let max_concurrency = match var("ROUTER_MAX_CONCURRENCY") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("ROUTER_MAX_CONCURRENCY must be an integer, got '{}'", raw))
            })?,
            None => DEFAULT_MAX_CONCURRENCY,
        };
        let port = match var("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("PORT must be a port number, got '{}'", raw)))?,
            None => default_port(),
        };

        let (routes, routes_source) = match var("EVENT_ROUTING_TABLE") {
            Some(json) => (serde_json::from_str(&json)?, RoutesSource::Environment),
            None => (default_routes(), RoutesSource::Default),
        };

        Ok(Self {
            environment: var("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()),
            project_name: var("PROJECT_NAME").unwrap_or_else(|| "skyrelay".to_string()),
            default_source_cloud: var("DEFAULT_SOURCE_CLOUD").unwrap_or_else(|| "aws".to_string()),
            max_concurrency,
            dry_run: flag("SKYRELAY_DRY_RUN"),
            port,
            api_key: var("SKYRELAY_API_KEY"),
            aws_region: var("AWS_REGION").unwrap_or_default(),
            gcp_enabled: flag("ENABLE_GCP_ROUTING"),
            gcp_region: var("GCP_REGION").unwrap_or_default(),
            gcp_project_id: var("GCP_PROJECT_ID"),
            gcp_access_token: var("GCP_ACCESS_TOKEN"),
            gcp_endpoint: None,
            azure_enabled: flag("ENABLE_AZURE_ROUTING"),
            azure_location: var("AZURE_LOCATION").unwrap_or_default(),
            azure_access_key: var("AZURE_EVENTGRID_KEY"),
            routes,
            routes_source,
        })
    }

    /// Load from the process environment and the file named by
    /// `SKYRELAY_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("SKYRELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path, |name| env::var(name).ok())
    }

    pub fn load_from<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::from_env(&lookup)?;
        if let Some(file) = FileConfig::load_from(path, &lookup)? {
            settings.apply(file);
        }
        settings.validate()?;

        info!(
            environment = %settings.environment,
            project = %settings.project_name,
            routes = settings.routes.len(),
            routes_source = ?settings.routes_source,
            gcp_enabled = settings.gcp_enabled,
            azure_enabled = settings.azure_enabled,
            dry_run = settings.dry_run,
            "Configuration loaded"
        );
        Ok(settings)
    }

    /// Overlay file values on top of environment values.
    pub fn apply(&mut self, file: FileConfig) {
        let FileConfig {
            server,
            router,
            backends,
            routes,
        } = file;

        override_with(&mut self.port, server.port);
        if server.api_key.is_some() {
            self.api_key = server.api_key;
        }

        override_with(&mut self.environment, router.environment);
        override_with(&mut self.project_name, router.project_name);
        override_with(&mut self.default_source_cloud, router.default_source_cloud);
        override_with(&mut self.max_concurrency, router.max_concurrency);
        override_with(&mut self.dry_run, router.dry_run);

        override_with(&mut self.aws_region, backends.aws.region);

        override_with(&mut self.gcp_enabled, backends.gcp.enabled);
        override_with(&mut self.gcp_region, backends.gcp.region);
        if backends.gcp.project_id.is_some() {
            self.gcp_project_id = backends.gcp.project_id;
        }
        if backends.gcp.access_token.is_some() {
            self.gcp_access_token = backends.gcp.access_token;
        }
        self.gcp_endpoint = backends.gcp.endpoint.or(self.gcp_endpoint.take());

        override_with(&mut self.azure_enabled, backends.azure.enabled);
        override_with(&mut self.azure_location, backends.azure.location);
        if backends.azure.access_key.is_some() {
            self.azure_access_key = backends.azure.access_key;
        }

        if !routes.is_empty() {
            self.routes = routes;
            self.routes_source = RoutesSource::File;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_source_cloud.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default source cloud must not be empty".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::ValidationError("project name must not be empty".to_string()));
        }

        for (key, route) in &self.routes {
            let backends = targeted_backends(route);
            if backends.is_empty() {
                warn!(route = %key, "Route declares no targets");
            } else {
                debug!(route = %key, backends = ?backends, "Route targets");
            }
            for value in [&route.aws_target, &route.gcp_target, &route.azure_target]
                .into_iter()
                .flatten()
            {
                if value.name().is_some_and(|n| n.contains("${")) {
                    warn!(route = %key, "Route target contains unsubstituted environment variable");
                }
            }
        }
        Ok(())
    }

    /// Default EventBridge bus: `{project}-{environment}-event-bus`.
    pub fn default_event_bus(&self) -> String {
        format!("{}-{}-event-bus", self.project_name, self.environment)
    }

    /// Default EventBridge `Source`: `{project}.cross-cloud`.
    pub fn default_aws_source(&self) -> String {
        format!("{}.cross-cloud", self.project_name)
    }

    /// Lambda ARN for a route's AWS target name.
    pub fn lambda_arn(&self, target: &str) -> String {
        format!(
            "arn:aws:lambda:{}:*:function:{}-{}-{}",
            self.aws_region, self.project_name, self.environment, target
        )
    }

    /// Turn the route configuration into a validated table.
    pub fn build_routing_table(&self) -> Result<RoutingTable, ConfigError> {
        let mut entries = Vec::with_capacity(self.routes.len());
        for (key, route) in &self.routes {
            let route_key = if route.prefix && !key.ends_with('*') {
                RouteKey::Prefix(key.clone())
            } else {
                RouteKey::parse(key)
            };
            entries.push((route_key, self.route_entry(key, route)));
        }
        Ok(RoutingTable::build(entries)?)
    }

    fn route_entry(&self, key: &str, route: &RouteConfig) -> RouteEntry {
        let mut entry = RouteEntry::new(route.priority)
            .with_retry_policy(route.retry.to_policy(route.retry_policy))
            .with_required(route.required.iter().copied());

        if let Some(setting) = route.aws_target.as_ref().filter(|s| !s.is_blank()) {
            let o = setting.overrides();
            let resource_arns = match (&o.resource_arns, setting.name()) {
                (Some(arns), _) => arns.clone(),
                (None, Some(name)) => vec![self.lambda_arn(name)],
                (None, None) => Vec::new(),
            };
            let target = AwsTarget {
                event_bus_name: o.event_bus_name.clone().unwrap_or_else(|| self.default_event_bus()),
                detail_type: o.detail_type.clone(),
                source_literal: o.source_literal.clone().unwrap_or_else(|| self.default_aws_source()),
                resource_arns,
            };
            entry = entry.with_prioritized_target(
                o.priority.unwrap_or(route.priority),
                TargetDescriptor::Aws(target),
            );
        }

        if let Some(setting) = route.gcp_target.as_ref().filter(|s| !s.is_blank()) {
            let o = setting.overrides();
            let mut attributes = o.attributes.clone().unwrap_or_default();
            if let Some(name) = setting.name() {
                attributes.entry("target".to_string()).or_insert_with(|| name.to_string());
            }
            let target = GcpTarget {
                topic_name: o.topic_name.clone(),
                attributes,
            };
            entry = entry.with_prioritized_target(
                o.priority.unwrap_or(route.priority),
                TargetDescriptor::Gcp(target),
            );
        }

        if let Some(setting) = route.azure_target.as_ref().filter(|s| !s.is_blank()) {
            let o = setting.overrides();
            let target = AzureTarget {
                topic_endpoint: o.topic_endpoint.clone(),
                subject: o.subject.clone().or_else(|| setting.name().map(str::to_string)),
                event_type_literal: o.event_type_literal.clone(),
            };
            entry = entry.with_prioritized_target(
                o.priority.unwrap_or(route.priority),
                TargetDescriptor::Azure(target),
            );
        }

        debug!(route = %key, targets = entry.per_backend.len(), "Built route entry");
        entry
    }

    /// One adapter per backend. Without credentials, or in dry-run mode, the
    /// adapters log instead of calling the cloud.
    pub fn build_registry(&self) -> AdapterRegistry {
        let dry_run = Arc::new(DryRunClient::with_prefix(self.environment.clone()));
        let mut registry = AdapterRegistry::new();

        // No EventBridge SDK is linked; entries are logged.
        registry.register(
            Arc::new(EventBridgeAdapter::new(dry_run.clone())),
            true,
            self.aws_region.clone(),
        );

        let pubsub: Arc<dyn PubSubClient> = match (&self.gcp_access_token, self.dry_run) {
            (Some(token), false) => {
                let endpoint = self
                    .gcp_endpoint
                    .clone()
                    .unwrap_or_else(|| endpoint_for_region(&self.gcp_region));
                let project = self.gcp_project_id.clone().unwrap_or_else(|| self.project_name.clone());
                Arc::new(HttpPubSubClient::new(endpoint, project, token.clone()))
            }
            _ => {
                if self.gcp_enabled && !self.dry_run {
                    warn!("GCP routing enabled without GCP_ACCESS_TOKEN, Pub/Sub publishes will be logged only");
                }
                dry_run.clone()
            }
        };
        registry.register(
            Arc::new(PubSubAdapter::new(pubsub, self.project_name.clone())),
            self.gcp_enabled,
            self.gcp_region.clone(),
        );

        let event_grid: Arc<dyn EventGridClient> = match (&self.azure_access_key, self.dry_run) {
            (Some(key), false) => Arc::new(HttpEventGridClient::new(key.clone())),
            _ => {
                if self.azure_enabled && !self.dry_run {
                    warn!("Azure routing enabled without AZURE_EVENTGRID_KEY, Event Grid sends will be logged only");
                }
                dry_run
            }
        };
        registry.register(
            Arc::new(EventGridAdapter::new(
                event_grid,
                self.project_name.clone(),
                self.azure_location.clone(),
            )),
            self.azure_enabled,
            self.azure_location.clone(),
        );

        registry
    }

    /// Build the whole router from these settings.
    pub fn build_router(&self) -> Result<Router, ConfigError> {
        let table = self.build_routing_table()?;
        let registry = self.build_registry();
        let envelopes = EnvelopeBuilder::new(self.project_name.clone(), self.default_source_cloud.clone());
        Ok(Router::new(envelopes, table, registry)?.with_max_concurrency(self.max_concurrency))
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn default_port() -> u16 {
    3000
}

/// The table used when neither the file nor `EVENT_ROUTING_TABLE` has one.
pub fn default_routes() -> BTreeMap<String, RouteConfig> {
    BTreeMap::from([(
        "coffee.order.created".to_string(),
        RouteConfig {
            aws_target: Some(TargetSetting::Name("order-processor".to_string())),
            gcp_target: Some(TargetSetting::Name("order-handler".to_string())),
            azure_target: Some(TargetSetting::Name("order-function".to_string())),
            priority: 1,
            retry_policy: RetryPolicyName::ExponentialBackoff,
            retry: RetryConfig::default(),
            required: Vec::new(),
            prefix: false,
        },
    )])
}

/// Configuration of one route, as written in TOML or `EVENT_ROUTING_TABLE`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RouteConfig {
    #[serde(default)]
    pub aws_target: Option<TargetSetting>,

    #[serde(default)]
    pub gcp_target: Option<TargetSetting>,

    #[serde(default)]
    pub azure_target: Option<TargetSetting>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub retry_policy: RetryPolicyName,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Backends that must succeed
    #[serde(default)]
    pub required: Vec<BackendId>,

    /// Treat the key as a prefix even without a trailing `*`
    #[serde(default)]
    pub prefix: bool,
}

/// A target written as a bare name or as a table of overrides.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum TargetSetting {
    Name(String),
    Detailed(TargetOverrides),
}

static NO_OVERRIDES: TargetOverrides = TargetOverrides {
    target: None,
    priority: None,
    event_bus_name: None,
    detail_type: None,
    source_literal: None,
    resource_arns: None,
    topic_name: None,
    attributes: None,
    topic_endpoint: None,
    subject: None,
    event_type_literal: None,
};

impl TargetSetting {
    pub fn name(&self) -> Option<&str> {
        match self {
            TargetSetting::Name(name) => Some(name),
            TargetSetting::Detailed(o) => o.target.as_deref(),
        }
    }

    fn overrides(&self) -> &TargetOverrides {
        match self {
            TargetSetting::Name(_) => &NO_OVERRIDES,
            TargetSetting::Detailed(o) => o,
        }
    }

    /// An empty name means "no target", as in `"gcp_target": ""`.
    fn is_blank(&self) -> bool {
        matches!(self, TargetSetting::Name(name) if name.trim().is_empty())
    }
}

/// Per-target fields; each backend reads only its own.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct TargetOverrides {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,

    // aws
    #[serde(default)]
    pub event_bus_name: Option<String>,
    #[serde(default)]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub source_literal: Option<String>,
    #[serde(default)]
    pub resource_arns: Option<Vec<String>>,

    // gcp
    #[serde(default)]
    pub topic_name: Option<String>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,

    // azure
    #[serde(default)]
    pub topic_endpoint: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub event_type_literal: Option<String>,
}

/// Retry parameters; anything unset takes the policy's default.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl RetryConfig {
    /// Defaults: fixed 3 x 500ms, exponential 3 attempts from 100ms up to 2s,
    /// 5s per attempt.
    pub fn to_policy(&self, name: RetryPolicyName) -> RetryPolicy {
        let attempt_timeout = self
            .attempt_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT);

        match name {
            RetryPolicyName::None => RetryPolicy::None { attempt_timeout },
            RetryPolicyName::Fixed => RetryPolicy::Fixed {
                max_attempts: self.max_attempts.unwrap_or(3),
                delay: Duration::from_millis(self.delay_ms.unwrap_or(500)),
                attempt_timeout,
            },
            RetryPolicyName::ExponentialBackoff => RetryPolicy::ExponentialBackoff {
                max_attempts: self.max_attempts.unwrap_or(3),
                base_delay: Duration::from_millis(self.base_delay_ms.unwrap_or(100)),
                max_delay: Duration::from_millis(self.max_delay_ms.unwrap_or(2_000)),
                attempt_timeout,
            },
        }
    }
}

/// The TOML file as written; every field optional.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub backends: BackendsSection,

    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RouterSection {
    pub environment: Option<String>,
    pub project_name: Option<String>,
    pub default_source_cloud: Option<String>,
    pub max_concurrency: Option<usize>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendsSection {
    #[serde(default)]
    pub aws: AwsSection,
    #[serde(default)]
    pub gcp: GcpSection,
    #[serde(default)]
    pub azure: AzureSection,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AwsSection {
    pub region: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GcpSection {
    pub enabled: Option<bool>,
    pub region: Option<String>,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    /// Overrides the regional endpoint
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AzureSection {
    pub enabled: Option<bool>,
    pub location: Option<String>,
    pub access_key: Option<String>,
}

impl FileConfig {
    /// Read and parse `path`. A missing file is `Ok(None)`.
    pub fn load_from<P, F>(path: P, lookup: F) -> Result<Option<Self>, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using environment only");
            return Ok(None);
        }

        info!(path = %path.display(), "Loading configuration");
        let content = fs::read_to_string(path)?;
        Self::parse(&content, lookup).map(Some)
    }

    pub fn parse<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = substitute_env_vars(content, lookup)?;
        debug!("Parsing TOML configuration");
        Ok(toml::from_str(&content)?)
    }
}

/// Substitute `${VAR_NAME}` placeholders; unset variables stay as written.
fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match lookup(var_name) {
                Some(value) => value,
                None => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string())
}

/// Backends a route config names a non-blank target for.
fn targeted_backends(route: &RouteConfig) -> BTreeSet<BackendId> {
    [
        (BackendId::Aws, &route.aws_target),
        (BackendId::Gcp, &route.gcp_target),
        (BackendId::Azure, &route.azure_target),
    ]
    .into_iter()
    .filter(|(_, setting)| setting.as_ref().is_some_and(|s| !s.is_blank()))
    .map(|(backend, _)| backend)
    .collect()
}
