use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use skyrelay::adapters::HealthStatus;
use skyrelay::config::RouterSettings;
use skyrelay::event::Event;
use skyrelay::handler::{handle_cloudwatch_event, CloudWatchEvent, HandlerResponse};
use skyrelay::outcome::{DispatchOutcome, FailureReason, Overall};
use skyrelay::shutdown::ShutdownSignal;

#[derive(Clone)]
struct AppState {
    router: Arc<skyrelay::Router>,
    /// Bearer token for the API routes; open when unset
    api_key: Option<String>,
    /// Cancelled on shutdown; every dispatch runs under it
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() {
    // 1. Initialize Logging
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "Skyrelay server failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // 2. Setup Configuration
    let settings = RouterSettings::load()?;
    let api_key = settings.api_key.clone();
    if api_key.is_none() {
        warn!("SKYRELAY_API_KEY not set, API routes accept unauthenticated requests");
    }

    // 3. Build the router
    let router = Arc::new(settings.build_router()?);
    info!(
        routes = ?router.table().keys(),
        backends = ?router.registry().list(),
        max_concurrency = router.max_concurrency(),
        "Router ready"
    );

    let shutdown = ShutdownSignal::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.listen().await }
    });

    let app_state = Arc::new(AppState {
        router,
        api_key,
        shutdown: shutdown.token(),
    });

    // 4. Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        drain_timeout_secs = shutdown.timeout().as_secs(),
        "Skyrelay listening on {}", addr
    );

    let drain = shutdown.clone();
    let server = axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async move { drain.wait().await })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = shutdown.drain_expired() => {}
    }

    info!("Skyrelay stopped");
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/api/v1/events", post(route_event))
        .route("/api/v1/eventbridge", post(eventbridge_event))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    // Skip auth for health check and metrics
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let report = state.router.health().await;
    let code = if report.overall == HealthStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "status": report.overall,
            "backends": report.per_backend,
        })),
    )
}

/// Get metrics endpoint - returns router counters as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.router.metrics().snapshot();
    Json(json!({
        "version": snapshot.version,
        "uptime_seconds": snapshot.uptime_seconds,
        "uptime": snapshot.uptime,
        "events": snapshot.events,
        "backends": snapshot.backends,
        "status": if state.shutdown.is_cancelled() { "stopping" } else { "running" },
    }))
}

async fn route_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Event>, JsonRejection>,
) -> (StatusCode, Json<DispatchOutcome>) {
    let mut event = match payload {
        Ok(Json(event)) => event,
        Err(rejection) => {
            let message = rejection.body_text();
            warn!(error = %message, "Rejected malformed event body");
            let outcome = DispatchOutcome::rejected("", FailureReason::InvalidEvent, message);
            return (StatusCode::BAD_REQUEST, Json(outcome));
        }
    };
    debug!(event_type = %event.event_type, "Received event");

    if event.metadata.correlation_id.is_none() {
        event.metadata.correlation_id = headers
            .get("X-Correlation-ID")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    let outcome = state.router.route_with_cancel(event, &state.shutdown).await;
    (status_for(&outcome), Json(outcome))
}

fn status_for(outcome: &DispatchOutcome) -> StatusCode {
    match (outcome.overall, outcome.reason) {
        (Overall::Success, _) => StatusCode::OK,
        (Overall::Partial, _) => StatusCode::MULTI_STATUS,
        (Overall::Failure, Some(FailureReason::InvalidEvent | FailureReason::InvalidPayload)) => {
            StatusCode::BAD_REQUEST
        }
        (Overall::Failure, Some(FailureReason::NoRoute)) => StatusCode::NOT_FOUND,
        (Overall::Failure, _) => StatusCode::BAD_GATEWAY,
    }
}

async fn eventbridge_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<CloudWatchEvent>,
) -> (StatusCode, Json<HandlerResponse>) {
    let response = handle_cloudwatch_event(&state.router, event, &state.shutdown).await;
    let code = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(response))
}
