//! Graceful shutdown coordination for Skyrelay.
//!
//! [`ShutdownSignal`] wraps a [`CancellationToken`]. The server stops
//! accepting requests when it fires, and every in-flight dispatch that was
//! handed the same token (or a child of it) cancels its publishes and
//! backoffs.
//!
//! # Example
//!
//! ```rust,ignore
//! use skyrelay::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let token = shutdown.token();
//!
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { shutdown.listen().await }
//! });
//!
//! router.route_with_cancel(event, &token).await;
//! ```

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default time in-flight requests get to drain, in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// Process-wide shutdown trigger; clones share the same token.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Token to pass to `route_with_cancel`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    ///
    /// Returns early if the token is cancelled some other way.
    pub async fn listen(&self) {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            _ = ctrl_c() => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        self.token.cancel();
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown without a signal.
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.token.cancel();
    }

    /// Resolves `timeout` after shutdown was triggered; bounds the drain of
    /// in-flight requests.
    pub async fn drain_expired(&self) {
        self.token.cancelled().await;
        tokio::time::sleep(self.timeout).await;
        warn!(
            timeout_secs = self.timeout.as_secs(),
            "Drain timeout reached, forcing shutdown"
        );
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            error!(error = %err, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
