//! Scripted adapters and an HTTP test server for unit tests.

use super::{Adapter, AdapterError, PublishReceipt};
use crate::envelope::Envelope;
use crate::target::{BackendId, TargetDescriptor};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a stub does on one publish call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Ok,
    /// 503 from the backend
    Transient,
    /// 400 from the backend
    Permanent,
    Panic,
    /// Sleep, then succeed; cancellation cuts the sleep short
    Delay(Duration),
    /// Never finishes unless cancelled
    Hang,
}

/// Adapter that plays back a script, then repeats its fallback step.
pub struct StubAdapter {
    backend: BackendId,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    correlation_ids: Mutex<Vec<String>>,
}

impl StubAdapter {
    pub fn new(backend: BackendId, fallback: Step) -> Self {
        Self {
            backend,
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            correlation_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(backend: BackendId) -> Self {
        Self::new(backend, Step::Ok)
    }

    pub fn failing(backend: BackendId, step: Step) -> Self {
        Self::new(backend, step)
    }

    /// Play `steps` first, then fall back to success.
    pub fn scripted(backend: BackendId, steps: impl IntoIterator<Item = Step>) -> Self {
        let stub = Self::ok(backend);
        stub.script.lock().unwrap().extend(steps);
        stub
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn correlation_ids(&self) -> Vec<String> {
        self.correlation_ids.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        self.script.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Adapter for StubAdapter {
    fn backend_id(&self) -> BackendId {
        self.backend
    }

    async fn publish(
        &self,
        envelope: &Envelope,
        _target: &TargetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PublishReceipt, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.correlation_ids
            .lock()
            .unwrap()
            .push(envelope.correlation_id().to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.next_step() {
            Step::Ok => Ok(PublishReceipt::accepted(Some(format!("{}-ok", self.backend)))),
            Step::Transient => Err(AdapterError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
            Step::Permanent => Err(AdapterError::Status {
                status: 400,
                body: "bad request".into(),
            }),
            Step::Panic => panic!("stub adapter panicked"),
            Step::Delay(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(PublishReceipt::accepted(None)),
                }
            }
            Step::Hang => {
                cancel.cancelled().await;
                Err(AdapterError::Cancelled)
            }
        }
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_http(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
