//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use futures::stream;

use llm_sse_relay::config::{Config, CorsOrigins, ProviderConfig, ServerConfig};
use llm_sse_relay::provider::{FragmentStream, ProviderClient, ProviderError, StreamChunk};
use llm_sse_relay::server::api::{build_router, AppState};
use llm_sse_relay::telemetry::{NoopReporter, Run, RunOutcome, TelemetryError, TraceReporter};

/// One scripted provider step.
#[derive(Debug, Clone)]
pub enum Step {
    Text(&'static str),
    Fail,
}

/// Provider that replays a fixed script on every call.
pub struct ScriptedProvider {
    steps: Vec<Step>,
    open_error: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            open_error: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Provider whose call is rejected before any fragment (bad credentials).
    pub fn rejecting() -> Self {
        Self {
            open_error: true,
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, _model: &str, _prompt: &str) -> Result<FragmentStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.open_error {
            return Err(ProviderError::from_status(
                401,
                r#"{"error":{"message":"API key not valid"}}"#.to_string(),
            ));
        }

        let items: Vec<Result<StreamChunk, ProviderError>> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Text(text) => Ok(StreamChunk::text(*text)),
                Step::Fail => Err(ProviderError::RateLimited(
                    "internal quota object {\"code\":429}".to_string(),
                )),
            })
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// What a [`RecordingReporter`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Start { prompt: String },
    End { output: String, outcome: RunOutcome },
}

/// Reporter that keeps every call in memory, optionally failing each one.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<Recorded>>,
    pub failing: bool,
}

impl RecordingReporter {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    fn result(&self) -> Result<(), TelemetryError> {
        if self.failing {
            Err(TelemetryError::Rejected {
                status: 503,
                body: "backend down".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TraceReporter for RecordingReporter {
    async fn start(&self, run: &Run) -> Result<(), TelemetryError> {
        self.events.lock().unwrap().push(Recorded::Start {
            prompt: run.prompt.clone(),
        });
        self.result()
    }

    async fn end(&self, run: &Run, outcome: &RunOutcome) -> Result<(), TelemetryError> {
        self.events.lock().unwrap().push(Recorded::End {
            output: run.output.clone(),
            outcome: outcome.clone(),
        });
        self.result()
    }
}

pub fn test_config(cors_origins: CorsOrigins) -> Config {
    Config {
        server: ServerConfig {
            cors_origins,
            stream_idle_timeout: Duration::from_secs(5),
        },
        provider: ProviderConfig::new("test-key", "gemini-test"),
        tracing: None,
    }
}

pub fn router_with(
    config: Config,
    provider: Arc<dyn ProviderClient>,
    reporter: Arc<dyn TraceReporter>,
) -> Router {
    build_router(Arc::new(AppState {
        config: Arc::new(config),
        provider,
        reporter,
    }))
}

pub fn router(provider: Arc<dyn ProviderClient>) -> Router {
    router_with(
        test_config(CorsOrigins::Any),
        provider,
        Arc::new(NoopReporter),
    )
}

pub fn ask_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ask")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `cond` until it holds or a second has passed.
pub async fn wait_for(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
