//! LangSmith run ingestion.
//!
//! A run is created with `POST /runs` and closed with `PATCH /runs/{id}`.
//! Each relay request is a root run, so its `trace_id` is its own id and its
//! `dotted_order` is the start timestamp followed by the id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ApiKey, LangSmithConfig};
use crate::telemetry::{Run, RunOutcome, TelemetryError, TraceReporter, RUN_NAME};

/// Reporter that ships runs to a LangSmith-compatible endpoint.
pub struct LangSmithReporter {
    http: reqwest::Client,
    api_key: ApiKey,
    endpoint: String,
    project: String,
}

impl LangSmithReporter {
    pub fn new(config: &LangSmithConfig) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project: config.project.clone(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), TelemetryError> {
        let response = request
            .header("x-api-key", self.api_key.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TraceReporter for LangSmithReporter {
    async fn start(&self, run: &Run) -> Result<(), TelemetryError> {
        let body = create_run_body(run, &self.project);
        debug!(run_id = %run.id, "Posting run start");
        self.send(self.http.post(format!("{}/runs", self.endpoint)).json(&body))
            .await
    }

    async fn end(&self, run: &Run, outcome: &RunOutcome) -> Result<(), TelemetryError> {
        let body = update_run_body(run, outcome, Utc::now());
        debug!(run_id = %run.id, ?outcome, "Patching run end");
        self.send(
            self.http
                .patch(format!("{}/runs/{}", self.endpoint, run.id))
                .json(&body),
        )
        .await
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `dotted_order` of a root run.
pub fn dotted_order(run: &Run) -> String {
    format!("{}{}", run.start_time.format("%Y%m%dT%H%M%S%6fZ"), run.id)
}

fn metadata(run: &Run) -> Value {
    json!({
        "ls_model_name": run.model,
        "ls_model_type": "llm",
        "ls_provider": run.provider,
        "ls_run_depth": 0,
        "ls_temperature": run.temperature,
    })
}

fn create_run_body(run: &Run, project: &str) -> Value {
    json!({
        "id": run.id,
        "name": RUN_NAME,
        "run_type": "llm",
        "inputs": { "prompt": run.prompt },
        "start_time": timestamp(run.start_time),
        "session_name": project,
        "trace_id": run.id,
        "dotted_order": dotted_order(run),
        "extra": {
            "metadata": metadata(run),
            "invocation_params": {
                "model": run.model,
                "candidate_count": 1,
                "temperature": run.temperature,
            },
            "options": { "streaming": true },
        },
    })
}

fn update_run_body(run: &Run, outcome: &RunOutcome, end_time: DateTime<Utc>) -> Value {
    let mut metadata = metadata(run);
    if let Some(usage) = run.usage {
        metadata["usage_metadata"] = json!({
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
            "total_tokens": usage.total_tokens(),
        });
    }

    let events: Vec<Value> = run
        .first_token_time
        .map(|t| json!({ "name": "new_token", "time": timestamp(t) }))
        .into_iter()
        .collect();

    let mut body = json!({
        "end_time": timestamp(end_time),
        "trace_id": run.id,
        "dotted_order": dotted_order(run),
        "events": events,
        "extra": { "metadata": metadata },
    });

    match outcome {
        RunOutcome::Completed => body["outputs"] = json!({ "output": run.output }),
        RunOutcome::Failed(error) => body["error"] = json!(error),
    }
    body
}
