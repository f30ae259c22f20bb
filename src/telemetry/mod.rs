//! Best-effort run tracing to an observability backend.
//!
//! - [`langsmith`]: LangSmith run-ingestion reporter
//!
//! A [`TraceReporter`] is chosen once at startup: the LangSmith reporter when
//! credentials are configured, [`NoopReporter`] otherwise. Reporting happens
//! on detached tasks through a [`RunTracker`]; failures are logged and dropped.

pub mod langsmith;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LangSmithConfig;
use crate::provider::{StreamChunk, TokenUsage};

/// Display name of every run.
pub const RUN_NAME: &str = "Gemini Stream Call";

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("tracing backend unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracing backend rejected run ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// One prompt-to-completion lifecycle.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub provider: String,
    pub temperature: Option<f32>,
    pub start_time: DateTime<Utc>,
    pub first_token_time: Option<DateTime<Utc>>,
    /// Concatenated output text.
    pub output: String,
    /// Latest usage reported by the provider.
    pub usage: Option<TokenUsage>,
    pub fragments: usize,
}

impl Run {
    pub fn new(
        prompt: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            model: model.into(),
            provider: provider.into(),
            temperature,
            start_time: Utc::now(),
            first_token_time: None,
            output: String::new(),
            usage: None,
            fragments: 0,
        }
    }

    /// Fold one provider chunk into the run.
    pub fn record(&mut self, chunk: &StreamChunk) {
        if self.first_token_time.is_none() {
            self.first_token_time = Some(Utc::now());
        }
        if !chunk.text.is_empty() {
            self.fragments += 1;
        }
        self.output.push_str(&chunk.text);
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

/// Sink for run lifecycle events.
#[async_trait]
pub trait TraceReporter: Send + Sync {
    /// Record the start of a run.
    async fn start(&self, run: &Run) -> Result<(), TelemetryError>;

    /// Record the end of a run.
    async fn end(&self, run: &Run, outcome: &RunOutcome) -> Result<(), TelemetryError>;
}

/// Reporter used when no observability credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl TraceReporter for NoopReporter {
    async fn start(&self, _run: &Run) -> Result<(), TelemetryError> {
        Ok(())
    }

    async fn end(&self, _run: &Run, _outcome: &RunOutcome) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Pick the reporter variant for this process.
pub fn reporter_from_config(config: Option<&LangSmithConfig>) -> Arc<dyn TraceReporter> {
    match config {
        Some(cfg) => match langsmith::LangSmithReporter::new(cfg) {
            Ok(reporter) => {
                info!(endpoint = %cfg.endpoint, project = %cfg.project, "LangSmith tracing enabled");
                Arc::new(reporter)
            }
            Err(e) => {
                warn!("LangSmith client could not be built, tracing disabled: {e}");
                Arc::new(NoopReporter)
            }
        },
        None => {
            info!("No tracing credentials, run tracing disabled");
            Arc::new(NoopReporter)
        }
    }
}

/// Drives one [`Run`] through a reporter without ever blocking the caller.
///
/// The start report is spawned on creation. The end report is spawned by
/// [`RunTracker::finish`] and waits for the start report first. A tracker
/// dropped before `finish` reports the run as failed.
pub struct RunTracker {
    reporter: Arc<dyn TraceReporter>,
    run: Run,
    start: Option<JoinHandle<()>>,
    finished: bool,
}

impl RunTracker {
    pub fn start(reporter: Arc<dyn TraceReporter>, run: Run) -> Self {
        let start = {
            let reporter = reporter.clone();
            let snapshot = run.clone();
            spawn_report(async move {
                if let Err(e) = reporter.start(&snapshot).await {
                    warn!(run_id = %snapshot.id, "Failed to report run start: {e}");
                }
            })
        };

        Self {
            reporter,
            run,
            start,
            finished: false,
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn record(&mut self, chunk: &StreamChunk) {
        self.run.record(chunk);
    }

    /// Report the end of the run. Only the first call has any effect.
    pub fn finish(&mut self, outcome: RunOutcome) -> Option<JoinHandle<()>> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let reporter = self.reporter.clone();
        let run = self.run.clone();
        let start = self.start.take();
        spawn_report(async move {
            if let Some(start) = start {
                if let Err(e) = start.await {
                    warn!(run_id = %run.id, "Run start report task failed: {e}");
                }
            }
            if let Err(e) = reporter.end(&run, &outcome).await {
                warn!(run_id = %run.id, "Failed to report run end: {e}");
            }
        })
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        if !self.finished {
            debug!(run_id = %self.run.id, "Run dropped before completion");
            self.finish(RunOutcome::Failed("client disconnected".to_string()));
        }
    }
}

fn spawn_report<F>(fut: F) -> Option<JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(fut)),
        Err(_) => {
            debug!("No runtime available, skipping run report");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TraceReporter for Recorder {
        async fn start(&self, run: &Run) -> Result<(), TelemetryError> {
            self.events.lock().unwrap().push(format!("start:{}", run.prompt));
            Ok(())
        }

        async fn end(&self, run: &Run, outcome: &RunOutcome) -> Result<(), TelemetryError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("end:{}:{:?}", run.output, outcome));
            Ok(())
        }
    }

    #[test]
    fn test_run_record() {
        let mut run = Run::new("why?", "gemini", "google_genai", None);
        assert!(run.first_token_time.is_none());

        run.record(&StreamChunk::text("Because"));
        run.record(&StreamChunk {
            text: " reasons.".to_string(),
            done: true,
            finish_reason: Some("STOP".to_string()),
            usage: Some(TokenUsage {
                input_tokens: 3,
                output_tokens: 4,
            }),
        });

        assert!(run.first_token_time.is_some());
        assert_eq!(run.output, "Because reasons.");
        assert_eq!(run.fragments, 2);
        assert_eq!(run.usage.map(|u| u.total_tokens()), Some(7));
    }

    #[test]
    fn test_run_record_skips_empty_chunks_in_count() {
        let mut run = Run::new("why?", "gemini", "google_genai", None);
        run.record(&StreamChunk::text("Because"));
        run.record(&StreamChunk {
            text: String::new(),
            done: true,
            finish_reason: Some("STOP".to_string()),
            usage: Some(TokenUsage {
                input_tokens: 3,
                output_tokens: 1,
            }),
        });

        assert_eq!(run.fragments, 1);
        assert_eq!(run.output, "Because");
        assert_eq!(run.usage.map(|u| u.total_tokens()), Some(4));
    }

    #[tokio::test]
    async fn test_tracker_orders_start_before_end() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = RunTracker::start(
            recorder.clone(),
            Run::new("q", "m", "p", None),
        );
        tracker.record(&StreamChunk::text("a"));
        let handle = tracker.finish(RunOutcome::Completed).unwrap();
        handle.await.unwrap();

        assert!(tracker.finish(RunOutcome::Completed).is_none());
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start:q".to_string(), "end:a:Completed".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_tracker_reports_failure() {
        let recorder = Arc::new(Recorder::default());
        {
            let _tracker = RunTracker::start(recorder.clone(), Run::new("q", "m", "p", None));
        }

        for _ in 0..50 {
            if recorder.events.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events[1], "end::Failed(\"client disconnected\")");
    }

    struct PanickingStart {
        ended: Mutex<Vec<RunOutcome>>,
    }

    #[async_trait]
    impl TraceReporter for PanickingStart {
        async fn start(&self, _run: &Run) -> Result<(), TelemetryError> {
            panic!("start report blew up");
        }

        async fn end(&self, _run: &Run, outcome: &RunOutcome) -> Result<(), TelemetryError> {
            self.ended.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_end_reported_after_start_task_panics() {
        let reporter = Arc::new(PanickingStart {
            ended: Mutex::new(Vec::new()),
        });
        let mut tracker = RunTracker::start(reporter.clone(), Run::new("q", "m", "p", None));
        tracker
            .finish(RunOutcome::Completed)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(*reporter.ended.lock().unwrap(), vec![RunOutcome::Completed]);
    }

    #[test]
    fn test_noop_without_config() {
        // Only checks selection; the no-op variant never touches the network.
        let _reporter = reporter_from_config(None);
    }
}
