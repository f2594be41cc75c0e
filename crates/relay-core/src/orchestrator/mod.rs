//! Execution orchestrator -- drives one run from [`RunConfig`] to [`Output`].
//!
//! The deadline timer, the heartbeat ticker and the engine future are armed
//! together and polled in one `select!` loop on the caller's task:
//!
//! ```text
//! INIT ──arm──> RUNNING ──engine Ok, not cancelled──> COMPLETED ─┐
//!                  │  ──cancel set / Cancelled─────────> CANCELLED ─┼─> Output
//!                  └──engine Err / panic───────────────> FAILED ────┘
//! ```
//!
//! Cancellation always wins classification: once the signal is set, whatever
//! the engine returns (including an error or a panic) is reported as a
//! timed-out success.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::{Activity, ActivityAggregator, ActivityItem};
use crate::cancel::CancelReason;
use crate::config::RunConfig;
use crate::diagnostics::Diagnostics;
use crate::engine::{Engine, EngineCallbacks, EngineError, EngineResult, Metadata};
use crate::heartbeat::{HEARTBEAT_INTERVAL, Heartbeat};
use crate::output::{self, ErrorCode, Output};

type EngineOutcome = Result<Result<EngineResult, EngineError>, Box<dyn Any + Send>>;

/// Runs exactly one engine per call and always produces an [`Output`].
#[derive(Debug, Clone)]
pub struct Orchestrator<'a> {
    diagnostics: &'a Diagnostics,
    heartbeat_interval: Duration,
    filter_diagnostics: bool,
}

impl<'a> Orchestrator<'a> {
    /// An orchestrator writing heartbeats to `diagnostics`, filtering other
    /// diagnostic output for the duration of each run.
    pub fn new(diagnostics: &'a Diagnostics) -> Self {
        Self {
            diagnostics,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            filter_diagnostics: true,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Whether to intercept the diagnostic channel while a run is active.
    pub fn with_filtering(mut self, enabled: bool) -> Self {
        self.filter_diagnostics = enabled;
        self
    }

    /// Run `engine` against `config` until it finishes, fails or is
    /// cancelled, and assemble the single result document.
    pub async fn execute(&self, config: RunConfig, engine: &dyn Engine) -> Output {
        info!(
            engine = %config.backend,
            effort = %config.effort,
            timeout_secs = config.timeout.as_secs(),
            dir = %config.working_dir.display(),
            "starting run"
        );

        let started = Instant::now();
        let guard = self.filter_diagnostics.then(|| self.diagnostics.intercept());
        let heartbeat = Heartbeat::new(self.diagnostics, started, self.heartbeat_interval);
        let aggregator = ActivityAggregator::new();
        let callbacks = RunCallbacks {
            heartbeat: &heartbeat,
            activity: &aggregator,
        };
        let mut ticker = heartbeat.ticker();
        let deadline = tokio::time::sleep(config.timeout);
        tokio::pin!(deadline);
        let mut deadline_fired = false;

        let outcome: EngineOutcome = {
            let run = AssertUnwindSafe(engine.run(&config, &callbacks)).catch_unwind();
            tokio::pin!(run);
            loop {
                tokio::select! {
                    biased;
                    outcome = &mut run => break outcome,
                    () = &mut deadline, if !deadline_fired => {
                        deadline_fired = true;
                        if config.cancel.trigger(CancelReason::Deadline) {
                            debug!("deadline elapsed, cancelling engine");
                        }
                    }
                    _ = ticker.tick() => {
                        heartbeat.tick();
                    }
                }
            }
        };

        let assembled = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let heartbeat_count = heartbeat.stop();
            let activity = aggregator.finalize(heartbeat_count).unwrap_or_else(|e| {
                warn!(error = %e, "activity already finalized, reporting heartbeats only");
                Activity::with_heartbeats(heartbeat_count)
            });
            classify(&config, outcome, elapsed_ms(started), activity)
        }));
        // Assembly drops the engine's outcome, so a panic payload with a
        // panicking destructor lands here.
        let output = assembled.unwrap_or_else(|payload| {
            let heartbeat_count = heartbeat.stop();
            Output::failure(
                config.backend.as_str(),
                ErrorCode::SdkError,
                format!("failed to assemble result: {}", panic_message(&*payload)),
                elapsed_ms(started),
                Activity::with_heartbeats(heartbeat_count),
            )
        });
        drop(guard);

        match &output {
            Output::Success(s) => info!(
                engine = %s.engine,
                timed_out = s.timed_out,
                duration_ms = s.duration_ms,
                heartbeats = s.activity.heartbeat_count,
                "run finished"
            ),
            Output::Error(e) => error!(
                engine = %e.engine,
                code = ?e.code,
                duration_ms = e.duration_ms,
                error = %e.error,
                "run failed"
            ),
        }
        output
    }
}

/// Routes engine callbacks into the run's heartbeat and aggregator.
struct RunCallbacks<'r, 'd> {
    heartbeat: &'r Heartbeat<'d>,
    activity: &'r ActivityAggregator,
}

impl EngineCallbacks for RunCallbacks<'_, '_> {
    fn on_heartbeat(&self, description: &str) {
        self.heartbeat.set_status(description);
    }

    fn on_item(&self, item: ActivityItem) {
        self.activity.record(item);
    }
}

fn classify(config: &RunConfig, outcome: EngineOutcome, duration_ms: u64, activity: Activity) -> Output {
    let backend = config.backend;
    let cancelled =
        config.cancel.is_cancelled() || matches!(outcome, Ok(Err(EngineError::Cancelled)));

    if cancelled {
        let metadata = match outcome {
            Ok(Ok(result)) => result.metadata,
            Ok(Err(e)) => {
                debug!(error = %e, "engine unwound after cancellation");
                Metadata::default()
            }
            Err(payload) => {
                debug!(panic = %panic_message(&*payload), "engine panicked after cancellation");
                Metadata::default()
            }
        };
        let response = match config.cancel.reason() {
            Some(CancelReason::Deadline) => output::timeout_placeholder(config.timeout.as_secs()),
            _ => output::INTERRUPTED_RESPONSE.to_string(),
        };
        return Output::timed_out(
            backend,
            response,
            duration_ms,
            activity,
            with_model(metadata, config),
        );
    }

    match outcome {
        Ok(Ok(result)) => Output::completed(
            backend,
            result.response,
            duration_ms,
            activity,
            with_model(result.metadata, config),
        ),
        Ok(Err(e)) => Output::failure(
            backend.as_str(),
            ErrorCode::SdkError,
            e.to_string(),
            duration_ms,
            activity,
        ),
        Err(payload) => Output::failure(
            backend.as_str(),
            ErrorCode::SdkError,
            format!("engine panicked: {}", panic_message(&*payload)),
            duration_ms,
            activity,
        ),
    }
}

/// Fill in the configured model when the engine did not resolve one.
fn with_model(mut metadata: Metadata, config: &RunConfig) -> Metadata {
    if metadata.model.is_none() {
        metadata.model = config.model.clone();
    }
    metadata
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::output::EMPTY_RESPONSE;
    use async_trait::async_trait;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Reports a file edit, sleeps, then answers.
    struct SlowEngine {
        work: Duration,
        response: &'static str,
    }

    #[async_trait]
    impl Engine for SlowEngine {
        fn backend(&self) -> Backend {
            Backend::Claude
        }

        async fn run(
            &self,
            config: &RunConfig,
            callbacks: &dyn EngineCallbacks,
        ) -> Result<EngineResult, EngineError> {
            callbacks.on_heartbeat("editing");
            callbacks.on_item(ActivityItem::file_change("a.rs"));
            tokio::select! {
                _ = tokio::time::sleep(self.work) => Ok(EngineResult::new(self.response)),
                _ = config.cancel.cancelled() => Err(EngineError::Cancelled),
            }
        }
    }

    fn config(timeout_secs: u64) -> RunConfig {
        let mut config = RunConfig::new(Backend::Claude, "do it", std::env::temp_dir());
        config.timeout = Duration::from_secs(timeout_secs);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_counts_heartbeats() {
        let sink = Buffer::default();
        let diagnostics = Diagnostics::new(Box::new(sink.clone()));
        let engine = SlowEngine {
            work: Duration::from_secs(40),
            response: "done",
        };
        let output = Orchestrator::new(&diagnostics)
            .execute(config(100), &engine)
            .await;

        let Output::Success(s) = output else {
            panic!("expected success");
        };
        assert!(!s.timed_out);
        assert_eq!(s.response, "done");
        assert_eq!(s.activity.heartbeat_count, 2);
        assert_eq!(s.activity.files_changed, vec!["a.rs"]);
        assert_eq!(
            sink.text(),
            "[heartbeat] 15s — editing\n[heartbeat] 30s — editing\n"
        );
        assert!(!diagnostics.is_filtering());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_timed_out_success() {
        let diagnostics = Diagnostics::new(Box::new(io::sink()));
        let engine = SlowEngine {
            work: Duration::from_secs(3600),
            response: "never",
        };
        let run = config(20);
        let cancel = run.cancel.clone();
        let output = Orchestrator::new(&diagnostics).execute(run, &engine).await;

        assert_eq!(cancel.reason(), Some(CancelReason::Deadline));
        assert_eq!(output.exit_code(), 0);
        let Output::Success(s) = output else {
            panic!("expected success");
        };
        assert!(s.timed_out);
        assert_eq!(s.response, output::timeout_placeholder(20));
        assert_eq!(s.activity.heartbeat_count, 1);
        assert_eq!(s.duration_ms, 20_000);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_gets_placeholder_and_configured_model() {
        let diagnostics = Diagnostics::new(Box::new(io::sink()));
        let engine = SlowEngine {
            work: Duration::from_secs(1),
            response: "",
        };
        let mut run = config(10);
        run.model = Some("opus".to_string());
        let Output::Success(s) = Orchestrator::new(&diagnostics).execute(run, &engine).await else {
            panic!("expected success");
        };
        assert_eq!(s.response, EMPTY_RESPONSE);
        assert_eq!(s.metadata.model.as_deref(), Some("opus"));
    }

    #[test]
    fn cancellation_outranks_engine_errors() {
        let run = config(5);
        run.cancel.trigger(CancelReason::Interrupt);
        let outcome: EngineOutcome = Ok(Err(EngineError::Backend("socket closed".into())));
        let output = classify(&run, outcome, 10, Activity::default());
        let Output::Success(s) = output else {
            panic!("expected success");
        };
        assert!(s.timed_out);
        assert_eq!(s.response, output::INTERRUPTED_RESPONSE);
    }

    #[test]
    fn engine_observed_cancellation_without_signal_is_interrupted() {
        let run = config(5);
        let output = classify(&run, Ok(Err(EngineError::Cancelled)), 10, Activity::default());
        let Output::Success(s) = output else {
            panic!("expected success");
        };
        assert_eq!(s.response, output::INTERRUPTED_RESPONSE);
    }

    /// Panic payload whose destructor panics again.
    struct LoudPayload;

    impl Drop for LoudPayload {
        fn drop(&mut self) {
            panic!("payload dropped");
        }
    }

    struct LoudPanicEngine;

    #[async_trait]
    impl Engine for LoudPanicEngine {
        fn backend(&self) -> Backend {
            Backend::Gemini
        }

        async fn run(
            &self,
            _config: &RunConfig,
            callbacks: &dyn EngineCallbacks,
        ) -> Result<EngineResult, EngineError> {
            callbacks.on_item(ActivityItem::command("make"));
            std::panic::panic_any(LoudPayload)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panic_while_assembling_still_yields_one_document() {
        let diagnostics = Diagnostics::new(Box::new(io::sink()));
        let mut run = config(30);
        run.backend = Backend::Gemini;
        let output = Orchestrator::new(&diagnostics)
            .execute(run, &LoudPanicEngine)
            .await;

        assert!(!diagnostics.is_filtering());
        assert_eq!(output.exit_code(), 1);
        let Output::Error(e) = output else {
            panic!("expected error");
        };
        assert_eq!(e.engine, "gemini");
        assert_eq!(e.code, ErrorCode::SdkError);
        assert_eq!(e.error, "failed to assemble result: payload dropped");
        assert_eq!(e.duration_ms, 0);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let run = config(5);
        let payload: Box<dyn Any + Send> = Box::new("adapter bug");
        let output = classify(&run, Err(payload), 3, Activity::with_heartbeats(2));
        let Output::Error(e) = output else {
            panic!("expected error");
        };
        assert_eq!(e.code, ErrorCode::SdkError);
        assert_eq!(e.error, "engine panicked: adapter bug");
        assert_eq!(e.activity.heartbeat_count, 2);
    }
}
