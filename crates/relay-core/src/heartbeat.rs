//! Periodic liveness lines on the diagnostic channel.
//!
//! The emitter itself owns no task: the orchestrator polls [`Heartbeat::ticker`]
//! alongside the engine future and calls [`Heartbeat::tick`] on each firing.
//! Once [`Heartbeat::stop`] returns, no further line can be written.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::diagnostics::Diagnostics;

/// Period between heartbeat lines.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Status shown until the engine reports its first update.
pub const INITIAL_STATUS: &str = "initializing";

pub struct Heartbeat<'a> {
    diagnostics: &'a Diagnostics,
    started: Instant,
    interval: Duration,
    status: Mutex<String>,
    count: AtomicU64,
    stopped: AtomicBool,
}

impl<'a> Heartbeat<'a> {
    pub fn new(diagnostics: &'a Diagnostics, started: Instant, interval: Duration) -> Self {
        Self {
            diagnostics,
            started,
            interval,
            status: Mutex::new(INITIAL_STATUS.to_string()),
            count: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Record the engine's latest description of what it is doing.
    pub fn set_status(&self, description: &str) {
        let description = description.trim();
        if description.is_empty() {
            return;
        }
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = description.to_string();
    }

    pub fn status(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Timer whose first firing is one interval after the run started.
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(self.started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Write one heartbeat line and return its sequence number.
    ///
    /// Returns `None` after [`stop`](Self::stop) or if the line could not be
    /// written; only written lines are counted.
    pub fn tick(&self) -> Option<u64> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs();
        let line = format!("[heartbeat] {elapsed}s — {}", self.status());
        self.diagnostics.heartbeat(&line).ok()?;
        Some(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Stop emitting and return the final tick count.
    pub fn stop(&self) -> u64 {
        self.stopped.store(true, Ordering::SeqCst);
        self.count()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Lines(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Lines {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Lines {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tick_writes_elapsed_and_status() {
        let out = Lines::default();
        let diagnostics = Diagnostics::new(Box::new(out.clone()));
        let heartbeat = Heartbeat::new(&diagnostics, Instant::now(), HEARTBEAT_INTERVAL);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(heartbeat.tick(), Some(1));
        heartbeat.set_status("running cargo test");
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(heartbeat.tick(), Some(2));

        assert_eq!(
            out.lines(),
            vec![
                "[heartbeat] 15s — initializing".to_string(),
                "[heartbeat] 30s — running cargo test".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_repeats_between_updates() {
        let out = Lines::default();
        let diagnostics = Diagnostics::new(Box::new(out.clone()));
        let heartbeat = Heartbeat::new(&diagnostics, Instant::now(), HEARTBEAT_INTERVAL);
        heartbeat.set_status("reading files");
        heartbeat.tick();
        heartbeat.set_status("   ");
        heartbeat.tick();
        let lines = out.lines();
        assert!(lines.iter().all(|l| l.ends_with("reading files")));
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_after_stop() {
        let diagnostics = Diagnostics::new(Box::new(io::sink()));
        let heartbeat = Heartbeat::new(&diagnostics, Instant::now(), HEARTBEAT_INTERVAL);
        heartbeat.tick();
        assert_eq!(heartbeat.stop(), 1);
        assert_eq!(heartbeat.tick(), None);
        assert_eq!(heartbeat.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_not_counted() {
        let diagnostics = Diagnostics::new(Box::new(FailingSink));
        let heartbeat = Heartbeat::new(&diagnostics, Instant::now(), HEARTBEAT_INTERVAL);
        assert_eq!(heartbeat.tick(), None);
        assert_eq!(heartbeat.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_first_fires_after_one_interval() {
        let diagnostics = Diagnostics::new(Box::new(io::sink()));
        let start = Instant::now();
        let heartbeat = Heartbeat::new(&diagnostics, start, HEARTBEAT_INTERVAL);
        let mut ticker = heartbeat.ticker();
        let fired = ticker.tick().await;
        assert_eq!(fired - start, HEARTBEAT_INTERVAL);
    }
}
