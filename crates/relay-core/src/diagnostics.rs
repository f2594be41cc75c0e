//! The diagnostic channel (stderr) and its scoped interception.
//!
//! While an [`InterceptGuard`] is alive, ordinary writes through
//! [`DiagnosticWriter`] are swallowed so backend chatter and log lines do not
//! reach the supervisor. Heartbeat lines bypass the filter. The binary routes
//! its `tracing` subscriber through [`Diagnostics::global`], so a guard held
//! by the orchestrator silences logging for exactly the duration of a run.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

static GLOBAL: LazyLock<Diagnostics> = LazyLock::new(|| Diagnostics::new(Box::new(io::stderr())));

pub struct Diagnostics {
    sink: Mutex<Box<dyn Write + Send>>,
    filtering: AtomicBool,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("filtering", &self.is_filtering())
            .finish()
    }
}

impl Diagnostics {
    /// Create a channel writing to `sink`. Tests pass an in-memory buffer.
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
            filtering: AtomicBool::new(false),
        }
    }

    /// The process-wide channel backed by stderr.
    pub fn global() -> &'static Diagnostics {
        &GLOBAL
    }

    pub fn is_filtering(&self) -> bool {
        self.filtering.load(Ordering::SeqCst)
    }

    /// Start filtering. Dropping the guard restores the previous mode.
    pub fn intercept(&self) -> InterceptGuard<'_> {
        let previous = self.filtering.swap(true, Ordering::SeqCst);
        InterceptGuard {
            diagnostics: self,
            previous,
        }
    }

    /// Write one heartbeat line. Never filtered.
    pub fn heartbeat(&self, line: &str) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(line.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.flush()
    }

    /// A writer for ordinary diagnostic output (log lines).
    pub fn writer(&self) -> DiagnosticWriter<'_> {
        DiagnosticWriter { diagnostics: self }
    }
}

/// Restores the channel's filtering mode when dropped.
#[must_use = "interception ends as soon as the guard is dropped"]
pub struct InterceptGuard<'a> {
    diagnostics: &'a Diagnostics,
    previous: bool,
}

impl Drop for InterceptGuard<'_> {
    fn drop(&mut self) {
        self.diagnostics
            .filtering
            .store(self.previous, Ordering::SeqCst);
    }
}

/// `io::Write` handle that honours the channel's filtering mode.
pub struct DiagnosticWriter<'a> {
    diagnostics: &'a Diagnostics,
}

impl Write for DiagnosticWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.diagnostics.is_filtering() {
            return Ok(buf.len());
        }
        let mut sink = self
            .diagnostics
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sink.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.diagnostics
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}
