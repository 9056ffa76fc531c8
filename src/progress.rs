//! Progress Output
//!
//! [`ProgressSink`] implementations. Transient lines overwrite each other in
//! place so a long wait prints one rolling status line instead of one line
//! per poll.

use crate::domain::ports::ProgressSink;
use parking_lot::Mutex;
use std::io::Write;
use tracing::{debug, info};

const CLEAR_LINE: &str = "\x1b[2K\r";

// =============================================================================
// Terminal Sink
// =============================================================================

struct TerminalState<W> {
    writer: W,
    /// A transient line is currently on screen without a trailing newline
    transient_open: bool,
}

/// Writes progress to a terminal-like writer
pub struct TerminalProgress<W: Write + Send> {
    state: Mutex<TerminalState<W>>,
}

impl<W: Write + Send> TerminalProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(TerminalState {
                writer,
                transient_open: false,
            }),
        }
    }

    /// Consume the sink and return the writer
    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

impl TerminalProgress<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ProgressSink for TerminalProgress<W> {
    fn report(&self, line: &str) {
        let mut state = self.state.lock();
        let close = if state.transient_open { "\n" } else { "" };
        state.transient_open = false;
        // write errors are ignored
        let _ = writeln!(state.writer, "{}{}", close, line);
        let _ = state.writer.flush();
    }

    fn report_transient(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let prefix = if state.transient_open { CLEAR_LINE } else { "" };
        state.transient_open = true;
        let _ = write!(state.writer, "{}{}", prefix, line);
        let _ = state.writer.flush();
    }
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Sends progress to the tracing subscriber, for non-interactive runs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, line: &str) {
        info!(target: "rook_migrate::progress", "{}", line);
    }

    fn report_transient(&self, line: &str) {
        if !line.is_empty() {
            debug!(target: "rook_migrate::progress", "{}", line);
        }
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Keeps every line in memory; used by tests and by callers that want to
/// attach the transcript to an error report
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
    transient: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn transient_lines(&self) -> Vec<String> {
        self.transient.lock().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn report_transient(&self, line: &str) {
        if !line.is_empty() {
            self.transient.lock().push(line.to_string());
        }
    }
}
