//! Startup log classification.

use std::time::Duration;

/// Logged by the node when its clock drifts from network time.
pub const CLOCK_SKEW_MARKER: &str = "clock seems off";

/// Any of these marks a failed boot.
pub const FATAL_MARKERS: [&str; 2] = ["Fatal", "Synchronisation failed"];

/// Logged once the control endpoint accepts connections.
pub const READY_MARKER: &str = "IPC endpoint opened";

/// Signals the startup filter derives from node output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupSignal {
    TimeNotSynced(String),
    Fatal(String),
    Ready,
    /// Neither ready nor fatal was seen within the startup window.
    TimedOut(Duration),
}

/// Per-session classifier behind the startup filter.
///
/// Markers are checked in order clock-skew, fatal, ready. After a fatal
/// line, ready markers are ignored for the rest of the session, and ready
/// is reported at most once.
#[derive(Debug, Clone, Default)]
pub struct LineClassifier {
    fatal_seen: bool,
    ready_seen: bool,
}

impl LineClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inspect(&mut self, chunk: &str) -> Vec<StartupSignal> {
        let mut signals = Vec::new();

        if chunk.contains(CLOCK_SKEW_MARKER) {
            signals.push(StartupSignal::TimeNotSynced(chunk.to_string()));
        }

        if FATAL_MARKERS.iter().any(|marker| chunk.contains(marker)) {
            self.fatal_seen = true;
            signals.push(StartupSignal::Fatal(chunk.to_string()));
        }

        if !self.fatal_seen && !self.ready_seen && chunk.contains(READY_MARKER) {
            self.ready_seen = true;
            signals.push(StartupSignal::Ready);
        }

        signals
    }

    /// Ready or fatal was seen; the startup timeout no longer applies.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.fatal_seen || self.ready_seen
    }
}
