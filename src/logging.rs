//! Logging capability for node output and supervisor diagnostics.
//!
//! Lines from the node and the supervisor's own messages about it go
//! through a [`NodeLogger`], so embedders can route them wherever they want.
//! The default forwards to `tracing`.

use std::sync::{Arc, PoisonError, RwLock};

/// Sink for node-related log messages.
pub trait NodeLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `node_supervisor::node` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl NodeLogger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "node_supervisor::node", "{}", message.trim_end());
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "node_supervisor::node", "{}", message.trim_end());
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "node_supervisor::node", "{}", message.trim_end());
    }
}

/// Replaceable logger shared between the supervisor and its tasks.
#[derive(Clone)]
pub struct LoggerSlot {
    inner: Arc<RwLock<Arc<dyn NodeLogger>>>,
}

impl LoggerSlot {
    #[must_use]
    pub fn new(logger: Arc<dyn NodeLogger>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(logger)),
        }
    }

    /// Swap the logger; running tasks pick it up on their next message.
    pub fn replace(&self, logger: Arc<dyn NodeLogger>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = logger;
    }

    fn current(&self) -> Arc<dyn NodeLogger> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for LoggerSlot {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl std::fmt::Debug for LoggerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerSlot").finish_non_exhaustive()
    }
}

impl NodeLogger for LoggerSlot {
    fn info(&self, message: &str) {
        self.current().info(message);
    }

    fn warn(&self, message: &str) {
        self.current().warn(message);
    }

    fn error(&self, message: &str) {
        self.current().error(message);
    }
}

/// In-memory logger for tests and embedders that want to inspect output.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: std::sync::Mutex<Vec<(LogLevel, String)>>,
}

/// Level recorded by [`MemoryLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl MemoryLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages logged at `level`.
    #[must_use]
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}

impl NodeLogger for MemoryLogger {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}
