//! Fan-out of a child process output stream.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered lines per stream before slow listeners start skipping.
const STREAM_CAPACITY: usize = 1024;

/// Which output stream of the node a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// A line-oriented output stream that listeners attach to.
///
/// Listeners only see chunks emitted after they subscribed. Delivery order
/// is preserved per stream; nothing is guaranteed across streams.
#[derive(Debug, Clone)]
pub struct OutputStream {
    name: StreamName,
    tx: broadcast::Sender<String>,
}

impl OutputStream {
    #[must_use]
    pub fn new(name: StreamName) -> Self {
        let (tx, _rx) = broadcast::channel(STREAM_CAPACITY);
        Self { name, tx }
    }

    #[must_use]
    pub fn name(&self) -> StreamName {
        self.name
    }

    /// Deliver a chunk to every attached listener.
    pub fn emit(&self, chunk: impl Into<String>) {
        let _ = self.tx.send(chunk.into());
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of listeners currently holding a subscription.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Pump lines from `reader` into this stream until EOF.
    ///
    /// Attach listeners before calling this, or the first lines may be lost.
    pub fn pipe_from<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stream = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => stream.emit(line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(stream = %stream.name, error = %e, "Node output read failed");
                        break;
                    }
                }
            }
            tracing::debug!(stream = %stream.name, "Node output closed");
        })
    }
}
