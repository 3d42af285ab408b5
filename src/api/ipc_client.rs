//! JSON-RPC over the node's IPC endpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::{ControlApi, ControlApiError};

/// Default timeout for one request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

trait IpcStream: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send> IpcStream for T {}

type BoxedStream = Pin<Box<dyn IpcStream>>;

/// In-flight requests by id.
type Pending = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

struct Connection {
    serial: u64,
    endpoint: PathBuf,
    writer: WriteHalf<BoxedStream>,
    pending: Pending,
    /// Cancelled once the connection is unusable.
    lost: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

fn connection_closed() -> ControlApiError {
    ControlApiError::Transport(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "node closed the IPC connection",
    ))
}

/// Route responses to their callers until EOF, a read error, or `lost`.
async fn read_responses(reader: ReadHalf<BoxedStream>, pending: Pending, lost: CancellationToken) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            biased;
            () = lost.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match serde_json::from_str::<RpcResponse>(line.trim()) {
                    Ok(response) => {
                        let waiter = response.id.and_then(|id| {
                            pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&id)
                        });
                        match waiter {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => tracing::debug!(id = ?response.id, "Unsolicited IPC message"),
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Unparseable IPC message"),
                },
                Ok(None) => {
                    tracing::debug!("IPC connection closed by node");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IPC read failed");
                    break;
                }
            },
        }
    }
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    lost.cancel();
}

/// Control API client for a local node.
///
/// One connection is held at a time. A background reader matches responses
/// to requests by id and marks the connection lost on EOF; [`ControlApi::closed`]
/// resolves at that point.
pub struct IpcControlClient {
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    next_serial: AtomicU64,
    timeout: Duration,
}

impl IpcControlClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
            next_serial: AtomicU64::new(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout duration for each call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Endpoint of the open connection, if any.
    pub async fn endpoint(&self) -> Option<PathBuf> {
        self.conn
            .lock()
            .await
            .as_ref()
            .filter(|c| !c.lost.is_cancelled())
            .map(|c| c.endpoint.clone())
    }

    #[cfg(unix)]
    async fn open(endpoint: &Path) -> std::io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(endpoint).await?;
        Ok(Box::pin(stream))
    }

    #[cfg(windows)]
    async fn open(endpoint: &Path) -> std::io::Result<BoxedStream> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint)?;
        Ok(Box::pin(pipe))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Write one request; returns the connection serial and the response slot.
    async fn send(
        &self,
        id: u64,
        line: &str,
    ) -> Result<(u64, oneshot::Receiver<RpcResponse>), ControlApiError> {
        let mut guard = self.conn.lock().await;
        if guard.as_ref().is_some_and(|c| c.lost.is_cancelled()) {
            *guard = None;
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ControlApiError::NotConnected);
        };

        let (tx, rx) = oneshot::channel();
        conn.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.flush().await?;
        Ok((conn.serial, rx))
    }

    /// Drop connection `serial` after a transport failure, waking `closed`.
    async fn discard(&self, serial: Option<u64>) {
        let mut guard = self.conn.lock().await;
        if guard
            .as_ref()
            .is_some_and(|c| serial.map_or(true, |s| c.serial == s))
        {
            if let Some(conn) = guard.take() {
                conn.lost.cancel();
                tracing::debug!(endpoint = %conn.endpoint.display(), "IPC connection dropped");
            }
        }
    }

    async fn call(&self, method: &str) -> Result<serde_json::Value, ControlApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": [],
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let deadline = tokio::time::Instant::now() + self.timeout;
        let (serial, rx) = match tokio::time::timeout_at(deadline, self.send(id, &line)).await {
            Ok(Ok(sent)) => sent,
            Ok(Err(ControlApiError::NotConnected)) => return Err(ControlApiError::NotConnected),
            Ok(Err(e)) => {
                if e.is_transport() {
                    self.discard(None).await;
                }
                return Err(e);
            }
            Err(_) => {
                self.discard(None).await;
                return Err(ControlApiError::Timeout(self.timeout_ms()));
            }
        };

        let response = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.discard(Some(serial)).await;
                return Err(connection_closed());
            }
            Err(_) => {
                self.discard(Some(serial)).await;
                return Err(ControlApiError::Timeout(self.timeout_ms()));
            }
        };

        if let Some(error) = response.error {
            return Err(ControlApiError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(ControlApiError::InvalidResponse)
    }

    async fn call_string(&self, method: &str) -> Result<String, ControlApiError> {
        match self.call(method).await? {
            serde_json::Value::String(s) => Ok(s),
            _ => Err(ControlApiError::InvalidResponse),
        }
    }
}

impl Default for IpcControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IpcControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcControlClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ControlApi for IpcControlClient {
    async fn connect(&self, endpoint: &Path) -> Result<(), ControlApiError> {
        let stream = tokio::time::timeout(self.timeout, Self::open(endpoint))
            .await
            .map_err(|_| ControlApiError::Timeout(self.timeout_ms()))??;
        let (reader, writer) = tokio::io::split(stream);
        let pending = Pending::default();
        let lost = CancellationToken::new();
        tokio::spawn(read_responses(reader, Arc::clone(&pending), lost.clone()));

        let previous = self.conn.lock().await.replace(Connection {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            endpoint: endpoint.to_path_buf(),
            writer,
            pending,
            lost,
        });
        if let Some(previous) = previous {
            previous.lost.cancel();
        }
        tracing::debug!(endpoint = %endpoint.display(), "IPC connection opened");
        Ok(())
    }

    async fn node_version(&self) -> Result<String, ControlApiError> {
        self.call_string("web3_clientVersion").await
    }

    async fn network_id(&self) -> Result<String, ControlApiError> {
        self.call_string("net_version").await
    }

    async fn data_dir(&self) -> Result<PathBuf, ControlApiError> {
        self.call_string("admin_datadir").await.map(PathBuf::from)
    }

    async fn closed(&self) {
        let lost = self.conn.lock().await.as_ref().map(|c| c.lost.clone());
        if let Some(lost) = lost {
            lost.cancelled().await;
        }
    }

    async fn reset(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            conn.lost.cancel();
            let _ = conn.writer.shutdown().await;
            tracing::debug!(endpoint = %conn.endpoint.display(), "IPC connection reset");
        }
    }
}
