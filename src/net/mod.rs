//! Network seam between the session driver and the outside world
//!
//! The driver only ever talks to a [`Network`]. [`HttpNetwork`] is the real
//! implementation; tests script their own.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
mod socket;
mod stream;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use url::Url;

pub use http::HttpNetwork;

/// Network operations the session needs
#[async_trait]
pub trait Network: Send + Sync {
    /// `GET` the health endpoint; `Ok` on a 2xx with a readable body
    async fn fetch_health(&self, url: &Url) -> Result<(), NetworkError>;

    /// Open the bidirectional primary transport
    async fn open_socket(&self, url: &Url) -> Result<SocketLink, NetworkError>;

    /// Open the one-way server-to-client event stream
    async fn open_stream(&self, url: &Url) -> Result<StreamLink, NetworkError>;

    /// `POST` a JSON body, returning the HTTP status code
    async fn post_json(&self, url: &Url, body: &Value) -> Result<u16, NetworkError>;
}

/// An open primary transport, as a pair of text-frame channels.
///
/// Dropping the link closes the outbound side; frames already queued are
/// still written before the socket is closed.
#[derive(Debug)]
pub struct SocketLink {
    outbound: mpsc::Sender<String>,
    pub(crate) inbound: mpsc::Receiver<String>,
    reader: Option<AbortHandle>,
}

impl SocketLink {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            outbound,
            inbound,
            reader: None,
        }
    }

    /// Abort `reader` when the link is dropped
    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    /// True while the writer side still accepts frames
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub async fn send(&self, frame: String) -> Result<(), NetworkError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| NetworkError::Closed)
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// An open fallback event stream (server to client only)
#[derive(Debug)]
pub struct StreamLink {
    pub(crate) inbound: mpsc::Receiver<String>,
    task: Option<AbortHandle>,
}

impl StreamLink {
    pub fn new(inbound: mpsc::Receiver<String>) -> Self {
        Self {
            inbound,
            task: None,
        }
    }

    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.task = Some(task);
        self
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

impl Drop for StreamLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Insufficient resources: {0}")]
    ResourceExhausted(String),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Transport closed")]
    Closed,
}

impl NetworkError {
    /// Too many in-flight requests or open files; worth one delayed retry
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, NetworkError::ResourceExhausted(_))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if exhausts_resources(&err) {
            NetworkError::ResourceExhausted(err.to_string())
        } else {
            NetworkError::Request(err)
        }
    }
}

// EMFILE / ENFILE
const TOO_MANY_OPEN_FILES: [i32; 2] = [24, 23];

fn exhausts_resources(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::OutOfMemory
                || io
                    .raw_os_error()
                    .is_some_and(|code| TOO_MANY_OPEN_FILES.contains(&code))
            {
                return true;
            }
        }
        source = current.source();
    }
    false
}
