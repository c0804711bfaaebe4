//! Scripted network double for driver tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use super::{Network, NetworkError, SocketLink, StreamLink};

/// One recorded network call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Health,
    Socket,
    Stream,
    Post { url: String, body: Value },
}

/// Test-side ends of an opened socket
pub(crate) struct SocketPeer {
    /// Frames the client wrote
    pub sent: mpsc::Receiver<String>,
    /// Push frames to the client; drop to simulate a server-side close
    pub push: mpsc::Sender<String>,
}

#[derive(Default)]
struct Script {
    health: VecDeque<bool>,
    sockets: VecDeque<bool>,
    streams: VecDeque<bool>,
    posts: VecDeque<Result<u16, NetworkError>>,
    default_health: bool,
    default_socket: bool,
    default_stream: bool,
    hang_health: bool,
    hang_sockets: bool,
    hang_streams: bool,
    hang_posts: bool,
    calls: Vec<Call>,
    socket_peers: VecDeque<SocketPeer>,
    stream_peers: VecDeque<mpsc::Sender<String>>,
}

/// Network whose outcomes are queued by the test.
///
/// Unscripted calls fall back to the defaults: healthy server, socket and
/// stream both refused, POST answered with 200. A hung call is recorded and
/// then never completes.
#[derive(Clone, Default)]
pub(crate) struct ScriptedNetwork {
    script: Arc<Mutex<Script>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        let network = Self::default();
        network.script.lock().default_health = true;
        network
    }

    pub fn healthy(&self, healthy: bool) -> &Self {
        self.script.lock().default_health = healthy;
        self
    }

    pub fn sockets_succeed(&self, succeed: bool) -> &Self {
        self.script.lock().default_socket = succeed;
        self
    }

    pub fn streams_succeed(&self, succeed: bool) -> &Self {
        self.script.lock().default_stream = succeed;
        self
    }

    pub fn hang_health(&self) -> &Self {
        self.script.lock().hang_health = true;
        self
    }

    pub fn hang_sockets(&self) -> &Self {
        self.script.lock().hang_sockets = true;
        self
    }

    pub fn hang_streams(&self) -> &Self {
        self.script.lock().hang_streams = true;
        self
    }

    pub fn hang_posts(&self) -> &Self {
        self.script.lock().hang_posts = true;
        self
    }

    pub fn queue_health(&self, healthy: bool) -> &Self {
        self.script.lock().health.push_back(healthy);
        self
    }

    pub fn queue_socket(&self, succeed: bool) -> &Self {
        self.script.lock().sockets.push_back(succeed);
        self
    }

    pub fn queue_stream(&self, succeed: bool) -> &Self {
        self.script.lock().streams.push_back(succeed);
        self
    }

    pub fn queue_post(&self, outcome: Result<u16, NetworkError>) -> &Self {
        self.script.lock().posts.push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn count(&self, wanted: fn(&Call) -> bool) -> usize {
        self.script.lock().calls.iter().filter(|call| wanted(call)).count()
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.script
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Post { url, body } => Some((url.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }

    /// Oldest socket not yet claimed by the test
    pub fn take_socket(&self) -> SocketPeer {
        self.script
            .lock()
            .socket_peers
            .pop_front()
            .expect("no socket was opened")
    }

    pub fn take_stream(&self) -> mpsc::Sender<String> {
        self.script
            .lock()
            .stream_peers
            .pop_front()
            .expect("no stream was opened")
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch_health(&self, _url: &Url) -> Result<(), NetworkError> {
        let outcome = {
            let mut script = self.script.lock();
            script.calls.push(Call::Health);
            if script.hang_health {
                None
            } else {
                Some(script.health.pop_front().unwrap_or(script.default_health))
            }
        };

        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(NetworkError::Status(503)),
            None => std::future::pending().await,
        }
    }

    async fn open_socket(&self, _url: &Url) -> Result<SocketLink, NetworkError> {
        let outcome = {
            let mut script = self.script.lock();
            script.calls.push(Call::Socket);
            if script.hang_sockets {
                None
            } else if script.sockets.pop_front().unwrap_or(script.default_socket) {
                let (outbound_tx, outbound_rx) = mpsc::channel(64);
                let (inbound_tx, inbound_rx) = mpsc::channel(64);
                script.socket_peers.push_back(SocketPeer {
                    sent: outbound_rx,
                    push: inbound_tx,
                });
                Some(Ok(SocketLink::new(outbound_tx, inbound_rx)))
            } else {
                Some(Err(NetworkError::Unreachable("connection refused".into())))
            }
        };

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn open_stream(&self, _url: &Url) -> Result<StreamLink, NetworkError> {
        let outcome = {
            let mut script = self.script.lock();
            script.calls.push(Call::Stream);
            if script.hang_streams {
                None
            } else if script.streams.pop_front().unwrap_or(script.default_stream) {
                let (inbound_tx, inbound_rx) = mpsc::channel(64);
                script.stream_peers.push_back(inbound_tx);
                Some(Ok(StreamLink::new(inbound_rx)))
            } else {
                Some(Err(NetworkError::Status(502)))
            }
        };

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn post_json(&self, url: &Url, body: &Value) -> Result<u16, NetworkError> {
        let outcome = {
            let mut script = self.script.lock();
            script.calls.push(Call::Post {
                url: url.to_string(),
                body: body.clone(),
            });
            if script.hang_posts {
                None
            } else {
                Some(script.posts.pop_front().unwrap_or(Ok(200)))
            }
        };

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}
