//! Caller-facing session handle

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use crate::config::SessionConfig;
use crate::net::{HttpNetwork, Network, NetworkError};
use crate::protocol::message::{
    elimination_payload, hit_payload, position_payload, shoot_payload,
};
use crate::protocol::{
    EventKind, GameMessage, GpsCoord, Payload, Position, SessionEvent, TransportKind,
};

use super::driver::{Command, ConnectionInfo, Driver};
use super::router::{EventRouter, HandlerRegistry};

/// Handle to one player's multiplayer session.
///
/// Every call is forwarded to a driver task that owns the transports.
/// Async methods return once the driver has finished the request, so after
/// `connect().await` the connection state reflects the outcome of the first
/// attempt. Dropping the handle disconnects.
pub struct MultiplayerSession {
    player_id: String,
    commands: mpsc::UnboundedSender<Command>,
    info: watch::Receiver<ConnectionInfo>,
    handlers: HandlerRegistry,
}

impl MultiplayerSession {
    /// Spawn the driver on the current tokio runtime.
    ///
    /// Returns the handle and the receiver for every inbound and synthetic
    /// event, in arrival order.
    pub fn start(
        config: SessionConfig,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = watch::channel(ConnectionInfo::default());

        let handlers = HandlerRegistry::default();
        let player_id = config.player_id.clone();
        let router = EventRouter::new(player_id.clone(), events_tx, handlers.clone());

        let driver = Driver::new(config, network, router, info_tx);
        tokio::spawn(driver.run(commands_rx));

        let session = Self {
            player_id,
            commands: commands_tx,
            info: info_rx,
            handlers,
        };
        (session, events_rx)
    }

    /// Start a session over the real network stack
    pub fn over_http(
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), NetworkError> {
        let network = HttpNetwork::new()?;
        Ok(Self::start(config, Arc::new(network)))
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub async fn connect(&self) {
        self.request(|done| Command::Connect { done }).await;
    }

    /// Send an event on the best available transport.
    ///
    /// Outside a session, or for local-only kinds, the event is logged and
    /// dropped.
    pub async fn emit(&self, kind: EventKind, data: Payload) {
        self.request(|done| Command::Emit { kind, data, done }).await;
    }

    pub async fn send_position_update(&self, position: Position, gps: GpsCoord) {
        self.emit(EventKind::PositionUpdate, position_payload(position, gps))
            .await;
    }

    pub async fn send_shoot(&self, target_id: &str, crosshair: Position) {
        self.emit(EventKind::Shoot, shoot_payload(target_id, crosshair))
            .await;
    }

    pub async fn send_hit(&self, target_id: &str, damage: u32) {
        self.emit(EventKind::Hit, hit_payload(target_id, damage)).await;
    }

    pub async fn send_elimination(&self, target_id: &str) {
        self.emit(EventKind::Elimination, elimination_payload(target_id))
            .await;
    }

    pub async fn disconnect(&self) {
        self.request(|done| Command::Disconnect { done }).await;
    }

    /// Register a listener for `kind`, replacing any previous one.
    /// Listeners run on the driver task before the event is queued.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&GameMessage) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn off(&self, kind: EventKind) -> bool {
        self.handlers.remove(kind)
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info.borrow().clone()
    }

    /// Subscribe to connection state changes
    pub fn watch(&self) -> watch::Receiver<ConnectionInfo> {
        self.info.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.info.borrow().is_connected
    }

    pub fn transport(&self) -> TransportKind {
        self.info.borrow().transport
    }

    async fn request(&self, build: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(build(done_tx)).is_err() {
            warn!(player_id = %self.player_id, "Session driver stopped, request dropped");
            return;
        }
        let _ = done_rx.await;
    }
}
