//! Session event loop
//!
//! One task owns every piece of connection state: the open transports, the
//! retry counters, the circuit breaker. Commands from the handle, inbound
//! frames and timers are all serialized through a single `select!`, so a send
//! never races a reconnect.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::net::{Network, NetworkError, SocketLink, StreamLink};
use crate::protocol::message::presence_payload;
use crate::protocol::{ConnectionStatus, EventKind, GameMessage, Payload, TransportKind};
use crate::util::rate_limit::OutboundLimiter;

use super::backoff::Backoff;
use super::breaker::{FallbackOutcome, HttpFallback};
use super::health::check_health;
use super::router::EventRouter;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Probing,
    ConnectingPrimary,
    ConnectingFallback,
    Connected,
    /// Every retry was used up; only an explicit `connect()` starts over
    Failed,
}

/// Read-only view of the connection, published on every transition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub phase: Phase,
    pub transport: TransportKind,
    pub is_connected: bool,
    /// Retries used by the active transport since its last successful open
    pub reconnect_attempts: u32,
}

pub(crate) enum Command {
    Connect {
        done: oneshot::Sender<()>,
    },
    Emit {
        kind: EventKind,
        data: Payload,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Health check, then primary
    Establish,
    Primary,
    Stream,
}

pub(crate) struct Driver {
    config: SessionConfig,
    network: Arc<dyn Network>,
    router: EventRouter,
    info: watch::Sender<ConnectionInfo>,
    limiter: OutboundLimiter,
    fallback: HttpFallback,

    phase: Phase,
    socket: Option<SocketLink>,
    stream: Option<StreamLink>,
    /// Between `connect()` and `disconnect()`
    in_session: bool,
    /// Set once the event stream was tried; outbound then goes over HTTP
    fallback_mode: bool,

    primary_backoff: Backoff,
    stream_backoff: Backoff,
    health_backoff: Backoff,
    retry: Option<(Instant, Retry)>,
    /// Single delayed retry after resource exhaustion
    resend: Option<(Instant, GameMessage)>,
}

impl Driver {
    pub(crate) fn new(
        config: SessionConfig,
        network: Arc<dyn Network>,
        router: EventRouter,
        info: watch::Sender<ConnectionInfo>,
    ) -> Self {
        let attempts = config.max_reconnect_attempts;
        Self {
            limiter: OutboundLimiter::new(config.position_updates_per_second),
            fallback: HttpFallback::new(network.clone(), &config),
            primary_backoff: Backoff::linear(config.reconnect_base_delay, attempts),
            stream_backoff: Backoff::linear(config.reconnect_base_delay, attempts),
            health_backoff: Backoff::fixed(config.health_retry_delay, attempts),
            config,
            network,
            router,
            info,
            phase: Phase::Idle,
            socket: None,
            stream: None,
            in_session: false,
            fallback_mode: false,
            retry: None,
            resend: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let retry_at = self.retry.as_ref().map(|(at, _)| *at);
            let resend_at = self.resend.as_ref().map(|(at, _)| *at);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                frame = next_frame(self.socket.as_mut().map(|link| &mut link.inbound)) => {
                    match frame {
                        Some(text) => self.router.route_frame(&text, TransportKind::WebSocket),
                        None => self.on_socket_lost(),
                    }
                }
                frame = next_frame(self.stream.as_mut().map(|link| &mut link.inbound)) => {
                    match frame {
                        Some(text) => {
                            self.router.route_frame(&text, TransportKind::ServerSentEvents)
                        }
                        None => self.on_stream_lost(),
                    }
                }
                _ = sleep_until_opt(retry_at) => self.fire_retry().await,
                _ = sleep_until_opt(resend_at) => self.fire_resend().await,
            }
        }

        debug!(player_id = %self.config.player_id, "Session driver stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { done } => {
                self.connect().await;
                let _ = done.send(());
            }
            Command::Emit { kind, data, done } => {
                self.emit(kind, data).await;
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    async fn connect(&mut self) {
        if self.in_session && self.phase != Phase::Failed {
            debug!(phase = ?self.phase, "Connect ignored, session already active");
            return;
        }

        info!(
            player_id = %self.config.player_id,
            server = %self.config.server_url,
            "Connecting to game server"
        );
        self.in_session = true;
        self.fallback_mode = false;
        self.primary_backoff.reset();
        self.stream_backoff.reset();
        self.health_backoff.reset();
        self.retry = None;

        self.establish().await;
    }

    async fn establish(&mut self) {
        self.set_phase(Phase::Probing);

        let healthy = check_health(
            self.network.as_ref(),
            &self.config.endpoints.health,
            self.config.health_timeout,
        )
        .await;

        if !healthy {
            self.set_phase(Phase::Idle);
            self.schedule(Retry::Establish, "server health check failed");
            return;
        }

        self.health_backoff.reset();
        self.open_primary().await;
    }

    async fn try_open_socket(&self) -> Result<SocketLink, NetworkError> {
        let limit = self.config.connect_timeout;
        match timeout(limit, self.network.open_socket(&self.config.endpoints.socket)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(limit)),
        }
    }

    async fn open_primary(&mut self) {
        self.set_phase(Phase::ConnectingPrimary);

        match self.try_open_socket().await {
            Ok(link) => self.on_socket_open(link).await,
            Err(e) => {
                warn!(
                    error = %e,
                    attempt = self.primary_backoff.attempts(),
                    "Primary transport failed to connect"
                );
                if self.config.fallback_enabled && !self.fallback_mode {
                    self.fallback_mode = true;
                    self.open_stream().await;
                } else {
                    self.set_phase(Phase::Idle);
                    self.schedule(Retry::Primary, "primary transport unavailable");
                }
            }
        }
    }

    async fn on_socket_open(&mut self, link: SocketLink) {
        info!(player_id = %self.config.player_id, "Connected over WebSocket");
        self.socket = Some(link);
        self.primary_backoff.reset();
        self.retry = None;
        self.set_phase(Phase::Connected);

        let join = self.message(EventKind::PlayerJoin, presence_payload());
        if !self.send_on_socket(&join).await {
            warn!("Failed to announce join");
        }
        self.router
            .deliver_status(ConnectionStatus::Connected, TransportKind::WebSocket, None);
    }

    async fn open_stream(&mut self) {
        self.set_phase(Phase::ConnectingFallback);

        let limit = self.config.connect_timeout;
        let opening = self.network.open_stream(&self.config.endpoints.events);
        let result = match timeout(limit, opening).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(limit)),
        };

        match result {
            Ok(link) => {
                info!(
                    player_id = %self.config.player_id,
                    "Connected over event stream, outbound events use HTTP fallback"
                );
                self.stream = Some(link);
                self.stream_backoff.reset();
                self.retry = None;
                self.set_phase(Phase::Connected);
                self.router.deliver_status(
                    ConnectionStatus::Connected,
                    TransportKind::ServerSentEvents,
                    None,
                );

                let join = self.message(EventKind::PlayerJoin, presence_payload());
                self.emit_via_http(join).await;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    attempt = self.stream_backoff.attempts(),
                    "Event stream failed to connect"
                );
                self.set_phase(Phase::Idle);
                self.schedule(Retry::Stream, "event stream unavailable");
            }
        }
    }

    fn on_socket_lost(&mut self) {
        warn!(player_id = %self.config.player_id, "WebSocket closed");
        self.socket = None;
        self.set_phase(Phase::Idle);
        self.router.deliver_status(
            ConnectionStatus::Disconnected,
            TransportKind::WebSocket,
            Some("transport closed".into()),
        );
        self.schedule(Retry::Primary, "primary transport lost");
    }

    fn on_stream_lost(&mut self) {
        warn!(player_id = %self.config.player_id, "Event stream closed");
        self.stream = None;
        self.set_phase(Phase::Idle);
        self.router.deliver_status(
            ConnectionStatus::Disconnected,
            TransportKind::ServerSentEvents,
            Some("transport closed".into()),
        );
        self.schedule(Retry::Stream, "event stream lost");
    }

    /// Arm the retry timer, or give up when the ceiling is reached
    fn schedule(&mut self, retry: Retry, reason: &str) {
        let backoff = match retry {
            Retry::Establish => &mut self.health_backoff,
            Retry::Primary => &mut self.primary_backoff,
            Retry::Stream => &mut self.stream_backoff,
        };

        match backoff.next_delay() {
            Some(delay) => {
                info!(
                    ?retry,
                    reason,
                    attempt = backoff.attempts(),
                    max = backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.retry = Some((Instant::now() + delay, retry));
                self.publish();
            }
            None => self.give_up(reason),
        }
    }

    async fn fire_retry(&mut self) {
        let Some((_, retry)) = self.retry.take() else {
            return;
        };

        debug!(?retry, "Retry timer fired");
        match retry {
            Retry::Establish => self.establish().await,
            Retry::Primary => self.open_primary().await,
            Retry::Stream => self.open_stream().await,
        }
    }

    fn give_up(&mut self, reason: &str) {
        error!(
            player_id = %self.config.player_id,
            reason,
            "Max reconnection attempts reached, giving up"
        );
        self.retry = None;
        self.socket = None;
        self.stream = None;
        self.set_phase(Phase::Failed);
        self.router.deliver_status(
            ConnectionStatus::Error,
            TransportKind::Disconnected,
            Some(format!("{}: max reconnection attempts reached", reason)),
        );
    }

    async fn disconnect(&mut self) {
        if !self.in_session {
            debug!("Disconnect ignored, no active session");
            return;
        }

        if self.is_connected() {
            let leave = self.message(EventKind::PlayerLeave, presence_payload());
            if self.socket_open() {
                self.send_on_socket(&leave).await;
            } else {
                self.emit_via_http(leave).await;
            }
        }

        // The socket writer flushes the queued leave before closing
        self.socket = None;
        self.stream = None;
        self.retry = None;
        self.resend = None;
        self.in_session = false;
        self.fallback_mode = false;
        self.set_phase(Phase::Idle);

        info!(player_id = %self.config.player_id, "Disconnected from game server");
        self.router.deliver_status(
            ConnectionStatus::Disconnected,
            TransportKind::Disconnected,
            Some("client disconnect".into()),
        );
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    async fn emit(&mut self, kind: EventKind, data: Payload) {
        if kind.is_local_only() {
            warn!(event = %kind, "Local-only event cannot be sent");
            return;
        }
        if !self.in_session {
            warn!(event = %kind, "No active session, event not sent");
            return;
        }
        if kind == EventKind::PositionUpdate && !self.limiter.check_position_update() {
            debug!("Position update throttled");
            return;
        }

        let message = self.message(kind, data);
        self.route(message).await;
    }

    /// Active stream: HTTP. Open socket: send. Otherwise reconnect once,
    /// wait, retry, and finally try HTTP.
    async fn route(&mut self, message: GameMessage) {
        if self.fallback_mode {
            self.emit_via_http(message).await;
            return;
        }

        if self.socket_open() && self.send_on_socket(&message).await {
            return;
        }

        info!(event = %message.kind(), "WebSocket not connected, reconnecting before send");
        match self.try_open_socket().await {
            Ok(link) => self.on_socket_open(link).await,
            Err(e) => warn!(error = %e, "Reconnect for send failed"),
        }
        sleep(self.config.send_retry_delay).await;

        if self.socket_open() && self.send_on_socket(&message).await {
            return;
        }

        warn!(event = %message.kind(), "Send retry failed, trying HTTP fallback");
        self.emit_via_http(message).await;
    }

    async fn send_on_socket(&self, message: &GameMessage) -> bool {
        let Some(link) = self.socket.as_ref() else {
            return false;
        };

        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(event = %message.kind(), error = %e, "Failed to serialize message");
                return false;
            }
        };

        match link.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(event = %message.kind(), error = %e, "WebSocket send failed");
                false
            }
        }
    }

    async fn emit_via_http(&mut self, message: GameMessage) {
        let outcome = self.fallback.emit(&message).await;
        if outcome == FallbackOutcome::RetryLater && self.resend.is_none() {
            info!(
                event = %message.kind(),
                delay_ms = self.config.resource_retry_delay.as_millis() as u64,
                "Retrying HTTP fallback later"
            );
            self.resend = Some((Instant::now() + self.config.resource_retry_delay, message));
        }
    }

    async fn fire_resend(&mut self) {
        let Some((_, message)) = self.resend.take() else {
            return;
        };
        let outcome = self.fallback.retry(&message).await;
        debug!(event = %message.kind(), ?outcome, "HTTP fallback retry finished");
    }

    // ========================================================================
    // State
    // ========================================================================

    fn message(&self, kind: EventKind, data: Payload) -> GameMessage {
        GameMessage::new(kind, self.config.player_id.as_str(), data)
    }

    fn socket_open(&self) -> bool {
        self.socket.as_ref().is_some_and(SocketLink::is_open)
    }

    fn transport(&self) -> TransportKind {
        if self.phase != Phase::Connected {
            TransportKind::Disconnected
        } else if self.socket_open() {
            TransportKind::WebSocket
        } else if self.stream.is_some() {
            TransportKind::ServerSentEvents
        } else {
            TransportKind::Disconnected
        }
    }

    fn is_connected(&self) -> bool {
        self.transport() != TransportKind::Disconnected
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        let reconnect_attempts = if self.fallback_mode {
            self.stream_backoff.attempts()
        } else {
            self.primary_backoff.attempts()
        };

        self.info.send_replace(ConnectionInfo {
            phase: self.phase,
            transport: self.transport(),
            is_connected: self.is_connected(),
            reconnect_attempts,
        });
    }
}

async fn next_frame(inbound: Option<&mut mpsc::Receiver<String>>) -> Option<String> {
    match inbound {
        Some(inbound) => inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
