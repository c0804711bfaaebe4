//! Inbound frame parsing and delivery to the caller

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::protocol::{
    ConnectionStatus, EventKind, GameMessage, Payload, SessionEvent, TransportKind,
};
use crate::util::time::unix_millis;

/// Listener for one event kind
pub type Handler = Arc<dyn Fn(&GameMessage) + Send + Sync>;

/// Per-kind listeners shared by the session handle and the driver
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<EventKind, Handler>>>,
}

impl HandlerRegistry {
    /// Replace the listener for `kind`
    pub fn insert(&self, kind: EventKind, handler: Handler) {
        self.inner.write().insert(kind, handler);
    }

    pub fn remove(&self, kind: EventKind) -> bool {
        self.inner.write().remove(&kind).is_some()
    }

    fn dispatch(&self, message: &GameMessage) {
        // Clone out so a listener may call on/off without deadlocking
        let handler = self.inner.read().get(&message.kind()).cloned();
        if let Some(handler) = handler {
            handler(message);
        }
    }
}

/// Parse one text frame from either transport.
///
/// Frames with a recognized `type` become a [`GameMessage`]; any other JSON is
/// passed through as [`SessionEvent::Unrecognized`]. Only non-JSON is an error.
pub fn parse_frame(text: &str) -> Result<SessionEvent, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    // Local-only kinds never arrive from the server
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .and_then(EventKind::from_wire)
        .filter(|kind| !kind.is_local_only());

    let (Some(kind), Value::Object(mut object)) = (kind, value.clone()) else {
        return Ok(SessionEvent::Unrecognized(value));
    };

    object.remove("type");
    let timestamp = object
        .remove("timestamp")
        .and_then(|t| t.as_u64())
        .unwrap_or_else(unix_millis);

    let envelope_player = object
        .get("playerId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let data: Payload = match object.remove("data") {
        Some(Value::Object(data)) => data,
        Some(other) => {
            let mut data = Payload::new();
            data.insert("value".into(), other);
            data
        }
        // Flat frame: everything but the type is the payload
        None => object,
    };

    let player_id = envelope_player
        .or_else(|| data.get("playerId").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    Ok(SessionEvent::Message(GameMessage::with_timestamp(
        kind, player_id, data, timestamp,
    )))
}

/// Upper bound on channel slots reserved for status events
const STATUS_HEADROOM: usize = 8;

/// Delivers parsed and synthetic events to listeners and the caller's channel
pub struct EventRouter {
    player_id: String,
    events: mpsc::Sender<SessionEvent>,
    handlers: HandlerRegistry,
}

impl EventRouter {
    pub fn new(
        player_id: impl Into<String>,
        events: mpsc::Sender<SessionEvent>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            events,
            handlers,
        }
    }

    /// Route one inbound frame; malformed frames are logged and dropped
    pub fn route_frame(&self, text: &str, source: TransportKind) {
        match parse_frame(text) {
            Ok(SessionEvent::Message(message)) => {
                trace!(event = %message.kind(), %source, "Inbound message");
                self.deliver(message);
            }
            Ok(SessionEvent::Unrecognized(value)) => {
                let event_type = value.get("type").and_then(Value::as_str).unwrap_or("<none>");
                warn!(%source, event_type, "Unrecognized inbound payload, passing through");
                self.push(SessionEvent::Unrecognized(value));
            }
            Err(e) => {
                warn!(%source, error = %e, "Dropping malformed inbound frame");
            }
        }
    }

    pub fn deliver(&self, message: GameMessage) {
        self.handlers.dispatch(&message);
        self.push(SessionEvent::Message(message));
    }

    pub fn deliver_status(
        &self,
        status: ConnectionStatus,
        transport: TransportKind,
        note: Option<String>,
    ) {
        self.deliver(GameMessage::connection_status(
            self.player_id.as_str(),
            status,
            transport,
            note,
        ));
    }

    /// Game events leave the last slots to `connection_status`, so a lagging
    /// caller still learns that the session failed
    fn push(&self, event: SessionEvent) {
        if self.events.is_closed() {
            debug!("Event receiver dropped");
            return;
        }

        let is_status = event
            .message()
            .is_some_and(|message| message.kind() == EventKind::ConnectionStatus);
        if !is_status && self.events.capacity() <= self.status_headroom() {
            warn!("Event channel nearly full, dropping event");
            return;
        }

        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
            }
        }
    }

    fn status_headroom(&self) -> usize {
        (self.events.max_capacity() / 4).min(STATUS_HEADROOM)
    }
}
