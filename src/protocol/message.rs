//! Game message envelope and event kinds
//! These are the wire types shared with the game server

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::util::time::{to_datetime, unix_millis};

/// Event-specific payload fields
pub type Payload = Map<String, Value>;

/// Every event kind the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlayerJoin,
    PlayerLeave,
    PositionUpdate,
    Shoot,
    Hit,
    Elimination,
    GameState,
    CurrentPlayers,
    /// Server heartbeat/status broadcast
    #[serde(rename = "serverStatus")]
    ServerStatus,
    /// Synthesized locally, never sent over the wire
    ConnectionStatus,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::PlayerJoin,
        EventKind::PlayerLeave,
        EventKind::PositionUpdate,
        EventKind::Shoot,
        EventKind::Hit,
        EventKind::Elimination,
        EventKind::GameState,
        EventKind::CurrentPlayers,
        EventKind::ServerStatus,
        EventKind::ConnectionStatus,
    ];

    /// Name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PlayerJoin => "player_join",
            EventKind::PlayerLeave => "player_leave",
            EventKind::PositionUpdate => "position_update",
            EventKind::Shoot => "shoot",
            EventKind::Hit => "hit",
            EventKind::Elimination => "elimination",
            EventKind::GameState => "game_state",
            EventKind::CurrentPlayers => "current_players",
            EventKind::ServerStatus => "serverStatus",
            EventKind::ConnectionStatus => "connection_status",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Local-only kinds are delivered to the caller but never transmitted
    pub fn is_local_only(self) -> bool {
        matches!(self, EventKind::ConnectionStatus)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for every inbound and outbound event.
///
/// Immutable once built; the timestamp is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMessage {
    #[serde(rename = "type")]
    kind: EventKind,
    player_id: String,
    #[serde(default)]
    data: Payload,
    timestamp: u64,
}

impl GameMessage {
    /// Build a message stamped with the current time
    pub fn new(kind: EventKind, player_id: impl Into<String>, data: Payload) -> Self {
        Self::with_timestamp(kind, player_id, data, unix_millis())
    }

    pub fn with_timestamp(
        kind: EventKind,
        player_id: impl Into<String>,
        data: Payload,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            player_id: player_id.into(),
            data,
            timestamp,
        }
    }

    /// Synthetic `connection_status` message for the local caller
    pub fn connection_status(
        player_id: impl Into<String>,
        status: ConnectionStatus,
        transport: TransportKind,
        note: Option<String>,
    ) -> Self {
        let mut data = Payload::new();
        data.insert("status".into(), json!(status));
        data.insert("connectionType".into(), json!(transport.label()));
        if let Some(note) = note {
            let key = match status {
                ConnectionStatus::Error => "error",
                _ => "reason",
            };
            data.insert(key.into(), Value::String(note));
        }
        Self::new(EventKind::ConnectionStatus, player_id, data)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.timestamp)
    }

    /// `status` of a `connection_status` message
    pub fn status(&self) -> Option<ConnectionStatus> {
        if self.kind != EventKind::ConnectionStatus {
            return None;
        }
        self.data
            .get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What the caller's event channel carries
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A recognized game (or connection status) message
    Message(GameMessage),
    /// Structured payload whose `type` was missing or unknown, passed through as-is
    Unrecognized(Value),
}

impl SessionEvent {
    pub fn message(&self) -> Option<&GameMessage> {
        match self {
            SessionEvent::Message(message) => Some(message),
            SessionEvent::Unrecognized(_) => None,
        }
    }
}

/// Value of `status` in a `connection_status` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Which transport currently carries the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    WebSocket,
    ServerSentEvents,
    #[default]
    Disconnected,
}

impl TransportKind {
    /// Label reported as `connectionType`
    pub fn label(self) -> &'static str {
        match self {
            TransportKind::WebSocket => "WebSocket",
            TransportKind::ServerSentEvents => "SSE",
            TransportKind::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Screen-space position (crosshair or map marker)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoord {
    pub lat: f64,
    pub lng: f64,
}

/// Payload for `position_update`
pub fn position_payload(position: Position, gps: GpsCoord) -> Payload {
    stamped([("position", json!(position)), ("gps", json!(gps))])
}

/// Payload for `shoot`
pub fn shoot_payload(target_id: &str, crosshair: Position) -> Payload {
    stamped([("targetId", json!(target_id)), ("crosshairPosition", json!(crosshair))])
}

/// Payload for `hit`
pub fn hit_payload(target_id: &str, damage: u32) -> Payload {
    stamped([("targetId", json!(target_id)), ("damage", json!(damage))])
}

/// Payload for `elimination`
pub fn elimination_payload(target_id: &str) -> Payload {
    stamped([("targetId", json!(target_id))])
}

/// Payload for `player_join` / `player_leave`
pub fn presence_payload() -> Payload {
    stamped::<0>([])
}

fn stamped<const N: usize>(fields: [(&str, Value); N]) -> Payload {
    let mut data: Payload = fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    data.insert("timestamp".into(), json!(unix_millis()));
    data
}
