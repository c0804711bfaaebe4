//! Configuration module - environment variable parsing and session tunables

use std::env;
use std::time::Duration;

use url::Url;

/// Default bound on reconnect attempts per transport
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Linear backoff unit: retry `n` waits `n * RECONNECT_BASE_DELAY`
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEALTH_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const SEND_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const HTTP_COOLDOWN: Duration = Duration::from_secs(2);
pub const RATE_LIMITED_COOLDOWN: Duration = Duration::from_secs(10);
pub const BREAKER_THRESHOLD: u32 = 3;
pub const BREAKER_RESET: Duration = Duration::from_secs(30);
pub const RESOURCE_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Max GPS/position updates per second
pub const POSITION_UPDATE_RATE: u32 = 10;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

const SOCKET_PATH: &str = "/game";
const EVENTS_PATH: &str = "/api/events";
const JOIN_PATH: &str = "/api/player/join";
const LEAVE_PATH: &str = "/api/player/leave";

/// Binary configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Game server base URL
    pub server_url: String,
    /// Local player identifier
    pub player_id: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_reconnect_attempts: u32,
    /// Whether the event-stream + HTTP fallback may be used
    pub http_fallback: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_reconnect_attempts = match env::var("MAX_RECONNECT_ATTEMPTS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_RECONNECT_ATTEMPTS"))?,
            Err(_) => MAX_RECONNECT_ATTEMPTS,
        };

        let http_fallback = match env::var("HTTP_FALLBACK") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::Invalid("HTTP_FALLBACK"))?,
            Err(_) => true,
        };

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).ok_or(ConfigError::Invalid("LOG_FORMAT"))?,
            Err(_) => LogFormat::Text,
        };

        Ok(Self {
            server_url: env::var("SERVER_URL").map_err(|_| ConfigError::Missing("SERVER_URL"))?,
            player_id: env::var("PLAYER_ID").map_err(|_| ConfigError::Missing("PLAYER_ID"))?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            max_reconnect_attempts,
            http_fallback,
        })
    }

    /// Build validated session settings from this configuration
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig::new(&self.server_url, &self.player_id)?
            .with_max_reconnect_attempts(self.max_reconnect_attempts)
            .with_fallback(self.http_fallback))
    }
}

/// Log output format for the binary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolved server endpoints for one session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// `GET /` health check
    pub health: Url,
    /// WebSocket endpoint (primary transport)
    pub socket: Url,
    /// Server-sent event stream (fallback transport)
    pub events: Url,
    pub join: Url,
    pub leave: Url,
}

impl Endpoints {
    fn resolve(server_url: &str, player_id: &str) -> Result<Self, ConfigError> {
        let parsed =
            Url::parse(server_url).map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))?;

        let (http_scheme, ws_scheme) = match parsed.scheme() {
            "http" | "ws" => ("http", "ws"),
            "https" | "wss" => ("https", "wss"),
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let mut http_base = parsed.clone();
        http_base
            .set_scheme(http_scheme)
            .map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))?;
        http_base.set_query(None);
        http_base.set_fragment(None);
        let base = http_base.as_str().trim_end_matches('/').to_string();

        let at = |path: &str| {
            Url::parse(&format!("{}{}", base, path))
                .map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))
        };

        let mut socket = at(SOCKET_PATH)?;
        socket
            .set_scheme(ws_scheme)
            .map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))?;
        socket.query_pairs_mut().append_pair("playerId", player_id);

        Ok(Self {
            health: at("/")?,
            socket,
            events: at(EVENTS_PATH)?,
            join: at(JOIN_PATH)?,
            leave: at(LEAVE_PATH)?,
        })
    }
}

/// Validated settings for one multiplayer session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub server_url: String,
    pub player_id: String,
    pub endpoints: Endpoints,

    pub health_timeout: Duration,
    pub health_retry_delay: Duration,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    /// Allow the event-stream + HTTP fallback when the socket cannot be opened
    pub fallback_enabled: bool,
    pub send_retry_delay: Duration,

    pub http_timeout: Duration,
    pub http_cooldown: Duration,
    pub rate_limited_cooldown: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset: Duration,
    pub resource_retry_delay: Duration,

    pub position_updates_per_second: u32,
    pub event_channel_capacity: usize,
}

impl SessionConfig {
    /// Create settings for `player_id` against `server_url` with default tunables
    pub fn new(server_url: &str, player_id: &str) -> Result<Self, ConfigError> {
        let server_url = server_url.trim();
        let player_id = player_id.trim();

        if server_url.is_empty() {
            return Err(ConfigError::Missing("SERVER_URL"));
        }
        if player_id.is_empty() {
            return Err(ConfigError::EmptyPlayerId);
        }

        Ok(Self {
            server_url: server_url.to_string(),
            player_id: player_id.to_string(),
            endpoints: Endpoints::resolve(server_url, player_id)?,
            health_timeout: HEALTH_TIMEOUT,
            health_retry_delay: HEALTH_RETRY_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: RECONNECT_BASE_DELAY,
            fallback_enabled: true,
            send_retry_delay: SEND_RETRY_DELAY,
            http_timeout: HTTP_TIMEOUT,
            http_cooldown: HTTP_COOLDOWN,
            rate_limited_cooldown: RATE_LIMITED_COOLDOWN,
            breaker_threshold: BREAKER_THRESHOLD,
            breaker_reset: BREAKER_RESET,
            resource_retry_delay: RESOURCE_RETRY_DELAY,
            position_updates_per_second: POSITION_UPDATE_RATE,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        })
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_position_rate(mut self, per_second: u32) -> Self {
        self.position_updates_per_second = per_second;
        self
    }

    /// Capacity of the caller's event channel
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported server URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Player id must not be empty")]
    EmptyPlayerId,
}
