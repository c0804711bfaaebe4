//! Circuit breaker and throttled HTTP fallback emitter

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::net::{Network, NetworkError};
use crate::protocol::{EventKind, GameMessage};

/// Why the breaker refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Breaker is open for `remaining`
    Open { remaining: Duration },
    /// Minimum spacing since the last request has not elapsed
    Cooldown { remaining: Duration },
}

/// Governs whether a fallback request may go out.
///
/// Opens after `threshold` consecutive failures and closes itself (resetting
/// the failure count) `reset_after` later.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    cooldown: Duration,
    last_request_at: Option<Instant>,
    threshold: u32,
    reset_after: Duration,
    rate_limited_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            consecutive_failures: 0,
            open_until: None,
            cooldown: config.http_cooldown,
            last_request_at: None,
            threshold: config.breaker_threshold,
            reset_after: config.breaker_reset,
            rate_limited_cooldown: config.rate_limited_cooldown,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.open_until.is_some()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Close the breaker if its reset timer has elapsed
    fn refresh(&mut self, now: Instant) {
        if let Some(until) = self.open_until {
            if now >= until {
                self.open_until = None;
                self.consecutive_failures = 0;
                info!("Circuit breaker closed");
            }
        }
    }

    /// Check both gates in order: breaker closed, then cooldown elapsed
    pub fn admit(&mut self, now: Instant) -> Result<(), Refusal> {
        self.admit_retry(now)?;

        if let Some(last) = self.last_request_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.cooldown {
                return Err(Refusal::Cooldown {
                    remaining: self.cooldown - elapsed,
                });
            }
        }

        Ok(())
    }

    /// Breaker gate only: an already scheduled retry skips the cooldown
    pub fn admit_retry(&mut self, now: Instant) -> Result<(), Refusal> {
        self.refresh(now);

        match self.open_until {
            Some(until) => Err(Refusal::Open {
                remaining: until - now,
            }),
            None => Ok(()),
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_request_at = Some(now);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failure; returns true if this one opened the breaker
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        if self.open_until.is_none() && self.consecutive_failures >= self.threshold {
            self.open_until = Some(now + self.reset_after);
            return true;
        }
        false
    }

    /// HTTP 429: slow down and count it as a failure
    pub fn record_rate_limited(&mut self, now: Instant) -> bool {
        self.cooldown = self.cooldown.max(self.rate_limited_cooldown);
        self.record_failure(now)
    }
}

/// Result of one fallback emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOutcome {
    Delivered,
    /// Server answered with a non-2xx status
    Rejected(u16),
    /// Network error or timeout
    Failed,
    /// Resource exhaustion; the caller should retry once later
    RetryLater,
    Skipped(Refusal),
    /// No REST endpoint exists for this event kind
    Unsupported,
}

/// Sends `player_join` / `player_leave` over plain HTTP when no socket is usable
pub struct HttpFallback {
    network: Arc<dyn Network>,
    breaker: CircuitBreaker,
    join_url: Url,
    leave_url: Url,
    request_timeout: Duration,
}

impl HttpFallback {
    pub fn new(network: Arc<dyn Network>, config: &SessionConfig) -> Self {
        Self {
            network,
            breaker: CircuitBreaker::new(config),
            join_url: config.endpoints.join.clone(),
            leave_url: config.endpoints.leave.clone(),
            request_timeout: config.http_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn endpoint(&self, kind: EventKind) -> Option<&Url> {
        match kind {
            EventKind::PlayerJoin => Some(&self.join_url),
            EventKind::PlayerLeave => Some(&self.leave_url),
            _ => None,
        }
    }

    pub async fn emit(&mut self, message: &GameMessage) -> FallbackOutcome {
        self.send(message, false).await
    }

    /// Deliver a resend scheduled after resource exhaustion. Still refused
    /// while the breaker is open.
    pub async fn retry(&mut self, message: &GameMessage) -> FallbackOutcome {
        self.send(message, true).await
    }

    async fn send(&mut self, message: &GameMessage, scheduled: bool) -> FallbackOutcome {
        let now = Instant::now();

        let admitted = if scheduled {
            self.breaker.admit_retry(now)
        } else {
            self.breaker.admit(now)
        };

        if let Err(refusal) = admitted {
            match refusal {
                Refusal::Open { remaining } => warn!(
                    event = %message.kind(),
                    remaining_ms = remaining.as_millis() as u64,
                    "Circuit breaker open, skipping HTTP fallback"
                ),
                Refusal::Cooldown { remaining } => debug!(
                    event = %message.kind(),
                    remaining_ms = remaining.as_millis() as u64,
                    "HTTP fallback cooling down, skipping"
                ),
            }
            return FallbackOutcome::Skipped(refusal);
        }

        // position/shoot/hit/elimination have no REST equivalent on the server
        let Some(url) = self.endpoint(message.kind()).cloned() else {
            warn!(event = %message.kind(), "No HTTP fallback for event, dropping");
            return FallbackOutcome::Unsupported;
        };

        let body = fallback_body(message);
        self.breaker.record_attempt(now);

        let request = self.network.post_json(&url, &body);
        let result = match timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(self.request_timeout)),
        };

        let (outcome, opened) = match result {
            Ok(status) if (200..300).contains(&status) => {
                self.breaker.record_success();
                debug!(event = %message.kind(), status, "HTTP fallback delivered");
                (FallbackOutcome::Delivered, false)
            }
            Ok(429) => {
                warn!(event = %message.kind(), "HTTP fallback rate limited, widening cooldown");
                let opened = self.breaker.record_rate_limited(now);
                (FallbackOutcome::Rejected(429), opened)
            }
            Ok(status) => {
                warn!(event = %message.kind(), status, "HTTP fallback rejected");
                (FallbackOutcome::Rejected(status), self.breaker.record_failure(now))
            }
            Err(e) if e.is_resource_exhaustion() => {
                warn!(event = %message.kind(), error = %e, "HTTP fallback out of resources");
                (FallbackOutcome::RetryLater, self.breaker.record_failure(now))
            }
            Err(e) => {
                warn!(event = %message.kind(), error = %e, "HTTP fallback failed");
                (FallbackOutcome::Failed, self.breaker.record_failure(now))
            }
        };

        if opened {
            warn!(
                failures = self.breaker.consecutive_failures(),
                "Circuit breaker opened"
            );
        }

        outcome
    }
}

/// `{ playerId, player, timestamp }` as the REST endpoints expect
fn fallback_body(message: &GameMessage) -> Value {
    let player = message
        .data()
        .get("player")
        .cloned()
        .unwrap_or_else(|| Value::Object(message.data().clone()));

    json!({
        "playerId": message.player_id(),
        "player": player,
        "timestamp": message.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::{Call, ScriptedNetwork};
    use crate::protocol::message::{presence_payload, shoot_payload, Position};

    fn config() -> SessionConfig {
        SessionConfig::new("http://arena.test", "p1").unwrap()
    }

    fn join() -> GameMessage {
        GameMessage::new(EventKind::PlayerJoin, "p1", presence_payload())
    }

    fn fallback(network: &ScriptedNetwork) -> HttpFallback {
        HttpFallback::new(Arc::new(network.clone()), &config())
    }

    fn post_count(network: &ScriptedNetwork) -> usize {
        network.count(|call| matches!(call, Call::Post { .. }))
    }

    #[test]
    fn breaker_opens_at_threshold_and_resets_after_window() {
        let mut breaker = CircuitBreaker::new(&config());
        let t0 = Instant::now();

        assert!(!breaker.record_failure(t0));
        assert!(!breaker.record_failure(t0));
        assert!(breaker.record_failure(t0));
        assert!(breaker.is_open());

        let later = t0 + Duration::from_secs(29);
        assert!(matches!(breaker.admit(later), Err(Refusal::Open { .. })));

        let reopened = t0 + Duration::from_secs(30);
        assert_eq!(breaker.admit(reopened), Ok(()));
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(&config());
        let t0 = Instant::now();
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        breaker.record_success();
        assert!(!breaker.record_failure(t0));
        assert!(!breaker.is_open());
    }

    #[test]
    fn cooldown_spaces_requests_and_widens_on_rate_limit() {
        let mut breaker = CircuitBreaker::new(&config());
        let t0 = Instant::now();
        breaker.record_attempt(t0);

        assert!(matches!(
            breaker.admit(t0 + Duration::from_millis(1999)),
            Err(Refusal::Cooldown { .. })
        ));
        assert_eq!(breaker.admit(t0 + Duration::from_secs(2)), Ok(()));

        breaker.record_rate_limited(t0);
        assert_eq!(breaker.cooldown(), Duration::from_secs(10));
        assert!(breaker.admit(t0 + Duration::from_secs(9)).is_err());
        assert_eq!(breaker.admit(t0 + Duration::from_secs(10)), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn join_posts_to_rest_endpoint() {
        let network = ScriptedNetwork::new();
        let mut fallback = fallback(&network);

        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Delivered);

        let posts = network.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "http://arena.test/api/player/join");
        assert_eq!(posts[0].1["playerId"], json!("p1"));
        assert!(posts[0].1["timestamp"].is_u64());
    }

    #[tokio::test(start_paused = true)]
    async fn combat_events_have_no_fallback() {
        let network = ScriptedNetwork::new();
        let mut fallback = fallback(&network);
        let shoot = GameMessage::new(
            EventKind::Shoot,
            "p1",
            shoot_payload("p2", Position { x: 1.0, y: 2.0 }),
        );

        assert_eq!(fallback.emit(&shoot).await, FallbackOutcome::Unsupported);
        assert_eq!(post_count(&network), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_to_one_request_per_cooldown() {
        let network = ScriptedNetwork::new();
        let mut fallback = fallback(&network);

        // 11 calls every 500ms over a 5s window
        for _ in 0..11 {
            fallback.emit(&join()).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        // floor(5s / 2s) + 1
        assert_eq!(post_count(&network), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_makes_no_requests() {
        let network = ScriptedNetwork::new();
        for _ in 0..3 {
            network.queue_post(Ok(500));
        }
        let mut fallback = fallback(&network);

        for _ in 0..3 {
            assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Rejected(500));
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert!(fallback.breaker().is_open());

        let outcome = fallback.emit(&join()).await;
        assert!(matches!(outcome, FallbackOutcome::Skipped(Refusal::Open { .. })));
        assert_eq!(post_count(&network), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Delivered);
        assert_eq!(post_count(&network), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_counts_as_failure() {
        let network = ScriptedNetwork::new();
        network.queue_post(Ok(429));
        let mut fallback = fallback(&network);

        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Rejected(429));
        assert_eq!(fallback.breaker().consecutive_failures(), 1);
        assert_eq!(fallback.breaker().cooldown(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn resource_exhaustion_asks_for_retry() {
        let network = ScriptedNetwork::new();
        network.queue_post(Err(NetworkError::ResourceExhausted("EMFILE".into())));
        let mut fallback = fallback(&network);

        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::RetryLater);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_retry_skips_widened_cooldown() {
        let network = ScriptedNetwork::new();
        network
            .queue_post(Ok(429))
            .queue_post(Err(NetworkError::ResourceExhausted("EMFILE".into())));
        let mut fallback = fallback(&network);

        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Rejected(429));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::RetryLater);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(
            fallback.emit(&join()).await,
            FallbackOutcome::Skipped(Refusal::Cooldown { .. })
        ));
        assert_eq!(fallback.retry(&join()).await, FallbackOutcome::Delivered);
        assert_eq!(post_count(&network), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_retry_respects_open_breaker() {
        let network = ScriptedNetwork::new();
        for _ in 0..3 {
            network.queue_post(Ok(503));
        }
        let mut fallback = fallback(&network);

        for _ in 0..3 {
            fallback.emit(&join()).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        assert!(matches!(
            fallback.retry(&join()).await,
            FallbackOutcome::Skipped(Refusal::Open { .. })
        ));
        assert_eq!(post_count(&network), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_post_times_out_as_failure() {
        let network = ScriptedNetwork::new();
        network.hang_posts();
        let mut fallback = fallback(&network);

        let started = Instant::now();
        assert_eq!(fallback.emit(&join()).await, FallbackOutcome::Failed);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(fallback.breaker().consecutive_failures(), 1);
        assert_eq!(post_count(&network), 1);
    }

    #[test]
    fn body_prefers_explicit_player_record() {
        let mut data = presence_payload();
        data.insert("player".into(), json!({ "nama": "Rani", "tim": "merah" }));
        let message = GameMessage::with_timestamp(EventKind::PlayerJoin, "p9", data, 7);

        assert_eq!(
            fallback_body(&message),
            json!({
                "playerId": "p9",
                "player": { "nama": "Rani", "tim": "merah" },
                "timestamp": 7
            })
        );
    }
}
