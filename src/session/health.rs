//! Pre-flight health check gating the primary transport

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::net::Network;

/// Check the server root. Never fails: every error becomes `false`.
pub async fn check_health(network: &dyn Network, url: &Url, limit: Duration) -> bool {
    match timeout(limit, network.fetch_health(url)).await {
        Ok(Ok(())) => {
            debug!(%url, "Server healthy");
            true
        }
        Ok(Err(e)) => {
            warn!(%url, error = %e, "Health check failed");
            false
        }
        Err(_) => {
            warn!(%url, timeout_ms = limit.as_millis() as u64, "Health check timed out");
            false
        }
    }
}
