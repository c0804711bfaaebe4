//! Airsoft AR session client
//!
//! Joins the configured game server as one player and logs every event it
//! receives until interrupted:
//! - WebSocket transport when the server allows it
//! - Event stream plus HTTP fallback otherwise

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airsoft_sync::{
    Config, ConnectionStatus, GameMessage, LogFormat, MultiplayerSession, SessionEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level, config.log_format);

    info!("Starting Airsoft AR session client");
    info!("Server: {}", config.server_url);
    info!("Player: {}", config.player_id);

    let (session, mut events) = MultiplayerSession::over_http(config.session_config()?)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Message(message) => match message.status() {
                    Some(ConnectionStatus::Error) => {
                        error!(data = ?message.data(), "Connection error")
                    }
                    Some(status) => info!(?status, data = ?message.data(), "Connection status"),
                    None => info!(
                        event = %message.kind(),
                        player_id = message.player_id(),
                        sent_at = %sent_at(&message),
                        data = ?message.data(),
                        "Game event"
                    ),
                },
                SessionEvent::Unrecognized(value) => warn!(%value, "Unrecognized event"),
            }
        }
    });

    session.connect().await;
    shutdown_signal().await;

    session.disconnect().await;
    drop(session);
    printer.await?;

    info!("Session client stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
    }
}

/// Server-side send time of an event, as wall-clock UTC
fn sent_at(message: &GameMessage) -> String {
    message
        .sent_at()
        .map(|at| at.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, leaving the match");
        }
        _ = terminate => {
            info!("Received terminate signal, leaving the match");
        }
    }
}
