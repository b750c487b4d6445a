//! # Translator Relay
//!
//! Real-time multilingual voice and text relay. Clients join rooms over a
//! WebSocket, declare the language they want to hear, and every utterance is
//! transcribed, translated once per target language, optionally spoken, and
//! delivered to each member in their own language.
//!
//! ## Startup sequence:
//! 1. Load `.env` and initialize logging
//! 2. Load and validate configuration
//! 3. Build the provider chains, registries and relay engine
//! 4. Start the HTTP server with the WebSocket gateway
//! 5. Stop gracefully on SIGTERM / SIGINT

mod config;
mod error;
mod gateway;
mod handlers;
mod health;
mod middleware;
mod providers;
mod relay;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting translator-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        rate_limit = config.relay.rate_limit_max_requests,
        rate_window_secs = config.relay.rate_limit_window_secs,
        cache_max_size = config.relay.cache_max_size,
        "Configuration loaded"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config);

    if app_state.engine.health().offline_mode {
        warn!("At least one capability is served only by the mock provider; output is not real translation");
    }

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            .route("/ws", web::get().to(gateway::relay_socket))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/stats", web::get().to(health::stats))
                    .route("/stats/{room_id}", web::get().to(health::room_stats))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "translator_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install unix signal handlers, falling back to Ctrl+C: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
