//! agrisense: HTTP service computing NDVI reports and scheduling farm alerts.
//!
//! Configuration is read from the environment once at startup (see
//! [`config::Settings`]). Logging goes through `tracing`; set `RUST_LOG`
//! to override the default `info` filter.
//!
//! # Usage
//!
//! ```text
//! AGRISENSE_BIND=127.0.0.1:8000 \
//!     ALERT_WEBHOOK_URL=http://n8n:5678/webhook/ndvi \
//!     cargo run --bin agrisense
//! ```

#![allow(clippy::print_stderr)]

mod config;
mod error;
mod request;
mod routes;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::state::AppState;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = match AppState::from_settings(&settings) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("Startup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(settings.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding {}: {e}", settings.bind);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        bind = %settings.bind,
        engine = %settings.engine,
        alerts = state.dispatcher.is_enabled(),
        registry = settings.registry.base_url.is_some(),
        "agrisense listening"
    );

    let dispatcher = state.dispatcher.clone();
    let served = axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Scheduled alerts outlive their requests; give them the full retry
    // budget before the runtime goes away.
    let grace = dispatcher.policy().worst_case(settings.alert.timeout);
    let abandoned = dispatcher.drain(grace).await;

    if let Err(e) = served {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    tracing::info!(abandoned, "shut down");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
