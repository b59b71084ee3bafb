//! Backend of the Jemlo smart fountain: counters, live view and admin dashboard API.
//!
//!
//!
//! # General Infrastructure
//! - One process per fountain, running on the Raspberry Pi next to the pump
//! - Button and pump are polled and driven by the fountain loop in the `fountain` crate
//! - Counters, profiles and audit entries live in a hosted realtime database
//! - Dashboard talks to `/api/admin/*`, the fountain display to `/ws`
//!
//!
//!
//! # Fill Flow
//!
//! - Button held: pump on, liters grow by a fixed rate per second, every tick is pushed to `/ws`
//! - Button released: pump off, a short debounce window opens
//! - Pressed again within the window: same session continues
//! - Window elapsed: the session is added to today's counter, department totals are pushed
//!
//!
//!
//! # Sessions
//!
//! - Login sets an http-only `access_token` cookie holding a signed claim set
//! - Org-domain accounts are admins, other accounts are clients
//! - Admin logins, failed admin logins, account creation and logouts are audited under `/logs`
//!
//!
//!
//! # Notes
//!
//! ## Offline mode
//! `DATABASE_URL=memory` and no `IDENTITY_API_KEY` run everything in-process, handy on a
//! laptop without the hardware. Nothing survives a restart in that mode.
//!
//! ## Counters
//! Daily counters are read-modify-write without transactions. Each fountain only writes
//! its own record, so last-writer-wins is acceptable.
//!
//!
//!
//! # Setup
//!
//! Run locally without GPIO.
//! ```sh
//! JWT_SECRET=dev SUPER_ADMIN_EMAIL=root@jemlo.be SUPER_ADMIN_PASSWORD=dev cargo run
//! ```
//!
//! Build for the Pi with real pins.
//! ```sh
//! cargo build --release --features rpi
//! ```
//!
//! Then start with `GPIO_MODE=rpi`.
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admin;
pub mod audit;
pub mod auth;
pub mod config;
pub mod counters;
pub mod database;
pub mod device;
pub mod error;
pub mod hub;
pub mod identity;
pub mod routes;
pub mod state;
pub mod stats;
pub mod utils;

use admin::{
    alerts_handler, create_user_handler, fountain_graph_handler, fountains_handler,
    login_handler, logout_handler, logs_handler, stats_total_handler, verify_handler,
};
use config::Config;
use device::FountainSink;
use routes::{read_department_handler, read_machine_handler, serial_handler, ws_handler};
use state::State;

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load().context("Failed to load config")?;

    info!("Initializing state...");
    let state = State::new(config)?;

    let device = device::start(
        &state.config,
        FountainSink::new(state.counters.clone(), state.hub.clone()),
    )?;

    info!("Starting server...");

    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Server shutting down...");

    if let Some(device) = device {
        device.shutdown().await;
    }

    served.context("Server error")
}

fn cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse()
                .map_err(|e| warn!("Ignoring invalid origin {origin}: {e}"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/api/serial", get(serial_handler))
        .route("/api/read-machine/{date}", get(read_machine_handler))
        .route("/api/read-department/{date}", get(read_department_handler))
        .route("/api/admin/login", post(login_handler))
        .route("/api/admin/logout", post(logout_handler))
        .route("/api/admin/verify", get(verify_handler))
        .route("/api/admin/create-user", post(create_user_handler))
        .route("/api/admin/stats_total", get(stats_total_handler))
        .route("/api/admin/fountain_graph", get(fountain_graph_handler))
        .route("/api/admin/fountains", get(fountains_handler))
        .route("/api/admin/logs", get(logs_handler))
        .route("/api/admin/alerts", get(alerts_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
