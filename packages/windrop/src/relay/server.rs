//! Relay Server
//!
//! Axum wiring: `/ws` upgrades into the signaling handler, `/healthz` is a
//! liveness probe. The room directory is owned here and injected into every
//! connection handler — no globals.

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RelayFileConfig;

use super::handler::handle_signaling;
use super::rooms::RoomDirectory;

/// How often the idle-room sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct RelayState {
    directory: Arc<RoomDirectory>,
}

pub struct RelayServer {
    config: RelayFileConfig,
    directory: Arc<RoomDirectory>,
}

impl RelayServer {
    pub fn new(config: RelayFileConfig) -> Self {
        Self {
            config,
            directory: Arc::new(RoomDirectory::new()),
        }
    }

    /// Directory handle, mainly for inspection in tests.
    pub fn directory(&self) -> Arc<RoomDirectory> {
        self.directory.clone()
    }

    pub fn router(&self) -> Router {
        let state = RelayState {
            directory: self.directory.clone(),
        };
        Router::new()
            .route("/ws", get(ws_route))
            .route("/healthz", get(healthz))
            .layer(tower_http::cors::CorsLayer::permissive())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind to the configured host/port and serve until the process exits.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (lets tests use an ephemeral port).
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("relay listening on {}", listener.local_addr()?);

        let sweep_cancel = CancellationToken::new();
        let sweep_guard = sweep_cancel.clone().drop_guard();
        let directory = self.directory.clone();
        let max_idle = self.config.room_idle();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => directory.sweep_idle(max_idle).await,
                    _ = sweep_cancel.cancelled() => {
                        debug!("idle sweep task stopping");
                        break;
                    }
                }
            }
        });

        let result = axum::serve(listener, self.router()).await;
        drop(sweep_guard);
        result.map_err(Into::into)
    }
}

async fn ws_route(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_signaling(socket, state.directory))
}

async fn healthz() -> &'static str {
    "ok"
}
