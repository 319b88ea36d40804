//! Connection handlers for the Roomcast server.
//!
//! This module owns the connection lifecycle: WebSocket upgrade, the
//! per-connection event pump, and the hand-off into the session coordinator.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::notifier::ChannelNotifier;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use roomcast_core::{Limits, MemoryStore, Notifier, PresenceRegistry, SessionCoordinator};
use roomcast_protocol::{codec, ServerEvent};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The session coordinator.
    pub coordinator: Arc<SessionCoordinator>,
    /// The presence registry, kept for observability.
    pub registry: PresenceRegistry,
    /// The fan-out table.
    pub notifier: Arc<ChannelNotifier>,
}

impl AppState {
    /// Wire up the engine from configuration.
    ///
    /// Must run inside a tokio runtime: the expiration pump is spawned here.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (registry, expirations) = PresenceRegistry::new(config.presence.grace_period());
        let notifier = Arc::new(ChannelNotifier::new(registry.clone()));
        let limits = Limits {
            max_username_length: config.limits.max_username_length,
            max_room_length: config.limits.max_room_length,
            max_message_length: config.limits.max_message_length,
        };
        let coordinator = SessionCoordinator::new(
            registry.clone(),
            Arc::new(MemoryStore::new()),
            notifier.clone(),
            limits,
        );
        coordinator.spawn_expiration_pump(expirations);

        Self {
            coordinator,
            registry,
            notifier,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Roomcast server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Everything the engine wants delivered to this connection flows
    // through this channel into the pump below.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.notifier.attach(&connection_id, outbound_tx);
    state.coordinator.connect(&connection_id);

    loop {
        tokio::select! {
            Some(event) = outbound_rx.recv() => {
                match codec::encode(&event) {
                    Ok(text) => {
                        metrics::record_message("outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(connection = %connection_id, %error, "failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message("inbound");
                        match codec::decode(&text) {
                            Ok(event) => {
                                state.coordinator.dispatch(&connection_id, event).await;
                                metrics::update_presence(&state.registry.stats());
                            }
                            Err(error) => {
                                debug!(connection = %connection_id, %error, "malformed client event");
                                metrics::record_error("protocol");
                                state
                                    .notifier
                                    .unicast(&connection_id, ServerEvent::error("Malformed event"));
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection = %connection_id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "received close frame");
                        break;
                    }
                    Some(Err(error)) => {
                        warn!(connection = %connection_id, %error, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // The coordinator decides whether this starts a grace period or was
    // already handled by an explicit leave.
    state.notifier.detach(&connection_id);
    state.coordinator.disconnect(&connection_id);
    metrics::update_presence(&state.registry.stats());

    debug!(connection = %connection_id, "WebSocket disconnected");
}
