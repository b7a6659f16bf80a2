//! HTTP server for signaling, stream history and health checks
//!
//! Provides the signaling WebSocket endpoint, the stream history REST API,
//! an active-stream snapshot, health/metrics endpoints and optional static
//! file hosting for the front-end bundle.

use crate::history::{HistoryError, NewVideoRecord};
use crate::transport::handle_signaling_connection;
use crate::web::shared::SharedState;
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

/// Run the HTTP server until it fails
pub async fn run_http_server(state: Arc<SharedState>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state.config.bind_addr();
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);
    info!("Signaling WebSocket ready at ws://{}/socket?username=<name>", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

/// Build the application router
pub fn build_router(state: Arc<SharedState>) -> Router {
    let mut app = Router::new()
        .route("/socket", get(signaling_handler))
        .route("/ws", get(signaling_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/streams", get(streams_handler))
        .route("/api/videos", get(list_videos_handler).post(create_video_handler))
        .route("/api/videos/{id}", get(get_video_handler));

    if let Some(ref root) = state.config.http.web_root {
        info!("Serving web UI from {:?}", root);
        app = app.fallback_service(ServeDir::new(root));
    }

    let cors = cors_layer(state.config.http.cors_origin.as_deref());
    let app = app.with_state(state);
    match cors {
        Some(layer) => app.layer(tower::ServiceBuilder::new().layer(layer)),
        None => app,
    }
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?;
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                return None;
            }
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    username: Option<String>,
}

/// Upgrade to a signaling WebSocket for the claimed identity
async fn signaling_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let identity = match params.username {
        Some(name) if !name.trim().is_empty() => name,
        _ => {
            warn!("Rejecting signaling connection without username");
            return (StatusCode::BAD_REQUEST, "username query parameter is required").into_response();
        }
    };
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_signaling_connection(socket, identity, hub))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    let stats = state.hub.stats();
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.uptime().as_secs_f64(),
        "connections": stats.connections,
        "active_streams": stats.active_streams,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Metrics handler (Prometheus format)
async fn metrics_handler(State(state): State<Arc<SharedState>>) -> String {
    let uptime = state.uptime().as_secs_f64();
    let stats = state.hub.stats();

    format!(
        r#"# HELP livecast_uptime_seconds Server uptime in seconds
# TYPE livecast_uptime_seconds counter
livecast_uptime_seconds {}
# HELP livecast_connections Current number of signaling connections
# TYPE livecast_connections gauge
livecast_connections {}
# HELP livecast_active_streams Current number of active streams
# TYPE livecast_active_streams gauge
livecast_active_streams {}
# HELP livecast_signals_relayed_total Negotiation messages queued for delivery
# TYPE livecast_signals_relayed_total counter
livecast_signals_relayed_total {}
# HELP livecast_signals_dropped_total Targeted negotiation messages with no live recipient
# TYPE livecast_signals_dropped_total counter
livecast_signals_dropped_total {}
# HELP livecast_broadcasts_total Lifecycle events broadcast
# TYPE livecast_broadcasts_total counter
livecast_broadcasts_total {}
# HELP livecast_overflow_disconnects_total Connections severed for a full outbound queue
# TYPE livecast_overflow_disconnects_total counter
livecast_overflow_disconnects_total {}
# HELP livecast_events_rejected_total Inbound events answered with an error
# TYPE livecast_events_rejected_total counter
livecast_events_rejected_total {}
"#,
        uptime,
        stats.connections,
        stats.active_streams,
        stats.signals_relayed,
        stats.signals_dropped,
        stats.broadcasts,
        stats.overflow_disconnects,
        stats.events_rejected
    )
}

/// Active streams, for clients that connect mid-stream
async fn streams_handler(State(state): State<Arc<SharedState>>) -> Response {
    Json(state.hub.active_streams()).into_response()
}

async fn list_videos_handler(State(state): State<Arc<SharedState>>) -> Response {
    let history = state.history.clone();
    match task::spawn_blocking(move || history.list_records()).await {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => history_error_response("Failed to fetch videos", e),
        Err(e) => join_error_response(e),
    }
}

async fn create_video_handler(
    State(state): State<Arc<SharedState>>,
    Json(body): Json<NewVideoRecord>,
) -> Response {
    let history = state.history.clone();
    match task::spawn_blocking(move || history.create_record(body)).await {
        Ok(Ok(record)) => {
            info!(
                "Recorded stream {} by {} ({}s, {} viewers)",
                record.id,
                record.streamer_name,
                record.duration,
                record.viewers.len()
            );
            Json(record).into_response()
        }
        Ok(Err(e)) => history_error_response("Failed to create video", e),
        Err(e) => join_error_response(e),
    }
}

async fn get_video_handler(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Response {
    let history = state.history.clone();
    match task::spawn_blocking(move || history.get_record(&id)).await {
        Ok(Ok(Some(record))) => Json(record).into_response(),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Video not found" })),
        )
            .into_response(),
        Ok(Err(e)) => history_error_response("Failed to fetch video", e),
        Err(e) => join_error_response(e),
    }
}

fn history_error_response(context: &str, err: HistoryError) -> Response {
    match err {
        HistoryError::Duplicate(_) => {
            (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response()
        }
        HistoryError::Invalid(_) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
        _ => {
            error!("{}: {}", context, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": context })),
            )
                .into_response()
        }
    }
}

fn join_error_response(err: task::JoinError) -> Response {
    error!("History task failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal error" })),
    )
        .into_response()
}
