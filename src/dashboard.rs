use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::player::{Orchestrator, Origin};
use crate::session::Op;

/// Read-only stats plus PIN-gated remote control. Remote commands go through
/// the same dispatch path a guild member's command would, so they cannot
/// bypass session invariants.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/control", post(control))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

pub async fn serve(orchestrator: Arc<Orchestrator>) {
    let addr = orchestrator.config().dashboard_addr.clone();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(why) => {
            warn!("Dashboard could not bind {addr}: {why}");
            return;
        }
    };

    info!("Dashboard listening on {addr}");
    if let Err(why) = axum::serve(listener, router(orchestrator)).await {
        warn!("Dashboard server stopped: {why}");
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "online",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct LiveSession {
    guild_id: u64,
    status: crate::models::PlaybackStatus,
    current_title: Option<String>,
    current_thumbnail: Option<String>,
    queue_length: usize,
    volume: f32,
    autoplay: bool,
}

async fn stats(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let global = orchestrator.stats_store().global_stats().await;

    let live: Vec<LiveSession> = orchestrator
        .snapshots()
        .await
        .into_iter()
        .map(|snapshot| LiveSession {
            guild_id: snapshot.guild_id,
            status: snapshot.status,
            current_title: snapshot.current().map(|track| track.title.clone()),
            current_thumbnail: snapshot
                .current()
                .and_then(|track| track.thumbnail.clone()),
            queue_length: snapshot.tracks.len(),
            volume: snapshot.volume,
            autoplay: snapshot.autoplay,
        })
        .collect();

    Json(json!({
        "total_plays": global.total_plays,
        "active_guilds": global.active_guilds,
        "most_played": global.most_played,
        "servers": global.servers,
        "live_sessions": live,
    }))
}

#[derive(Deserialize)]
struct ControlRequest {
    pin: String,
    guild_id: u64,
    action: String,
}

async fn control(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    let Some(expected) = orchestrator.config().dashboard_pin.clone() else {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "error": "Remote control is disabled"})),
        );
    };
    if request.pin != expected {
        warn!("Dashboard control rejected: bad PIN");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "Invalid PIN"})),
        );
    }

    let op = match request.action.as_str() {
        "play" => Op::Resume,
        "pause" => Op::Pause,
        "skip" => Op::Skip,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": format!("Unknown action `{other}`")})),
            );
        }
    };

    info!(
        "Dashboard control: {} for guild {}",
        request.action, request.guild_id
    );
    match orchestrator
        .dispatch(request.guild_id, Origin::default(), op)
        .await
    {
        Ok(reply) => (StatusCode::OK, Json(json!({"success": true, "message": reply}))),
        Err(why) => (
            StatusCode::CONFLICT,
            Json(json!({"success": false, "error": why.to_string()})),
        ),
    }
}
