//! HTTP routes: WebSocket upgrade, watched address, health, static UI

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use qrcode::render::svg;
use qrcode::QrCode;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::registry::ConnectionRegistry;
use super::ws;
use crate::balance::RefreshHandle;
use crate::wallet::{ReadinessWatch, WatchedAddress};

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub refresh: RefreshHandle,
    pub readiness: ReadinessWatch,
    pub ui_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(registry: ConnectionRegistry, refresh: RefreshHandle, readiness: ReadinessWatch, ui_dir: impl Into<PathBuf>) -> Self {
        Self { registry, refresh, readiness, ui_dir: Arc::new(ui_dir.into()) }
    }
}

pub fn create_router(state: AppState) -> Router {
    let assets = ServeDir::new(state.ui_dir.as_ref());
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_only))
        .route("/address", get(address))
        .route("/address/qr.svg", get(address_qr))
        .route("/health", get(health))
        .fallback_service(assets)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `/` serves the UI, or upgrades to the balance stream when asked to.
async fn index(upgrade: Option<WebSocketUpgrade>, State(s): State<AppState>) -> Response {
    if let Some(upgrade) = upgrade {
        return ws::upgrade(upgrade, s);
    }
    match tokio::fs::read_to_string(s.ui_dir.join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, dir = %s.ui_dir.display(), "no index.html");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
    }
}

async fn ws_only(upgrade: WebSocketUpgrade, State(s): State<AppState>) -> Response {
    ws::upgrade(upgrade, s)
}

async fn address(State(s): State<AppState>) -> Response {
    match s.readiness.watched_address() {
        Some(addr) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], addr.to_string()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "wallet initialization incomplete").into_response(),
    }
}

/// BIP21 `bitcoin:` URI of the watched address as an SVG QR code.
pub fn address_qr_svg(address: &WatchedAddress) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(format!("bitcoin:{}", address).as_bytes())?;
    Ok(code.render::<svg::Color>().min_dimensions(240, 240).build())
}

async fn address_qr(State(s): State<AppState>) -> Response {
    let Some(addr) = s.readiness.watched_address() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "wallet initialization incomplete").into_response();
    };
    match address_qr_svg(&addr) {
        Ok(svg) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        Err(e) => {
            tracing::error!(error = %e, address = %addr, "failed to render address QR code");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health(State(s): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tipjar",
        "wallet": s.readiness.current().as_str(),
        "connections": s.registry.live_count(),
    }))
}
