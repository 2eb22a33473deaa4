use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::error::Error;
use crate::history::Period;
use crate::monitor::Monitor;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/api/latest", get(api_latest))
        .route("/api/live", get(api_live))
        .route("/api/status", get(api_status))
        .route("/api/history", get(api_history))
        .route("/api/stations", get(api_stations).put(api_save_stations))
        .route("/api/stations/selected", put(api_select_station))
        .route("/api/stations/{name}", put(api_set_address))
        .with_state(monitor)
}

#[derive(Deserialize)]
struct HistoryParams {
    station: Option<String>,
    period: Option<String>,
}

#[derive(Deserialize)]
struct SelectBody {
    name: String,
}

#[derive(Deserialize)]
struct AddressBody {
    address: String,
}

async fn api_latest(State(monitor): State<Monitor>) -> impl IntoResponse {
    Json(monitor.latest().await)
}

async fn api_live(State(monitor): State<Monitor>) -> impl IntoResponse {
    Json(monitor.live().await)
}

async fn api_status(State(monitor): State<Monitor>) -> impl IntoResponse {
    Json(monitor.status().await)
}

async fn api_history(
    State(monitor): State<Monitor>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let period = match params.period.as_deref().map(str::parse::<Period>) {
        None => Period::All,
        Some(Ok(p)) => p,
        Some(Err(msg)) => return error_response(StatusCode::BAD_REQUEST, msg),
    };
    let station = params.station.as_deref().filter(|s| !s.is_empty());
    tracing::debug!(station = station.unwrap_or("*"), %period, "history query");
    Json(monitor.query_history(station, period.span()).await).into_response()
}

async fn api_stations(State(monitor): State<Monitor>) -> impl IntoResponse {
    Json(monitor.list_stations().await)
}

async fn api_save_stations(
    State(monitor): State<Monitor>,
    Json(mapping): Json<HashMap<String, String>>,
) -> Response {
    match monitor.save_stations(&mapping).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_response(e),
    }
}

async fn api_select_station(
    State(monitor): State<Monitor>,
    Json(body): Json<SelectBody>,
) -> Response {
    match monitor.select_station(&body.name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_response(e),
    }
}

async fn api_set_address(
    State(monitor): State<Monitor>,
    Path(name): Path<String>,
    Json(body): Json<AddressBody>,
) -> Response {
    match monitor.set_station_address(&name, &body.address).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_to_response(e),
    }
}

fn error_to_response(err: Error) -> Response {
    let status = match &err {
        Error::UnknownStation(_) => StatusCode::NOT_FOUND,
        Error::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(
    monitor: Monitor,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("web api listening on http://{addr}");

    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
