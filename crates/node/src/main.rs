mod sim;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::{env, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use sim::{ClimateSim, Scenario};

/// Payload of `GET /data`, field names as the ESP32 firmware sends them.
#[derive(Debug, Serialize)]
struct DataMsg {
    temp: f64,
    hum: f64,
}

#[derive(Clone)]
struct NodeState {
    sim: Arc<Mutex<ClimateSim>>,
    failure_rate: f32,
}

fn router(state: NodeState) -> Router {
    Router::new()
        .route("/data", get(data))
        .with_state(state)
}

async fn data(State(state): State<NodeState>) -> Response {
    if fastrand::f32() < state.failure_rate {
        tracing::debug!("injecting sensor failure");
        return (StatusCode::INTERNAL_SERVER_ERROR, "sensor read failed").into_response();
    }
    let sample = state.sim.lock().await.sample();
    tracing::debug!(temp = sample.temperature, hum = sample.humidity, "served reading");
    Json(DataMsg {
        temp: sample.temperature,
        hum: sample.humidity,
    })
    .into_response()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let port: u16 = env::var("NODE_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8081);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_s: f64 = env::var("SIM_DIURNAL_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(86_400.0);

    let state = NodeState {
        sim: Arc::new(Mutex::new(ClimateSim::new(scenario, diurnal_s))),
        failure_rate: scenario.failure_rate(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%scenario, diurnal_s, "climate node listening on http://{addr}/data");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
