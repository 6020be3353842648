//! Liveness, readiness, build info and stored files, served outside `/api/v1`.

use crate::config::Environment;
use crate::handlers::upload;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    environment: Environment,
}

#[derive(Serialize)]
struct Readiness {
    status: &'static str,
    database: &'static str,
    latency_ms: u128,
}

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        environment: state.config.environment,
    })
}

/// 503 while the data client cannot answer a ping.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let started = Instant::now();
    let outcome = state.client.ping().await;
    let latency_ms = started.elapsed().as_millis();
    match outcome {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ok",
                database: "ok",
                latency_ms,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, latency_ms, "data client ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "degraded",
                    database: "unavailable",
                    latency_ms,
                }),
            )
        }
    }
}

async fn version() -> Json<BuildInfo> {
    Json(BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .route("/files/*key", get(upload::serve))
        .with_state(state)
}
