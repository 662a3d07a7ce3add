use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use switchboard_core::resilience::{HealthRegistry, ServiceHealth};
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    registry: HealthRegistry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub open_services: Vec<String>,
    pub services: BTreeMap<String, ServiceHealth>,
    pub checked_at: String,
}

pub fn router(registry: HealthRegistry) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { registry })
}

pub async fn spawn(bind_address: &str, port: u16, registry: HealthRegistry) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(registry)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Breaker snapshot of every service called so far; 503 while any breaker is open.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let services = state.registry.snapshot();
    let open_services = state.registry.open_services();
    let ready = open_services.is_empty();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        open_services,
        services,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
