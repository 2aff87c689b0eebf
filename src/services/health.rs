//! Health check HTTP server
//!
//! Liveness and readiness probe for process supervision. Reports database
//! connectivity and worker-pool liveness; everything else about the engine
//! is observable through logs.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Shared state for the health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub workers_running: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            workers_running: AtomicBool::new(false),
        }
    }

    pub fn set_workers_running(&self, running: bool) {
        self.workers_running.store(running, Ordering::SeqCst);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct ServerContext {
    state: Arc<HealthState>,
    pool: PgPool,
}

pub struct HealthServer;

impl HealthServer {
    /// Serve `/health` on the given port until the process exits.
    pub async fn serve(port: u16, state: Arc<HealthState>, pool: PgPool) -> Result<()> {
        let context = ServerContext { state, pool };
        let app = Router::new()
            .route("/health", get(health_handler))
            .with_state(context);

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!("Health server listening on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health_handler(State(context): State<ServerContext>) -> impl IntoResponse {
    let db_healthy = sqlx::query("SELECT 1")
        .execute(&context.pool)
        .await
        .is_ok();
    let workers_running = context.state.workers_running.load(Ordering::SeqCst);

    let components = vec![
        ComponentHealth {
            name: "database".to_string(),
            status: if db_healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
        },
        ComponentHealth {
            name: "workers".to_string(),
            status: if workers_running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
        },
    ];

    let overall = if components.iter().all(|c| c.status.is_healthy()) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let uptime_seconds = (Utc::now() - context.state.started_at).num_seconds().max(0) as u64;
    let response = HealthResponse {
        status: overall,
        timestamp: Utc::now(),
        uptime_seconds,
        components,
    };

    let code = if overall.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_flag_flips() {
        let state = HealthState::new();
        assert!(!state.workers_running.load(Ordering::SeqCst));
        state.set_workers_running(true);
        assert!(state.workers_running.load(Ordering::SeqCst));
    }

    #[test]
    fn health_response_serializes_lowercase() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            uptime_seconds: 1,
            components: vec![],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"healthy""#));
    }
}
