//! HTTP trigger for the weekly digest, meant to be hit by an external scheduler.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use threatfeed::{DigestMailer, DigestOptions, DigestService, DigestStats, SqliteStore};
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tracing::{info, warn};

pub mod error;

use error::AppError;

pub type Service = DigestService<SqliteStore, Box<dyn DigestMailer>>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub cron_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Service, cron_secret: Option<String>) -> Self {
        Self {
            service: Arc::new(service),
            cron_secret: cron_secret.map(Arc::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DigestResponse {
    pub message: &'static str,
    pub stats: DigestStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/cron/weekly-digest",
            get(weekly_digest_handler).post(weekly_digest_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Requires `Authorization: Bearer <secret>`. With no secret configured every
/// request is refused.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Err(AppError::SecretNotConfigured);
    };

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == secret => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

pub async fn weekly_digest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DigestResponse>, AppError> {
    if let Err(e) = authorize(&headers, state.cron_secret.as_deref()) {
        warn!(error = %e, "rejected weekly digest trigger");
        return Err(e);
    }

    info!("weekly digest triggered");
    let stats = state
        .service
        .generate_weekly_digest(&DigestOptions::default())
        .await?;

    Ok(Json(DigestResponse {
        message: "Weekly digest generation completed",
        stats,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
