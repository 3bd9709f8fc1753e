//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::Json;

use crate::api::types::{ApiContext, HealthResponse, ReadinessResponse, ServiceInfo};

/// `GET /`: service banner.
pub async fn root(State(ctx): State<ApiContext>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: ctx.settings.api_title.clone(),
        version: ctx.settings.api_version.clone(),
        status: "running",
    })
}

/// `GET /health`: the process is up and serving requests.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: ctx.settings.api_version.clone(),
        service: ctx.settings.api_title.clone(),
    })
}

/// `GET /ready`: `ready` once a model has run successfully, `loading` before
/// that, `not_ready` when the separator could not be launched last time.
pub async fn ready(State(ctx): State<ApiContext>) -> Json<ReadinessResponse> {
    let models = ctx.separator.loaded_models();
    let error = ctx.separator.last_error();

    let status = if !models.is_empty() {
        "ready"
    } else if error.is_some() {
        "not_ready"
    } else {
        "loading"
    };

    Json(ReadinessResponse {
        status,
        models_loaded: !models.is_empty(),
        models,
        version: ctx.settings.api_version.clone(),
        error,
    })
}
