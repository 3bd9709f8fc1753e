//! Separation slot limiter.
//!
//! Each separation holds one permit from `ApiContext::permits` for its whole
//! lifetime, upload included. When none is free the request is rejected with
//! 503 and `Retry-After` before its body is read.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, BUSY_RETRY_AFTER_SECS};

/// Accesses `ApiContext` from request extensions.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let _permit = ctx.permits.clone().try_acquire_owned().map_err(|_| {
        tracing::warn!(
            max_concurrent = ctx.settings.max_concurrent_requests,
            "Separation rejected, all slots busy"
        );
        ApiError::Busy {
            retry_after: BUSY_RETRY_AFTER_SECS,
        }
    })?;

    Ok(next.run(req).await)
}
