//! Debug-mode error diagnostics.
//!
//! Error responses carry their internal cause in an `ErrorDiagnostics`
//! extension. When the service runs with `DEBUG=true` this layer copies it
//! into the `details` field of the JSON body. Without the layer the cause
//! never leaves the process.

use axum::body::Body;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::error::ErrorDiagnostics;

/// Error bodies are small; anything larger is passed through untouched.
const MAX_ERROR_BODY: usize = 64 * 1024;

pub async fn expose(req: Request<Body>, next: Next) -> Response {
    let response = next.run(req).await;

    let Some(ErrorDiagnostics(detail)) = response.extensions().get::<ErrorDiagnostics>().cloned()
    else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Could not buffer error body for diagnostics");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let mut json: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(json) => json,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if json.get("details").is_some_and(|d| d.is_null()) {
        json["details"] = serde_json::json!({ "internal": detail });
    }

    let rebuilt = json.to_string();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(rebuilt))
}
