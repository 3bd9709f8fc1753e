//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//!
//! Middleware stack (outermost to innermost):
//! Extension → CORS → request logger → diagnostics (debug only) → handler.
//! The separation route additionally sits behind the concurrency limiter
//! and a body limit sized for `MAX_UPLOAD_SIZE`.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let separation = Router::new()
        .route("/api/v1/separate", post(endpoints::separate::separate))
        .route_layer(axum::middleware::from_fn(middleware::concurrency::limit))
        .layer(DefaultBodyLimit::max(ctx.settings.body_limit()));

    let mut app = Router::new()
        .route("/", get(endpoints::health::root))
        .route("/health", get(endpoints::health::check))
        .route("/ready", get(endpoints::health::ready))
        .route(
            "/api/v1/separate/:job_id/download/:filename",
            get(endpoints::download::download),
        )
        .merge(separation)
        .with_state(ctx.clone());

    if ctx.settings.debug {
        app = app.layer(axum::middleware::from_fn(middleware::diagnostics::expose));
    }

    app.layer(axum::middleware::from_fn(middleware::audit::log_request))
        .layer(CorsLayer::permissive())
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx))
}
