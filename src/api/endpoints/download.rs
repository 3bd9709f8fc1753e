//! `GET /api/v1/separate/:job_id/download/:filename`: fetch one stem.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::upload::sanitize_filename;

/// Streams the file with a `Content-Type` guessed from its extension.
pub async fn download(
    State(ctx): State<ApiContext>,
    Path((job_id, filename)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let safe_job = sanitize_filename(&job_id);
    let safe_file = sanitize_filename(&filename);
    if safe_job.is_empty() || safe_file.is_empty() {
        tracing::warn!(%job_id, %filename, "Rejected download path");
        return Err(ApiError::InvalidPath);
    }

    let output_dir = &ctx.settings.output_dir;
    let path = output_dir.join(&safe_job).join(&safe_file);
    if !path.is_file() {
        return Err(ApiError::NotFound(safe_file));
    }

    // Symlinks inside a job directory must not lead out of OUTPUT_DIR.
    let resolved = path
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("resolve {}: {e}", path.display())))?;
    let root = output_dir
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("resolve output dir: {e}")))?;
    if !resolved.starts_with(&root) {
        tracing::warn!(job_id = %safe_job, filename = %safe_file, "Download escaped output dir");
        return Err(ApiError::InvalidPath);
    }

    let served = ServeFile::new(&resolved)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(format!("serve {}: {e}", resolved.display())))?;
    let mut response = served.map(Body::new);

    if response.status().is_success() {
        let disposition = format!("attachment; filename=\"{safe_file}\"");
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
        tracing::info!(job_id = %safe_job, filename = %safe_file, "Stem downloaded");
    }

    Ok(response)
}
