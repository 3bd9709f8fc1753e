//! `POST /api/v1/separate`: upload an audio file and split it into stems.
//!
//! Flow: validate query parameters, stream the `file` field to
//! `UPLOAD_DIR/{job_id}_{name}`, validate the staged file, run the separator
//! into `OUTPUT_DIR/{job_id}`, record the job. The staged upload is removed
//! afterwards when `CLEANUP_AFTER_PROCESSING` is set; the job directory is
//! removed whenever separation fails.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SeparationResponse};
use crate::config::Settings;
use crate::jobs::JobRecord;
use crate::separator::{cleanup_paths, SeparationRequest};
use crate::stems::{Bitrate, OutputFormat, StemType};
use crate::upload::{self, UploadError};

/// Raw query string. Absent values fall back to the configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct SeparateQuery {
    pub stems: Option<String>,
    pub bitrate: Option<String>,
    pub format: Option<String>,
}

/// Validated separation parameters.
#[derive(Debug, Clone, PartialEq)]
struct SeparateParams {
    stems: StemType,
    bitrate: Bitrate,
    format: OutputFormat,
}

fn resolve_params(query: SeparateQuery, ctx: &ApiContext) -> Result<SeparateParams, ApiError> {
    let settings = &ctx.settings;
    let stems = match query.stems {
        Some(raw) => raw.parse::<StemType>()?,
        None => settings.default_stems,
    };
    let bitrate = Bitrate::parse(query.bitrate.as_deref().unwrap_or(&settings.audio_bitrate))?;
    let format = query
        .format
        .as_deref()
        .unwrap_or(&settings.audio_format)
        .parse::<OutputFormat>()?;

    Ok(SeparateParams {
        stems,
        bitrate,
        format,
    })
}

pub async fn separate(
    State(ctx): State<ApiContext>,
    query: Result<Query<SeparateQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SeparationResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::Validation {
        message: "Invalid query parameters".into(),
        details: Some(serde_json::json!({ "query": rejection.body_text() })),
    })?;
    let params = resolve_params(query, &ctx)?;

    let mut multipart = multipart.map_err(|rejection| ApiError::Validation {
        message: "Request must be multipart/form-data with a 'file' field".into(),
        details: Some(serde_json::json!({ "body": rejection.body_text() })),
    })?;

    let job_id = Uuid::new_v4().to_string();
    tracing::info!(
        %job_id,
        stems = %params.stems,
        format = %params.format,
        bitrate = %params.bitrate,
        "Received separation request"
    );
    // Keeps the retention sweeper off this job's upload and output.
    let _in_flight = ctx.jobs.begin(&job_id);

    let staged = stage_upload(&mut multipart, &ctx.settings, &job_id).await?;

    if let Err(err) = validate_staged(&ctx, &staged).await {
        cleanup_paths([staged.path.as_path()]);
        return Err(err);
    }
    tracing::info!(
        %job_id,
        filename = %staged.filename,
        size_bytes = staged.size,
        "Upload staged"
    );

    let result = process(&ctx, &job_id, &params, &staged).await;

    if ctx.settings.cleanup_after_processing {
        cleanup_paths([staged.path.as_path()]);
    }

    let response = result.map_err(|err| {
        tracing::error!(%job_id, error = %err, "Separation failed");
        cleanup_paths([ctx.job_dir(&job_id).as_path()]);
        err
    })?;

    Ok(Json(response))
}

/// Content checks on the staged file (reads its header, so off the runtime).
async fn validate_staged(ctx: &ApiContext, staged: &StagedUpload) -> Result<(), ApiError> {
    let path = staged.path.clone();
    let max_size = ctx.settings.max_upload_size;
    tokio::task::spawn_blocking(move || upload::validate_audio_file(&path, max_size))
        .await
        .map_err(|e| ApiError::Internal(format!("validation task failed: {e}")))??;
    Ok(())
}

async fn process(
    ctx: &ApiContext,
    job_id: &str,
    params: &SeparateParams,
    staged: &StagedUpload,
) -> Result<SeparationResponse, ApiError> {
    let request = SeparationRequest {
        job_id: job_id.to_string(),
        input_file: staged.path.clone(),
        output_dir: ctx.job_dir(job_id),
        stems: params.stems,
        bitrate: params.bitrate.clone(),
        format: params.format,
    };
    let started = std::time::Instant::now();
    let outcome = ctx
        .separator
        .separate(&request)
        .instrument(tracing::info_span!(
            "separation",
            %job_id,
            stems = %params.stems,
            separator = ctx.separator.name()
        ))
        .await;
    tracing::debug!(
        %job_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = outcome.is_ok(),
        "Separation timing"
    );
    let outcome = outcome?;

    ctx.jobs.insert(JobRecord {
        job_id: job_id.to_string(),
        stems: params.stems,
        format: params.format,
        output_dir: request.output_dir,
        output_files: outcome.output_files.clone(),
        processing_time: outcome.processing_time,
        created_at: chrono::Utc::now(),
    });

    Ok(SeparationResponse {
        success: true,
        message: format!("Successfully separated audio into {}", params.stems),
        job_id: job_id.to_string(),
        stems: params.stems,
        output_files: outcome.output_files,
        processing_time: outcome.processing_time,
    })
}

// ---------------------------------------------------------------------------
// Upload staging
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StagedUpload {
    path: PathBuf,
    filename: String,
    size: u64,
}

/// Stream the `file` field to disk. Other fields are ignored. A partially
/// written file is removed on any error.
async fn stage_upload(
    multipart: &mut Multipart,
    settings: &Settings,
    job_id: &str,
) -> Result<StagedUpload, ApiError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, settings))?;
        let Some(field) = field else {
            return Err(UploadError::MissingFile.into());
        };
        if field.name() != Some("file") {
            continue;
        }

        let original = field.file_name().unwrap_or_default().to_string();
        let filename = upload::sanitize_filename(&original);
        if filename.is_empty() {
            return Err(UploadError::MissingFilename.into());
        }
        upload::validate_file_extension(&filename)?;

        // `{job_id}_` must fit in NAME_MAX alongside the client's name.
        let budget = upload::MAX_FILENAME_BYTES.saturating_sub(job_id.len() + 1);
        let staged_name = upload::fit_filename(&filename, budget);
        let path = settings.upload_dir.join(format!("{job_id}_{staged_name}"));
        return match write_field(field, &path, settings).await {
            Ok(size) => Ok(StagedUpload {
                path,
                filename,
                size,
            }),
            Err(err) => {
                cleanup_paths([path.as_path()]);
                Err(err.into())
            }
        };
    }
}

/// A body cut off by the request size cap is reported without a size: the
/// real one was never seen.
fn multipart_error(e: MultipartError, settings: &Settings) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::BodyTooLarge {
            limit_mb: settings.max_upload_size_mb(),
        }
    } else {
        UploadError::Malformed(e.body_text())
    }
}

async fn write_field(
    mut field: Field<'_>,
    path: &Path,
    settings: &Settings,
) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut size: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, settings))?
    {
        size += chunk.len() as u64;
        upload::validate_file_size(size, settings.max_upload_size)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(size)
}
