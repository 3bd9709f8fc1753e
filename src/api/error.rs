//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::separator::SeparationError;
use crate::stems::ParamError;
use crate::upload::UploadError;

/// Error body returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub error_code: &'static str,
    pub details: Option<serde_json::Value>,
}

/// Internal diagnostics attached to an error response as an extension.
/// Only copied into the body when the service runs in debug mode.
#[derive(Debug, Clone)]
pub struct ErrorDiagnostics(pub String);

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{0}")]
    FileValidation(String),
    #[error("{0}")]
    UnsupportedFormat(String),
    #[error("{0}")]
    FileTooLarge(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Invalid file path")]
    InvalidPath,
    #[error("Server busy")]
    Busy { retry_after: u64 },
    #[error(transparent)]
    Separation(#[from] SeparationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut diagnostics = None;
        let mut details = None;

        let (status, code, message) = match &self {
            ApiError::Validation {
                message,
                details: extra,
            } => {
                details = extra.clone();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "VALIDATION_ERROR",
                    message.clone(),
                )
            }
            ApiError::FileValidation(detail) => (
                StatusCode::BAD_REQUEST,
                "FILE_VALIDATION_ERROR",
                detail.clone(),
            ),
            ApiError::UnsupportedFormat(detail) => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_FORMAT",
                detail.clone(),
            ),
            ApiError::FileTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "FILE_TOO_LARGE",
                detail.clone(),
            ),
            ApiError::NotFound(filename) => (
                StatusCode::NOT_FOUND,
                "FILE_NOT_FOUND",
                format!("File not found: {filename}"),
            ),
            ApiError::InvalidPath => (
                StatusCode::FORBIDDEN,
                "INVALID_PATH",
                "Invalid file path".to_string(),
            ),
            ApiError::Busy { retry_after } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVER_BUSY",
                format!("Too many separations in progress. Retry after {retry_after}s"),
            ),
            ApiError::Separation(err) => {
                diagnostics = Some(err.to_string());
                match err {
                    SeparationError::Unavailable(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SEPARATOR_UNAVAILABLE",
                        "Audio separator is not available".to_string(),
                    ),
                    SeparationError::Timeout(secs) => (
                        StatusCode::GATEWAY_TIMEOUT,
                        "PROCESSING_TIMEOUT",
                        format!("Audio separation timed out after {secs}s"),
                    ),
                    SeparationError::NoOutput => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "PROCESSING_ERROR",
                        "Failed to separate audio: no stem files were produced".to_string(),
                    ),
                    SeparationError::Failed { .. } | SeparationError::Io(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "PROCESSING_ERROR",
                        "Failed to separate audio".to_string(),
                    ),
                }
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                diagnostics = Some(detail.clone());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            success: false,
            error: message,
            error_code: code,
            details,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::Busy { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        if let Some(diagnostics) = diagnostics {
            response.extensions_mut().insert(ErrorDiagnostics(diagnostics));
        }
        response
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::UnsupportedExtension { .. } => ApiError::UnsupportedFormat(err.to_string()),
            UploadError::TooLarge { .. } | UploadError::BodyTooLarge { .. } => {
                ApiError::FileTooLarge(err.to_string())
            }
            UploadError::Io(e) => ApiError::Internal(format!("upload staging failed: {e}")),
            other => ApiError::FileValidation(other.to_string()),
        }
    }
}

impl From<ParamError> for ApiError {
    fn from(err: ParamError) -> Self {
        ApiError::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn validation_returns_422_with_details() {
        let err = ApiError::Validation {
            message: "bad stems".into(),
            details: Some(serde_json::json!({"field": "stems"})),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "VALIDATION_ERROR");
        assert_eq!(json["error"], "bad stems");
        assert_eq!(json["details"]["field"], "stems");
    }

    #[tokio::test]
    async fn file_validation_returns_400() {
        let response = ApiError::FileValidation("No filename provided".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["error_code"], "FILE_VALIDATION_ERROR");
        assert!(json["details"].is_null());
    }

    #[tokio::test]
    async fn not_found_names_the_file() {
        let response = ApiError::NotFound("drums.wav".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_of(response).await;
        assert_eq!(json["error_code"], "FILE_NOT_FOUND");
        assert_eq!(json["error"], "File not found: drums.wav");
    }

    #[tokio::test]
    async fn invalid_path_returns_403() {
        let response = ApiError::InvalidPath.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_of(response).await["error_code"], "INVALID_PATH");
    }

    #[tokio::test]
    async fn busy_returns_503_with_retry_after() {
        let response = ApiError::Busy { retry_after: 5 }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "5");
        assert_eq!(json_of(response).await["error_code"], "SERVER_BUSY");
    }

    #[tokio::test]
    async fn separation_errors_map_to_5xx() {
        let cases = [
            (
                SeparationError::Unavailable("missing".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "SEPARATOR_UNAVAILABLE",
            ),
            (
                SeparationError::Timeout(600),
                StatusCode::GATEWAY_TIMEOUT,
                "PROCESSING_TIMEOUT",
            ),
            (
                SeparationError::NoOutput,
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESSING_ERROR",
            ),
            (
                SeparationError::Failed {
                    status: "exit status: 1".into(),
                    stderr: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESSING_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
            assert!(response.extensions().get::<ErrorDiagnostics>().is_some());
            assert_eq!(json_of(response).await["error_code"], code);
        }
    }

    #[tokio::test]
    async fn separator_stderr_is_not_in_body() {
        let err = SeparationError::Failed {
            status: "exit status: 1".into(),
            stderr: "/secret/path/model.ckpt missing".into(),
        };
        let response = ApiError::from(err).into_response();
        let diagnostics = response.extensions().get::<ErrorDiagnostics>().cloned().unwrap();
        assert!(diagnostics.0.contains("/secret/path"));
        let json = json_of(response).await;
        assert!(!json.to_string().contains("/secret/path"));
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error_code"], "INTERNAL_ERROR");
        assert_eq!(json["error"], "An unexpected error occurred");
    }

    #[test]
    fn upload_errors_map_by_kind() {
        let unsupported: ApiError = UploadError::UnsupportedExtension {
            extension: ".txt".into(),
            allowed: ".wav".into(),
        }
        .into();
        assert!(matches!(unsupported, ApiError::UnsupportedFormat(_)));

        let too_large: ApiError = UploadError::TooLarge {
            size_mb: 120.0,
            limit_mb: 100.0,
        }
        .into();
        assert!(matches!(too_large, ApiError::FileTooLarge(_)));

        let body_too_large: ApiError = UploadError::BodyTooLarge { limit_mb: 100.0 }.into();
        assert!(matches!(
            &body_too_large,
            ApiError::FileTooLarge(message) if message == "Upload exceeds maximum allowed size (100MB)"
        ));

        let missing: ApiError = UploadError::MissingFilename.into();
        assert!(matches!(missing, ApiError::FileValidation(_)));
    }

    #[test]
    fn param_error_is_validation() {
        let err: ApiError = ParamError::Bitrate("fast".into()).into();
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
