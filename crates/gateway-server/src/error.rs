use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_protocol::ErrorCode;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// The aggregate error type returned by every API handler. Each variant
/// maps to exactly one §6/§7 error code and HTTP status; leaf component
/// errors (`SfuError`, `TranscoderError`, ...) convert into this via `From`
/// so handlers can use plain `?`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication required")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing required scope: {0}")]
    InsufficientScope(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("stream {0} is not live (currently {1:?})")]
    StreamNotLive(Uuid, gateway_protocol::StreamState),

    #[error("consumer already exists for client {0}")]
    ConsumerAlreadyExists(String),

    #[error("client RTP capabilities are incompatible with this stream's producer")]
    IncompatibleCapabilities,

    #[error("SFU unavailable: {0}")]
    SfuUnavailable(String),

    /// The SFU control channel is healthy and replied, but rejected the
    /// call itself (e.g. a `canConsume` refusal) — distinct from
    /// [`AppError::SfuUnavailable`], which means the channel or the call
    /// round-trip failed. Callers that care about the difference (consumer
    /// attach) match on this before it falls through to the same default
    /// mapping as `SfuUnavailable`.
    #[error("SFU rejected the request: {0}")]
    SfuRejected(String),

    #[error("RTSP connection timed out")]
    RtspTimeout,

    #[error("SSRC capture failed: {0}")]
    SsrcCaptureFailed(String),

    #[error("RTSP connection failed: {0}")]
    RtspConnectionFailed(String),

    #[error("transcoder error: {0}")]
    TranscoderError(String),

    #[error("extraction timed out")]
    ExtractionTimeout,

    #[error("no recording data for the requested range")]
    NoRecordingData,

    #[error("disk full")]
    DiskFull,

    #[error("extraction queue is full")]
    Backlogged,

    #[error("SFU pending-call table is full")]
    SfuOverloaded,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::InvalidToken | AppError::Jwt(_) => ErrorCode::InvalidToken,
            AppError::TokenExpired => ErrorCode::TokenExpired,
            AppError::InvalidRefreshToken => ErrorCode::InvalidRefreshToken,
            AppError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AppError::InsufficientScope(_) => ErrorCode::InsufficientScope,
            AppError::NotFound(_) => ErrorCode::ResourceNotFound,
            AppError::StreamNotLive(..) => ErrorCode::StreamNotLive,
            AppError::ConsumerAlreadyExists(_) => ErrorCode::ConsumerAlreadyExists,
            AppError::IncompatibleCapabilities => ErrorCode::IncompatibleCapabilities,
            AppError::SfuUnavailable(_) | AppError::SfuRejected(_) => ErrorCode::SfuUnavailable,
            AppError::RtspTimeout => ErrorCode::RtspTimeout,
            AppError::SsrcCaptureFailed(_) => ErrorCode::SsrcCaptureFailed,
            AppError::RtspConnectionFailed(_) => ErrorCode::RtspConnectionFailed,
            AppError::TranscoderError(_) => ErrorCode::TranscoderError,
            AppError::ExtractionTimeout => ErrorCode::ExtractionTimeout,
            AppError::NoRecordingData => ErrorCode::NoRecordingData,
            AppError::DiskFull => ErrorCode::DiskFull,
            AppError::Backlogged => ErrorCode::Backlogged,
            AppError::SfuOverloaded => ErrorCode::SfuOverloaded,
            AppError::Database(_) | AppError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidToken | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StreamNotLive(..) => StatusCode::CONFLICT,
            AppError::ConsumerAlreadyExists(_) => StatusCode::CONFLICT,
            AppError::IncompatibleCapabilities => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SfuUnavailable(_) | AppError::SfuRejected(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RtspTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::SsrcCaptureFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RtspConnectionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::TranscoderError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ExtractionTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::NoRecordingData => StatusCode::NOT_FOUND,
            AppError::DiskFull => StatusCode::INSUFFICIENT_STORAGE,
            AppError::Backlogged => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SfuOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if matches!(self, AppError::Database(_) | AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }

        let request_id = Uuid::new_v4();
        let body = json!({
            "error": code.as_str(),
            "error_description": self.to_string(),
            "status_code": status.as_u16(),
            "details": {},
            "request_id": request_id.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
