use serde::{Deserialize, Serialize};

/// The `SCREAMING_CODE` vocabulary the core emits (§6). Kept as a string
/// newtype rather than an exhaustive enum: the envelope is consumed by
/// external clients and new codes should not require a protocol-crate
/// release to add (§7 taxonomy is semantic, not a closed type system).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    InvalidToken,
    TokenExpired,
    InvalidRefreshToken,
    InvalidCredentials,
    InsufficientScope,
    ResourceNotFound,
    StreamNotLive,
    ConsumerAlreadyExists,
    IncompatibleCapabilities,
    SfuUnavailable,
    RtspTimeout,
    SsrcCaptureFailed,
    RtspConnectionFailed,
    TranscoderError,
    ExtractionTimeout,
    NoRecordingData,
    DiskFull,
    Backlogged,
    SfuOverloaded,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::InsufficientScope => "INSUFFICIENT_SCOPE",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::StreamNotLive => "STREAM_NOT_LIVE",
            ErrorCode::ConsumerAlreadyExists => "CONSUMER_ALREADY_EXISTS",
            ErrorCode::IncompatibleCapabilities => "INCOMPATIBLE_CAPABILITIES",
            ErrorCode::SfuUnavailable => "SFU_UNAVAILABLE",
            ErrorCode::RtspTimeout => "RTSP_TIMEOUT",
            ErrorCode::SsrcCaptureFailed => "SSRC_CAPTURE_FAILED",
            ErrorCode::RtspConnectionFailed => "RTSP_CONNECTION_FAILED",
            ErrorCode::TranscoderError => "TRANSCODER_ERROR",
            ErrorCode::ExtractionTimeout => "EXTRACTION_TIMEOUT",
            ErrorCode::NoRecordingData => "NO_RECORDING_DATA",
            ErrorCode::DiskFull => "DISK_FULL",
            ErrorCode::Backlogged => "BACKLOGGED",
            ErrorCode::SfuOverloaded => "SFU_OVERLOADED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// The §6 error envelope, shared verbatim by the API layer and anything
/// that needs to parse gateway errors (e.g. a future client SDK).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub error_description: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub request_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
