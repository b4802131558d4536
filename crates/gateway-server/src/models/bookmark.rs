use chrono::{DateTime, Utc};
use gateway_protocol::{JobStatus, Source};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An extracted video clip (§3). `end_time - start_time == duration_seconds`
/// always; enforced at construction time, never recomputed from disk.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bookmark {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub center_timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub source: Source,
    pub label: Option<String>,
    pub event_type: Option<String>,
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
    pub status: JobStatus,
    pub video_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub tombstoned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookmarkRequest {
    pub source: Source,
    pub center_timestamp: Option<DateTime<Utc>>,
    pub before_seconds: f64,
    pub after_seconds: f64,
    pub label: Option<String>,
    pub event_type: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookmarkRequest {
    pub label: Option<String>,
    pub tags: Option<Vec<String>>,
    pub event_type: Option<String>,
}
