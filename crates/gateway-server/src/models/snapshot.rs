use chrono::{DateTime, Utc};
use gateway_protocol::{JobStatus, Source};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An extracted still image (§3). Created PROCESSING; exactly one
/// transition to READY or FAILED, never reversed (§8 monotone-status law).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Snapshot {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub status: JobStatus,
    pub image_path: Option<String>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub tombstoned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub source: Source,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
