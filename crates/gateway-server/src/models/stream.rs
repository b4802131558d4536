use chrono::{DateTime, Utc};
use gateway_protocol::StreamState;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One activation of a Device (§3). Invariant: at most one non-terminal
/// Stream per `camera_id` — authoritatively enforced by the orchestrator's
/// compare-and-insert on the in-memory stream registry (§5); the partial
/// unique index on `streams(camera_id)` in the migration backs it up at
/// the DB layer in case a row is ever written outside the registry path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stream {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub state: StreamState,
    pub codec_config: serde_json::Value,
    pub producer_ref: Option<Uuid>,
    pub assigned_port: Option<i32>,
    pub captured_ssrc: Option<i64>,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Stream {
    pub fn uptime_seconds(&self) -> Option<i64> {
        self.started_at.map(|t| (Utc::now() - t).num_seconds().max(0))
    }

    pub fn captured_ssrc_u32(&self) -> Option<u32> {
        self.captured_ssrc.map(|v| v as u32)
    }
}

/// A persisted record of a single state transition (§9: "retries are not
/// silent — each attempt logs a distinct audit event").
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StreamAuditEvent {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub from_state: StreamState,
    pub to_state: StreamState,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    pub is_healthy: bool,
    pub bitrate_kbps: f64,
    pub fps: f64,
    pub packet_loss: f64,
    pub jitter_ms: f64,
    pub last_error: Option<String>,
}
