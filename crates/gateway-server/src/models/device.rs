use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A configured RTSP source (§3). `is_active` is derived at query time from
/// the `streams` table rather than stored, so it can never drift.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub rtsp_url: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateDevice {
    pub name: String,
    pub rtsp_url: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDevice {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub location: Option<String>,
}
