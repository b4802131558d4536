use chrono::{DateTime, Utc};
use gateway_protocol::ConsumerState;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One WebRTC downstream attached to a Stream's Producer (§3). Can exist
/// only while the parent Stream is LIVE; leaving LIVE closes all of them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Consumer {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub client_id: String,
    pub state: ConsumerState,
    pub transport_sfu_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachConsumerRequest {
    pub client_id: String,
    pub rtp_capabilities: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AttachConsumerResponse {
    pub consumer_id: Uuid,
    pub transport: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ConnectConsumerRequest {
    pub dtls_parameters: serde_json::Value,
}
