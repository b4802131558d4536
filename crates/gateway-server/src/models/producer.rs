use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The SFU-side handle for a stream's ingress RTP flow (§3). Owned by
/// exactly one Stream; lifetime is bounded by the stream's.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Producer {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub sfu_id: String,
    pub ssrc: i64,
    pub transport_sfu_id: String,
}
