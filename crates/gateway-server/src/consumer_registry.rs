//! Tracks WebRTC consumers attached to a stream's producer and coordinates
//! their SFU transport/DTLS lifecycle (§4.6).

use crate::error::{AppError, Result};
use crate::sfu::SfuControlClient;
use dashmap::DashMap;
use gateway_protocol::ConsumerState;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const PENDING_TTL: Duration = Duration::from_secs(30);

struct TrackedConsumer {
    stream_id: Uuid,
    transport_id: Option<String>,
    state: ConsumerState,
}

/// Process-wide consumer bookkeeping, keyed by consumer id. Persisted state
/// lives in the `consumers` table; this registry mirrors it for the hot
/// attach/connect/detach path and drives TTL expiry on PENDING consumers.
pub struct ConsumerRegistry {
    db: PgPool,
    sfu: Arc<SfuControlClient>,
    announced_public_ip: String,
    consumers: DashMap<Uuid, Mutex<TrackedConsumer>>,
}

impl ConsumerRegistry {
    pub fn new(db: PgPool, sfu: Arc<SfuControlClient>, announced_public_ip: String) -> Self {
        Self {
            db,
            sfu,
            announced_public_ip,
            consumers: DashMap::new(),
        }
    }

    /// Creates a PENDING consumer transport on the SFU for `stream_id` and
    /// asks the SFU's `canConsume` to accept `rtp_capabilities` against the
    /// stream's producer, failing with `IncompatibleCapabilities` if it
    /// doesn't (§4.6). Precondition (stream LIVE, `producer_id` known) is
    /// checked by the caller (orchestrator), since it requires the stream's
    /// own state, not the registry's.
    pub async fn attach(
        &self,
        stream_id: Uuid,
        producer_id: &str,
        client_id: String,
        rtp_capabilities: serde_json::Value,
    ) -> Result<(Uuid, gateway_protocol::sfu::WebrtcTransportInfo)> {
        let transport = self.sfu.create_webrtc_transport(&self.announced_public_ip).await?;

        let consumer_params = gateway_protocol::sfu::CreateConsumerParams {
            transport_id: transport.id.clone(),
            producer_id: producer_id.to_string(),
            rtp_capabilities,
        };
        if let Err(e) = self.sfu.create_consumer(consumer_params).await {
            let _ = self.sfu.close_transport(&transport.id).await;
            return Err(match e {
                // The SFU replied and refused `canConsume` — a real
                // capability mismatch. A dropped/timed-out channel
                // (`SfuUnavailable`) stays 503, it isn't the client's fault.
                AppError::SfuRejected(_) => AppError::IncompatibleCapabilities,
                other => other,
            });
        }

        let consumer_id = Uuid::new_v4();
        sqlx::query!(
            "INSERT INTO consumers (id, stream_id, client_id, state, transport_sfu_id) VALUES ($1, $2, $3, $4, $5)",
            consumer_id,
            stream_id,
            client_id,
            ConsumerState::Pending as ConsumerState,
            transport.id,
        )
        .execute(&self.db)
        .await?;

        self.consumers.insert(
            consumer_id,
            Mutex::new(TrackedConsumer {
                stream_id,
                transport_id: Some(transport.id.clone()),
                state: ConsumerState::Pending,
            }),
        );

        self.spawn_pending_ttl(consumer_id);

        Ok((consumer_id, transport))
    }

    fn spawn_pending_ttl(&self, consumer_id: Uuid) {
        let db = self.db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PENDING_TTL).await;
            let _ = sqlx::query!(
                "UPDATE consumers SET state = $1, closed_at = now(), close_reason = 'pending_ttl_expired' \
                 WHERE id = $2 AND state = $3",
                ConsumerState::Closed as ConsumerState,
                consumer_id,
                ConsumerState::Pending as ConsumerState,
            )
            .execute(&db)
            .await;
        });
    }

    pub async fn connect(&self, consumer_id: Uuid, dtls_parameters: serde_json::Value) -> Result<()> {
        let entry = self
            .consumers
            .get(&consumer_id)
            .ok_or_else(|| AppError::NotFound(format!("consumer {consumer_id}")))?;
        let mut tracked = entry.lock().await;

        if tracked.state != ConsumerState::Pending {
            return Err(AppError::Validation("consumer is not in PENDING state".to_string()));
        }

        let transport_id = tracked
            .transport_id
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("pending consumer missing transport id")))?;

        if let Err(e) = self.sfu.connect_webrtc_transport(&transport_id, dtls_parameters).await {
            tracked.state = ConsumerState::Closed;
            sqlx::query!(
                "UPDATE consumers SET state = $1, closed_at = now(), close_reason = 'dtls_failed' WHERE id = $2",
                ConsumerState::Closed as ConsumerState,
                consumer_id,
            )
            .execute(&self.db)
            .await?;
            return Err(e);
        }

        tracked.state = ConsumerState::Connected;
        sqlx::query!(
            "UPDATE consumers SET state = $1, last_seen_at = now() WHERE id = $2",
            ConsumerState::Connected as ConsumerState,
            consumer_id,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Detaches a single consumer. Idempotent: detaching an already-CLOSED
    /// (or unknown) consumer is a no-op.
    pub async fn detach(&self, consumer_id: Uuid, reason: &str) -> Result<()> {
        if let Some(entry) = self.consumers.get(&consumer_id) {
            let mut tracked = entry.lock().await;
            if tracked.state == ConsumerState::Closed {
                return Ok(());
            }
            if let Some(transport_id) = tracked.transport_id.take() {
                let _ = self.sfu.close_transport(&transport_id).await;
            }
            tracked.state = ConsumerState::Closed;
        }

        sqlx::query!(
            "UPDATE consumers SET state = $1, closed_at = now(), close_reason = $2 \
             WHERE id = $3 AND state != $1",
            ConsumerState::Closed as ConsumerState,
            reason,
            consumer_id,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Closes every consumer attached to `stream_id` (stream left LIVE).
    pub async fn close_all_for_stream(&self, stream_id: Uuid, reason: &str) {
        let ids: Vec<Uuid> = self
            .consumers
            .iter()
            .filter(|e| e.value().try_lock().map(|g| g.stream_id == stream_id).unwrap_or(false))
            .map(|e| *e.key())
            .collect();

        for id in ids {
            let _ = self.detach(id, reason).await;
        }

        let _ = sqlx::query!(
            "UPDATE consumers SET state = $1, closed_at = now(), close_reason = $2 \
             WHERE stream_id = $3 AND state != $1",
            ConsumerState::Closed as ConsumerState,
            reason,
            stream_id,
        )
        .execute(&self.db)
        .await;
    }

    pub async fn active_count_for_stream(&self, stream_id: Uuid) -> i64 {
        sqlx::query_scalar!(
            "SELECT COUNT(*) FROM consumers WHERE stream_id = $1 AND state != $2",
            stream_id,
            ConsumerState::Closed as ConsumerState,
        )
        .fetch_one(&self.db)
        .await
        .unwrap_or(0)
    }
}
