//! Top-level façade exposing start/stop/attach/detach to the HTTP layer;
//! composes the Port Broker, SFU Control Client, Transcoder Supervisor,
//! SSRC Capturer, and Consumer Registry behind the Stream State Machine
//! (§4.9).

use crate::consumer_registry::ConsumerRegistry;
use crate::error::{AppError, Result};
use crate::extraction::{ExtractionJob, ExtractionWorkerPool};
use crate::port_broker::PortBroker;
use crate::sfu::SfuControlClient;
use crate::state::Config;
use crate::stream_fsm::{run_stream_actor, StreamContext, StreamRegistry, StreamSnapshot};
use chrono::{DateTime, Utc};
use gateway_protocol::{JobStatus, Source, StreamState};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const MAILBOX_CAPACITY: usize = 64;

pub struct StreamStarted {
    pub stream_id: Uuid,
    pub producer_id: Option<String>,
    pub reconnect: bool,
}

pub struct StreamOrchestrator {
    db: PgPool,
    sfu: Arc<SfuControlClient>,
    port_broker: Arc<PortBroker>,
    registry: Arc<StreamRegistry>,
    consumers: Arc<ConsumerRegistry>,
    extraction: Arc<ExtractionWorkerPool>,
    config: Config,
}

impl StreamOrchestrator {
    pub fn new(
        db: PgPool,
        sfu: Arc<SfuControlClient>,
        port_broker: Arc<PortBroker>,
        registry: Arc<StreamRegistry>,
        consumers: Arc<ConsumerRegistry>,
        extraction: Arc<ExtractionWorkerPool>,
        config: Config,
    ) -> Self {
        Self {
            db,
            sfu,
            port_broker,
            registry,
            consumers,
            extraction,
            config,
        }
    }

    /// If `device_id` already has a non-terminal stream, returns its
    /// identifiers with `reconnect:true` without doing any work. Otherwise
    /// spawns a fresh actor and waits for it to reach LIVE (or fail) within
    /// the start deadline (§4.9, §8 idempotence law).
    pub async fn start_stream(&self, device_id: Uuid) -> Result<StreamStarted> {
        let device = sqlx::query_as!(
            crate::models::Device,
            "SELECT id, name, rtsp_url, location, created_at FROM devices WHERE id = $1",
            device_id,
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("device {device_id}")))?;

        let stream_id = Uuid::new_v4();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(StreamSnapshot::initializing());

        let handle = match self
            .registry
            .try_activate(device_id, stream_id, mailbox_tx, snapshot_rx)
        {
            Ok(handle) => handle,
            Err(existing) => {
                let snap = existing.snapshot();
                return Ok(StreamStarted {
                    stream_id: existing.stream_id,
                    producer_id: snap.sfu_producer_id,
                    reconnect: true,
                });
            }
        };

        sqlx::query!(
            "INSERT INTO streams (id, camera_id, state) VALUES ($1, $2, $3)",
            stream_id,
            device_id,
            StreamState::Initializing as StreamState,
        )
        .execute(&self.db)
        .await?;

        let ctx = StreamContext {
            stream_id,
            device_id,
            rtsp_url: device.rtsp_url.clone(),
            db: self.db.clone(),
            sfu: self.sfu.clone(),
            port_broker: self.port_broker.clone(),
            config: self.config.clone(),
        };

        let registry = self.registry.clone();
        tokio::spawn(async move {
            run_stream_actor(ctx, mailbox_rx, snapshot_tx).await;
            registry.deactivate(device_id);
            registry.remove(stream_id);
        });

        let mut watcher = handle.snapshot_watch();
        let deadline = Duration::from_secs(30);
        let wait = tokio::time::timeout(deadline, async {
            loop {
                let snap = watcher.borrow().clone();
                if snap.state == StreamState::Live || snap.state.is_terminal() {
                    return snap;
                }
                if watcher.changed().await.is_err() {
                    return watcher.borrow().clone();
                }
            }
        })
        .await;

        let snap = wait.unwrap_or_else(|_| handle.snapshot());

        Ok(StreamStarted {
            stream_id,
            producer_id: snap.sfu_producer_id,
            reconnect: false,
        })
    }

    /// Idempotent: stopping an already STOPPED/CLOSED or unknown stream is
    /// a no-op success (§4.9, §8 idempotence law).
    pub async fn stop_stream(&self, device_id: Uuid) -> Result<()> {
        let Some(handle) = self.registry.active_for_device(device_id) else {
            return Ok(());
        };

        self.consumers
            .close_all_for_stream(handle.stream_id, "parent_stream_stopped")
            .await;
        handle.stop().await;
        Ok(())
    }

    pub fn stream_snapshot(&self, stream_id: Uuid) -> Option<StreamSnapshot> {
        self.registry.get(stream_id).map(|h| h.snapshot())
    }

    pub async fn router_rtp_capabilities(&self) -> Result<serde_json::Value> {
        self.sfu.get_router_rtp_capabilities().await
    }

    /// Precondition: parent stream must be LIVE (§4.6, §4.9).
    pub async fn attach_consumer(
        &self,
        stream_id: Uuid,
        client_id: String,
        rtp_capabilities: serde_json::Value,
    ) -> Result<(Uuid, gateway_protocol::sfu::WebrtcTransportInfo)> {
        let handle = self
            .registry
            .get(stream_id)
            .ok_or_else(|| AppError::NotFound(format!("stream {stream_id}")))?;

        let snap = handle.snapshot();
        if snap.state != StreamState::Live {
            return Err(AppError::StreamNotLive(stream_id, snap.state));
        }
        let producer_id = snap
            .sfu_producer_id
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("live stream {stream_id} has no producer")))?;

        self.consumers
            .attach(stream_id, &producer_id, client_id, rtp_capabilities)
            .await
    }

    pub async fn connect_consumer(&self, consumer_id: Uuid, dtls_parameters: serde_json::Value) -> Result<()> {
        self.consumers.connect(consumer_id, dtls_parameters).await
    }

    pub async fn detach_consumer(&self, consumer_id: Uuid) -> Result<()> {
        self.consumers.detach(consumer_id, "explicit_delete").await
    }

    pub async fn active_consumer_count(&self, stream_id: Uuid) -> i64 {
        self.consumers.active_count_for_stream(stream_id).await
    }

    pub async fn create_snapshot(
        &self,
        stream_id: Uuid,
        source: Source,
        timestamp: Option<DateTime<Utc>>,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let rtsp_url = self.rtsp_url_for_stream(stream_id).await?;
        let id = Uuid::new_v4();
        let ts = timestamp.unwrap_or_else(Utc::now);

        sqlx::query!(
            "INSERT INTO snapshots (id, stream_id, timestamp, source, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            id,
            stream_id,
            ts,
            source as Source,
            JobStatus::Processing as JobStatus,
            metadata,
        )
        .execute(&self.db)
        .await?;

        self.extraction.enqueue(ExtractionJob::Snapshot {
            id,
            stream_id,
            source,
            timestamp: ts,
            rtsp_url,
        })?;

        Ok(id)
    }

    pub async fn create_bookmark(
        &self,
        stream_id: Uuid,
        source: Source,
        center_timestamp: Option<DateTime<Utc>>,
        before_seconds: f64,
        after_seconds: f64,
        label: Option<String>,
        event_type: Option<String>,
        confidence: Option<f64>,
        tags: Vec<String>,
    ) -> Result<Uuid> {
        if before_seconds + after_seconds <= 0.0 {
            return Err(AppError::Validation(
                "before_seconds + after_seconds must be greater than zero".to_string(),
            ));
        }

        let rtsp_url = self.rtsp_url_for_stream(stream_id).await?;
        let id = Uuid::new_v4();
        let center = center_timestamp.unwrap_or_else(Utc::now);
        let before = Duration::from_secs_f64(before_seconds);
        let after = Duration::from_secs_f64(after_seconds);
        let start = center - chrono::Duration::from_std(before).unwrap_or_default();
        let end = center + chrono::Duration::from_std(after).unwrap_or_default();
        let duration_seconds = before_seconds + after_seconds;

        sqlx::query!(
            "INSERT INTO bookmarks (id, stream_id, center_timestamp, start_time, end_time, \
             duration_seconds, source, label, event_type, confidence, tags, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            id,
            stream_id,
            center,
            start,
            end,
            duration_seconds,
            source as Source,
            label,
            event_type,
            confidence,
            &tags,
            JobStatus::Processing as JobStatus,
        )
        .execute(&self.db)
        .await?;

        self.extraction.enqueue(ExtractionJob::Bookmark {
            id,
            stream_id,
            source,
            center_timestamp: center,
            before,
            after,
            rtsp_url,
        })?;

        Ok(id)
    }

    async fn rtsp_url_for_stream(&self, stream_id: Uuid) -> Result<String> {
        sqlx::query_scalar!(
            "SELECT d.rtsp_url FROM devices d JOIN streams s ON s.camera_id = d.id WHERE s.id = $1",
            stream_id,
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("stream {stream_id}")))
    }
}
