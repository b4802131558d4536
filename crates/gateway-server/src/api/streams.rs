use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{AttachConsumerRequest, AttachConsumerResponse, Consumer, ConnectConsumerRequest, Stream, StreamHealth};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use gateway_protocol::{Scope, StreamState};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListStreamsQuery {
    pub state: Option<StreamState>,
    pub camera_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_streams(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListStreamsQuery>,
) -> Result<Json<Vec<Stream>>> {
    auth.require_scope(Scope::StreamsRead)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let streams = sqlx::query_as!(
        Stream,
        r#"
        SELECT id, camera_id, state as "state: StreamState", codec_config, producer_ref,
               assigned_port, captured_ssrc, last_error, retry_count, started_at, created_at
        FROM streams
        WHERE ($1::stream_state IS NULL OR state = $1)
          AND ($2::uuid IS NULL OR camera_id = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        query.state as Option<StreamState>,
        query.camera_id,
        limit,
        offset,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(streams))
}

#[derive(Debug, serde::Serialize)]
pub struct StreamDetail {
    #[serde(flatten)]
    pub stream: Stream,
    pub uptime_seconds: Option<i64>,
    pub active_consumers: i64,
}

pub async fn get_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StreamDetail>> {
    auth.require_scope(Scope::StreamsRead)?;

    let stream = fetch_stream(&state, id).await?;
    let active_consumers = state.orchestrator.active_consumer_count(id).await;
    let uptime_seconds = stream.uptime_seconds();

    Ok(Json(StreamDetail { stream, uptime_seconds, active_consumers }))
}

pub async fn get_stream_health(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StreamHealth>> {
    auth.require_scope(Scope::StreamsRead)?;

    let snapshot = state
        .orchestrator
        .stream_snapshot(id)
        .ok_or_else(|| AppError::NotFound(format!("stream {id}")))?;

    let (bitrate_kbps, fps, packet_loss, jitter_ms) = match &snapshot.sfu_producer_id {
        Some(producer_id) => match state.sfu.get_producer_stats(producer_id).await {
            Ok(stats) => (
                (stats.bytes_received as f64 * 8.0 / 1000.0).max(0.0),
                0.0,
                stats.fraction_lost,
                stats.jitter_ms,
            ),
            Err(_) => (0.0, 0.0, 0.0, 0.0),
        },
        None => (0.0, 0.0, 0.0, 0.0),
    };

    Ok(Json(StreamHealth {
        is_healthy: snapshot.state == StreamState::Live,
        bitrate_kbps,
        fps,
        packet_loss,
        jitter_ms,
        last_error: snapshot.last_error,
    }))
}

pub async fn get_router_capabilities(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    auth.require_scope(Scope::StreamsRead)?;

    let capabilities = state.orchestrator.router_rtp_capabilities().await?;
    Ok(Json(capabilities))
}

pub async fn consume(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(stream_id): Path<Uuid>,
    Json(input): Json<AttachConsumerRequest>,
) -> Result<Json<AttachConsumerResponse>> {
    auth.require_scope(Scope::StreamsConsume)?;

    let (consumer_id, transport) = state
        .orchestrator
        .attach_consumer(stream_id, input.client_id, input.rtp_capabilities)
        .await?;

    Ok(Json(AttachConsumerResponse {
        consumer_id,
        transport: serde_json::to_value(transport)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode transport: {e}")))?,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct ConnectConsumerResponse {
    pub connected: bool,
}

pub async fn connect_consumer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_stream_id, consumer_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ConnectConsumerRequest>,
) -> Result<Json<ConnectConsumerResponse>> {
    auth.require_scope(Scope::StreamsConsume)?;

    state
        .orchestrator
        .connect_consumer(consumer_id, input.dtls_parameters)
        .await?;

    Ok(Json(ConnectConsumerResponse { connected: true }))
}

#[derive(Debug, serde::Serialize)]
pub struct DetachConsumerResponse {
    pub detached: bool,
}

pub async fn delete_consumer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_stream_id, consumer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DetachConsumerResponse>> {
    auth.require_scope(Scope::StreamsConsume)?;

    state.orchestrator.detach_consumer(consumer_id).await?;
    Ok(Json(DetachConsumerResponse { detached: true }))
}

pub async fn list_consumers(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(stream_id): Path<Uuid>,
) -> Result<Json<Vec<Consumer>>> {
    auth.require_scope(Scope::StreamsRead)?;

    let consumers = sqlx::query_as!(
        Consumer,
        r#"
        SELECT id, stream_id, client_id, state as "state: gateway_protocol::ConsumerState",
               transport_sfu_id, created_at, last_seen_at, closed_at, close_reason
        FROM consumers WHERE stream_id = $1 ORDER BY created_at DESC
        "#,
        stream_id,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(consumers))
}

async fn fetch_stream(state: &AppState, id: Uuid) -> Result<Stream> {
    sqlx::query_as!(
        Stream,
        r#"
        SELECT id, camera_id, state as "state: StreamState", codec_config, producer_ref,
               assigned_port, captured_ssrc, last_error, retry_count, started_at, created_at
        FROM streams WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("stream {id}")))
}
