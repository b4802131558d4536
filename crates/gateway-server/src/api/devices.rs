use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use gateway_protocol::{Scope, StreamState};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct StartStreamResponse {
    pub v2_stream_id: Uuid,
    pub producers: Producers,
    pub room_id: Uuid,
    pub stream: StreamStatus,
    pub reconnect: bool,
}

#[derive(Debug, Serialize)]
pub struct Producers {
    pub video: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub status: StreamState,
}

pub async fn start_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(device_id): Path<Uuid>,
) -> Result<Json<StartStreamResponse>> {
    auth.require_scope(Scope::StreamsWrite)?;

    let started = state.orchestrator.start_stream(device_id).await?;
    let snapshot = state.orchestrator.stream_snapshot(started.stream_id);
    let status = snapshot.as_ref().map(|s| s.state).unwrap_or(StreamState::Error);

    Ok(Json(StartStreamResponse {
        v2_stream_id: started.stream_id,
        producers: Producers { video: started.producer_id },
        room_id: started.stream_id,
        stream: StreamStatus { status },
        reconnect: started.reconnect,
    }))
}

#[derive(Debug, Serialize)]
pub struct StopStreamResponse {
    pub stopped: bool,
}

pub async fn stop_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(device_id): Path<Uuid>,
) -> Result<Json<StopStreamResponse>> {
    auth.require_scope(Scope::StreamsWrite)?;

    state.orchestrator.stop_stream(device_id).await?;
    Ok(Json(StopStreamResponse { stopped: true }))
}
