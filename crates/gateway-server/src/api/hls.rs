use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use gateway_protocol::Scope;
use uuid::Uuid;

pub async fn playlist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(stream_id): Path<Uuid>,
) -> Result<Response> {
    auth.require_scope(Scope::StreamsRead)?;

    let path = state
        .config
        .recordings_root
        .join(stream_id.to_string())
        .join("playlist.m3u8");

    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NoRecordingData)?;

    Ok((
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response())
}

pub async fn segment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((stream_id, segment_name)): Path<(Uuid, String)>,
) -> Result<Response> {
    auth.require_scope(Scope::StreamsRead)?;

    if segment_name.contains('/') || segment_name.contains("..") {
        return Err(AppError::Validation("invalid segment name".to_string()));
    }

    let path = state
        .config
        .recordings_root
        .join(stream_id.to_string())
        .join(&segment_name);

    let body: Bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NoRecordingData)?
        .into();

    Ok(([(header::CONTENT_TYPE, "video/mp2t")], body).into_response())
}
