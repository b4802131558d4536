use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{CreateSnapshotRequest, Snapshot};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_protocol::{JobStatus, Scope, Source};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CreateSnapshotResponse {
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

pub async fn create_snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(stream_id): Path<Uuid>,
    Json(input): Json<CreateSnapshotRequest>,
) -> Result<(StatusCode, Json<CreateSnapshotResponse>)> {
    auth.require_scope(Scope::SnapshotsWrite)?;

    let id = state
        .orchestrator
        .create_snapshot(stream_id, input.source, input.timestamp, input.metadata)
        .await?;

    let snapshot = fetch_snapshot(&state, id).await?;
    Ok((StatusCode::CREATED, Json(CreateSnapshotResponse { snapshot })))
}

#[derive(Debug, Deserialize)]
pub struct ListSnapshotsQuery {
    pub stream_id: Option<Uuid>,
    pub source: Option<Source>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_snapshots(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListSnapshotsQuery>,
) -> Result<Json<Vec<Snapshot>>> {
    auth.require_scope(Scope::SnapshotsRead)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let snapshots = sqlx::query_as!(
        Snapshot,
        r#"
        SELECT id, stream_id, timestamp, source as "source: Source", status as "status: JobStatus",
               image_path, error, metadata, tombstoned, created_at
        FROM snapshots
        WHERE ($1::uuid IS NULL OR stream_id = $1)
          AND ($2::extraction_source IS NULL OR source = $2)
          AND ($3::job_status IS NULL OR status = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
        query.stream_id,
        query.source as Option<Source>,
        query.status as Option<JobStatus>,
        limit,
        offset,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(snapshots))
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Snapshot>> {
    auth.require_scope(Scope::SnapshotsRead)?;
    Ok(Json(fetch_snapshot(&state, id).await?))
}

#[derive(Debug, Serialize)]
pub struct ProcessingStatus {
    pub status: JobStatus,
    pub error: Option<String>,
}

pub async fn get_snapshot_image(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    auth.require_scope(Scope::SnapshotsRead)?;

    let snapshot = fetch_snapshot(&state, id).await?;
    match snapshot.status {
        JobStatus::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(ProcessingStatus { status: JobStatus::Processing, error: None }),
        )
            .into_response()),
        JobStatus::Failed => Ok((
            StatusCode::OK,
            Json(ProcessingStatus { status: JobStatus::Failed, error: snapshot.error }),
        )
            .into_response()),
        JobStatus::Ready => {
            let path = snapshot
                .image_path
                .ok_or_else(|| AppError::NotFound(format!("snapshot {id} has no image")))?;
            let body = tokio::fs::read(&path).await.map_err(|_| AppError::NoRecordingData)?;
            Ok(([(header::CONTENT_TYPE, "image/jpeg")], body).into_response())
        }
    }
}

pub async fn delete_snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require_scope(Scope::SnapshotsWrite)?;

    sqlx::query!("UPDATE snapshots SET tombstoned = true WHERE id = $1", id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_snapshot(state: &AppState, id: Uuid) -> Result<Snapshot> {
    sqlx::query_as!(
        Snapshot,
        r#"
        SELECT id, stream_id, timestamp, source as "source: Source", status as "status: JobStatus",
               image_path, error, metadata, tombstoned, created_at
        FROM snapshots WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("snapshot {id}")))
}
