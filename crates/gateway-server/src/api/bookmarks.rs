use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{Bookmark, CreateBookmarkRequest, UpdateBookmarkRequest};
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

pub async fn create_bookmark(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(stream_id): Path<Uuid>,
    Json(input): Json<CreateBookmarkRequest>,
) -> Result<(StatusCode, Json<Bookmark>)> {
    auth.require_scope(Scope::BookmarksWrite)?;

    let id = state
        .orchestrator
        .create_bookmark(
            stream_id,
            input.source,
            input.center_timestamp,
            input.before_seconds,
            input.after_seconds,
            input.label,
            input.event_type,
            input.confidence,
            input.tags,
        )
        .await?;

    let bookmark = fetch_bookmark(&state, id).await?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

#[derive(Debug, Deserialize)]
pub struct ListBookmarksQuery {
    pub stream_id: Option<Uuid>,
    pub source: Option<Source>,
    pub status: Option<JobStatus>,
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_bookmarks(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListBookmarksQuery>,
) -> Result<Json<Vec<Bookmark>>> {
    auth.require_scope(Scope::BookmarksRead)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let bookmarks = sqlx::query_as!(
        Bookmark,
        r#"
        SELECT id, stream_id, center_timestamp, start_time, end_time, duration_seconds,
               source as "source: Source", label, event_type, confidence, tags,
               status as "status: JobStatus", video_path, thumbnail_path, error, tombstoned, created_at
        FROM bookmarks
        WHERE ($1::uuid IS NULL OR stream_id = $1)
          AND ($2::extraction_source IS NULL OR source = $2)
          AND ($3::job_status IS NULL OR status = $3)
          AND ($4::text IS NULL OR event_type = $4)
        ORDER BY created_at DESC
        LIMIT $5 OFFSET $6
        "#,
        query.stream_id,
        query.source as Option<Source>,
        query.status as Option<JobStatus>,
        query.event_type,
        limit,
        offset,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bookmarks))
}

pub async fn get_bookmark(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Bookmark>> {
    auth.require_scope(Scope::BookmarksRead)?;
    Ok(Json(fetch_bookmark(&state, id).await?))
}

pub async fn update_bookmark(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateBookmarkRequest>,
) -> Result<Json<Bookmark>> {
    auth.require_scope(Scope::BookmarksWrite)?;

    sqlx::query!(
        r#"
        UPDATE bookmarks
        SET label = COALESCE($2, label),
            tags = COALESCE($3, tags),
            event_type = COALESCE($4, event_type)
        WHERE id = $1
        "#,
        id,
        input.label,
        input.tags.as_deref(),
        input.event_type,
    )
    .execute(&state.db)
    .await?;

    Ok(Json(fetch_bookmark(&state, id).await?))
}

pub async fn delete_bookmark(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require_scope(Scope::BookmarksWrite)?;

    sqlx::query!("UPDATE bookmarks SET tombstoned = true WHERE id = $1", id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ProcessingStatus {
    pub status: JobStatus,
    pub error: Option<String>,
}

pub async fn get_bookmark_video(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    auth.require_scope(Scope::BookmarksRead)?;
    serve_bookmark_asset(&state, id, |b| b.video_path.clone(), "video/mp4").await
}

pub async fn get_bookmark_thumbnail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    auth.require_scope(Scope::BookmarksRead)?;
    serve_bookmark_asset(&state, id, |b| b.thumbnail_path.clone(), "image/jpeg").await
}

async fn serve_bookmark_asset(
    state: &AppState,
    id: Uuid,
    path_of: impl Fn(&Bookmark) -> Option<String>,
    content_type: &'static str,
) -> Result<Response> {
    let bookmark = fetch_bookmark(state, id).await?;
    match bookmark.status {
        JobStatus::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(ProcessingStatus { status: JobStatus::Processing, error: None }),
        )
            .into_response()),
        JobStatus::Failed => Ok((
            StatusCode::OK,
            Json(ProcessingStatus { status: JobStatus::Failed, error: bookmark.error }),
        )
            .into_response()),
        JobStatus::Ready => {
            let path = path_of(&bookmark).ok_or_else(|| AppError::NotFound(format!("bookmark {id} has no asset")))?;
            let body = tokio::fs::read(&path).await.map_err(|_| AppError::NoRecordingData)?;
            Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
        }
    }
}

async fn fetch_bookmark(state: &AppState, id: Uuid) -> Result<Bookmark> {
    sqlx::query_as!(
        Bookmark,
        r#"
        SELECT id, stream_id, center_timestamp, start_time, end_time, duration_seconds,
               source as "source: Source", label, event_type, confidence, tags,
               status as "status: JobStatus", video_path, thumbnail_path, error, tombstoned, created_at
        FROM bookmarks WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("bookmark {id}")))
}
