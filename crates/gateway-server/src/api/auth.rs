use crate::auth::{create_access_token, generate_refresh_token, hash_refresh_token};
use crate::error::{AppError, Result};
use crate::models::{Client, RefreshRequest, RefreshTokenRecord, RevokeRequest, TokenRequest, TokenResponse};
use crate::state::AppState;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

pub async fn token(
    State(state): State<AppState>,
    Json(input): Json<TokenRequest>,
) -> Result<Json<TokenResponse>> {
    let client = sqlx::query_as!(
        Client,
        "SELECT client_id, hashed_secret, scopes, created_at FROM clients WHERE client_id = $1",
        input.client_id,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::InvalidCredentials)?;

    let parsed_hash = PasswordHash::new(&client.hashed_secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored client secret hash is malformed: {e}")))?;
    Argon2::default()
        .verify_password(input.client_secret.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::InvalidCredentials)?;

    let access_token = create_access_token(
        client.client_id,
        client.scopes.clone(),
        state.config.access_token_ttl_secs,
        &state.config.jwt_secret,
    )?;

    let (refresh_token, refresh_hash) = generate_refresh_token();
    let expires_at = Utc::now() + Duration::seconds(state.config.refresh_token_ttl_secs);

    sqlx::query!(
        "INSERT INTO refresh_tokens (token_hash, client_id, expires_at) VALUES ($1, $2, $3)",
        refresh_hash,
        client.client_id,
        expires_at,
    )
    .execute(&state.db)
    .await?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        expires_in: state.config.access_token_ttl_secs,
        scopes: client.scopes,
    }))
}

/// Refresh tokens are not rotated (§9 open question, decided in DESIGN.md):
/// the same refresh token keeps minting access tokens until it expires or
/// is explicitly revoked.
pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>> {
    let hash = hash_refresh_token(&input.refresh_token);

    let record = sqlx::query_as!(
        RefreshTokenRecord,
        "SELECT token_hash, client_id, expires_at, revoked, created_at FROM refresh_tokens WHERE token_hash = $1",
        hash,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::InvalidRefreshToken)?;

    if record.revoked || record.expires_at < Utc::now() {
        return Err(AppError::InvalidRefreshToken);
    }

    let scopes = sqlx::query_scalar!(
        "SELECT scopes FROM clients WHERE client_id = $1",
        record.client_id,
    )
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::InvalidRefreshToken)?;

    let access_token = create_access_token(
        record.client_id,
        scopes,
        state.config.access_token_ttl_secs,
        &state.config.jwt_secret,
    )?;

    Ok(Json(RefreshResponse {
        access_token,
        expires_in: state.config.access_token_ttl_secs,
    }))
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

pub async fn revoke(
    State(state): State<AppState>,
    Json(input): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>> {
    let hash = hash_refresh_token(&input.refresh_token);

    sqlx::query!(
        "UPDATE refresh_tokens SET revoked = true WHERE token_hash = $1",
        hash,
    )
    .execute(&state.db)
    .await?;

    Ok(Json(RevokeResponse { revoked: true }))
}
