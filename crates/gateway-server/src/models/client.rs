use chrono::{DateTime, Utc};
use gateway_protocol::Scope;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An API principal (§3). Opaque to the core except as an authorization
/// input — the gateway never interprets `client_id` beyond scope lookup.
#[derive(Debug, Clone, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub hashed_secret: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn scope_set(&self) -> Vec<Scope> {
        self.scopes.iter().filter_map(|s| Scope::parse(s)).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub client_id: Uuid,
    pub client_secret: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub refresh_token: String,
}

/// Server-side record backing a refresh token, so it can be individually
/// revoked (§6 `/v2/auth/token/revoke`). The spec treats refresh tokens as
/// "opaque validated blobs" at the core's interface, but revocation implies
/// *some* persisted state; this is that state without over-specifying the
/// token issuer's internals.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub client_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}
