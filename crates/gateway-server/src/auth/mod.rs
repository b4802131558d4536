use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    RequestPartsExt,
};
use axum_extra::{headers, TypedHeader};
use chrono::{Duration, Utc};
use gateway_protocol::Scope;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Claims carried by a signed access token (§6). Scopes are embedded so
/// authorization never round-trips to the database on the hot path.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // client_id
    pub scopes: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(client_id: Uuid, scopes: Vec<String>, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: client_id,
            scopes,
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn create_access_token(client_id: Uuid, scopes: Vec<String>, ttl_secs: i64, secret: &str) -> Result<String> {
    let claims = Claims::new(client_id, scopes, ttl_secs);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// Generates a fresh opaque refresh token and the hash that gets persisted
/// (§10.7 decision: non-rotating, but revocable server-side).
pub fn generate_refresh_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = hash_refresh_token(&token);
    (token, hash)
}

pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extractor for authenticated requests. Carries the caller's client id and
/// granted scopes; handlers combine this with [`RequireScope`] to enforce §7.
pub struct AuthUser {
    pub client_id: Uuid,
    pub scopes: Vec<Scope>,
}

impl AuthUser {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn require_scope(&self, scope: Scope) -> Result<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(AppError::InsufficientScope(scope.as_str().to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let TypedHeader(auth_header) = parts
            .extract::<TypedHeader<headers::Authorization<headers::authorization::Bearer>>>()
            .await
            .map_err(|_| AppError::InvalidToken)?;

        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::InvalidToken)?;

        let token = auth_header.token();
        let claims = verify_access_token(token, &app_state.config.jwt_secret)?;

        Ok(AuthUser {
            client_id: claims.sub,
            scopes: claims
                .scopes
                .iter()
                .filter_map(|s| Scope::parse(s))
                .collect(),
        })
    }
}
