//! Authentication middleware
//!
//! Bearer-token authentication yielding the explicit [`Actor`] every mutating
//! build operation receives, plus the permission guard handlers call before
//! touching the core.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::Store;
use crate::AppState;

/// Authenticated caller extracted from the bearer token
#[derive(Clone, Debug)]
pub struct Actor {
    pub user_id: Uuid,
    pub permissions: Vec<String>,
}

impl Actor {
    /// Check if the actor has a specific permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Sign a token for a user
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    permissions: &[&str],
    ttl: Duration,
) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

/// Decode and validate a token
pub fn decode_token(token: &str, secret: &str) -> AppResult<Actor> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))?;

    Ok(Actor {
        user_id,
        permissions: claims.permissions,
    })
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware<S: Store>(
    State(state): State<AppState<S>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    match decode_token(token, &state.config.jwt.secret) {
        Ok(actor) => {
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Permission guard for use in handlers
pub fn check_permission(actor: &Actor, resource: &str, action: &str) -> AppResult<()> {
    if actor.has_permission(resource, action) {
        Ok(())
    } else {
        tracing::debug!(user = %actor.user_id, "Permission denied: requires {}:{}", resource, action);
        Err(AppError::InsufficientPermissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip() {
        let user = Uuid::new_v4();
        let token = issue_token(SECRET, user, &["build:view"], Duration::hours(1)).unwrap();

        let actor = decode_token(&token, SECRET).unwrap();
        assert_eq!(actor.user_id, user);
        assert!(actor.has_permission("build", "view"));
        assert!(!actor.has_permission("build", "delete"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4(), &[], Duration::hours(1)).unwrap();
        assert!(matches!(
            decode_token(&token, "other-secret"),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4(), &[], Duration::hours(-2)).unwrap();
        assert!(matches!(
            decode_token(&token, SECRET),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn test_check_permission() {
        let actor = Actor {
            user_id: Uuid::new_v4(),
            permissions: vec!["build:change".to_string()],
        };
        assert!(check_permission(&actor, "build", "change").is_ok());
        assert!(matches!(
            check_permission(&actor, "build", "delete"),
            Err(AppError::InsufficientPermissions)
        ));
    }
}
