//! Access token verification.
//!
//! Tokens are issued by the identity service; this server only checks them.
//! A token is an HS256 JWT whose `sub` is the user id and whose `role` is one
//! of the domain roles.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use aidconnect_shared::types::{Role, UserId};

use crate::error::ServerError;

/// The caller of an API route or the owner of a realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub role: Role,
    pub exp: i64,
}

/// `verifyToken(token) -> {userId, role}`.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthUser, ServerError>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthUser, ServerError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServerError::Auth("Token expired".into())
                }
                _ => ServerError::Auth("Invalid token".into()),
            }
        })?;

        Ok(AuthUser {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid bearer token; otherwise make the caller
/// available to handlers as `Extension<AuthUser>`.
pub async fn require_auth(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| ServerError::Auth("Missing bearer token".into()))?;
    let user = verifier.verify(token)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}


#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::test_support::{token_for, SECRET};
    use super::*;

    #[test]
    fn test_valid_token() {
        let user = UserId::new();
        let verifier = JwtVerifier::new(SECRET);
        let auth = verifier.verify(&token_for(user, Role::Volunteer)).unwrap();
        assert_eq!(auth, AuthUser { id: user, role: Role::Volunteer });
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new("another-secret");
        let err = verifier
            .verify(&token_for(UserId::new(), Role::Requester))
            .unwrap_err();
        assert!(matches!(err, ServerError::Auth(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = Claims {
            sub: UserId::new(),
            role: Role::Requester,
            exp: chrono::Utc::now().timestamp() - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = JwtVerifier::new(SECRET).verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: Token expired");
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
