//! JWT authentication module.
//!
//! Bearer tokens are verified here; the account behind a token is reloaded
//! from the database on every request so role and branch changes apply
//! immediately.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use pharma_core::{Role, User};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Role at issue time, informational only
    pub role: Role,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

/// JWT token manager.
pub struct JwtManager {
    secret: String,
    lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: String, lifetime_secs: i64) -> Self {
        JwtManager { secret, lifetime_secs }
    }

    /// Generate an access token for a user.
    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.lifetime_secs);

        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Failed to generate token: {}", e)))
    }

    /// Validate and decode a token.
    pub fn validate_token(&self, token: &str) -> ApiResult<Claims> {
        let token_data: TokenData<Claims> = decode(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ApiError::unauthenticated(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// Extract bearer token from authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

async fn resolve_user(parts: &Parts, state: &AppState) -> ApiResult<Option<User>> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(extract_bearer_token)
        .ok_or_else(|| ApiError::unauthenticated("Malformed authorization header"))?;

    let claims = state.jwt.validate_token(token)?;
    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| ApiError::unauthenticated("Invalid token subject"))?;

    let user = state
        .db
        .users()
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("Unknown account"))?;
    Ok(Some(user))
}

/// The signed-in account. Rejects the request with 401 when absent.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve_user(parts, state)
            .await?
            .map(AuthUser)
            .ok_or_else(|| ApiError::unauthenticated("Missing bearer token"))
    }
}

impl AuthUser {
    /// Passes only when the account holds one of `roles`.
    pub fn require(&self, roles: &[Role]) -> ApiResult<&User> {
        if roles.contains(&self.0.role) {
            Ok(&self.0)
        } else {
            Err(ApiError::forbidden(format!("{} is not allowed to do this", self.0.role)))
        }
    }

    pub fn employee(&self) -> ApiResult<&User> {
        if self.0.role.is_employee() {
            Ok(&self.0)
        } else {
            Err(ApiError::forbidden("Employees only"))
        }
    }

    pub fn admin(&self) -> ApiResult<&User> {
        self.require(&[Role::Admin])
    }

    pub fn customer(&self) -> ApiResult<&User> {
        self.require(&[Role::Customer])
    }
}

/// Signed-in account if a token was sent; anonymous otherwise.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_user(parts, state).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            id: 7,
            email: "p@test.bh".into(),
            first_name: "P".into(),
            last_name: "Q".into(),
            role,
            branch_id: Some(1),
            profile_address_id: None,
            has_health_profile: false,
        }
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test-secret".to_string(), 3600);
        let token = manager.generate_token(&user(Role::Pharmacist)).unwrap();

        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.role, Role::Pharmacist);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtManager::new("a".into(), 3600).generate_token(&user(Role::Customer)).unwrap();
        assert!(JwtManager::new("b".into(), 3600).validate_token(&token).is_err());
    }

    #[test]
    fn test_role_guards() {
        let driver = AuthUser(user(Role::Driver));
        assert!(driver.employee().is_ok());
        assert!(driver.admin().is_err());
        assert!(driver.require(&[Role::Driver, Role::Admin]).is_ok());
        assert!(AuthUser(user(Role::Customer)).employee().is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }
}
