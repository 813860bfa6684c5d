//! JWT token handling
//!
//! Tokens are HS256-signed. Validation checks signature and expiry; issuing
//! exists for tooling and tests, since tokens normally come from the account
//! service sharing the same secret.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::store::models::UserId;
use crate::types::RisklineError;

/// Secrets shorter than this are accepted but logged
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Payload stored in a bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT validator and issuer
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Returns an error if the secret is empty
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, RisklineError> {
        if secret.is_empty() {
            return Err(RisklineError::Config("JWT_SECRET must not be empty".into()));
        }

        if secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                "JWT_SECRET is shorter than {} characters",
                RECOMMENDED_SECRET_LEN
            );
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    fn now() -> Result<u64, RisklineError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| RisklineError::Internal(format!("System time error: {}", e)))
    }

    /// Issue a token for `user_id`
    pub fn generate_token(
        &self,
        user_id: UserId,
        email: Option<String>,
    ) -> Result<String, RisklineError> {
        let now = Self::now()?;
        let claims = Claims {
            user_id,
            email,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| RisklineError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify signature and expiry; `Unauthorized` with a short reason otherwise
    pub fn verify_token(&self, token: &str) -> Result<Claims, RisklineError> {
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => "Invalid token claims",
                _ => "Token validation failed",
            };
            RisklineError::Unauthorized(reason.to_string())
        })
    }
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}
