//! Session token issue/verify.
//!
//! Tokens are symmetric JWTs whose subject is the session UUID. The WebSocket
//! admission path (`orchestrator::ws`) requires `verify(token).sub` to equal
//! the path's session id.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    Expired,

    #[error("Unsupported JWT algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: i64,
}

/// Issues and verifies session tokens with a shared symmetric secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    ttl_minutes: i64,
}

impl TokenService {
    pub fn new(settings: &Settings) -> Result<Self, AuthError> {
        let algorithm = match settings.jwt_algorithm.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => return Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        };
        Ok(Self {
            encoding: EncodingKey::from_secret(settings.jwt_secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(settings.jwt_secret_key.as_bytes()),
            algorithm,
            ttl_minutes: settings.jwt_access_token_expire_minutes,
        })
    }

    /// Issue a token for `subject` expiring after the configured TTL.
    pub fn issue(&self, subject: &str, scopes: &[&str]) -> Result<String, AuthError> {
        self.issue_with_ttl(subject, scopes, Duration::minutes(self.ttl_minutes))
    }

    pub fn issue_with_ttl(
        &self,
        subject: &str,
        scopes: &[&str],
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(self.algorithm);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> TokenService {
        let settings = Settings::from_lookup(|key| match key {
            "JWT_SECRET_KEY" => Some(secret.to_string()),
            _ => None,
        });
        TokenService::new(&settings).unwrap()
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let svc = service("testsecret");
        let token = svc
            .issue_with_ttl("session-1", &["session:active"], Duration::minutes(5))
            .unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.sub, "session-1");
        assert_eq!(claims.scopes, vec!["session:active"]);

        let expected = (Utc::now() + Duration::minutes(5)).timestamp();
        assert!((claims.exp - expected).abs() <= 2);
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service("testsecret");
        let token = svc
            .issue_with_ttl("session-1", &[], Duration::minutes(-5))
            .unwrap();
        assert!(matches!(svc.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = service("secret-a").issue("session-1", &[]).unwrap();
        assert!(matches!(
            service("secret-b").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(service("testsecret").verify("not.a.jwt").is_err());
    }

    #[test]
    fn unsupported_algorithm_fails_construction() {
        let settings = Settings::from_lookup(|key| match key {
            "JWT_ALGORITHM" => Some("ES256".to_string()),
            _ => None,
        });
        assert!(matches!(
            TokenService::new(&settings),
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
    }
}
