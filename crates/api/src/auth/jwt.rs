//! JWT token generation and validation
//!
//! Agents authenticate with access tokens; widget visitors carry a long-lived
//! visitor token scoped to the inbox they were routed to.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const ISSUER: &str = "chat-engine";
const AUDIENCE: &str = "chat-app";

/// JWT claims structure for Chatdesk-issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (agent user ID or visitor ID)
    pub sub: Uuid,
    /// Tenant the subject belongs to
    pub tenant_id: Uuid,
    /// Inbox the visitor was routed to (visitor tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_id: Option<Uuid>,
    /// Email (agent tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Token type
    pub token_type: TokenType,
    /// JWT ID
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Visitor,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
    visitor_token_expiry_days: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(
        secret: &str,
        access_token_expiry_hours: i64,
        visitor_token_expiry_days: i64,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry_hours,
            visitor_token_expiry_days,
        }
    }

    /// Generate an agent access token
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<String, JwtError> {
        let claims = self.claims(
            user_id,
            tenant_id,
            None,
            Some(email.to_string()),
            Duration::hours(self.access_token_expiry_hours),
            TokenType::Access,
        );
        self.sign(&claims)
    }

    /// Generate a visitor token bound to an inbox
    pub fn generate_visitor_token(
        &self,
        visitor_id: Uuid,
        tenant_id: Uuid,
        inbox_id: Uuid,
    ) -> Result<String, JwtError> {
        let claims = self.claims(
            visitor_id,
            tenant_id,
            Some(inbox_id),
            None,
            Duration::days(self.visitor_token_expiry_days),
            TokenType::Visitor,
        );
        self.sign(&claims)
    }

    fn claims(
        &self,
        sub: Uuid,
        tenant_id: Uuid,
        inbox_id: Option<Uuid>,
        email: Option<String>,
        ttl: Duration,
        token_type: TokenType,
    ) -> Claims {
        let now = OffsetDateTime::now_utc();
        Claims {
            sub,
            tenant_id,
            inbox_id,
            email,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            token_type,
            jti: Uuid::new_v4().to_string(),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate and decode a token of any type
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm
                | jsonwebtoken::errors::ErrorKind::InvalidSignature
                | jsonwebtoken::errors::ErrorKind::InvalidIssuer
                | jsonwebtoken::errors::ErrorKind::InvalidAudience => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Validate an agent access token specifically
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    /// Validate a visitor token specifically
    pub fn validate_visitor_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.token_type != TokenType::Visitor || claims.inbox_id.is_none() {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    #[test]
    fn test_access_token_roundtrip() {
        let jwt = JwtManager::new(SECRET, 24, 180);
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = jwt
            .generate_access_token(user_id, tenant_id, "agent@example.com")
            .expect("Failed to generate token");

        let claims = jwt.validate_access_token(&token).expect("Invalid token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.email.as_deref(), Some("agent@example.com"));
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.inbox_id.is_none());
    }

    #[test]
    fn test_visitor_token_carries_inbox() {
        let jwt = JwtManager::new(SECRET, 24, 180);
        let inbox_id = Uuid::new_v4();

        let token = jwt
            .generate_visitor_token(Uuid::new_v4(), Uuid::new_v4(), inbox_id)
            .unwrap();

        let claims = jwt.validate_visitor_token(&token).unwrap();
        assert_eq!(claims.inbox_id, Some(inbox_id));
    }

    #[test]
    fn test_wrong_token_type() {
        let jwt = JwtManager::new(SECRET, 24, 180);
        let visitor_token = jwt
            .generate_visitor_token(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        let result = jwt.validate_access_token(&visitor_token);
        assert!(matches!(result, Err(JwtError::WrongTokenType)));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let issuer = JwtManager::new("another-secret-key-at-least-32-chars", 24, 180);
        let verifier = JwtManager::new(SECRET, 24, 180);

        let token = issuer
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), "a@b.c")
            .unwrap();

        assert!(matches!(
            verifier.validate_access_token(&token),
            Err(JwtError::Invalid)
        ));
        assert!(verifier.validate_token("not-a-jwt").is_err());
    }
}
