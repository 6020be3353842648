//! JWT issuance and verification (HS256).

use crate::error::AppError;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "admin";

/// Token payload: identity plus the fields the client renders without a round trip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub id: i64,
    pub mobile: String,
    pub nickname: Option<String>,
    pub role: String,
    pub current_site_id: Option<i64>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Who a token is issued for.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub id: i64,
    pub mobile: &'a str,
    pub nickname: Option<&'a str>,
    pub role: &'a str,
    pub current_site_id: Option<i64>,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        TokenIssuer {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn issue(&self, subject: &TokenSubject<'_>) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            id: subject.id,
            mobile: subject.mobile.to_string(),
            nickname: subject.nickname.map(str::to_string),
            role: subject.role.to_string(),
            current_site_id: subject.current_site_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("token encode: {}", e)))
    }

    /// Decode and check signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::InvalidToken,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject<'static> {
        TokenSubject {
            id: 7,
            mobile: "13800138000",
            nickname: Some("用户8000"),
            role: "user",
            current_site_id: Some(1),
        }
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let issuer = TokenIssuer::new(b"secret", 3600);
        let token = issuer.issue(&subject()).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.mobile, "13800138000");
        assert_eq!(claims.current_site_id, Some(1));
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(!claims.is_admin());
    }

    #[test]
    fn expired_and_foreign_tokens_are_distinguished() {
        let issuer = TokenIssuer::new(b"secret", 3600);
        let now = Utc::now().timestamp();
        let expired = issuer
            .encode(&Claims {
                id: 1,
                mobile: "13800138000".into(),
                nickname: None,
                role: "user".into(),
                current_site_id: None,
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert!(matches!(issuer.verify(&expired), Err(AppError::TokenExpired)));

        let other = TokenIssuer::new(b"other", 3600).issue(&subject()).unwrap();
        assert!(matches!(issuer.verify(&other), Err(AppError::InvalidToken)));
        assert!(matches!(issuer.verify("not-a-token"), Err(AppError::InvalidToken)));
    }
}
