use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::AuthError;
use crate::domain::{EntrepriseId, Role, User, UserId};

type HmacSha256 = Hmac<Sha256>;

/// Payload carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub role: Role,
    #[serde(default)]
    pub entreprise_id: Option<EntrepriseId>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies `base64url(claims).base64url(hmac-sha256)` tokens.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| AuthError::Hashing(err.to_string()))
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<SessionToken, AuthError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id,
            role: user.role,
            entreprise_id: user.entreprise_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|err| AuthError::Hashing(err.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(SessionToken {
            token: format!("{encoded}.{signature}"),
            expires_at,
        })
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let (encoded, signature) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AuthError::InvalidToken)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)?;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}
