use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{error::RelayError, rooms::Identity};

use super::IdentityProvider;

/// Token body as minted by the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub exp: u64,
}

/// HS256 verifier sharing its secret with whoever issues the tokens.
pub struct JwtIdentityProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mints a token for `identity`, valid for `ttl`.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, RelayError> {
        let exp = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64 + ttl.as_secs();
        let claims = Claims {
            username: identity.to_string(),
            user_id: None,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| RelayError::auth(format!("cannot sign token: {e}")))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Identity, RelayError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| RelayError::auth(format!("invalid token: {e}")))?;
        Identity::parse(&data.claims.username)
            .map_err(|_| RelayError::auth("token names an invalid identity"))
    }
}
