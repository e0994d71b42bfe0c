mod jwt;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{AppError, error::RelayError, relay::Credentials, rooms::Identity};

pub use jwt::{Claims, JwtIdentityProvider};

/// Turns an opaque token into the identity it was issued for.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, RelayError>;
}

/// Resolves connection credentials to an identity.
///
/// A token wins; a `username` sent alongside it must agree with it. A bare
/// username is only trusted when `allow_anonymous` is on.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    credentials: &Credentials,
    allow_anonymous: bool,
) -> Result<Identity, RelayError> {
    let claimed = credentials
        .username
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(Identity::parse)
        .transpose()
        .map_err(|_| RelayError::auth("malformed username"))?;

    match credentials.token.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => {
            let identity = provider.verify(token).await?;
            if claimed.is_some_and(|claimed| claimed != identity) {
                return Err(RelayError::auth("username does not match token"));
            }
            Ok(identity)
        }
        None => match claimed {
            Some(identity) if allow_anonymous => Ok(identity),
            _ => Err(RelayError::auth("authentication required")),
        },
    }
}

/// Identity of an HTTP caller presenting `Authorization: Bearer <token>`.
pub struct Bearer(pub Identity);

impl<S> FromRequestParts<S> for Bearer
where
    Arc<dyn IdentityProvider>: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(RelayError::auth("no token provided"))?;

        let provider: Arc<dyn IdentityProvider> = axum::extract::FromRef::from_ref(state);
        Ok(Bearer(provider.verify(token.trim()).await?))
    }
}
