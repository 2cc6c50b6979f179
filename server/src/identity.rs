//! Connection authentication.
//!
//! A connection attempt carries either a bearer token or a guest marker. The
//! token is checked by an [`IdentityProvider`] before the WebSocket upgrade is
//! accepted; guests get a freshly generated label instead.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential and no guest marker")]
    MissingCredential,
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token carries an empty username")]
    EmptyIdentity,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Checks a bearer credential and returns the identity it names.
    async fn verify(&self, credential: &str) -> Result<String, AuthError>;

    /// Hands out a new guest identity.
    async fn register_guest(&self) -> Result<String, AuthError>;
}

/// Claims of the tokens issued by the login service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub exp: u64,
}

/// Verifies HS256 JWTs signed with a shared secret.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation)?;
        let username = data.claims.username.trim();
        if username.is_empty() {
            return Err(AuthError::EmptyIdentity);
        }
        Ok(username.to_string())
    }

    async fn register_guest(&self) -> Result<String, AuthError> {
        Ok(guest_identity())
    }
}

pub fn guest_identity() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("guest-{}", &id[..8])
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    /// Presence alone marks a guest; the value is ignored.
    pub guest: Option<String>,
}

/// Resolves the identity for a connection attempt.
///
/// A token is tried first. If it is missing or rejected, a guest marker still
/// admits the connection as a guest; without one the attempt is refused.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    token: Option<&str>,
    guest: bool,
) -> Result<String, AuthError> {
    let verified = match token {
        Some(token) => Some(provider.verify(token).await),
        None => None,
    };

    match verified {
        Some(Ok(identity)) => Ok(identity),
        Some(Err(_)) | None if guest => provider.register_guest().await,
        Some(Err(e)) => Err(e),
        None => Err(AuthError::MissingCredential),
    }
}

/// Pulls the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
