//! Bearer credential validation for the WebSocket handshake.
//!
//! Credentials are issued elsewhere; this module only checks the HS256
//! signature and expiry and turns the claims into an [`Identity`].

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Claims carried by a staff access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Staff role (e.g. `admin`, `guard`).
    pub role: String,
    /// Scope the user operates in, typically a village identifier.
    #[serde(alias = "village_id")]
    pub scope_key: String,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Authenticated owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User id.
    pub user_id: String,
    /// Role.
    pub role: String,
    /// Scope key.
    pub scope_key: String,
}

impl Identity {
    /// Creates an identity.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        role: impl Into<String>,
        scope_key: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            scope_key: scope_key.into(),
        }
    }
}

impl TryFrom<Claims> for Identity {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        if claims.sub.trim().is_empty() {
            return Err(AuthError::IncompleteClaims("sub"));
        }
        if claims.role.trim().is_empty() {
            return Err(AuthError::IncompleteClaims("role"));
        }
        if claims.scope_key.trim().is_empty() {
            return Err(AuthError::IncompleteClaims("scope_key"));
        }

        Ok(Self {
            user_id: claims.sub,
            role: claims.role,
            scope_key: claims.scope_key,
        })
    }
}

/// Handshake authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential on the upgrade request.
    #[error("missing credential")]
    MissingToken,

    /// Credential signature was valid but it has expired.
    #[error("credential expired")]
    Expired,

    /// Credential could not be decoded or verified.
    #[error("invalid credential: {0}")]
    Invalid(String),

    /// A required claim is blank.
    #[error("credential is missing claim: {0}")]
    IncompleteClaims(&'static str),
}

/// Validates HS256 bearer credentials.
#[derive(Clone)]
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a validator for the given shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Validates a token and returns the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, badly signed, expired or
    /// lacks a required claim.
    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        Identity::try_from(data.claims)
    }
}

/// Extracts the bearer credential from an upgrade request.
///
/// The `token` query parameter wins over the `Authorization` header because
/// browsers cannot set headers on WebSocket upgrades.
#[must_use]
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    bearer_token(headers)
}

/// Returns the token of an `Authorization: Bearer` header, if present.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Compares a presented shared token against the expected one.
///
/// Both sides are hashed first so the comparison always covers 32 bytes and
/// takes the same time whatever the inputs' lengths or common prefix.
#[must_use]
pub fn token_matches(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());

    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
