//! Caller token extraction for the REST API
//!
//! The token is read from the `Authorization: Bearer <token>` header, or,
//! when that header is absent, from the `IDM_AUTH` cookie. Verification
//! happens in the engine, so a missing token is passed on as an empty string
//! and rejected there as unauthenticated.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use std::convert::Infallible;

/// Cookie carrying the caller token for browser clients
pub const AUTH_COOKIE_NAME: &str = "IDM_AUTH";

/// Raw caller token extracted from the request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CallerToken(extract_token(&parts.headers)))
    }
}

/// Extract the caller token from request headers
///
/// Returns an empty string when neither source carries a token.
pub fn extract_token(headers: &HeaderMap) -> String {
    if let Some(token) = bearer_token(headers) {
        return token.to_string();
    }
    cookie_token(headers).unwrap_or_default().to_string()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE_NAME)
        .map(|(_, token)| token.trim())
}
