use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap},
};
use serde::Deserialize;

/// Name of both the query parameter and the cookie carrying the token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Raw access token of a request, if any.
///
/// Browsers cannot set headers on a WebSocket handshake, so the token is
/// looked up in the `access_token` query parameter first, then in the
/// `access_token` cookie, then in `Authorization: Bearer`.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(pub Option<String>);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.access_token);

        Ok(AccessToken(
            from_query
                .or_else(|| token_from_cookie(&parts.headers))
                .or_else(|| token_from_bearer(&parts.headers)),
        ))
    }
}

fn token_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN)
        .map(|(_, value)| value.to_string())
}

fn token_from_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
