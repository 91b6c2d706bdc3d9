//! Header helpers shared by the auth handlers.

use crate::{
    error::AuthError,
    orchestrator::{AuthOrchestrator, ClientContext, Principal},
};
use axum::http::{
    header::{AUTHORIZATION, USER_AGENT},
    HeaderMap,
};

pub(crate) const DEVICE_ID_HEADER: &str = "x-device-id";

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client IP from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Body device id wins over the `X-Device-Id` header.
pub(crate) fn client_context(headers: &HeaderMap, device_id: Option<String>) -> ClientContext {
    ClientContext {
        device_id: device_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| header_string(headers, DEVICE_ID_HEADER)),
        ip: extract_client_ip(headers),
        user_agent: header_string(headers, USER_AGENT.as_str()),
    }
}

pub(crate) fn device_id_header(headers: &HeaderMap) -> Option<String> {
    header_string(headers, DEVICE_ID_HEADER)
}

/// Resolve the bearer access token into the caller.
pub(crate) async fn require_principal(
    headers: &HeaderMap,
    orchestrator: &AuthOrchestrator,
) -> Result<Principal, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::InvalidToken)?;
    orchestrator.authenticate(&token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_token_accepts_either_case() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(extract_bearer_token(&headers), Some("xyz".to_string()));
    }

    #[test]
    fn extract_bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn client_context_prefers_body_device_id() {
        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("header-device"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8"));

        let context = client_context(&headers, Some("body-device".to_string()));
        assert_eq!(context.device_id.as_deref(), Some("body-device"));
        assert_eq!(context.user_agent.as_deref(), Some("curl/8"));

        let context = client_context(&headers, Some("  ".to_string()));
        assert_eq!(context.device_id.as_deref(), Some("header-device"));
    }
}
