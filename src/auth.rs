//! # Authentication and Authorization
//!
//! Operator bearer authentication for the admin API and ingestion key parsing
//! for the event envelope endpoint.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// Header SDKs use to present their ingestion key
pub const INGESTION_AUTH_HEADER: &str = "X-Sentry-Auth";
const INGESTION_KEY_FIELD: &str = "sentry_key=";

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authentication middleware that validates operator bearer tokens
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_token(&config, token)?;

    tracing::debug!("Authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

/// Extracts the ingestion key from `X-Sentry-Auth: Sentry sentry_key=<key>, ...`.
pub fn ingestion_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(INGESTION_AUTH_HEADER)
        .ok_or_else(|| unauthorized(Some("Missing X-Sentry-Auth header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid X-Sentry-Auth header")))?;

    parse_ingestion_key(header)
        .map(str::to_string)
        .ok_or_else(|| unauthorized(Some("X-Sentry-Auth header has no sentry_key")))
}

fn parse_ingestion_key(header: &str) -> Option<&str> {
    let header = header.trim();
    let fields = header
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("sentry"))
        .map_or(header, |(_, rest)| rest);

    fields
        .split(',')
        .map(str::trim)
        .find_map(|field| field.strip_prefix(INGESTION_KEY_FIELD))
        .filter(|key| !key.is_empty())
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string()],
            ..Default::default()
        })
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler(_auth: OperatorAuth) -> &'static str {
            "OK"
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&config),
                auth_middleware,
            ))
            .with_state(config)
            .oneshot(request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dGVzdDoxMjM=")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn multiple_tokens_supported() {
        let config = Arc::new(AppConfig {
            operator_tokens: vec![
                "token-one".to_string(),
                "token-two".to_string(),
                "token-three".to_string(),
            ],
            ..Default::default()
        });

        for candidate in ["token-one", "token-two", "token-three"] {
            let request = Request::builder()
                .uri("/test")
                .header("Authorization", format!("Bearer {}", candidate))
                .body(Body::empty())
                .unwrap();

            let response = run_middleware(Arc::clone(&config), request).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn parses_ingestion_key_variants() {
        assert_eq!(
            parse_ingestion_key("Sentry sentry_version=7, sentry_key=abc123, sentry_client=x/1"),
            Some("abc123")
        );
        assert_eq!(parse_ingestion_key("sentry_key=abc123"), Some("abc123"));
        assert_eq!(parse_ingestion_key("Sentry sentry_version=7"), None);
        assert_eq!(parse_ingestion_key("Sentry sentry_key="), None);
    }

    #[test]
    fn ingestion_key_requires_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            ingestion_key(&headers).unwrap_err().status,
            StatusCode::UNAUTHORIZED
        );

        headers.insert(
            INGESTION_AUTH_HEADER,
            HeaderValue::from_static("Sentry sentry_key=k1"),
        );
        assert_eq!(ingestion_key(&headers).unwrap(), "k1");
    }
}
