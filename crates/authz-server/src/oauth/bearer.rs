//! RFC 6750 bearer authentication for resource endpoints.

use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::tokens::TokenStore;
use super::types::TokenClaims;

const REALM: &str = "authz-server";

/// Why a request was not authenticated (RFC 6750 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BearerRejection {
    /// No Authorization header.
    #[error("No access token provided")]
    MissingToken,

    /// Header present but not `Bearer <token>`.
    #[error("Authorization header must use the Bearer scheme")]
    InvalidScheme,

    /// Unknown, expired or revoked token.
    #[error("Invalid or expired access token")]
    InvalidToken,
}

impl BearerRejection {
    /// RFC 6750 error code.
    #[must_use]
    pub const fn error_code(self) -> &'static str {
        match self {
            Self::MissingToken | Self::InvalidScheme => "invalid_request",
            Self::InvalidToken => "invalid_token",
        }
    }

    fn www_authenticate(self) -> HeaderValue {
        // RFC 6750 §3.1: no error attribute when no credentials were sent
        let value = match self {
            Self::MissingToken => format!("Bearer realm=\"{REALM}\""),
            _ => format!(
                "Bearer realm=\"{REALM}\", error=\"{}\", error_description=\"{self}\"",
                self.error_code()
            ),
        };
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
    }
}

impl IntoResponse for BearerRejection {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.error_code(),
            "error_description": self.to_string(),
        }));
        let mut response = (StatusCode::UNAUTHORIZED, body).into_response();
        response.headers_mut().insert(header::WWW_AUTHENTICATE, self.www_authenticate());
        response
    }
}

/// Authenticates resource requests against the token store.
#[derive(Debug, Clone)]
pub struct BearerTokenValidator {
    tokens: Arc<TokenStore>,
}

impl BearerTokenValidator {
    #[must_use]
    pub const fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }

    /// Resolve an `Authorization` header value to the caller's claims.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<TokenClaims, BearerRejection> {
        let header = authorization.ok_or(BearerRejection::MissingToken)?;
        let token = extract_bearer(header).ok_or(BearerRejection::InvalidScheme)?;
        self.tokens.validate(token).await.map_err(|_| BearerRejection::InvalidToken)
    }
}

/// Token part of `Bearer <token>`; the scheme is case-insensitive.
fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AccountConfig;
    use crate::oauth::clients::ClientRegistry;
    use crate::oauth::codes::AuthorizationCodeStore;
    use crate::oauth::credentials::StaticAccounts;
    use crate::oauth::tokens::PasswordGrant;
    use crate::oauth::types::Client;

    fn setup() -> (BearerTokenValidator, Arc<TokenStore>, Arc<ManualClock>) {
        let clients = Arc::new(
            ClientRegistry::new([Client {
                client_id: "c1".into(),
                client_secret: "s1".into(),
                redirect_domain: "http://cb/".into(),
            }])
            .unwrap(),
        );
        let clock = Arc::new(ManualClock::default());
        let codes = Arc::new(AuthorizationCodeStore::new(clients.clone(), clock.clone(), Duration::from_secs(600)));
        let tokens = Arc::new(TokenStore::new(
            codes,
            clients,
            Arc::new(StaticAccounts::new(vec![AccountConfig::new("test", "test")])),
            clock.clone(),
            Duration::from_secs(60),
        ));
        (BearerTokenValidator::new(tokens.clone()), tokens, clock)
    }

    async fn issue(tokens: &TokenStore) -> String {
        tokens
            .issue_from_password(PasswordGrant {
                client_id: "c1".into(),
                client_secret: "s1".into(),
                username: "test".into(),
                password: "test".into(),
                scope: Some("profile".into()),
            })
            .await
            .unwrap()
            .access_token
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("BEARER  abc "), Some("abc"));
        assert_eq!(extract_bearer("Basic abc"), None);
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Bearerabc"), None);
    }

    #[tokio::test]
    async fn test_accepts_fresh_token() {
        let (validator, tokens, _) = setup();
        let token = issue(&tokens).await;
        let claims = validator.authenticate(Some(&format!("Bearer {token}"))).await.unwrap();
        assert_eq!(claims.user_id, "test");
        assert_eq!(claims.client_id, "c1");
        assert!(claims.has_scope("profile"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let (validator, tokens, clock) = setup();
        assert_eq!(validator.authenticate(None).await, Err(BearerRejection::MissingToken));
        assert_eq!(validator.authenticate(Some("Token xyz")).await, Err(BearerRejection::InvalidScheme));
        assert_eq!(validator.authenticate(Some("Bearer unknown")).await, Err(BearerRejection::InvalidToken));

        let token = issue(&tokens).await;
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(
            validator.authenticate(Some(&format!("Bearer {token}"))).await,
            Err(BearerRejection::InvalidToken)
        );
    }

    #[test]
    fn test_rejection_response() {
        let response = BearerRejection::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
        assert!(challenge.contains("error=\"invalid_token\""));

        let response = BearerRejection::MissingToken.into_response();
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
        assert_eq!(challenge, "Bearer realm=\"authz-server\"");
    }
}
