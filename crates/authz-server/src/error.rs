//! Error types for the authorization server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Every [`OAuthError`] variant maps to exactly one OAuth 2.0 wire code and one HTTP status.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Errors from the session backend.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// A session value could not be encoded or decoded.
    #[error("Session encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The backing store failed to load or persist the session.
    #[error("Session backend error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Create a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Errors raised while building the client registry at startup.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// Two clients share an id.
    #[error("Duplicate client id: {0}")]
    DuplicateClient(String),

    /// The registered redirect domain is not a URL.
    #[error("Invalid redirect domain for client {client_id}: {redirect_domain}")]
    InvalidRedirectDomain {
        /// Offending client
        client_id: String,
        /// Value that failed to parse
        redirect_domain: String,
    },

    /// Client id or secret is empty.
    #[error("Client {0} has an empty id or secret")]
    EmptyCredentials(String),
}

/// Errors from the OAuth protocol core.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// No client is registered under this id.
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// The client presented a wrong secret.
    #[error("Client authentication failed for {0}")]
    ClientAuthenticationFailed(String),

    /// redirect_uri is not covered by the client's registered domain.
    #[error("redirect_uri {redirect_uri} is not registered for client {client_id}")]
    InvalidRedirect {
        /// Requesting client
        client_id: String,
        /// Rejected URI
        redirect_uri: String,
    },

    /// Login or password-grant credentials were rejected.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The code is unknown, expired, or bound to another client or redirect.
    #[error("Invalid or expired authorization code")]
    InvalidOrExpiredCode,

    /// The code was already exchanged. Never leaves the code store; see [`OAuthError::conceal`].
    #[error("Authorization code already redeemed")]
    CodeAlreadyRedeemed,

    /// The access token is unknown, expired or revoked.
    #[error("Invalid or expired access token")]
    InvalidOrExpiredToken,

    /// Session load or save failed.
    #[error("Session I/O failure: {0}")]
    SessionIoFailure(#[from] SessionError),

    /// A required parameter is missing or malformed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// response_type other than `code`.
    #[error("Unsupported response_type: {0}")]
    UnsupportedResponseType(String),

    /// grant_type this server does not implement.
    #[error("Unsupported grant_type: {0}")]
    UnsupportedGrantType(String),

    /// grant_type this server implements but has disabled.
    #[error("Client is not authorized to use grant_type {0}")]
    UnauthorizedClient(String),
}

impl OAuthError {
    /// Create a malformed request error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    /// Create an invalid redirect error.
    #[must_use]
    pub fn invalid_redirect(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self::InvalidRedirect { client_id: client_id.into(), redirect_uri: redirect_uri.into() }
    }

    /// OAuth 2.0 error code (RFC 6749 §4.1.2.1, §5.2; RFC 6750 §3.1).
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownClient(_) | Self::ClientAuthenticationFailed(_) => "invalid_client",
            Self::InvalidRedirect { .. } | Self::MalformedRequest(_) => "invalid_request",
            Self::InvalidCredentials | Self::InvalidOrExpiredCode | Self::CodeAlreadyRedeemed => {
                "invalid_grant"
            }
            Self::InvalidOrExpiredToken => "invalid_token",
            Self::SessionIoFailure(_) => "server_error",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnauthorizedClient(_) => "unauthorized_client",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UnknownClient(_)
            | Self::ClientAuthenticationFailed(_)
            | Self::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            Self::SessionIoFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Description safe to send to the caller.
    ///
    /// Reused, expired and unknown codes read identically, and server-side
    /// failures do not echo their cause.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CodeAlreadyRedeemed => Self::InvalidOrExpiredCode.to_string(),
            Self::UnknownClient(_) | Self::ClientAuthenticationFailed(_) => {
                "Client authentication failed".to_string()
            }
            Self::SessionIoFailure(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Collapse internal-only distinctions before an error leaves the core.
    #[must_use]
    pub fn conceal(self) -> Self {
        match self {
            Self::CodeAlreadyRedeemed => Self::InvalidOrExpiredCode,
            other => other,
        }
    }

    /// Rewrite for the browser-facing authorization endpoint, where an unknown
    /// client is `invalid_request` and carries no Basic challenge.
    #[must_use]
    pub fn at_authorization_endpoint(self) -> Self {
        match self {
            Self::UnknownClient(client_id) => {
                Self::MalformedRequest(format!("unknown client_id {client_id}"))
            }
            other => other,
        }
    }

    /// Returns true if the failure is on the server side.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::SessionIoFailure(_))
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(serde_json::json!({
                "error": self.error_code(),
                "error_description": self.description(),
            })),
        )
            .into_response();

        // RFC 6749 §5.2: invalid_client over 401 names the expected scheme.
        if self.error_code() == "invalid_client" {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"authz-server\""),
            );
        }
        response
    }
}

/// Result type alias for protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;
