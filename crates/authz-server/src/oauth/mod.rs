//! OAuth 2.0 authorization server core.
//!
//! Transport-independent: the HTTP layer in [`crate::server`] only parses
//! requests and renders the outcomes produced here.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code and Resource Owner Password grants
//! - RFC 6750: Bearer token usage
//! - RFC 7009: Token revocation
//! - RFC 7636: PKCE (S256, plain)
//! - RFC 8414: Authorization Server Metadata

pub mod bearer;
pub mod clients;
pub mod codes;
pub mod coordinator;
pub mod credentials;
pub mod pkce;
pub mod session;
pub mod tokens;
pub mod types;

pub use bearer::{BearerRejection, BearerTokenValidator};
pub use clients::ClientRegistry;
pub use codes::{AuthorizationCodeStore, CodeGrant};
pub use coordinator::{AuthorizationCoordinator, AuthorizeOutcome, FlowPaths, FlowState};
pub use credentials::{CredentialValidator, StaticAccounts};
pub use session::{MemorySessionStore, SessionBridge, SessionHandle};
pub use tokens::{CodeExchange, PasswordGrant, TokenResponse, TokenStore};
pub use types::{AuthorizationRequest, TokenClaims};

/// Convert a configured lifetime, capped at [`MAX_LIFETIME`](crate::config::defaults::MAX_LIFETIME).
pub(crate) fn to_time_delta(lifetime: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(lifetime.min(crate::config::defaults::MAX_LIFETIME))
        .unwrap_or_else(|_| chrono::Duration::zero())
}
