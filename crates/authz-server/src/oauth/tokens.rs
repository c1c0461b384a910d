//! Bearer token store.
//!
//! Tokens are opaque random strings; their claims live only here. Reads take
//! the read lock, issuance, revocation and lazy deletion of expired tokens
//! take the write lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use super::clients::ClientRegistry;
use super::codes::AuthorizationCodeStore;
use super::credentials::CredentialValidator;
use super::to_time_delta;
use super::types::{Token, TokenClaims, generate_token};
use crate::clock::Clock;
use crate::error::{OAuthError, OAuthResult};

/// Token endpoint input for the authorization-code grant.
#[derive(Clone, Default)]
pub struct CodeExchange {
    pub code: String,
    pub client_id: String,
    /// Checked when presented; public clients may omit it.
    pub client_secret: Option<String>,
    /// Defaults to the client's registered domain.
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
}

/// Token endpoint input for the resource-owner password grant.
#[derive(Clone, Default)]
pub struct PasswordGrant {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub scope: Option<String>,
}

impl std::fmt::Debug for PasswordGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Successful token endpoint body (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Default)]
struct TokenTable {
    access: HashMap<String, Token>,
    /// refresh token -> access token
    refresh: HashMap<String, String>,
}

/// Issues, validates and revokes bearer tokens.
pub struct TokenStore {
    table: RwLock<TokenTable>,
    codes: Arc<AuthorizationCodeStore>,
    clients: Arc<ClientRegistry>,
    credentials: Arc<dyn CredentialValidator>,
    clock: Arc<dyn Clock>,
    lifetime: chrono::Duration,
    issue_refresh: bool,
}

impl TokenStore {
    #[must_use]
    pub fn new(
        codes: Arc<AuthorizationCodeStore>,
        clients: Arc<ClientRegistry>,
        credentials: Arc<dyn CredentialValidator>,
        clock: Arc<dyn Clock>,
        lifetime: Duration,
    ) -> Self {
        Self {
            table: RwLock::new(TokenTable::default()),
            codes,
            clients,
            credentials,
            clock,
            lifetime: to_time_delta(lifetime),
            issue_refresh: false,
        }
    }

    /// Also mint a refresh token with every access token.
    #[must_use]
    pub const fn with_refresh_tokens(mut self, enabled: bool) -> Self {
        self.issue_refresh = enabled;
        self
    }

    /// Exchange an authorization code for a token.
    pub async fn issue_from_code(&self, exchange: CodeExchange) -> OAuthResult<Token> {
        if exchange.code.is_empty() {
            return Err(OAuthError::malformed("code is required"));
        }
        let client = self.clients.lookup(&exchange.client_id)?;
        if let Some(secret) = exchange.client_secret.as_deref() {
            self.authenticate_client(&exchange.client_id, secret)?;
        }
        let redirect_uri = exchange.redirect_uri.as_deref().unwrap_or(&client.redirect_domain);

        let code = self.codes.redeem(&exchange.code, &exchange.client_id, redirect_uri).await?;

        if let Some(challenge) = &code.pkce {
            let verifier = exchange
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuthError::malformed("code_verifier is required"))?;
            if !challenge.verify(verifier) {
                tracing::warn!(client_id = %code.client_id, reason = "pkce_mismatch", "Rejected authorization code");
                return Err(OAuthError::InvalidOrExpiredCode);
            }
        }

        Ok(self.mint(code.user_id, code.client_id, code.scope).await)
    }

    /// Exchange resource-owner credentials for a token.
    pub async fn issue_from_password(&self, grant: PasswordGrant) -> OAuthResult<Token> {
        self.clients.lookup(&grant.client_id)?;
        self.authenticate_client(&grant.client_id, &grant.client_secret)?;

        let user_id = match self.credentials.validate_password(&grant.username, &grant.password).await {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!(client_id = %grant.client_id, "Password grant rejected");
                return Err(e);
            }
        };

        Ok(self.mint(user_id, grant.client_id, grant.scope.unwrap_or_default()).await)
    }

    /// Resolve a live access token to its claims. An expired token is deleted.
    pub async fn validate(&self, access_token: &str) -> OAuthResult<TokenClaims> {
        let now = self.clock.now();
        {
            let table = self.table.read().await;
            match table.access.get(access_token) {
                None => return Err(OAuthError::InvalidOrExpiredToken),
                Some(token) if !token.is_expired(now) => return Ok(token.claims()),
                Some(_) => {}
            }
        }

        let mut table = self.table.write().await;
        if let Some(token) = table.access.remove(access_token) {
            if let Some(refresh) = &token.refresh_token {
                table.refresh.remove(refresh);
            }
            tracing::debug!(client_id = %token.client_id, "Dropped expired access token");
        }
        Err(OAuthError::InvalidOrExpiredToken)
    }

    /// Revoke an access or refresh token owned by `client_id`, together with its pair.
    ///
    /// Returns whether anything was removed. Tokens of other clients are left alone.
    pub async fn revoke(&self, token: &str, client_id: &str) -> bool {
        let mut table = self.table.write().await;
        let access_key = if table.access.contains_key(token) {
            token.to_string()
        } else if let Some(access) = table.refresh.get(token) {
            access.clone()
        } else {
            return false;
        };

        let owned = table.access.get(&access_key).is_some_and(|t| t.client_id == client_id);
        if !owned {
            tracing::warn!(client_id = %client_id, "Refused to revoke a token of another client");
            return false;
        }

        if let Some(revoked) = table.access.remove(&access_key) {
            if let Some(refresh) = &revoked.refresh_token {
                table.refresh.remove(refresh);
            }
            tracing::info!(client_id = %client_id, user_id = %revoked.user_id, "Revoked token");
        }
        // A refresh token whose access token is gone is dangling either way.
        table.refresh.remove(token);
        true
    }

    /// Render a freshly issued token as the token endpoint body.
    #[must_use]
    pub fn response(&self, token: &Token) -> TokenResponse {
        TokenResponse {
            access_token: token.access_token.clone(),
            token_type: "Bearer",
            expires_in: token.expires_in(self.clock.now()),
            scope: token.scope.clone(),
            refresh_token: token.refresh_token.clone(),
        }
    }

    /// Start background cleanup of expired tokens and codes.
    pub fn start_cleanup_task(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
                self.codes.cleanup_expired().await;
            }
        });
    }

    /// Remove expired tokens. Returns how many access tokens were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut table = self.table.write().await;
        let before = table.access.len();
        table.access.retain(|_, token| !token.is_expired(now));
        let removed = before - table.access.len();

        let TokenTable { access, refresh } = &mut *table;
        refresh.retain(|_, access_token| access.contains_key(access_token));

        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired access tokens");
        }
        removed
    }

    /// Number of stored access tokens.
    pub async fn token_count(&self) -> usize {
        self.table.read().await.access.len()
    }

    fn authenticate_client(&self, client_id: &str, secret: &str) -> OAuthResult<()> {
        if self.clients.validate(client_id, secret) {
            Ok(())
        } else {
            tracing::warn!(client_id = %client_id, "Client authentication failed");
            Err(OAuthError::ClientAuthenticationFailed(client_id.to_string()))
        }
    }

    async fn mint(&self, user_id: String, client_id: String, scope: String) -> Token {
        let now = self.clock.now();
        let token = Token {
            access_token: generate_token(),
            refresh_token: self.issue_refresh.then(generate_token),
            user_id,
            client_id,
            scope,
            issued_at: now,
            expires_at: now + self.lifetime,
        };

        let mut table = self.table.write().await;
        if let Some(refresh) = &token.refresh_token {
            table.refresh.insert(refresh.clone(), token.access_token.clone());
        }
        table.access.insert(token.access_token.clone(), token.clone());
        drop(table);

        tracing::info!(client_id = %token.client_id, user_id = %token.user_id, "Issued access token");
        token
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("lifetime", &self.lifetime)
            .field("issue_refresh", &self.issue_refresh)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AccountConfig;
    use crate::oauth::codes::CodeGrant;
    use crate::oauth::credentials::StaticAccounts;
    use crate::oauth::pkce::PkceChallenge;
    use crate::oauth::types::Client;

    struct Fixture {
        tokens: TokenStore,
        codes: Arc<AuthorizationCodeStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clients = Arc::new(
            ClientRegistry::new([
                Client { client_id: "c1".into(), client_secret: "s1".into(), redirect_domain: "http://cb/".into() },
                Client { client_id: "c2".into(), client_secret: "s2".into(), redirect_domain: "http://other/".into() },
            ])
            .unwrap(),
        );
        let clock = Arc::new(ManualClock::default());
        let codes = Arc::new(AuthorizationCodeStore::new(
            clients.clone(),
            clock.clone(),
            Duration::from_secs(600),
        ));
        let accounts = Arc::new(StaticAccounts::new(vec![AccountConfig::new("test", "test")]));
        let tokens = TokenStore::new(
            codes.clone(),
            clients,
            accounts,
            clock.clone(),
            Duration::from_secs(7200),
        );
        Fixture { tokens, codes, clock }
    }

    async fn issue_code(codes: &AuthorizationCodeStore, pkce: Option<PkceChallenge>) -> String {
        codes
            .issue(CodeGrant {
                client_id: "c1".into(),
                user_id: "test".into(),
                redirect_uri: "http://cb/".into(),
                scope: "read".into(),
                pkce,
            })
            .await
            .unwrap()
            .code
    }

    fn exchange(code: String) -> CodeExchange {
        CodeExchange {
            code,
            client_id: "c1".into(),
            client_secret: Some("s1".into()),
            redirect_uri: Some("http://cb/".into()),
            code_verifier: None,
        }
    }

    fn password(pass: &str) -> PasswordGrant {
        PasswordGrant {
            client_id: "c1".into(),
            client_secret: "s1".into(),
            username: "test".into(),
            password: pass.into(),
            scope: Some("read write".into()),
        }
    }

    #[tokio::test]
    async fn test_code_exchange_then_validate() {
        let f = fixture();
        let code = issue_code(&f.codes, None).await;
        let token = f.tokens.issue_from_code(exchange(code.clone())).await.unwrap();

        let claims = f.tokens.validate(&token.access_token).await.unwrap();
        assert_eq!(claims.user_id, "test");
        assert_eq!(claims.client_id, "c1");
        assert_eq!(claims.scope, "read");

        // Second exchange of the same code fails
        assert!(matches!(
            f.tokens.issue_from_code(exchange(code)).await,
            Err(OAuthError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_code_exchange_redirect_defaults_to_registered_domain() {
        let f = fixture();
        let code = issue_code(&f.codes, None).await;
        let public = CodeExchange { redirect_uri: None, client_secret: None, ..exchange(code) };
        assert_ok!(f.tokens.issue_from_code(public).await);
    }

    #[tokio::test]
    async fn test_code_exchange_wrong_secret() {
        let f = fixture();
        let code = issue_code(&f.codes, None).await;
        let bad = CodeExchange { client_secret: Some("nope".into()), ..exchange(code.clone()) };
        assert!(matches!(
            f.tokens.issue_from_code(bad).await,
            Err(OAuthError::ClientAuthenticationFailed(_))
        ));
        // The code was not consumed
        assert_ok!(f.tokens.issue_from_code(exchange(code)).await);
    }

    #[tokio::test]
    async fn test_pkce_bound_code() {
        let f = fixture();
        let pkce = PkceChallenge::from_params("verifier-value", Some("plain")).unwrap();

        let code = issue_code(&f.codes, Some(pkce.clone())).await;
        assert!(matches!(
            f.tokens.issue_from_code(exchange(code)).await,
            Err(OAuthError::MalformedRequest(_))
        ));

        let code = issue_code(&f.codes, Some(pkce.clone())).await;
        let wrong = CodeExchange { code_verifier: Some("other".into()), ..exchange(code) };
        assert!(matches!(f.tokens.issue_from_code(wrong).await, Err(OAuthError::InvalidOrExpiredCode)));

        let code = issue_code(&f.codes, Some(pkce)).await;
        let right = CodeExchange { code_verifier: Some("verifier-value".into()), ..exchange(code) };
        assert_ok!(f.tokens.issue_from_code(right).await);
    }

    #[tokio::test]
    async fn test_password_grant() {
        let f = fixture();
        let token = f.tokens.issue_from_password(password("test")).await.unwrap();
        assert_eq!(token.user_id, "test");
        assert_eq!(token.scope, "read write");
        assert!(token.refresh_token.is_none());

        assert!(matches!(
            f.tokens.issue_from_password(password("wrong")).await,
            Err(OAuthError::InvalidCredentials)
        ));
        let bad_client = PasswordGrant { client_secret: "s2".into(), ..password("test") };
        assert!(matches!(
            f.tokens.issue_from_password(bad_client).await,
            Err(OAuthError::ClientAuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_deleted_on_validate() {
        let f = fixture();
        let token = f.tokens.issue_from_password(password("test")).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(7200));

        assert_err!(f.tokens.validate(&token.access_token).await);
        assert_eq!(f.tokens.token_count().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_by_owner_only() {
        let f = fixture();
        let token = f.tokens.issue_from_password(password("test")).await.unwrap();

        assert!(!f.tokens.revoke(&token.access_token, "c2").await);
        assert_ok!(f.tokens.validate(&token.access_token).await);

        assert!(f.tokens.revoke(&token.access_token, "c1").await);
        assert_err!(f.tokens.validate(&token.access_token).await);
        assert!(!f.tokens.revoke(&token.access_token, "c1").await);
    }

    #[tokio::test]
    async fn test_refresh_token_revokes_pair() {
        let f = fixture();
        let tokens = f.tokens.with_refresh_tokens(true);
        let token = tokens.issue_from_password(password("test")).await.unwrap();
        let refresh = token.refresh_token.clone().unwrap();
        assert_ne!(refresh, token.access_token);

        let body = tokens.response(&token);
        assert_eq!(body.refresh_token.as_deref(), Some(refresh.as_str()));
        assert_eq!(body.expires_in, 7200);

        assert!(tokens.revoke(&refresh, "c1").await);
        assert_err!(tokens.validate(&token.access_token).await);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let f = fixture();
        f.tokens.issue_from_password(password("test")).await.unwrap();
        assert_eq!(f.tokens.cleanup_expired().await, 0);
        f.clock.advance(chrono::Duration::seconds(7201));
        assert_eq!(f.tokens.cleanup_expired().await, 1);
    }
}
