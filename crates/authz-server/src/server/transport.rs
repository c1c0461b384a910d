//! HTTP transport: shared state and routing.

use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{any, get, post},
};
use tower_http::trace::TraceLayer;

use super::oauth::handlers;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::oauth::{
    AuthorizationCodeStore, AuthorizationCoordinator, BearerTokenValidator, ClientRegistry,
    FlowPaths, MemorySessionStore, SessionBridge, StaticAccounts, TokenStore,
};

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub clients: Arc<ClientRegistry>,
    pub accounts: Arc<StaticAccounts>,
    pub codes: Arc<AuthorizationCodeStore>,
    pub tokens: Arc<TokenStore>,
    pub coordinator: AuthorizationCoordinator,
    pub bearer: BearerTokenValidator,
}

impl AppState {
    /// Wire the core components together.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or client registry is invalid.
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionBridge>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let clients = Arc::new(ClientRegistry::from_config(&config.clients)?);
        let accounts = Arc::new(StaticAccounts::new(config.accounts.clone()));
        let codes = Arc::new(AuthorizationCodeStore::new(
            Arc::clone(&clients),
            Arc::clone(&clock),
            config.code_lifetime,
        ));
        let tokens = Arc::new(
            TokenStore::new(
                Arc::clone(&codes),
                Arc::clone(&clients),
                accounts.clone(),
                clock,
                config.access_token_lifetime,
            )
            .with_refresh_tokens(config.issue_refresh_tokens),
        );
        let coordinator = AuthorizationCoordinator::new(
            Arc::clone(&clients),
            sessions,
            Arc::clone(&codes),
            accounts.clone(),
            FlowPaths::from_config(&config),
        );
        let bearer = BearerTokenValidator::new(Arc::clone(&tokens));

        tracing::info!(
            clients = clients.len(),
            accounts = config.accounts.len(),
            "Authorization server state initialised"
        );

        Ok(Self { config, clients, accounts, codes, tokens, coordinator, bearer })
    }

    /// State backed by the system clock and in-memory sessions.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or client registry is invalid.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        let sessions = Arc::new(MemorySessionStore::new(config.session_ttl, config.session_capacity));
        Self::new(config, Arc::new(SystemClock), sessions)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("base_url", &self.config.base_url)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let config = &state.config;

    Router::new()
        .route("/health", get(health_check))
        .route(
            &config.login_path,
            get(handlers::handle_login_page).post(handlers::handle_login_submit),
        )
        .route(&config.resume_path, any(handlers::handle_resume))
        .route(&config.authorize_path, any(handlers::handle_authorize))
        .route("/oauth/token", any(handlers::handle_token))
        .route("/oauth/userinfo", get(handlers::handle_userinfo))
        .route("/oauth/revoke", post(handlers::handle_revoke))
        .route("/.well-known/oauth-authorization-server", get(handlers::handle_auth_server_metadata))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "authz-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
