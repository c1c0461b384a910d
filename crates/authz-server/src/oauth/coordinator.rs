//! Authorize-request state machine.
//!
//! ```text
//! Unauthenticated --authorize--> PendingLogin --login--> Authenticated --authorize--> CodeIssued
//! ```
//!
//! An `/authorize` call without a logged-in user is validated and parked in the
//! session, and the browser is sent to log in. After login the resume path
//! bounces back to `/authorize`, which restores the parked request, clears the
//! session and mints a code.

use std::sync::Arc;

use url::Url;

use super::clients::ClientRegistry;
use super::codes::{AuthorizationCodeStore, CodeGrant};
use super::credentials::CredentialValidator;
use super::pkce::PkceChallenge;
use super::session::{LOGGED_IN_USER_KEY, PENDING_REQUEST_KEY, SessionBridge, SessionHandle};
use super::types::AuthorizationRequest;
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult, SessionError};

/// Where a session stands in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unauthenticated,
    PendingLogin,
    Authenticated,
    CodeIssued,
    Error,
}

/// Result of an `/authorize` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Request parked; redirect to the login page.
    LoginRequired { location: String },
    /// Code minted; redirect back to the client.
    CodeIssued { location: String, code: String },
}

impl AuthorizeOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::LoginRequired { location } | Self::CodeIssued { location, .. } => location,
        }
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        match self {
            Self::LoginRequired { .. } => FlowState::PendingLogin,
            Self::CodeIssued { .. } => FlowState::CodeIssued,
        }
    }
}

/// Paths the flow redirects between.
#[derive(Debug, Clone)]
pub struct FlowPaths {
    pub login: String,
    pub resume: String,
    pub authorize: String,
}

impl FlowPaths {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            login: config.login_path.clone(),
            resume: config.resume_path.clone(),
            authorize: config.authorize_path.clone(),
        }
    }
}

/// A request that passed validation, with defaults applied.
#[derive(Debug)]
struct ValidatedRequest {
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: Option<String>,
    pkce: Option<PkceChallenge>,
}

/// Drives the login-redirect bridge between `/authorize`, `/login` and the code store.
pub struct AuthorizationCoordinator {
    clients: Arc<ClientRegistry>,
    sessions: Arc<dyn SessionBridge>,
    codes: Arc<AuthorizationCodeStore>,
    credentials: Arc<dyn CredentialValidator>,
    paths: FlowPaths,
}

impl AuthorizationCoordinator {
    #[must_use]
    pub fn new(
        clients: Arc<ClientRegistry>,
        sessions: Arc<dyn SessionBridge>,
        codes: Arc<AuthorizationCodeStore>,
        credentials: Arc<dyn CredentialValidator>,
        paths: FlowPaths,
    ) -> Self {
        Self { clients, sessions, codes, credentials, paths }
    }

    /// Load the caller's session, or start one.
    pub async fn start_session(&self, session_id: Option<&str>) -> OAuthResult<SessionHandle> {
        self.sessions.start(session_id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to load session");
            OAuthError::from(e)
        })
    }

    /// Handle an `/authorize` call.
    pub async fn authorize(
        &self,
        session: &mut SessionHandle,
        inbound: AuthorizationRequest,
    ) -> OAuthResult<AuthorizeOutcome> {
        let user_id: Option<String> = session.get(LOGGED_IN_USER_KEY)?;
        let pending: Option<AuthorizationRequest> = session.get(PENDING_REQUEST_KEY)?;

        match (user_id, pending) {
            (Some(user_id), Some(pending)) => {
                if !inbound.is_empty() && inbound != pending {
                    tracing::debug!("Ignoring inbound parameters in favour of the pending request");
                }
                self.issue_code(session, user_id, &pending).await
            }
            // Reload of the login bridge: keep what was parked.
            (None, Some(pending)) if inbound.is_empty() => self.park(session, pending).await,
            _ if inbound.is_empty() => Err(OAuthError::malformed("authorization request has no parameters")),
            _ => self.park(session, inbound).await,
        }
    }

    /// Handle a login form submission. Returns the resume location.
    ///
    /// On failure the session is left untouched.
    pub async fn login(
        &self,
        session: &mut SessionHandle,
        username: &str,
        password: &str,
    ) -> OAuthResult<String> {
        let user_id = match self.credentials.validate_password(username, password).await {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!(username = %username, "Login failed");
                return Err(e);
            }
        };

        session.set(LOGGED_IN_USER_KEY, &user_id)?;
        self.save(session).await?;
        tracing::info!(user_id = %user_id, "User logged in");
        Ok(self.paths.resume.clone())
    }

    /// Where the resume path sends the browser.
    #[must_use]
    pub fn resume(&self, session: &SessionHandle) -> &str {
        if session.contains(LOGGED_IN_USER_KEY) {
            &self.paths.authorize
        } else {
            &self.paths.login
        }
    }

    /// Current state of a session.
    #[must_use]
    pub fn flow_state(&self, session: &SessionHandle) -> FlowState {
        let user = session.get::<String>(LOGGED_IN_USER_KEY);
        let pending = session.get::<AuthorizationRequest>(PENDING_REQUEST_KEY);
        match (user, pending) {
            (Ok(_), Ok(None)) => FlowState::Unauthenticated,
            (Ok(None), Ok(Some(_))) => FlowState::PendingLogin,
            (Ok(Some(_)), Ok(Some(_))) => FlowState::Authenticated,
            _ => FlowState::Error,
        }
    }

    #[must_use]
    pub const fn paths(&self) -> &FlowPaths {
        &self.paths
    }

    async fn park(
        &self,
        session: &mut SessionHandle,
        request: AuthorizationRequest,
    ) -> OAuthResult<AuthorizeOutcome> {
        let validated = self.validate(&request)?;

        session.set(PENDING_REQUEST_KEY, &request)?;
        // A parked request always needs a fresh login.
        session.delete(LOGGED_IN_USER_KEY);
        self.save(session).await?;

        tracing::debug!(client_id = %validated.client_id, "Parked authorization request, login required");
        Ok(AuthorizeOutcome::LoginRequired { location: self.paths.login.clone() })
    }

    async fn issue_code(
        &self,
        session: &mut SessionHandle,
        user_id: String,
        pending: &AuthorizationRequest,
    ) -> OAuthResult<AuthorizeOutcome> {
        let validated = self.validate(pending)?;

        session.delete(PENDING_REQUEST_KEY);
        session.delete(LOGGED_IN_USER_KEY);
        self.save(session).await?;

        let code = self
            .codes
            .issue(CodeGrant {
                client_id: validated.client_id,
                user_id,
                redirect_uri: validated.redirect_uri,
                scope: validated.scope,
                pkce: validated.pkce,
            })
            .await?;

        let location = callback_url(&code.redirect_uri, &code.code, validated.state.as_deref())?;
        Ok(AuthorizeOutcome::CodeIssued { location, code: code.code })
    }

    fn validate(&self, request: &AuthorizationRequest) -> OAuthResult<ValidatedRequest> {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OAuthError::malformed("client_id is required"))?;
        let client = self.clients.lookup(client_id)?;

        let redirect_uri = request
            .redirect_uri
            .clone()
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| client.redirect_domain.clone());
        if !self.clients.validate_redirect(client_id, &redirect_uri) {
            tracing::warn!(client_id = %client_id, redirect_uri = %redirect_uri, "Rejected redirect_uri");
            return Err(OAuthError::invalid_redirect(client_id, redirect_uri));
        }

        match request.response_type.as_deref() {
            Some("code") => {}
            None | Some("") => return Err(OAuthError::malformed("response_type is required")),
            Some(other) => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
        }

        let pkce = match (request.code_challenge.as_deref(), request.code_challenge_method.as_deref()) {
            (Some(challenge), method) => Some(PkceChallenge::from_params(challenge, method)?),
            (None, Some(_)) => {
                return Err(OAuthError::malformed("code_challenge_method without code_challenge"));
            }
            (None, None) => None,
        };

        Ok(ValidatedRequest {
            client_id: client_id.to_string(),
            redirect_uri,
            scope: request.scope.clone().unwrap_or_default(),
            state: request.state.clone().filter(|s| !s.is_empty()),
            pkce,
        })
    }

    async fn save(&self, session: &SessionHandle) -> Result<(), SessionError> {
        self.sessions.save(session).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to save session");
            e
        })
    }
}

impl std::fmt::Debug for AuthorizationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCoordinator")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

/// `redirect_uri` with `code` and, when present, `state` appended.
fn callback_url(redirect_uri: &str, code: &str, state: Option<&str>) -> OAuthResult<String> {
    let mut url = Url::parse(redirect_uri).map_err(|_| OAuthError::malformed("redirect_uri is not a URL"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}
