//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 6749: Authorization endpoint with login bridge, token endpoint
//! - RFC 6750: Userinfo as a bearer-protected resource
//! - RFC 7009: Token revocation
//! - RFC 8414: OAuth Authorization Server Metadata

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::login::render_login_page;
use crate::config::{GrantType, defaults};
use crate::error::OAuthError;
use crate::oauth::session::PENDING_REQUEST_KEY;
use crate::oauth::types::UserProfile;
use crate::oauth::{AuthorizationRequest, CodeExchange, PasswordGrant, SessionHandle, TokenResponse};
use crate::server::transport::AppState;

// ─── Session plumbing ────────────────────────────────────────────────────────

fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(defaults::SESSION_COOKIE).map(|c| c.value().to_owned())
}

/// Hand a newly created session id to the browser.
fn remember_session(jar: CookieJar, session: &SessionHandle, secure: bool) -> CookieJar {
    if !session.is_new() {
        return jar;
    }
    jar.add(
        Cookie::build((defaults::SESSION_COOKIE, session.id().to_owned()))
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build(),
    )
}

/// Surface an unparsable form as an OAuth error instead of axum's plain-text rejection.
fn parse_form<T>(form: Result<Form<T>, FormRejection>) -> Result<T, OAuthError> {
    form.map(|Form(value)| value)
        .map_err(|rejection| OAuthError::malformed(rejection.body_text()))
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

// ─── Login bridge ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// `GET /login`
pub async fn handle_login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match state.coordinator.start_session(session_id(&jar).as_deref()).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let client_id = pending_client(&session);
    Html(render_login_page(&state.config.login_path, client_id.as_deref(), None)).into_response()
}

/// `POST /login`
pub async fn handle_login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let form = match parse_form(form) {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let mut session = match state.coordinator.start_session(session_id(&jar).as_deref()).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    match state.coordinator.login(&mut session, &form.username, &form.password).await {
        Ok(location) => {
            let jar = remember_session(jar, &session, state.config.secure_cookies);
            (jar, redirect(&location)).into_response()
        }
        Err(OAuthError::InvalidCredentials) => {
            let client_id = pending_client(&session);
            let page = render_login_page(
                &state.config.login_path,
                client_id.as_deref(),
                Some("Invalid username or password"),
            );
            (StatusCode::UNAUTHORIZED, Html(page)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `ANY /auth`
///
/// Bounces a logged-in browser back to the authorization endpoint.
pub async fn handle_resume(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match state.coordinator.start_session(session_id(&jar).as_deref()).await {
        Ok(session) => redirect(state.coordinator.resume(&session)),
        Err(e) => e.into_response(),
    }
}

fn pending_client(session: &SessionHandle) -> Option<String> {
    session
        .get::<AuthorizationRequest>(PENDING_REQUEST_KEY)
        .ok()
        .flatten()
        .and_then(|request| request.client_id)
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `ANY /oauth/authorize`
///
/// Parameters come from the query string on GET and the form body on POST.
pub async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Result<Form<AuthorizationRequest>, FormRejection>,
) -> Response {
    let request = match parse_form(request) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let mut session = match state.coordinator.start_session(session_id(&jar).as_deref()).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    match state.coordinator.authorize(&mut session, request).await {
        Ok(outcome) => {
            let jar = remember_session(jar, &session, state.config.secure_cookies);
            (jar, redirect(outcome.location())).into_response()
        }
        Err(e) => e.at_authorization_endpoint().into_response(),
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

/// `ANY /oauth/token`
///
/// Exchange an authorization code or resource-owner credentials for a token.
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let form = match parse_form(form) {
        Ok(form) => form,
        Err(e) => return no_store(e.into_response()),
    };
    match issue_token(&state, &headers, form).await {
        Ok(body) => no_store(Json(body).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

async fn issue_token(
    state: &AppState,
    headers: &HeaderMap,
    form: TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let grant = form
        .grant_type
        .as_deref()
        .filter(|g| !g.is_empty())
        .ok_or_else(|| OAuthError::malformed("grant_type is required"))?
        .parse::<GrantType>()?;
    if !state.config.allows_grant(grant) {
        return Err(OAuthError::UnauthorizedClient(grant.to_string()));
    }

    let (client_id, client_secret) = client_credentials(headers, form.client_id, form.client_secret)?;

    let token = match grant {
        GrantType::AuthorizationCode => {
            state
                .tokens
                .issue_from_code(CodeExchange {
                    code: form.code.unwrap_or_default(),
                    client_id,
                    client_secret,
                    redirect_uri: form.redirect_uri.filter(|uri| !uri.is_empty()),
                    code_verifier: form.code_verifier,
                })
                .await?
        }
        GrantType::Password => {
            let (Some(username), Some(password)) = (form.username, form.password) else {
                return Err(OAuthError::malformed("username and password are required"));
            };
            state
                .tokens
                .issue_from_password(PasswordGrant {
                    client_id,
                    client_secret: client_secret.unwrap_or_default(),
                    username,
                    password,
                    scope: form.scope,
                })
                .await?
        }
    };

    Ok(state.tokens.response(&token))
}

/// Client credentials from HTTP Basic or the form body (RFC 6749 §2.3.1).
fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<String>,
    form_secret: Option<String>,
) -> Result<(String, Option<String>), OAuthError> {
    if let Some((id, secret)) = basic_credentials(headers)? {
        if form_id.as_deref().is_some_and(|form_id| form_id != id) {
            return Err(OAuthError::malformed("client_id in body does not match Authorization header"));
        }
        return Ok((id, Some(secret)));
    }
    let client_id = form_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::malformed("client_id is required"))?;
    Ok((client_id, form_secret))
}

fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let Some((scheme, encoded)) = value.to_str().ok().and_then(|v| v.trim().split_once(' ')) else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| OAuthError::malformed("malformed Basic credentials"))?;
    let (id, secret) = decoded
        .split_once(':')
        .ok_or_else(|| OAuthError::malformed("malformed Basic credentials"))?;
    Ok(Some((form_decode(id), form_decode(secret))))
}

/// Undo the `application/x-www-form-urlencoded` step clients apply before Basic encoding.
///
/// Bare `&` and `=` are kept literally so unencoded secrets still compare equal.
fn form_decode(value: &str) -> String {
    let escaped = value.replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

/// Token responses must not be cached (RFC 6749 §5.1).
fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// ─── Userinfo ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct UserInfo<'a> {
    sub: &'a str,
    client_id: &'a str,
    scope: &'a str,
    #[serde(flatten)]
    profile: UserProfile,
}

/// `GET /oauth/userinfo`
pub async fn handle_userinfo(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let claims = match state.bearer.authenticate(authorization).await {
        Ok(claims) => claims,
        Err(rejection) => return rejection.into_response(),
    };

    let profile = state.accounts.profile(&claims.user_id).cloned().unwrap_or_default();
    Json(UserInfo {
        sub: &claims.user_id,
        client_id: &claims.client_id,
        scope: &claims.scope,
        profile,
    })
    .into_response()
}

// ─── RFC 7009: Token Revocation ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// `POST /oauth/revoke`
///
/// Responds 200 for any token once the client authenticates, revoked or not.
pub async fn handle_revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let form = match parse_form(form) {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    match revoke_token(&state, &headers, form).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn revoke_token(state: &AppState, headers: &HeaderMap, form: RevokeRequest) -> Result<(), OAuthError> {
    let (client_id, secret) = client_credentials(headers, form.client_id, form.client_secret)?;
    if !state.clients.validate(&client_id, secret.as_deref().unwrap_or_default()) {
        tracing::warn!(client_id = %client_id, "Client authentication failed");
        return Err(OAuthError::ClientAuthenticationFailed(client_id));
    }
    let token = form
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::malformed("token is required"))?;
    state.tokens.revoke(&token, &client_id).await;
    Ok(())
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
///
/// Describes the OAuth endpoints and capabilities.
pub async fn handle_auth_server_metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    let grants: Vec<&str> = config.allowed_grant_types.iter().map(|g| g.as_str()).collect();
    Json(serde_json::json!({
        "issuer": config.base_url,
        "authorization_endpoint": config.url_for(&config.authorize_path),
        "token_endpoint": config.url_for("/oauth/token"),
        "userinfo_endpoint": config.url_for("/oauth/userinfo"),
        "revocation_endpoint": config.url_for("/oauth/revoke"),
        "response_types_supported": ["code"],
        "grant_types_supported": grants,
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["S256", "plain"]
    }))
}
