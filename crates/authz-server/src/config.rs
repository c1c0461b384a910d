//! Configuration for the authorization server.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::OAuthError;
use crate::oauth::types::UserProfile;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Authorization code lifetime (10 minutes).
    pub const CODE_LIFETIME: Duration = Duration::from_secs(600);

    /// Access token lifetime (2 hours).
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(7200);

    /// Idle lifetime of a browser session (2 hours).
    pub const SESSION_TTL: Duration = Duration::from_secs(7200);

    /// Maximum live sessions held in memory.
    pub const SESSION_CAPACITY: u64 = 10_000;

    /// Interval of the background sweep of expired codes and tokens.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// Upper bound accepted for any configured lifetime.
    pub const MAX_LIFETIME: Duration = Duration::from_secs(365 * 24 * 3600);

    /// Login form path.
    pub const LOGIN_PATH: &str = "/login";

    /// Path the login redirects to once the user is authenticated.
    pub const RESUME_PATH: &str = "/auth";

    /// Authorization endpoint path.
    pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

    /// Session cookie name.
    pub const SESSION_COOKIE: &str = "authz_session";

    /// Listen port.
    pub const PORT: u16 = 9096;

    /// Public base URL.
    pub const BASE_URL: &str = "http://localhost:9096";
}

/// Grant types the token endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// RFC 6749 §4.1
    AuthorizationCode,
    /// RFC 6749 §4.3
    Password,
}

impl GrantType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
        }
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "password" => Ok(Self::Password),
            other => Err(OAuthError::UnsupportedGrantType(other.to_string())),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client as written in the registry file.
#[derive(Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_domain: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_domain: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_domain: redirect_domain.into(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("redirect_domain", &self.redirect_domain)
            .finish()
    }
}

/// A login account as written in the registry file.
#[derive(Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    /// Stable user id; defaults to the username.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub profile: UserProfile,
}

impl AccountConfig {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            user_id: None,
            profile: UserProfile::default(),
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    /// The id tokens are issued for.
    #[must_use]
    pub fn resolved_user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.username)
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("user_id", &self.resolved_user_id())
            .finish()
    }
}

/// On-disk registry: `{"clients": [...], "accounts": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl RegistryFile {
    /// Read and parse a registry file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading registry file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing registry file {}", path.display()))
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public base URL used in the metadata document.
    pub base_url: String,

    /// Authorization code lifetime.
    pub code_lifetime: Duration,

    /// Access token lifetime.
    pub access_token_lifetime: Duration,

    /// Mint a refresh token alongside each access token.
    pub issue_refresh_tokens: bool,

    /// Idle lifetime of a browser session.
    pub session_ttl: Duration,

    /// Maximum live sessions.
    pub session_capacity: u64,

    /// Background sweep interval.
    pub cleanup_interval: Duration,

    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,

    /// Grant types accepted by the token endpoint.
    pub allowed_grant_types: Vec<GrantType>,

    /// Login form path.
    pub login_path: String,

    /// Post-login resume path.
    pub resume_path: String,

    /// Authorization endpoint path.
    pub authorize_path: String,

    /// Registered clients.
    pub clients: Vec<ClientConfig>,

    /// Login accounts.
    pub accounts: Vec<AccountConfig>,
}

impl Config {
    /// Create a configuration with the built-in demo clients and test account.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            code_lifetime: defaults::CODE_LIFETIME,
            access_token_lifetime: defaults::ACCESS_TOKEN_LIFETIME,
            issue_refresh_tokens: false,
            session_ttl: defaults::SESSION_TTL,
            session_capacity: defaults::SESSION_CAPACITY,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
            secure_cookies: false,
            allowed_grant_types: vec![GrantType::AuthorizationCode, GrantType::Password],
            login_path: defaults::LOGIN_PATH.to_string(),
            resume_path: defaults::RESUME_PATH.to_string(),
            authorize_path: defaults::AUTHORIZE_PATH.to_string(),
            clients: demo_clients(),
            accounts: vec![test_account()],
        }
    }

    /// Create a test configuration: client `c1`/`s1` at `http://cb/` and account `test`/`test`.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            clients: vec![ClientConfig::new("c1", "s1", "http://cb/")],
            ..Self::new("http://authz.test")
        }
    }

    /// Replace clients and accounts with those from a registry file.
    ///
    /// Empty sections in the file keep the current values.
    pub fn with_registry_file(mut self, path: &Path) -> anyhow::Result<Self> {
        let file = RegistryFile::load(path)?;
        if !file.clients.is_empty() {
            self.clients = file.clients;
        }
        if !file.accounts.is_empty() {
            self.accounts = file.accounts;
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_clients(mut self, clients: Vec<ClientConfig>) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub fn with_accounts(mut self, accounts: Vec<AccountConfig>) -> Self {
        self.accounts = accounts;
        self
    }

    #[must_use]
    pub const fn with_code_lifetime(mut self, lifetime: Duration) -> Self {
        self.code_lifetime = lifetime;
        self
    }

    #[must_use]
    pub const fn with_access_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.access_token_lifetime = lifetime;
        self
    }

    #[must_use]
    pub const fn with_refresh_tokens(mut self, enabled: bool) -> Self {
        self.issue_refresh_tokens = enabled;
        self
    }

    #[must_use]
    pub const fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_allowed_grant_types(mut self, grants: Vec<GrantType>) -> Self {
        self.allowed_grant_types = grants;
        self
    }

    /// Whether the token endpoint accepts this grant.
    #[must_use]
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant)
    }

    /// Absolute URL for a server path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check the configuration for values the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, lifetime) in [
            ("code lifetime", self.code_lifetime),
            ("access token lifetime", self.access_token_lifetime),
            ("session ttl", self.session_ttl),
        ] {
            anyhow::ensure!(!lifetime.is_zero(), "{name} must be positive");
            anyhow::ensure!(
                lifetime <= defaults::MAX_LIFETIME,
                "{name} exceeds {:?}",
                defaults::MAX_LIFETIME
            );
        }
        anyhow::ensure!(!self.cleanup_interval.is_zero(), "cleanup interval must be positive");
        for path in [&self.login_path, &self.resume_path, &self.authorize_path] {
            anyhow::ensure!(path.starts_with('/'), "path {path} must start with '/'");
        }
        anyhow::ensure!(!self.accounts.is_empty(), "at least one login account is required");
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(defaults::BASE_URL)
    }
}

fn demo_clients() -> Vec<ClientConfig> {
    vec![
        ClientConfig::new("grafana_id", "grafana_secret", "http://localhost:3000/login/generic_oauth"),
        ClientConfig::new("demo_client_id", "demo_client_secret", "http://localhost:9094/oauth2"),
    ]
}

fn test_account() -> AccountConfig {
    AccountConfig::new("test", "test").with_profile(UserProfile {
        name: Some("Test User".to_string()),
        login: Some("test".to_string()),
        email: Some("test@example.com".to_string()),
        role: Some("Admin".to_string()),
    })
}
