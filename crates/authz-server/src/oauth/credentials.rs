//! Username/password checking for the login form and the password grant.

use subtle::{Choice, ConstantTimeEq};

use super::types::UserProfile;
use crate::config::AccountConfig;
use crate::error::{OAuthError, OAuthResult};

/// Resolves login credentials to a user id.
#[async_trait::async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Return the user id for valid credentials, [`OAuthError::InvalidCredentials`] otherwise.
    async fn validate_password(&self, username: &str, password: &str) -> OAuthResult<String>;
}

/// Fixed account list loaded from configuration.
#[derive(Debug, Clone)]
pub struct StaticAccounts {
    accounts: Vec<AccountConfig>,
}

impl StaticAccounts {
    #[must_use]
    pub const fn new(accounts: Vec<AccountConfig>) -> Self {
        Self { accounts }
    }

    /// Profile of a known user.
    #[must_use]
    pub fn profile(&self, user_id: &str) -> Option<&UserProfile> {
        self.accounts
            .iter()
            .find(|a| a.resolved_user_id() == user_id)
            .map(|a| &a.profile)
    }

    fn find(&self, username: &str, password: &str) -> Option<&AccountConfig> {
        // Every account is compared so timing does not reveal which usernames exist.
        let mut found = None;
        for account in &self.accounts {
            let matched: Choice = account.username.as_bytes().ct_eq(username.as_bytes())
                & account.password.as_bytes().ct_eq(password.as_bytes());
            if bool::from(matched) && found.is_none() {
                found = Some(account);
            }
        }
        found
    }
}

#[async_trait::async_trait]
impl CredentialValidator for StaticAccounts {
    async fn validate_password(&self, username: &str, password: &str) -> OAuthResult<String> {
        if username.is_empty() {
            return Err(OAuthError::InvalidCredentials);
        }
        self.find(username, password)
            .map(|a| a.resolved_user_id().to_string())
            .ok_or(OAuthError::InvalidCredentials)
    }
}
