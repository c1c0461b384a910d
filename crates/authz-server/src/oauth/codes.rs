//! Single-use authorization codes.
//!
//! Every mutation happens under one mutex. Redemption looks up, checks and
//! removes the code inside a single critical section, so of any number of
//! concurrent redemptions of one code at most one succeeds.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::clients::ClientRegistry;
use super::pkce::PkceChallenge;
use super::to_time_delta;
use super::types::{AuthorizationCode, generate_token};
use crate::clock::Clock;
use crate::error::{OAuthError, OAuthResult};

/// Parameters bound into a new code.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub pkce: Option<PkceChallenge>,
}

/// Why a redemption was refused. Logged verbatim, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedeemFailure {
    Unknown,
    Expired,
    Reused,
    ClientMismatch,
    RedirectMismatch,
}

impl RedeemFailure {
    const fn reason(self) -> &'static str {
        match self {
            Self::Unknown => "unknown_code",
            Self::Expired => "expired",
            Self::Reused => "already_redeemed",
            Self::ClientMismatch => "client_mismatch",
            Self::RedirectMismatch => "redirect_mismatch",
        }
    }

    const fn into_error(self) -> OAuthError {
        match self {
            Self::Reused => OAuthError::CodeAlreadyRedeemed,
            _ => OAuthError::InvalidOrExpiredCode,
        }
    }
}

#[derive(Default)]
struct CodeTable {
    live: HashMap<String, AuthorizationCode>,
    /// Redeemed codes, kept until their original expiry so reuse is logged as such.
    redeemed: HashMap<String, DateTime<Utc>>,
}

/// Issues and redeems authorization codes.
pub struct AuthorizationCodeStore {
    table: Mutex<CodeTable>,
    clients: Arc<ClientRegistry>,
    clock: Arc<dyn Clock>,
    lifetime: chrono::Duration,
}

impl AuthorizationCodeStore {
    #[must_use]
    pub fn new(clients: Arc<ClientRegistry>, clock: Arc<dyn Clock>, lifetime: Duration) -> Self {
        Self {
            table: Mutex::new(CodeTable::default()),
            clients,
            clock,
            lifetime: to_time_delta(lifetime),
        }
    }

    /// Mint a code for an authenticated user. The client and redirect are
    /// re-checked against the registry before anything is stored.
    pub async fn issue(&self, grant: CodeGrant) -> OAuthResult<AuthorizationCode> {
        self.clients.lookup(&grant.client_id)?;
        if !self.clients.validate_redirect(&grant.client_id, &grant.redirect_uri) {
            return Err(OAuthError::invalid_redirect(grant.client_id, grant.redirect_uri));
        }
        if grant.user_id.is_empty() {
            return Err(OAuthError::malformed("cannot issue a code without a user"));
        }

        let now = self.clock.now();
        let code = AuthorizationCode {
            code: generate_token(),
            client_id: grant.client_id,
            user_id: grant.user_id,
            redirect_uri: grant.redirect_uri,
            scope: grant.scope,
            pkce: grant.pkce,
            issued_at: now,
            expires_at: now + self.lifetime,
        };

        self.table.lock().await.live.insert(code.code.clone(), code.clone());
        tracing::info!(
            client_id = %code.client_id,
            user_id = %code.user_id,
            pkce = code.pkce.is_some(),
            "Issued authorization code"
        );
        Ok(code)
    }

    /// Exchange a code exactly once.
    ///
    /// Unknown, expired, mismatched and reused codes all return
    /// [`OAuthError::InvalidOrExpiredCode`]; the precise reason is only logged.
    /// A code presented with the wrong client or redirect stays redeemable by
    /// its rightful owner.
    pub async fn redeem(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> OAuthResult<AuthorizationCode> {
        let now = self.clock.now();
        let result = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;
            match table.live.entry(code.to_string()) {
                Entry::Occupied(entry) => {
                    let stored = entry.get();
                    if stored.is_expired(now) {
                        entry.remove();
                        Err(RedeemFailure::Expired)
                    } else if stored.client_id != client_id {
                        Err(RedeemFailure::ClientMismatch)
                    } else if stored.redirect_uri != redirect_uri {
                        Err(RedeemFailure::RedirectMismatch)
                    } else {
                        let (key, redeemed) = entry.remove_entry();
                        table.redeemed.insert(key, redeemed.expires_at);
                        Ok(redeemed)
                    }
                }
                Entry::Vacant(_) if table.redeemed.contains_key(code) => Err(RedeemFailure::Reused),
                Entry::Vacant(_) => Err(RedeemFailure::Unknown),
            }
        };

        match result {
            Ok(redeemed) => {
                tracing::info!(client_id = %client_id, user_id = %redeemed.user_id, "Redeemed authorization code");
                Ok(redeemed)
            }
            Err(failure) => {
                tracing::warn!(client_id = %client_id, reason = failure.reason(), "Rejected authorization code");
                Err(failure.into_error().conceal())
            }
        }
    }

    /// Drop expired codes and stale tombstones. Returns how many entries were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let before = table.live.len() + table.redeemed.len();
        table.live.retain(|_, code| !code.is_expired(now));
        table.redeemed.retain(|_, expires_at| now < *expires_at);
        let removed = before - (table.live.len() + table.redeemed.len());
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired authorization codes");
        }
        removed
    }

    /// Number of codes that can still be redeemed or have not been swept.
    pub async fn live_count(&self) -> usize {
        self.table.lock().await.live.len()
    }
}

impl std::fmt::Debug for AuthorizationCodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeStore")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::oauth::types::Client;

    fn setup() -> (AuthorizationCodeStore, Arc<ManualClock>) {
        let clients = ClientRegistry::new([Client {
            client_id: "c1".into(),
            client_secret: "s1".into(),
            redirect_domain: "http://cb/".into(),
        }])
        .unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = AuthorizationCodeStore::new(
            Arc::new(clients),
            clock.clone(),
            Duration::from_secs(600),
        );
        (store, clock)
    }

    fn grant() -> CodeGrant {
        CodeGrant {
            client_id: "c1".into(),
            user_id: "test".into(),
            redirect_uri: "http://cb/".into(),
            scope: "read".into(),
            pkce: None,
        }
    }

    #[tokio::test]
    async fn test_issue_binds_request() {
        let (store, _) = setup();
        let code = store.issue(grant()).await.unwrap();
        assert_eq!(code.client_id, "c1");
        assert_eq!(code.user_id, "test");
        assert_eq!(code.scope, "read");
        assert_eq!(code.expires_at - code.issued_at, chrono::Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_issue_validates_client_and_redirect() {
        let (store, _) = setup();
        let unknown = CodeGrant { client_id: "nobody".into(), ..grant() };
        assert!(matches!(store.issue(unknown).await, Err(OAuthError::UnknownClient(_))));

        let bad_redirect = CodeGrant { redirect_uri: "http://evil/".into(), ..grant() };
        assert!(matches!(store.issue(bad_redirect).await, Err(OAuthError::InvalidRedirect { .. })));
        assert_eq!(store.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_redeem_once() {
        let (store, _) = setup();
        let code = store.issue(grant()).await.unwrap();

        let redeemed = store.redeem(&code.code, "c1", "http://cb/").await.unwrap();
        assert_eq!(redeemed.user_id, "test");

        let again = store.redeem(&code.code, "c1", "http://cb/").await;
        assert!(matches!(again, Err(OAuthError::InvalidOrExpiredCode)));
    }

    #[tokio::test]
    async fn test_expired_code_rejected_and_removed() {
        let (store, clock) = setup();
        let code = store.issue(grant()).await.unwrap();
        clock.advance(chrono::Duration::seconds(600));

        let result = store.redeem(&code.code, "c1", "http://cb/").await;
        assert!(matches!(result, Err(OAuthError::InvalidOrExpiredCode)));
        assert_eq!(store.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_mismatch_leaves_code_for_owner() {
        let (store, _) = setup();
        let code = store.issue(grant()).await.unwrap();

        assert!(store.redeem(&code.code, "c2", "http://cb/").await.is_err());
        assert!(store.redeem(&code.code, "c1", "http://cb/other").await.is_err());
        assert!(store.redeem(&code.code, "c1", "http://cb/").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let (store, _) = setup();
        assert!(matches!(
            store.redeem("nope", "c1", "http://cb/").await,
            Err(OAuthError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_and_tombstones() {
        let (store, clock) = setup();
        let redeemed = store.issue(grant()).await.unwrap();
        store.redeem(&redeemed.code, "c1", "http://cb/").await.unwrap();
        store.issue(grant()).await.unwrap();

        assert_eq!(store.cleanup_expired().await, 0);
        clock.advance(chrono::Duration::seconds(601));
        assert_eq!(store.cleanup_expired().await, 2);
        assert_eq!(store.live_count().await, 0);
    }

    #[test]
    fn test_only_reuse_maps_to_already_redeemed() {
        assert!(matches!(RedeemFailure::Reused.into_error(), OAuthError::CodeAlreadyRedeemed));
        assert!(matches!(RedeemFailure::ClientMismatch.into_error(), OAuthError::InvalidOrExpiredCode));
    }
}
