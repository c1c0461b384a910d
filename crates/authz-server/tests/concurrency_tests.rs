//! Concurrent redemption and validation on the multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::assert_ok;

use authz_server::clock::SystemClock;
use authz_server::config::AccountConfig;
use authz_server::error::OAuthError;
use authz_server::oauth::codes::{AuthorizationCodeStore, CodeGrant};
use authz_server::oauth::tokens::{CodeExchange, TokenStore};
use authz_server::oauth::types::Client;
use authz_server::oauth::{ClientRegistry, StaticAccounts};

const CONTENDERS: usize = 32;

fn stores() -> (Arc<AuthorizationCodeStore>, Arc<TokenStore>) {
    let clients = Arc::new(
        ClientRegistry::new([Client {
            client_id: "c1".into(),
            client_secret: "s1".into(),
            redirect_domain: "http://cb/".into(),
        }])
        .unwrap(),
    );
    let clock = Arc::new(SystemClock);
    let codes = Arc::new(AuthorizationCodeStore::new(clients.clone(), clock.clone(), Duration::from_secs(600)));
    let tokens = Arc::new(TokenStore::new(
        codes.clone(),
        clients,
        Arc::new(StaticAccounts::new(vec![AccountConfig::new("test", "test")])),
        clock,
        Duration::from_secs(7200),
    ));
    (codes, tokens)
}

async fn issue(codes: &AuthorizationCodeStore) -> String {
    codes
        .issue(CodeGrant {
            client_id: "c1".into(),
            user_id: "test".into(),
            redirect_uri: "http://cb/".into(),
            scope: String::new(),
            pkce: None,
        })
        .await
        .unwrap()
        .code
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemption_yields_one_success() {
    let (codes, _) = stores();
    let code = issue(&codes).await;

    let handles = (0..CONTENDERS).map(|_| {
        let codes = Arc::clone(&codes);
        let code = code.clone();
        tokio::spawn(async move { codes.redeem(&code, "c1", "http://cb/").await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, OAuthError::InvalidOrExpiredCode))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_token_exchange_yields_one_token() {
    let (codes, tokens) = stores();
    let code = issue(&codes).await;

    let handles = (0..CONTENDERS).map(|_| {
        let tokens = Arc::clone(&tokens);
        let code = code.clone();
        tokio::spawn(async move {
            tokens
                .issue_from_code(CodeExchange {
                    code,
                    client_id: "c1".into(),
                    client_secret: Some("s1".into()),
                    redirect_uri: Some("http://cb/".into()),
                    code_verifier: None,
                })
                .await
        })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(tokens.token_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_codes_redeem_in_parallel() {
    let (codes, _) = stores();
    let mut issued = Vec::new();
    for _ in 0..CONTENDERS {
        issued.push(issue(&codes).await);
    }

    let handles = issued.into_iter().map(|code| {
        let codes = Arc::clone(&codes);
        tokio::spawn(async move { codes.redeem(&code, "c1", "http://cb/").await })
    });
    for result in join_all(handles).await {
        assert_ok!(result.unwrap());
    }
    assert_eq!(codes.live_count().await, 0);
}
