//! Registered client applications.
//!
//! The registry is filled once at startup and read-only afterwards, so it is
//! shared behind an `Arc` without any lock.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use url::Url;

use super::types::Client;
use crate::config::ClientConfig;
use crate::error::{OAuthError, RegistryError};

/// Compared against when the client id is unknown, so both paths do the same work.
const DUMMY_SECRET: &[u8] = b"00000000000000000000000000000000";

/// Immutable set of registered clients.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
}

impl ClientRegistry {
    /// Register clients. Rejects duplicate ids, empty credentials and unparsable domains.
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for client in clients {
            if client.client_id.is_empty() || client.client_secret.is_empty() {
                return Err(RegistryError::EmptyCredentials(client.client_id));
            }
            if Url::parse(&client.redirect_domain).is_err() {
                return Err(RegistryError::InvalidRedirectDomain {
                    client_id: client.client_id,
                    redirect_domain: client.redirect_domain,
                });
            }
            if map.contains_key(&client.client_id) {
                return Err(RegistryError::DuplicateClient(client.client_id));
            }
            map.insert(client.client_id.clone(), client);
        }
        Ok(Self { clients: map })
    }

    /// Build from configuration entries.
    pub fn from_config(configs: &[ClientConfig]) -> Result<Self, RegistryError> {
        Self::new(configs.iter().map(|c| Client {
            client_id: c.client_id.clone(),
            client_secret: c.client_secret.clone(),
            redirect_domain: c.redirect_domain.clone(),
        }))
    }

    /// Look up a client by ID.
    pub fn lookup(&self, client_id: &str) -> Result<&Client, OAuthError> {
        self.clients
            .get(client_id)
            .ok_or_else(|| OAuthError::UnknownClient(client_id.to_string()))
    }

    /// Check a client secret in constant time.
    #[must_use]
    pub fn validate(&self, client_id: &str, client_secret: &str) -> bool {
        match self.clients.get(client_id) {
            Some(client) => client.client_secret.as_bytes().ct_eq(client_secret.as_bytes()).into(),
            None => {
                let _ = DUMMY_SECRET.ct_eq(client_secret.as_bytes());
                false
            }
        }
    }

    /// Check that `redirect_uri` is covered by the client's registered domain.
    #[must_use]
    pub fn validate_redirect(&self, client_id: &str, redirect_uri: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|client| redirect_matches(&client.redirect_domain, redirect_uri))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Parameters the authorization callback sets on the redirect URI.
const RESERVED_CALLBACK_PARAMS: [&str; 2] = ["code", "state"];

/// True iff `candidate` equals `registered`, or extends its path at a segment
/// boundary with the same scheme, host and port.
///
/// Fragments and embedded credentials are never accepted (RFC 6749 §3.1.2), nor is
/// a query that already carries the `code` or `state` parameters the callback appends.
#[must_use]
pub fn redirect_matches(registered: &str, candidate: &str) -> bool {
    let Ok(uri) = Url::parse(candidate) else {
        return candidate == registered;
    };
    if uri.query_pairs().any(|(name, _)| RESERVED_CALLBACK_PARAMS.contains(&name.as_ref())) {
        return false;
    }
    if candidate == registered {
        return true;
    }
    let Ok(base) = Url::parse(registered) else {
        return false;
    };
    if uri.fragment().is_some() || !uri.username().is_empty() || uri.password().is_some() {
        return false;
    }
    if base.scheme() != uri.scheme()
        || base.host_str() != uri.host_str()
        || base.port_or_known_default() != uri.port_or_known_default()
    {
        return false;
    }
    path_has_prefix(base.path(), uri.path())
}

fn path_has_prefix(base: &str, path: &str) -> bool {
    if base.ends_with('/') {
        return path.starts_with(base);
    }
    path == base || path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
}

/// Generate a fresh client id (random v4 UUID) and a URL-safe base64 secret of `secret_bytes` random bytes.
pub fn generate_client_credentials(
    redirect_domain: &str,
    secret_bytes: usize,
) -> anyhow::Result<ClientConfig> {
    anyhow::ensure!(secret_bytes > 0, "secret length must be positive");
    Url::parse(redirect_domain)
        .map_err(|e| anyhow::anyhow!("invalid redirect domain {redirect_domain}: {e}"))?;

    let mut bytes = vec![0u8; secret_bytes];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("failed to read OS randomness for secret: {e}"))?;

    Ok(ClientConfig::new(
        uuid::Uuid::new_v4().to_string(),
        URL_SAFE.encode(&bytes),
        redirect_domain,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str, secret: &str, domain: &str) -> Client {
        Client {
            client_id: id.into(),
            client_secret: secret.into(),
            redirect_domain: domain.into(),
        }
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new([
            client("c1", "s1", "http://cb/"),
            client("grafana_id", "grafana_secret", "http://localhost:3000/login/generic_oauth"),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.lookup("c1").unwrap().redirect_domain, "http://cb/");
        assert!(matches!(registry.lookup("nobody"), Err(OAuthError::UnknownClient(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_validate_secret() {
        let registry = registry();
        assert!(registry.validate("c1", "s1"));
        assert!(!registry.validate("c1", "s2"));
        assert!(!registry.validate("c1", ""));
        assert!(!registry.validate("nobody", "s1"));
    }

    #[test]
    fn test_redirect_exact_and_prefix() {
        let registry = registry();
        assert!(registry.validate_redirect("c1", "http://cb/"));
        assert!(registry.validate_redirect("c1", "http://cb/callback?x=1"));
        assert!(registry.validate_redirect("grafana_id", "http://localhost:3000/login/generic_oauth"));
        assert!(registry.validate_redirect("grafana_id", "http://localhost:3000/login/generic_oauth/done"));
    }

    #[test]
    fn test_redirect_rejections() {
        let registry = registry();
        // Segment boundary
        assert!(!registry.validate_redirect("grafana_id", "http://localhost:3000/login/generic_oauthx"));
        // Other port, host, scheme
        assert!(!registry.validate_redirect("grafana_id", "http://localhost:30001/login/generic_oauth"));
        assert!(!registry.validate_redirect("c1", "http://cb.evil/"));
        assert!(!registry.validate_redirect("c1", "https://cb/"));
        // Fragment and credentials
        assert!(!registry.validate_redirect("c1", "http://cb/#frag"));
        assert!(!registry.validate_redirect("c1", "http://user@cb/"));
        // Callback parameters already present
        assert!(!registry.validate_redirect("c1", "http://cb/?code=evil"));
        assert!(!registry.validate_redirect("c1", "http://cb/next?x=1&state=forged"));
        assert!(!registry.validate_redirect("c1", "http://cb/?sta%74e=forged"));
        // Garbage and unknown client
        assert!(!registry.validate_redirect("c1", "not a url"));
        assert!(!registry.validate_redirect("nobody", "http://cb/"));
    }

    #[test]
    fn test_registration_errors() {
        assert!(matches!(
            ClientRegistry::new([client("a", "s", "http://x/"), client("a", "t", "http://y/")]),
            Err(RegistryError::DuplicateClient(_))
        ));
        assert!(matches!(
            ClientRegistry::new([client("a", "s", "no scheme")]),
            Err(RegistryError::InvalidRedirectDomain { .. })
        ));
        assert!(matches!(
            ClientRegistry::new([client("a", "", "http://x/")]),
            Err(RegistryError::EmptyCredentials(_))
        ));
    }

    #[test]
    fn test_generate_client_credentials() {
        let generated = generate_client_credentials("http://cb/", 32).unwrap();
        assert!(uuid::Uuid::parse_str(&generated.client_id).is_ok());
        // 32 bytes -> 44 chars of padded base64
        assert_eq!(generated.client_secret.len(), 44);
        assert!(!generated.client_secret.contains('+') && !generated.client_secret.contains('/'));

        let other = generate_client_credentials("http://cb/", 32).unwrap();
        assert_ne!(generated.client_secret, other.client_secret);
    }

    #[test]
    fn test_generate_rejects_zero_length() {
        assert!(generate_client_credentials("http://cb/", 0).is_err());
        assert!(generate_client_credentials("nope", 16).is_err());
    }
}
