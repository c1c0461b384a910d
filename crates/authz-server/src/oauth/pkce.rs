//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements the S256 and plain code challenge methods per RFC 7636.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::OAuthError;

/// Code challenge transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    S256,
    Plain,
}

impl FromStr for PkceMethod {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            other => Err(OAuthError::malformed(format!(
                "code_challenge_method must be 'S256' or 'plain', got '{other}'"
            ))),
        }
    }
}

/// A challenge bound to an authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: PkceMethod,
}

impl PkceChallenge {
    /// Build from the raw authorize parameters. The method defaults to `plain` (RFC 7636 §4.3).
    pub fn from_params(challenge: &str, method: Option<&str>) -> Result<Self, OAuthError> {
        if challenge.is_empty() {
            return Err(OAuthError::malformed("code_challenge is empty"));
        }
        let method = method.map_or(Ok(PkceMethod::Plain), |m| m.parse::<PkceMethod>())?;
        Ok(Self { challenge: challenge.to_string(), method })
    }

    /// Check a verifier presented at the token endpoint.
    #[must_use]
    pub fn verify(&self, code_verifier: &str) -> bool {
        match self.method {
            PkceMethod::S256 => verify_s256(code_verifier, &self.challenge),
            PkceMethod::Plain => constant_time_eq(code_verifier, &self.challenge),
        }
    }
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored challenge.
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let hash = Sha256::digest(code_verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(hash);
    constant_time_eq(&computed, code_challenge)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        // RFC 7636 Appendix B test vector
        assert!(verify_s256(RFC_VERIFIER, RFC_CHALLENGE));
    }

    #[test]
    fn test_s256_invalid_verifier() {
        assert!(!verify_s256("wrong-verifier", RFC_CHALLENGE));
    }

    #[test]
    fn test_plain_method() {
        let challenge = PkceChallenge::from_params("same-string", Some("plain")).unwrap();
        assert!(challenge.verify("same-string"));
        assert!(!challenge.verify("other-string"));
    }

    #[test]
    fn test_method_defaults_to_plain() {
        let challenge = PkceChallenge::from_params("abc", None).unwrap();
        assert_eq!(challenge.method, PkceMethod::Plain);
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(matches!(
            PkceChallenge::from_params("abc", Some("S512")),
            Err(OAuthError::MalformedRequest(_))
        ));
        assert!(PkceChallenge::from_params("", Some("S256")).is_err());
    }

    #[test]
    fn test_s256_challenge_object() {
        let challenge = PkceChallenge::from_params(RFC_CHALLENGE, Some("S256")).unwrap();
        assert!(challenge.verify(RFC_VERIFIER));
        assert!(!challenge.verify(RFC_CHALLENGE));
    }
}
