//! OAuth 2.0 Authorization Server
//!
//! A small authorization server with a browser login bridge: an `/authorize`
//! request from an anonymous browser is parked in its session, the user logs
//! in, and the flow resumes to issue a single-use authorization code.
//!
//! # Features
//!
//! - **Grants**: authorization code (with optional PKCE) and resource owner password
//! - **Single-use codes**: redemption is one atomic check-and-delete
//! - **Opaque tokens**: bearer tokens resolve to claims through the token store
//! - **Lazy expiry**: expired codes and tokens are rejected on read and swept in the background
//!
//! # Example
//!
//! ```no_run
//! use authz_server::{config::Config, server::AuthServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = AuthServer::new(Config::default())?;
//!     server.run_http(9096).await
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod oauth;
pub mod server;

pub use config::Config;
pub use error::{OAuthError, OAuthResult, RegistryError, SessionError};
