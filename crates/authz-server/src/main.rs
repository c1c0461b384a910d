//! OAuth 2.0 authorization server - Entry Point

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use authz_server::config::{Config, GrantType, defaults};
use authz_server::server::AuthServer;

#[derive(Parser, Debug)]
#[command(name = "authz-server")]
#[command(about = "OAuth 2.0 authorization server with browser login")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value_t = defaults::PORT, env = "PORT")]
    port: u16,

    /// Public base URL announced in the metadata document
    #[arg(long, default_value = defaults::BASE_URL, env = "BASE_URL")]
    base_url: String,

    /// JSON file with clients and accounts; the built-in demo registry is used otherwise
    #[arg(long, env = "AUTHZ_REGISTRY_FILE")]
    registry_file: Option<PathBuf>,

    /// Authorization code lifetime in seconds
    #[arg(long, default_value_t = defaults::CODE_LIFETIME.as_secs(), env = "AUTHZ_CODE_LIFETIME")]
    code_lifetime: u64,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = defaults::ACCESS_TOKEN_LIFETIME.as_secs(), env = "AUTHZ_TOKEN_LIFETIME")]
    token_lifetime: u64,

    /// Mint refresh tokens alongside access tokens
    #[arg(long, env = "AUTHZ_REFRESH_TOKENS")]
    refresh_tokens: bool,

    /// Disable the resource owner password grant
    #[arg(long, env = "AUTHZ_DISABLE_PASSWORD_GRANT")]
    disable_password_grant: bool,

    /// Mark the session cookie Secure (serve over HTTPS)
    #[arg(long, env = "AUTHZ_SECURE_COOKIES")]
    secure_cookies: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::new(cli.base_url.clone())
        .with_code_lifetime(Duration::from_secs(cli.code_lifetime))
        .with_access_token_lifetime(Duration::from_secs(cli.token_lifetime))
        .with_refresh_tokens(cli.refresh_tokens)
        .with_secure_cookies(cli.secure_cookies);

    if cli.disable_password_grant {
        config = config.with_allowed_grant_types(vec![GrantType::AuthorizationCode]);
    }
    if let Some(path) = &cli.registry_file {
        config = config.with_registry_file(path)?;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting authorization server");

    let config = build_config(&cli)?;
    tracing::info!(
        clients = config.clients.len(),
        grants = ?config.allowed_grant_types,
        refresh_tokens = config.issue_refresh_tokens,
        "Configuration loaded"
    );

    let server = AuthServer::new(config)?;
    server.run_http(cli.port).await?;

    Ok(())
}
