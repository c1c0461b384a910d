//! Print a fresh client id and secret for the registry file.

use clap::Parser;

use authz_server::oauth::clients::generate_client_credentials;

#[derive(Parser, Debug)]
#[command(name = "generate-client")]
#[command(about = "Generate client credentials for authz-server")]
#[command(version)]
struct Cli {
    /// Number of random bytes in the secret
    #[arg(long, default_value_t = 32)]
    secret_bytes: usize,

    /// Redirect domain to register the client with
    #[arg(long, default_value = "http://localhost:3000/")]
    redirect_domain: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = generate_client_credentials(&cli.redirect_domain, cli.secret_bytes)?;

    println!("Client ID: {}", client.client_id);
    println!("Client Secret: {}", client.client_secret);
    println!();
    println!("{}", serde_json::to_string_pretty(&client)?);
    Ok(())
}
