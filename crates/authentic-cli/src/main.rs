//! Authentic CLI - drive an auth server and the services that trust it.
//!
//! This is the entry point for the `authentic` binary.

mod commands;

use std::sync::Arc;
use std::time::Duration;

use authentic_client::{
    AuthenticClient, ClientConfig, EventKind, OriginResolver, ReqwestTransport, SessionEvent,
    StaleTokenPolicy,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

use commands::Command;

/// Authentic CLI - JWT-authenticated requests from the command line.
#[derive(Parser, Debug)]
#[command(name = "authentic")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Auth server URL.
    #[arg(long, env = "AUTHENTIC_SERVER")]
    server: String,

    /// Path prefix of the auth endpoints.
    #[arg(long, env = "AUTHENTIC_PREFIX", default_value = "/auth")]
    prefix: String,

    /// Account email.
    #[arg(long, env = "AUTHENTIC_EMAIL")]
    email: Option<String>,

    /// Account password, used to log in when no valid token is available.
    #[arg(long, env = "AUTHENTIC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Token from a previous login.
    #[arg(long, env = "AUTHENTIC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Fetch the public key from this URL instead of `<server><prefix>/public-key`.
    #[arg(long, env = "AUTHENTIC_PUB_KEY_URL")]
    pub_key_url: Option<String>,

    /// Seconds a fetched public key stays valid.
    #[arg(long, default_value = "3600")]
    key_ttl: u64,

    /// Origin that relative request URLs (`/path`) are joined onto.
    #[arg(long, env = "AUTHENTIC_ORIGIN")]
    origin: Option<Url>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Send an invalid token anyway when no password is available.
    #[arg(long, default_value = "false")]
    attach_stale: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.server.clone());
        config.prefix.clone_from(&self.prefix);
        config.email.clone_from(&self.email);
        config.password.clone_from(&self.password);
        config.auth_token.clone_from(&self.token);
        config.pub_key_url.clone_from(&self.pub_key_url);
        config.cache_duration_ms = self.key_ttl.saturating_mul(1000);
        if self.attach_stale {
            config.stale_token_policy = StaleTokenPolicy::AttachStale;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let transport = ReqwestTransport::new(args.timeout.map(Duration::from_secs))?;
    let mut builder = AuthenticClient::builder(args.config()).transport(Arc::new(transport));
    if let Some(origin) = &args.origin {
        builder = builder.url_resolver(Arc::new(OriginResolver::new(origin.clone())));
    }
    let client = builder.build()?;

    let _token_updates = client.subscribe(EventKind::AuthToken, |event| {
        let present = matches!(event, SessionEvent::AuthToken(Some(_)));
        tracing::debug!(present, "Session token changed");
    });

    commands::run(&client, args.command).await
}
