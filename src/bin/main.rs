use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use context_sync::{ServiceConfig, TokenValidator, create_app, spawn_eviction_task};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "context-sync")]
#[command(about = "Stateless patient context synchronization service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand. Flags win over the config file and environment.
#[derive(Args)]
struct ConfigArgs {
    /// JSON config file
    #[arg(long, env = "CONTEXT_SYNC_CONFIG")]
    config: Option<PathBuf>,
    /// JWKS endpoint URL of the identity provider
    #[arg(long)]
    jwks_url: Option<Url>,
    /// Trusted token issuer
    #[arg(long)]
    issuer: Option<String>,
    /// Audience value identifying this service
    #[arg(long)]
    audience: Option<String>,
}

impl ConfigArgs {
    fn resolve(self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::load(self.config.as_deref())?;
        if let Some(url) = self.jwks_url {
            config.auth.jwks_url = Some(url);
        }
        if let Some(issuer) = self.issuer {
            config.auth.issuer = issuer;
        }
        if let Some(audience) = self.audience {
            config.auth.audience = audience;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        #[command(flatten)]
        config: ConfigArgs,
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
        /// Evict contexts idle for longer than this many seconds
        #[arg(long)]
        stale_after_seconds: Option<u64>,
    },
    /// Validate a bearer token and print the verified identity
    ValidateToken {
        #[command(flatten)]
        config: ConfigArgs,
        token: String,
    },
    /// Fetch the key set once and list the usable key ids
    FetchJwks {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("context_sync=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            stale_after_seconds,
        } => {
            let mut config = config.resolve()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(seconds) = stale_after_seconds {
                config.vault.stale_after_seconds = seconds;
            }

            let (app, vault) = create_app(&config)?;
            let eviction = spawn_eviction_task(
                vault,
                config.vault.eviction_interval(),
                config.vault.stale_after(),
            );

            info!(
                "Trusting issuer {} for audience {}",
                config.auth.issuer, config.auth.audience
            );

            let listener = tokio::net::TcpListener::bind(&config.bind).await?;
            info!("Context service listening on http://{}", config.bind);

            let served = axum::serve(listener, app).await;
            eviction.abort();
            served?;
        }
        Commands::ValidateToken { config, token } => {
            let config = config.resolve()?;
            config.validate()?;
            let validator = TokenValidator::from_config(&config.auth)?;

            match validator.validate(token.trim()).await {
                Ok(identity) => {
                    println!("{}", serde_json::to_string_pretty(&identity)?);
                }
                Err(e) => {
                    let kind = if e.is_retryable() {
                        "key source unavailable"
                    } else {
                        "rejected"
                    };
                    println!("Token {}: {}", kind, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::FetchJwks { config } => {
            let config = config.resolve()?;
            config.validate()?;
            let validator = TokenValidator::from_config(&config.auth)?;

            let kids = validator.jwks().refresh_now().await?;
            println!("Fetched {} usable keys:", kids.len());
            for kid in kids {
                println!("  {}", kid);
            }
        }
    }

    Ok(())
}
