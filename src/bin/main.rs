use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use identity_gate::{AuthState, SurrealUserStore, build_resolver, load_config, resolve_config_path};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "identity-gate")]
#[command(about = "Cached bearer-token identity resolution")]
struct Cli {
    /// Path to the JSON config (default: $IDENTITY_GATE_CONFIG, then ./identity-gate.json)
    #[arg(long, global = true, env = "IDENTITY_GATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP endpoints behind the auth middleware
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Create the user table and its unique subject index
    Init,
    /// Load and validate the config, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("identity_gate=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };
    info!("Loading config from {}", path.display());
    let config = load_config(&path)?;

    match cli.command {
        Commands::Serve { bind } => {
            let resolver = build_resolver(&config).await?;
            let state = AuthState::new(resolver, config.http.clone());
            let router = identity_gate::server::build_router(state);
            identity_gate::server::serve(router, &bind).await?;
        }
        Commands::Init => {
            let db = identity_gate::store::create_connection(config.database.clone()).await?;
            let users = SurrealUserStore::new(db, config.users.clone())?;
            users.ensure_schema().await?;
            println!(
                "Schema ready: table `{}` unique on `{}`",
                config.users.table,
                config.users.subject_path()
            );
        }
        Commands::CheckConfig => {
            let mut shown = config.clone();
            let redacted = || Some("<redacted>".to_string());
            if shown.verifier.shared_secret.is_some() {
                shown.verifier.shared_secret = redacted();
            }
            if shown.database.password.is_some() {
                shown.database.password = redacted();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}
