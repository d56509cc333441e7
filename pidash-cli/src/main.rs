use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pidash_core::data::SqliteStore;
use pidash_core::MetricKind;
use pidash_service::{AppContext, DashboardConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pidash", about = "Pi trading dashboard with layered data fallback")]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API until Ctrl-C.
    Serve,

    /// Resolve one metric through the fallback chain and print it as JSON.
    Resolve {
        /// Metric name (e.g. portfolio, equity-curve, ml_model).
        metric: String,
    },

    /// Print source reachability, export age and cache statistics.
    Status,

    /// Validate the configuration and print the effective settings.
    CheckConfig {
        /// Print JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },

    /// Create the local SQLite schema if it does not exist.
    InitDb,

    /// Print the hex SHA-256 of a password for `server.password_hash`.
    HashPassword { password: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::HashPassword { password } = &cli.command {
        println!("{}", pidash_api::auth::hash_password(password));
        return Ok(());
    }

    let config = DashboardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    pidash_service::logging::init(&config.logging);

    match cli.command {
        Commands::Serve => run_serve(config),
        Commands::Resolve { metric } => run_resolve(config, &metric),
        Commands::Status => run_status(config),
        Commands::CheckConfig { json } => run_check_config(config, json),
        Commands::InitDb => run_init_db(&config),
        Commands::HashPassword { .. } => Ok(()),
    }
}

fn run_serve(config: DashboardConfig) -> Result<()> {
    let ctx = Arc::new(AppContext::from_config(config)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(pidash_api::serve(Arc::clone(&ctx)));
    // The blocking HTTP client must not be dropped inside the runtime.
    drop(runtime);
    drop(ctx);
    result
}

fn run_resolve(config: DashboardConfig, metric: &str) -> Result<()> {
    let metric: MetricKind = metric.parse().map_err(anyhow::Error::msg)?;
    let ctx = AppContext::from_config(config)?;
    let payload = ctx.resolver.resolve(metric);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_status(config: DashboardConfig) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    println!("{}", serde_json::to_string_pretty(&ctx.resolver.status())?);
    Ok(())
}

fn run_check_config(mut config: DashboardConfig, json: bool) -> Result<()> {
    if !config.server.password_hash.is_empty() {
        config.server.password_hash = "<redacted>".into();
    }
    let rendered = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        toml::to_string_pretty(&config)?
    };
    println!("{rendered}");
    eprintln!("configuration OK");
    Ok(())
}

fn run_init_db(config: &DashboardConfig) -> Result<()> {
    let store = SqliteStore::new(&config.data.database_path);
    store
        .init_schema()
        .with_context(|| format!("initializing {}", store.path().display()))?;
    info!(path = %store.path().display(), "database schema ready");
    println!("database ready at {}", store.path().display());
    Ok(())
}
