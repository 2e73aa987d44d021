//! Stow chunked object-storage gateway (stowd)

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod error;
mod storage;

use config::Config;

#[derive(Parser)]
#[command(name = "stowd")]
#[command(about = "Chunked object-storage gateway daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway in the foreground
    Serve,
    /// Run database migrations
    Migrate,
    /// List registered file servers
    Backends {
        /// Probe every backend again and record the result
        #[arg(long)]
        probe: bool,
    },
    /// Show item and backend statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stowd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::Migrate => run_migrations(&config).await?,
        Commands::Backends { probe } => list_backends(&config, probe).await?,
        Commands::Stats => show_stats(&config).await?,
    }

    Ok(())
}

async fn open_database(config: &Config) -> anyhow::Result<db::DbPool> {
    if let Some(path) = config
        .database_url
        .strip_prefix("sqlite://")
        .map(std::path::Path::new)
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    db::create_pool(&config.database_url).await
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let db_pool = open_database(&config).await?;

    // Auto-run migrations on startup (idempotent)
    tracing::info!("checking database migrations...");
    db::run_migrations(&db_pool).await?;

    std::fs::create_dir_all(&config.spool_path)?;

    let rest_addr = format!("0.0.0.0:{}", config.rest_port).parse()?;
    let app_state = api::AppState::new(db_pool, config.clone());

    tracing::info!(
        server = %config.server_name,
        part_count = config.default_part_count,
        "starting gateway"
    );
    api::rest::serve(rest_addr, app_state).await
}

async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    println!("running migrations...");
    let pool = open_database(config).await?;
    db::run_migrations(&pool).await?;
    println!("migrations complete");
    Ok(())
}

async fn list_backends(config: &Config, probe: bool) -> anyhow::Result<()> {
    let pool = open_database(config).await?;
    let registry =
        storage::BackendRegistry::new(pool, config.probe_timeout(), config.upload_timeout());
    let backends = registry.list().await?;

    if backends.is_empty() {
        println!("no file servers");
        return Ok(());
    }

    for backend in backends {
        let status = if probe {
            registry.probe(&backend).await
        } else {
            backend.status
        };
        println!(
            "{} - {} ({}) {:?} used {}/{} bytes",
            backend.id, backend.name, backend.kind, status, backend.used_space, backend.total_space
        );
    }

    Ok(())
}

async fn show_stats(config: &Config) -> anyhow::Result<()> {
    let pool = open_database(config).await?;
    let stats = db::get_stats(&pool).await?;

    println!("items:        {}", stats.total_items);
    println!("chunks:       {}", stats.total_chunks);
    println!("file servers: {}", stats.total_backends);
    println!("stored bytes: {}", stats.total_item_bytes);
    Ok(())
}
