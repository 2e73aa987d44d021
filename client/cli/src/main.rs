use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::RngCore;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;

use api::ApiClient;
use config::Config;

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "Client for the stow object-storage gateway", long_about = None)]
struct Cli {
    /// Gateway URL (overrides the saved configuration)
    #[arg(long, global = true, env = "STOW_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the gateway URL and default container
    Setup {
        /// Gateway URL
        #[arg(long)]
        server: String,
        /// Container used by `put` when none is given
        #[arg(long)]
        container: Option<String>,
    },
    /// Upload a file
    Put {
        path: PathBuf,
        /// Target container ID
        #[arg(long)]
        container: Option<String>,
        /// Wait until the item is placed
        #[arg(long)]
        wait: bool,
    },
    /// Show an item
    Status { id: String },
    /// Download an item
    Get {
        id: String,
        /// Output file (defaults to the item name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Byte range, e.g. 0-1023 or 4096-
        #[arg(long)]
        range: Option<String>,
    },
    /// Cancel an in-progress upload
    Cancel { id: String },
    /// Manage file servers
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
    /// Manage containers
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
    /// Upload a random payload, download it again and compare checksums
    Verify {
        /// Payload size in bytes
        #[arg(long, default_value_t = 1 << 20)]
        size: usize,
        #[arg(long, default_value = "")]
        container: String,
    },
}

#[derive(Subcommand)]
enum BackendCommands {
    /// Register an SSH/SFTP file server
    AddSsh {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        base_path: String,
        #[arg(long)]
        user: String,
        /// Private key file, read by the gateway
        #[arg(long)]
        key_file: String,
        /// Capacity in bytes
        #[arg(long)]
        total_space: i64,
    },
    /// Register an HTTP storage service
    AddApi {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 80)]
        port: u16,
        #[arg(long, default_value = "")]
        endpoint: String,
        #[arg(long, default_value = "")]
        api_version: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "", env = "STOW_API_PASSWORD")]
        password: String,
        #[arg(long)]
        tls: bool,
        #[arg(long)]
        total_space: i64,
    },
    /// Register a directory on the gateway host
    AddLocal {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_path: String,
        #[arg(long)]
        total_space: i64,
    },
    /// Show a file server
    Show { id: String },
    /// List file servers
    List,
}

#[derive(Subcommand)]
enum ContainerCommands {
    /// Create a container
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List containers
    List,
    /// List items in a container
    Items { id: String },
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_TIMEOUT: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stow=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load()?;
    let api = ApiClient::new(&config.server(cli.server.as_deref()));

    match cli.command {
        Commands::Setup { server, container } => {
            config.server_url = Some(server);
            config.default_container = container;
            config.save()?;
            println!("saved {}", Config::config_path()?.display());
        }
        Commands::Put {
            path,
            container,
            wait,
        } => {
            let container = container
                .or_else(|| config.default_container.clone())
                .unwrap_or_default();
            put(&api, &path, &container, wait).await?;
        }
        Commands::Status { id } => {
            let item = api.get_item(&id).await?;
            print_item(&item);
        }
        Commands::Get { id, output, range } => {
            get(&api, &id, output, range.as_deref()).await?;
        }
        Commands::Cancel { id } => {
            let resp = api.cancel_item(&id).await?;
            if resp.cancelled {
                println!("cancellation requested for {}", resp.id);
            } else {
                println!("{} has no upload in progress", resp.id);
            }
        }
        Commands::Backend { command } => backend(&api, command).await?,
        Commands::Container { command } => container(&api, command).await?,
        Commands::Verify { size, container } => verify(&api, size, &container).await?,
    }

    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_item(item: &api::Item) {
    println!("{}", item.id);
    println!("  name:      {}", item.name);
    println!("  size:      {} bytes", item.size);
    println!("  container: {}", item.container_id);
    println!("  status:    {}", item.status);
    println!("  chunks:    {}", item.chunk_count);
    println!("  created:   {}", item.created);
    println!("  modified:  {}", item.modified);
}

async fn put(
    api: &ApiClient,
    path: &std::path::Path,
    container: &str,
    wait: bool,
) -> anyhow::Result<()> {
    let bar = spinner(format!("uploading {}", path.display()));
    let item = api.store_item(path, container).await?;
    bar.finish_and_clear();
    println!("{} {}", item.id, item.status);

    if wait {
        let bar = spinner(format!("placing {}", item.id));
        let item = api.wait_for_item(&item.id, POLL_INTERVAL, POLL_TIMEOUT).await?;
        bar.finish_and_clear();
        print_item(&item);
        if item.status != "ok" {
            anyhow::bail!("item {} ended with status {}", item.id, item.status);
        }
    }
    Ok(())
}

async fn get(
    api: &ApiClient,
    id: &str,
    output: Option<PathBuf>,
    range: Option<&str>,
) -> anyhow::Result<()> {
    let output = match output {
        Some(path) => path,
        None => {
            let item = api.get_item(id).await?;
            std::path::Path::new(&item.name)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&item.id))
        }
    };

    let mut file = tokio::fs::File::create(&output).await?;
    let bar = spinner(format!("downloading {}", id));
    let result = api.download_item(id, range, &mut file).await;
    bar.finish_and_clear();

    match result {
        Ok(done) => {
            println!("{} ({} bytes)", output.display(), done.bytes);
            println!("sha256 {}", done.sha256);
            Ok(())
        }
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&output).await;
            Err(e)
        }
    }
}

async fn backend(api: &ApiClient, command: BackendCommands) -> anyhow::Result<()> {
    let (kind, body) = match command {
        BackendCommands::AddSsh {
            name,
            host,
            port,
            base_path,
            user,
            key_file,
            total_space,
        } => (
            "ssh",
            json!({
                "name": name, "host": host, "port": port, "base_path": base_path,
                "user": user, "key_file": key_file, "total_space": total_space
            }),
        ),
        BackendCommands::AddApi {
            name,
            address,
            port,
            endpoint,
            api_version,
            user,
            password,
            tls,
            total_space,
        } => (
            "api",
            json!({
                "name": name, "address": address, "port": port, "endpoint": endpoint,
                "api_version": api_version, "user": user, "password": password,
                "tls": tls, "total_space": total_space
            }),
        ),
        BackendCommands::AddLocal {
            name,
            base_path,
            total_space,
        } => (
            "local",
            json!({"name": name, "base_path": base_path, "total_space": total_space}),
        ),
        BackendCommands::Show { id } => {
            let backend = api.get_backend(&id).await?;
            println!("{}", serde_json::to_string_pretty(&backend.params)?);
            print_backend(&backend);
            return Ok(());
        }
        BackendCommands::List => {
            let backends = api.list_backends().await?;
            if backends.is_empty() {
                println!("no file servers");
            }
            for backend in &backends {
                print_backend(backend);
            }
            return Ok(());
        }
    };

    let backend = api.add_backend(kind, &body).await?;
    println!("registered {} (status {}, probing)", backend.id, backend.status);
    Ok(())
}

fn print_backend(backend: &api::Backend) {
    println!(
        "{} - {} ({}) {} used {}/{} bytes",
        backend.id,
        backend.name,
        backend.kind,
        backend.status,
        backend.used_space,
        backend.total_space
    );
}

async fn container(api: &ApiClient, command: ContainerCommands) -> anyhow::Result<()> {
    match command {
        ContainerCommands::Create { name, description } => {
            let container = api.create_container(&name, &description).await?;
            println!("{} {}", container.id, container.name);
        }
        ContainerCommands::List => {
            for container in api.list_containers().await? {
                println!(
                    "{} - {} {} ({})",
                    container.id, container.name, container.description, container.created
                );
            }
        }
        ContainerCommands::Items { id } => {
            let items = api.list_container_items(&id).await?;
            if items.is_empty() {
                println!("no items");
            }
            for item in items {
                println!("{} - {} {} bytes [{}]", item.id, item.name, item.size, item.status);
            }
        }
    }
    Ok(())
}

/// Round trip a random payload through the gateway.
async fn verify(api: &ApiClient, size: usize, container: &str) -> anyhow::Result<()> {
    let mut data = vec![0u8; size];
    rand::rng().fill_bytes(&mut data);
    let expected = api::sha256_hex(&data);

    let item = api.store_bytes("verify.bin", data, container).await?;
    println!("uploaded {} ({} bytes)", item.id, item.size);

    let bar = spinner(format!("placing {}", item.id));
    let item = api.wait_for_item(&item.id, POLL_INTERVAL, POLL_TIMEOUT).await?;
    bar.finish_and_clear();
    if item.status != "ok" {
        anyhow::bail!("item {} ended with status {}", item.id, item.status);
    }
    println!("placed in {} chunks", item.chunk_count);

    let mut sink = tokio::io::sink();
    let downloaded = api.download_item(&item.id, None, &mut sink).await?;
    if downloaded.sha256 != expected {
        anyhow::bail!(
            "checksum mismatch: uploaded {}, downloaded {}",
            expected,
            downloaded.sha256
        );
    }
    println!("ok sha256 {}", expected);
    Ok(())
}
