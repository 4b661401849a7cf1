use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::credentials::{CredentialProvider, StaticCredentialProvider};
use server::network::Server;
use server::orchestrator::LocalOrchestrator;
use server::session::{SessionMetadata, PROPERTY_WORLD_MAP};
use server::store::{JsonFileStore, KeyValueStore, MemoryStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "1935")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// World identifier used to scope stored player data
    #[clap(short, long, default_value = "world-1")]
    world_id: String,
    /// World map to load
    #[clap(long)]
    world_map: Option<String>,
    /// Session identifier reported in logs
    #[clap(long, default_value = "local-session")]
    session_id: String,
    /// Maximum simultaneous players
    #[clap(short, long, default_value = "16")]
    max_players: usize,
    /// Prefix for persistence keys, usually the hosting region
    #[clap(long, default_value = "local")]
    location: String,
    /// Extra session property, repeatable
    #[clap(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,
    /// Keep player data in JSON files under this directory instead of memory
    #[clap(long)]
    store_dir: Option<PathBuf>,
    /// Seconds between termination flag checks
    #[clap(long, default_value = "5")]
    termination_poll_secs: u64,
    /// Seconds without clients before the listener is recreated
    #[clap(long, default_value = "600")]
    listener_refresh_secs: u64,
    /// Hours before the process recycles itself
    #[clap(long, default_value = "24")]
    max_uptime_hours: u64,
    /// Lifetime of issued store credentials, in seconds
    #[clap(long, default_value = "1805")]
    credential_lifetime_secs: u64,
    /// Accept connections even when the ticket check fails
    #[clap(long)]
    skip_ticket_validation: bool,
    /// Disconnect clients that send input before spawning
    #[clap(long)]
    strict_spawn_order: bool,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(ServerConfig {
            bind_addr,
            tick_rate: self.tick_rate,
            location: self.location.clone(),
            termination_poll_interval: Duration::from_secs(self.termination_poll_secs),
            listener_refresh_interval: Duration::from_secs(self.listener_refresh_secs),
            max_uptime: Duration::from_secs(self.max_uptime_hours * 60 * 60),
            skip_ticket_validation: self.skip_ticket_validation,
            lenient_input_recovery: !self.strict_spawn_order,
            ..ServerConfig::default()
        })
    }

    fn session_metadata(&self) -> SessionMetadata {
        let mut metadata =
            SessionMetadata::new(self.session_id.as_str(), self.world_id.as_str(), self.max_players);
        for (key, value) in &self.properties {
            metadata = metadata.with_property(key.as_str(), value.as_str());
        }
        if let Some(map) = &self.world_map {
            metadata = metadata.with_property(PROPERTY_WORLD_MAP, map.as_str());
        }
        metadata
    }
}

/// Main-method of the application.
/// Parses command-line arguments, starts the server and activates a local
/// session right away.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.server_config()?;

    let store: Arc<dyn KeyValueStore> = match &args.store_dir {
        Some(dir) => {
            info!("Storing player data under {}", dir.display());
            Arc::new(JsonFileStore::open(dir).await?)
        }
        None => Arc::new(MemoryStore::new()),
    };
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentialProvider::new(
        "local",
        Duration::from_secs(args.credential_lifetime_secs),
    ));

    let (mut server, handle) = Server::new(
        config,
        Arc::new(LocalOrchestrator::new()),
        store,
        credentials,
    )?;

    handle.start_game_session(args.session_metadata());

    // Handle shutdown gracefully
    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.process_terminate();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
