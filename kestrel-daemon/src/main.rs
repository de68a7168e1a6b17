/*!
 * KESTREL Wireless Interface Daemon
 * Exclusive interface leases and supervised wifi connections
 * Onyx Digital Intelligence Development LLC
 */

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{error, info};

mod client;
mod config;
mod ipc;
mod network;
mod protocol;

use client::KestrelClient;
use config::DaemonConfig;
use ipc::IpcServer;
use network::NetworkManager;
use protocol::{Request, Response};

#[derive(Parser)]
#[command(name = "kestreld")]
#[command(about = "KESTREL Wireless Interface Daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/kestrel/kestreld.toml")]
    config: String,

    /// Daemon socket path (overrides the configuration file)
    #[arg(short, long)]
    socket: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// List discovered and leased interfaces
    Interfaces,
    /// Claim an interface for exclusive use
    Claim { interface: String },
    /// Release a claimed interface
    Release { interface: String },
    /// Show the status snapshot of a claimed interface
    Status {
        interface: String,
        /// Probe the interface instead of returning the last snapshot
        #[arg(short, long)]
        refresh: bool,
    },
    /// Scan for networks on a claimed interface
    Scan { interface: String },
    /// Connect a claimed interface to a WPA network
    Connect {
        interface: String,
        ssid: String,
        /// Network passphrase
        #[arg(long, env = "KESTREL_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
        /// ISO 3166 country code
        #[arg(long)]
        country: Option<String>,
        /// The network does not broadcast its SSID
        #[arg(long)]
        hidden: bool,
    },
    /// Bring a claimed interface up
    BringUp { interface: String },
    /// Stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("kestreld={0},kestrel_core={0}", log_level))
        .init();

    // Load configuration
    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    let request = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => return run_daemon(config).await,
        Commands::Interfaces => Request::ListInterfaces,
        Commands::Claim { interface } => Request::Claim { interface },
        Commands::Release { interface } => Request::Release { interface },
        Commands::Status { interface, refresh } => {
            if refresh {
                Request::Refresh { interface }
            } else {
                Request::GetSnapshot { interface }
            }
        }
        Commands::Scan { interface } => Request::Scan { interface },
        Commands::Connect {
            interface,
            ssid,
            passphrase,
            country,
            hidden,
        } => Request::Connect {
            interface,
            ssid,
            passphrase,
            country,
            hidden,
        },
        Commands::BringUp { interface } => Request::BringUp { interface },
        Commands::Stop => Request::Shutdown,
    };

    send(&config.socket_path, request).await
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("KESTREL daemon starting...");

    let backend = kestrel_core::host_backend(&config.wifi)?;
    let network_manager = Arc::new(NetworkManager::new(backend, &config.wifi));

    let (discovered, _) = network_manager.interfaces().await;
    if discovered.is_empty() {
        tracing::warn!("Interface discovery unavailable, names will not be validated");
    } else {
        info!("Discovered interfaces: {}", discovered.join(", "));
    }

    // Start IPC server
    let socket_path = Path::new(&config.socket_path);
    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    let ipc_server = IpcServer::new(listener, network_manager.clone());
    let shutdown = ipc_server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            shutdown.notify_one();
        }
    });

    info!("KESTREL daemon ready on socket: {}", config.socket_path);

    // Run the server
    let result = ipc_server.run().await;

    network_manager.shutdown().await;
    if let Err(e) = std::fs::remove_file(socket_path) {
        error!("Could not remove socket {}: {}", config.socket_path, e);
    }
    info!("KESTREL daemon stopped");

    result
}

async fn send(socket_path: &str, request: Request) -> Result<()> {
    let client = KestrelClient::new(socket_path.to_string());
    match client.send_request(request).await? {
        Response::Error { kind, message } => bail!("{}: {}", kind, message),
        response => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
