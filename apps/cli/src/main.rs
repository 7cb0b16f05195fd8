//! Sockbridge CLI
//!
//! Runs the WebSocket ⇄ TCP relay server, or the local CONNECT proxy that
//! tunnels through it.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sockbridge_client::{relay_url, ConnectProxy, ProxyConfig};
use sockbridge_core::{SessionOptions, DEFAULT_SECRET};
use sockbridge_relay::{RelayConfig, RelayServer};
use sockbridge_settings::{
    default_settings_path, validate_relay, ClientSettings, ServerSettings, Settings,
};

/// Sockbridge - authenticated WebSocket to TCP relay
#[derive(Parser)]
#[command(name = "sockbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to the per-user config path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Shared secret (overrides PASSWORD)
        #[arg(long)]
        password: Option<String>,

        /// Destination dial timeout in seconds
        #[arg(long)]
        connect_timeout: Option<u64>,
    },

    /// Run a local HTTP CONNECT proxy that tunnels through a relay
    Connect {
        /// Relay address, host[:port][/path]
        #[arg(short, long)]
        relay: Option<String>,

        /// Local proxy port (1-65535)
        #[arg(short, long)]
        port: Option<u16>,

        /// Shared secret (overrides PASSWORD)
        #[arg(long)]
        password: Option<String>,

        /// WebSocket frame size in KiB (1-1024)
        #[arg(long)]
        chunk: Option<usize>,

        /// Use ws:// instead of wss://
        #[arg(long)]
        insecure: bool,
    },

    /// Print the effective settings
    Config {
        /// Write the file settings back with every default filled in
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    sockbridge_logging::init_logging(cli.verbose);

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load_or_default(),
    }
    .context("Failed to load settings")?;
    let stored = settings.clone();
    settings.apply_env();

    match cli.command {
        Commands::Serve {
            listen,
            password,
            connect_timeout,
        } => {
            if let Some(listen) = listen {
                settings.server.listen = listen;
            }
            if let Some(password) = password {
                settings.server.password = password;
            }
            if let Some(secs) = connect_timeout {
                settings.server.connect_timeout_secs = secs;
            }
            settings.server.validate().context("Invalid server settings")?;
            run_serve(&settings.server).await
        }
        Commands::Connect {
            relay,
            port,
            password,
            chunk,
            insecure,
        } => {
            if let Some(relay) = relay {
                settings.client.relay = relay;
            }
            if let Some(port) = port {
                settings.client.listen_port = port;
            }
            if let Some(password) = password {
                settings.client.password = password;
            }
            if let Some(chunk) = chunk {
                settings.client.chunk_kb = chunk;
            }
            settings.client.insecure |= insecure;

            if settings.client.relay.is_empty() {
                bail!("A relay address is required: --relay host[:port][/path]");
            }
            validate_relay(&settings.client.relay).context("Invalid relay address")?;
            settings.client.validate().context("Invalid client settings")?;
            run_connect(&settings.client).await
        }
        Commands::Config { save } => {
            if save {
                let path = cli.config.clone().unwrap_or_else(default_settings_path);
                stored
                    .save_to(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            let mut shown = settings.clone();
            shown.server.password = mask(&shown.server.password);
            shown.client.password = mask(&shown.client.password);
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}

async fn run_serve(server: &ServerSettings) -> Result<()> {
    if server.password == DEFAULT_SECRET {
        warn!("Using the built-in default password; set PASSWORD or --password");
    }

    let config = RelayConfig {
        secret: server.password.clone(),
        connect_timeout: server.connect_timeout(),
        session: SessionOptions {
            chunk_size: server.chunk_size()?,
            channel_depth: server.channel_depth,
            close_grace: server.close_grace(),
        },
        max_message_size: server.max_message_size()?,
    };

    let mut relay = RelayServer::new(server.listen_addr()?, config);
    relay.start().await.context("Failed to start relay")?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    relay.shutdown(server.close_grace()).await;
    Ok(())
}

async fn run_connect(client: &ClientSettings) -> Result<()> {
    let url = relay_url(&client.relay, client.insecure);

    let mut config = ProxyConfig::new(url).with_password(client.password.clone());
    config.dial_timeout = client.dial_timeout();
    config.session.chunk_size = client.chunk_size()?;

    let listen = SocketAddr::from((Ipv4Addr::LOCALHOST, client.listen_port));
    let mut proxy = ConnectProxy::new(listen, config);
    proxy
        .start()
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    proxy.stop();
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}
