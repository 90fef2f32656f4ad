//! Alpaca client CLI
//!
//! Discover Alpaca servers, list their devices, and monitor one device.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alpaca_client::{
    filter_by_type, load_config, AlpacaConfig, AttributeRefresh, ConnectionEvent, ConnectionManager,
    DeviceIdentity, DiscoveryService, ServerDiscovery,
};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::Level;

#[derive(Parser)]
#[command(name = "alpaca-client")]
#[command(about = "ASCOM Alpaca discovery and device monitoring")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// http or https (overrides config file)
    #[arg(long)]
    protocol: Option<String>,

    /// Alpaca API version (overrides config file)
    #[arg(long)]
    api_version: Option<u32>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find Alpaca servers on the local network
    Discover,
    /// List the API versions the server supports
    Versions,
    /// List the devices configured on the server
    Devices {
        /// Only list devices of this type, as "Name:Type:Number"
        #[arg(long)]
        device_type: Option<String>,
    },
    /// Connect to a device and print its values until Ctrl-C
    Monitor {
        /// Device as "Name:Type:Number"
        #[arg(long)]
        device: String,

        /// Attribute to poll on every data tick
        #[arg(long = "attribute")]
        attributes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        AlpacaConfig::default()
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(api_version) = args.api_version {
        config.api_version = api_version;
    }

    match args.command {
        Command::Discover => {
            for addr in ServerDiscovery::from_config(&config).discover().await? {
                println!("{}", addr);
            }
        }
        Command::Versions => {
            let service = DiscoveryService::from_config(&config);
            for version in service.query_api_versions(&config.endpoint()).await {
                println!("{}", version);
            }
        }
        Command::Devices { device_type } => {
            let service = DiscoveryService::from_config(&config);
            let devices = service.query_configured_devices(&config.endpoint()).await;
            match device_type {
                Some(device_type) => {
                    for composite in filter_by_type(&devices, &device_type) {
                        println!("{}", composite);
                    }
                }
                None => {
                    for device in devices {
                        println!("{}\t{}", device.composite(), device.unique_id);
                    }
                }
            }
        }
        Command::Monitor { device, attributes } => {
            // reject a malformed name up front instead of silently keeping defaults
            device.parse::<DeviceIdentity>()?;
            config.device_name = device;
            monitor(config, attributes).await?;
        }
    }

    Ok(())
}

async fn monitor(config: AlpacaConfig, attributes: Vec<String>) -> alpaca_client::Result<()> {
    let period = Duration::from_millis(config.polling.data_interval_ms.max(100));
    let manager = ConnectionManager::builder(config)
        .data_refresh(Arc::new(AttributeRefresh::new(attributes)))
        .build();

    let events = manager.subscribe();
    let printer = tokio::spawn(print_events(events, |event| println!("event: {}", event)));

    manager.connect().await?;

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let mut values: Vec<_> = manager.data().snapshot().await.into_iter().collect();
                values.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, value) in values {
                    println!("{} = {}", key, value);
                }
            }
        }
    }

    manager.disconnect().await;
    // let the printer drain the disconnect events
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}

/// Hand every event to `print` until the channel closes. Events dropped
/// because the receiver fell behind are logged and skipped.
async fn print_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    mut print: impl FnMut(&ConnectionEvent),
) {
    loop {
        match events.recv().await {
            Ok(event) => print(&event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Event printer fell behind, {} events dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
