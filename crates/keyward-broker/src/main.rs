//! Keyward broker binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! keyward-broker --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate (production)
//! keyward-broker --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use clap::Parser;
use keyward_broker::{Broker, BrokerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keyward pub/sub broker
#[derive(Parser, Debug)]
#[command(name = "keyward-broker")]
#[command(about = "Keyward publish/subscribe broker over QUIC")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Per-client outbound queue depth
    #[arg(long, default_value = "1024")]
    outbound_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Keyward broker starting");

    if args.cert.is_none() && args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("Clients must pin it or skip verification; not for production use");
    }

    let config = BrokerConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        outbound_buffer: args.outbound_buffer,
    };

    let broker = Broker::bind(config)?;
    tracing::info!("Broker listening on {}", broker.local_addr()?);

    broker.run().await?;

    Ok(())
}
