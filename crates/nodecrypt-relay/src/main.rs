//! NodeCrypt relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Ephemeral identity (regenerated on restart)
//! nodecrypt-relay --bind 0.0.0.0:8080
//!
//! # Durable identity surviving restarts within the rotation window
//! nodecrypt-relay --bind 0.0.0.0:8080 --identity-file /var/lib/nodecrypt/identity.json
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use nodecrypt_core::config::RelayConfig;
use nodecrypt_relay::{Relay, RelayRuntimeConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// NodeCrypt blind relay server
#[derive(Parser, Debug)]
#[command(name = "nodecrypt-relay")]
#[command(about = "End-to-end encrypted chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Durable slot for the relay RSA identity
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// RSA identity rotation interval in hours
    #[arg(long, default_value = "24")]
    rotation_hours: u64,

    /// Idle timeout in seconds before a silent session is closed
    #[arg(long, default_value = "60")]
    idle_secs: u64,

    /// Maximum envelope size in bytes
    #[arg(long, default_value = "524288")]
    max_envelope_bytes: usize,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

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

    tracing::info!("nodecrypt relay starting");

    if args.identity_file.is_none() {
        tracing::warn!("no --identity-file given; identity will not survive a restart");
    }

    let config = RelayRuntimeConfig {
        bind_address: args.bind,
        identity_file: args.identity_file,
        relay: RelayConfig {
            rsa_rotation_interval: Duration::from_secs(args.rotation_hours * 3600),
            idle_timeout: Duration::from_secs(args.idle_secs),
            max_envelope_bytes: args.max_envelope_bytes,
            max_connections: args.max_connections,
        },
    };

    let relay = Relay::bind(config).await?;
    tracing::info!("listening on {}", relay.local_addr()?);

    relay.run().await?;
    Ok(())
}
