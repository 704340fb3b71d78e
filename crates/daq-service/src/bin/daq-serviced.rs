//! Service runtime host process.
//!
//! Launch command: `daq-serviced --service <name> --serializer json
//! --port <port>`. The orchestrator constructs exactly this string and
//! later pattern-matches it during PID discovery; argument names and
//! order are part of the contract.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use daq_protocol::Serializer;
use daq_service::runtime::default_providers;
use daq_service::log_relay::LogRelay;
use daq_service::{AcquisitionService, ControlServer, ServiceConfig};
use daq_comm::DrainPolicy;

#[derive(Debug, Parser)]
#[command(name = "daq-serviced", about = "rig-daq acquisition service host")]
struct Args {
    /// Service name, used in log tags and discovery.
    #[arg(long)]
    service: String,

    /// Payload serializer for the control protocol.
    #[arg(long, default_value = "json")]
    serializer: String,

    /// Control port to listen on.
    #[arg(long)]
    port: u16,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ServiceConfig::load(args.config.as_deref())?;
    config.name = args.service.clone();
    let serializer = Serializer::from_name(&args.serializer)?;

    // The relay must exist before the subscriber is installed so its
    // layer can join the stack.
    let relay = if config.log_relay.enabled {
        match LogRelay::spawn(config.log_relay.port_base, config.log_relay.port_span).await {
            Ok(relay) => Some(relay),
            Err(err) => {
                eprintln!("log relay disabled: {}", err);
                None
            }
        }
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer());
    match &relay {
        Some(relay) => registry.with(relay.layer(config.name.clone())).init(),
        None => registry.init(),
    }

    if let Some(relay) = &relay {
        info!(port = relay.port(), "log relay publishing");
    }

    let drain = DrainPolicy {
        poll_interval: config.drain.poll_interval,
        stall_polls: config.drain.stall_polls,
        max_wait: config.drain.max_wait,
    };
    let providers = default_providers(config.mock_pacing);
    let service = Arc::new(AcquisitionService::new(config.name.clone(), drain));

    let bind = format!("{}:{}", config.bind_host, args.port);
    let server = ControlServer::bind(&bind, Arc::clone(&service), providers, serializer).await?;
    server.run().await?;

    // A stop-service finish brought us here; make sure the engine is
    // actually torn down before the process exits.
    if service.finish(false).is_err() {
        warn!("final teardown reported a fault");
    }
    info!(service = %config.name, "service process exiting");
    // Give the relay a beat to push the final records to subscribers.
    if relay.is_some() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    Ok(())
}
