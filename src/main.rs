//! Shroud - CLI entry point
//!
//! Thin bootstrap around the library core: parses flags, loads the
//! optional YAML config, wires logging, builds the runtime and hands
//! a frozen configuration to the gateway. Signal handling lives here,
//! not in the core.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use shroud::{Config, Gateway, ProxyMode, VERSION};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shroud")]
#[command(version = VERSION)]
#[command(about = "Disguise tunneling forward proxy")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short = 'b', long = "bind")]
    bind: Option<IpAddr>,

    /// Listen port (overrides config)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Relay mode: connect, pooled or keep-alive (overrides config)
    #[arg(short = 'm', long = "mode")]
    mode: Option<String>,

    /// Shared secret (overrides config)
    #[arg(long = "secret")]
    secret: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("shroud-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shroud=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load_async(path).await {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(bind) = args.bind {
        config.listen = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mode) = args.mode.as_deref() {
        config.mode = ProxyMode::try_from(mode)?;
    }
    if let Some(secret) = args.secret {
        config.secret = secret;
    }

    info!("shroud v{}", VERSION);

    let gateway = match Gateway::new(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.start().await {
        error!("failed to start: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    gateway.stop().await;

    Ok(())
}
