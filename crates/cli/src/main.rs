//! `hct-controller`: runs the engine behind its HTTP API.
//!
//! Reports are published on an in-process bus and echoed to stdout as
//! `<channel> <json>` lines.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use hct_call_engine::api;
use hct_call_engine::prelude::*;
use hct_infra_common::{
    BusReceiver, InMemoryBus, LoggingConfig, MessageBus, log_welcome, setup_logging,
};

#[derive(Parser, Debug)]
#[command(name = "hct-controller", version, about = "Telephony load-test controller")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "HCT_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address, overrides `http.listen`
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level, overrides `logging.level`. `VP_LOG_LEVEL` belongs to the call generator.
    #[arg(long, env = "HCT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(listen) = &args.listen {
        config.http.listen = listen.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

/// Print every message of a report channel to stdout
fn echo(mut rx: BusReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Some(message)) => println!("{} {}", message.channel, message.payload),
                Ok(None) => return,
                Err(e) => {
                    error!("report echo on '{}' stopped: {}", rx.channel(), e);
                    return;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let mut logging = LoggingConfig::from_level_str(&config.logging.level, "hct-controller")?;
    if config.logging.json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;
    log_welcome("hct-controller", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(InMemoryBus::new());
    let echoes = [
        echo(bus.subscribe(&config.bus.details).await?),
        echo(bus.subscribe(&config.bus.summary).await?),
    ];

    let listen = config.http.listen.clone();
    let controller = Arc::new(
        ControllerBuilder::new()
            .with_config(config)
            .with_bus(bus)
            .build()?,
    );
    controller.start().await?;

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!("🌐 HTTP API listening on http://{}", listen);

    axum::serve(listener, api::router(controller.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    controller.stop().await;
    for handle in echoes {
        handle.abort();
    }
    Ok(())
}
