//! runt-bridge CLI entry point.
//!
//! Speaks newline-delimited JSON with an editor over stdin/stdout and drives a
//! single Jupyter kernel. Logs go to stderr so stdout stays a clean protocol
//! stream.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use runt_bridge::bridge::Bridge;
use runt_bridge::config::BridgeConfig;
use runt_bridge::jupyter::JupyterTransport;
use runt_bridge::protocol::{read_commands, Command, Event};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "runt-bridge")]
#[command(about = "Run editor cells against a Jupyter kernel over JSON lines")]
struct Cli {
    /// Kernelspec to launch
    #[arg(long, default_value = "python3")]
    kernel: String,

    /// Attach to a running kernel instead of launching one
    #[arg(long)]
    connection_file: Option<PathBuf>,

    /// Root directory for per-document artifacts
    #[arg(long, default_value = runt_bridge::config::DEFAULT_CACHE_ROOT)]
    cache_root: PathBuf,

    /// Seconds to wait for the kernel to answer kernel_info
    #[arg(long, default_value = "30")]
    startup_timeout: u64,

    /// Working directory for a launched kernel
    #[arg(long)]
    kernel_cwd: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Cli> for BridgeConfig {
    fn from(cli: Cli) -> Self {
        BridgeConfig {
            kernel_name: cli.kernel,
            connection_file: cli.connection_file,
            cache_root: cli.cache_root,
            startup_timeout: Duration::from_secs(cli.startup_timeout),
            kernel_cwd: cli.kernel_cwd,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = BridgeConfig::from(cli);
    let (events_tx, events_rx) = mpsc::unbounded_channel::<Event>();
    let writer = tokio::spawn(write_events(events_rx));

    let connected = match &config.connection_file {
        Some(path) => JupyterTransport::attach(path, &config).await,
        None => JupyterTransport::launch(&config).await,
    };
    let (kernel, kernel_events) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            error!("[bridge] Kernel startup failed: {}", e);
            events_tx
                .send(Event::Error {
                    msg: format!("Kernel startup failed: {}", e),
                })
                .ok();
            drop(events_tx);
            writer.await.ok();
            std::process::exit(1);
        }
    };

    let (commands_tx, commands_rx) = mpsc::channel::<Command>(100);
    tokio::spawn(read_commands(BufReader::new(tokio::io::stdin()), commands_tx));

    events_tx
        .send(Event::Debug {
            msg: "Kernel bridge started".to_string(),
        })
        .ok();
    info!("[bridge] Ready");

    let bridge = Bridge::new(kernel, config, events_tx);
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };
    let result = bridge.run(commands_rx, kernel_events, shutdown).await;

    // The bridge owned the last sender; wait for queued events to flush.
    writer.await.ok();
    if let Err(e) = result {
        error!("[bridge] Kernel shutdown failed: {}", e);
    }
    info!("[bridge] Exiting");

    // The stdin reader may still be parked in a blocking read.
    std::process::exit(0);
}

/// Write events to stdout, one JSON object per line.
async fn write_events(mut events: mpsc::UnboundedReceiver<Event>) {
    let mut stdout = tokio::io::stdout();

    while let Some(event) = events.recv().await {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("[bridge] Failed to serialize event: {}", e);
                continue;
            }
        };
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!("[bridge] Failed to write stdout: {}", e);
            break;
        }
        if let Err(e) = stdout.flush().await {
            error!("[bridge] Failed to flush stdout: {}", e);
            break;
        }
    }
}
