//! aranet4-mcp - Aranet4 history for AI assistants over MCP.
//!
//! Run with: `cargo run -p aranet-mcp`

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use aranet_core::{BleLink, SensorLink};
use aranet_mcp::{Aranet4Server, default_config_path};
use aranet_mcp::format::format_scan_text;

/// MCP server exposing Aranet4 CO2 sensor history over stdio.
#[derive(Parser, Debug)]
#[command(name = "aranet4-mcp")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "ARANET4_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdin/stdout (default behavior).
    Serve,

    /// List nearby Aranet sensors and exit.
    Scan {
        /// Scan duration in seconds.
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    match args.command {
        Some(Command::Scan { timeout }) => scan(timeout).await,
        Some(Command::Serve) | None => {
            let config_path = args.config.unwrap_or_else(default_config_path);
            serve(config_path).await
        }
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

async fn scan(timeout: u64) -> anyhow::Result<()> {
    let devices = BleLink::default().scan(Duration::from_secs(timeout)).await?;
    println!("{}", format_scan_text(&devices));
    Ok(())
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    info!("Using config file {}", config_path.display());
    let server = Aranet4Server::bluetooth(config_path);

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|error| tracing::error!(%error, "Error serving"))?;
    info!("aranet4-mcp ready");

    service.waiting().await?;
    Ok(())
}
