//! Example: Downloading Historical Data
//!
//! Connects to an Aranet4, reads its history info and downloads every
//! stored record (or only those from the last N hours).
//!
//! Run with: `cargo run --example download_history -- <DEVICE_ADDRESS> [HOURS]`

use std::env;

use aranet_core::{ConnectionConfig, Device, HistoryOptions};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(identifier) = args.get(1) else {
        eprintln!("Usage: {} <DEVICE_ADDRESS_OR_NAME> [HOURS]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF 24", args[0]);
        std::process::exit(1);
    };
    let since = match args.get(2) {
        Some(hours) => Some(OffsetDateTime::now_utc() - time::Duration::hours(hours.parse()?)),
        None => None,
    };

    println!("Connecting to {}...", identifier);
    let device = Device::connect(identifier, ConnectionConfig::default()).await?;
    println!("Connected!");
    println!();

    let info = device.get_history_info().await?;
    println!("  Total readings: {}", info.total_readings);
    println!("  Interval: {} seconds", info.interval_seconds);
    println!("  Last update: {} seconds ago", info.seconds_since_update);
    println!();

    println!("Downloading history (this may take a moment)...");
    let result = device
        .download_history_since(since, &HistoryOptions::default())
        .await;
    device.disconnect().await?;
    let records = result?;

    println!();
    println!(
        "{:<25} {:>8} {:>10} {:>10} {:>8}",
        "Timestamp", "CO2", "Temp", "Pressure", "Humidity"
    );
    println!("{}", "-".repeat(65));

    let start = records.len().saturating_sub(10);
    for record in &records[start..] {
        let timestamp = record
            .timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        println!(
            "{:<25} {:>6} ppm {:>8.1} °C {:>8.1} hPa {:>6}%",
            timestamp, record.co2, record.temperature, record.pressure, record.humidity
        );
    }

    if records.len() > 10 {
        println!();
        println!("(Showing last 10 of {} records)", records.len());
    }

    Ok(())
}
