//! Device discovery and scanning.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use aranet_types::{CurrentReading, DeviceType};

use crate::advertisement::parse_advertisement;
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::util::{create_identifier, format_peripheral_id, identifier_matches};
use crate::uuids::{MANUFACTURER_ID, SAF_TEHNIKA_SERVICE_NEW, SAF_TEHNIKA_SERVICE_OLD};

/// Default scan window.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// An Aranet device seen during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    /// Advertised name, e.g. "Aranet4 1A2B3".
    pub name: Option<String>,
    /// What to put in the configuration: the MAC address, or the
    /// CoreBluetooth UUID on macOS.
    pub identifier: String,
    pub rssi: Option<i16>,
    pub device_type: Option<DeviceType>,
    /// Latest reading from the advertisement, when Smart Home
    /// integration is enabled on the device.
    pub reading: Option<CurrentReading>,
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Scan for Aranet devices in range for `duration`.
///
/// An empty list means nothing answered; it is not an error.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>> {
    let adapter = get_adapter().await?;
    scan_with_adapter(&adapter, duration).await
}

/// Scan for devices using a specific adapter.
pub async fn scan_with_adapter(
    adapter: &Adapter,
    duration: Duration,
) -> Result<Vec<DiscoveredDevice>> {
    info!("Starting BLE scan for {:?}", duration);

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(duration).await;
    adapter.stop_scan().await?;

    let mut discovered: Vec<DiscoveredDevice> = Vec::new();
    for peripheral in adapter.peripherals().await? {
        match describe_peripheral(&peripheral).await {
            Ok(Some(device)) => {
                if discovered.iter().any(|d| d.identifier == device.identifier) {
                    continue;
                }
                info!("Found {:?} ({})", device.name, device.identifier);
                discovered.push(device);
            }
            Ok(None) => {}
            Err(e) => debug!("Skipping peripheral: {}", e),
        }
    }

    info!("Scan complete. Found {} device(s)", discovered.len());
    Ok(discovered)
}

async fn describe_peripheral(peripheral: &Peripheral) -> Result<Option<DiscoveredDevice>> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    if !is_aranet_device(&properties) {
        return Ok(None);
    }

    let name = properties.local_name.clone();
    let device_type = name.as_deref().and_then(DeviceType::from_name);
    let reading = properties
        .manufacturer_data
        .get(&MANUFACTURER_ID)
        .and_then(|data| match parse_advertisement(data) {
            Ok(adv) => adv.reading,
            Err(e) => {
                debug!("Ignoring advertisement from {:?}: {}", name, e);
                None
            }
        });

    Ok(Some(DiscoveredDevice {
        identifier: create_identifier(&properties.address.to_string(), &peripheral.id()),
        name,
        rssi: properties.rssi,
        device_type,
        reading,
    }))
}

/// Check if a peripheral is an Aranet device based on its properties.
fn is_aranet_device(properties: &PeripheralProperties) -> bool {
    let is_aranet_service =
        |uuid: &uuid::Uuid| *uuid == SAF_TEHNIKA_SERVICE_NEW || *uuid == SAF_TEHNIKA_SERVICE_OLD;

    properties.manufacturer_data.contains_key(&MANUFACTURER_ID)
        || properties.service_data.keys().any(is_aranet_service)
        || properties.services.iter().any(is_aranet_service)
        || properties
            .local_name
            .as_ref()
            .is_some_and(|n| n.to_lowercase().contains("aranet"))
}

/// Find the peripheral designated by `identifier` (MAC, macOS UUID or name).
///
/// Peripherals the adapter already knows are checked first; otherwise a
/// single scan of `scan_duration` is run.
pub async fn find_device(identifier: &str, scan_duration: Duration) -> Result<(Adapter, Peripheral)> {
    let adapter = get_adapter().await?;
    info!("Looking for device: {}", identifier);

    if let Some(peripheral) = find_known_peripheral(&adapter, identifier).await? {
        debug!("Device already known to the adapter");
        return Ok((adapter, peripheral));
    }

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(scan_duration).await;
    adapter.stop_scan().await?;

    match find_known_peripheral(&adapter, identifier).await? {
        Some(peripheral) => Ok((adapter, peripheral)),
        None => {
            warn!("Device not found: {}", identifier);
            Err(Error::device_not_found(identifier))
        }
    }
}

async fn find_known_peripheral(adapter: &Adapter, identifier: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await
            && identifier_matches(
                identifier,
                &props.address.to_string(),
                &format_peripheral_id(&peripheral.id()),
                props.local_name.as_deref(),
            )
        {
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}
