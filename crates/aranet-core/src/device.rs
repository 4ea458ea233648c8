//! Aranet device connection and GATT access.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectionFailureReason, Error, Result, message_indicates_busy};
use crate::scan::find_device;
use crate::util::{create_identifier, format_peripheral_id};

/// Timeouts applied to each step of a device session.
///
/// ```
/// use std::time::Duration;
/// use aranet_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default().scan_timeout(Duration::from_secs(10));
/// assert_eq!(config.scan_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to scan when the adapter does not know the device yet.
    pub scan_timeout: Duration,
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for a single characteristic read or write.
    pub operation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Upper bound for connecting from scratch.
    pub fn connect_budget(&self) -> Duration {
        self.scan_timeout + self.connection_timeout + self.discovery_timeout
    }
}

/// A connected Aranet device.
///
/// Call [`Device::disconnect`] when done; dropping the value does not close
/// the BLE link.
pub struct Device {
    // Keeps the adapter alive for as long as the peripheral is in use.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    name: Option<String>,
    address: String,
    characteristics: HashMap<Uuid, Characteristic>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Locate the device by MAC address, macOS UUID or name and connect.
    #[tracing::instrument(level = "info", skip_all, fields(identifier = %identifier))]
    pub async fn connect(identifier: &str, config: ConnectionConfig) -> Result<Self> {
        let (adapter, peripheral) = find_device(identifier, config.scan_timeout).await?;
        Self::from_peripheral(adapter, peripheral, config).await
    }

    /// Connect to an already-discovered peripheral.
    pub async fn from_peripheral(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let peripheral_id = format_peripheral_id(&peripheral.id());

        info!("Connecting to device...");
        match timeout(config.connection_timeout, peripheral.connect()).await {
            Err(_) => {
                let _ = peripheral.disconnect().await;
                return Err(Error::timeout("connect to device", config.connection_timeout));
            }
            Ok(Err(e)) => return Err(classify_connect_error(peripheral_id, e)),
            Ok(Ok(())) => {}
        }

        if let Err(e) = Self::discover(&peripheral, config.discovery_timeout).await {
            // Leave the device free for the next caller.
            let _ = peripheral.disconnect().await;
            return Err(e);
        }

        let mut characteristics = HashMap::new();
        for service in peripheral.services() {
            debug!("Service: {}", service.uuid);
            for characteristic in service.characteristics {
                characteristics.insert(characteristic.uuid, characteristic);
            }
        }
        debug!("Cached {} characteristics", characteristics.len());

        let properties = peripheral.properties().await?;
        let name = properties.as_ref().and_then(|p| p.local_name.clone());
        let address = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or(peripheral_id);

        info!("Connected to {:?} ({})", name, address);
        Ok(Self {
            adapter,
            peripheral,
            name,
            address,
            characteristics,
            config,
        })
    }

    async fn discover(peripheral: &Peripheral, limit: Duration) -> Result<()> {
        timeout(limit, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", limit))??;
        Ok(())
    }

    /// Disconnect from the device.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.address))]
    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting");
        self.peripheral.disconnect().await?;
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// MAC address, or the CoreBluetooth UUID on macOS.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics.get(&uuid).ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }

    /// Read a characteristic's value.
    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(uuid)?;
        let limit = self.config.operation_timeout;
        let data = timeout(limit, self.peripheral.read(characteristic))
            .await
            .map_err(|_| Error::timeout(format!("read characteristic {}", uuid), limit))??;
        Ok(data)
    }

    /// Write a characteristic, waiting for the device's acknowledgement.
    pub async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        let limit = self.config.operation_timeout;
        timeout(
            limit,
            self.peripheral
                .write(characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| Error::timeout(format!("write characteristic {}", uuid), limit))??;
        Ok(())
    }
}

fn classify_connect_error(device_id: String, err: btleplug::Error) -> Error {
    let message = err.to_string();
    let reason = if message_indicates_busy(&message) {
        ConnectionFailureReason::AlreadyConnected
    } else if matches!(err, btleplug::Error::DeviceNotFound) {
        ConnectionFailureReason::OutOfRange
    } else {
        ConnectionFailureReason::BleError(message)
    };
    warn!("Connection to {} failed: {}", device_id, reason);
    Error::connection_failed(Some(device_id), reason)
}
