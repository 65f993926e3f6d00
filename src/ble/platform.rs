//! btleplug-backed [`GattTransport`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ble::connection::ConnectionManager;
use crate::ble::scanner::BleScanner;
use crate::ble::transport::{GattTransport, WriteMode};
use crate::error::{Error, Result};
use crate::session::SessionEvent;

/// Transport driving the host Bluetooth adapter through btleplug.
pub struct BtleplugTransport {
    /// LE scanner, also the source of connectable peripherals.
    scanner: BleScanner,
    /// Active connection, if any.
    connection: RwLock<Option<Arc<ConnectionManager>>>,
    /// Session event channel.
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl BtleplugTransport {
    /// Open the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Result<Self> {
        let scanner = BleScanner::new(events.clone()).await?;

        Ok(Self {
            scanner,
            connection: RwLock::new(None),
            events,
        })
    }

    /// The live connection. A connection whose link was lost is released.
    fn connection(&self) -> Result<Arc<ConnectionManager>> {
        let mut slot = self.connection.write();
        if slot.as_ref().map_or(false, |c| c.is_link_lost()) {
            debug!("Releasing connection after link loss");
            *slot = None;
        }
        slot.clone().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    async fn start_scan(&self, timeout: Duration) -> Result<()> {
        self.scanner.start_scanning(timeout).await
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scanning().await
    }

    async fn connect(&self, identifier: &str) -> Result<()> {
        let peripheral =
            self.scanner
                .peripheral(identifier)
                .ok_or_else(|| Error::DeviceNotFound {
                    identifier: identifier.to_string(),
                })?;

        info!("Connecting to {}", identifier);

        let manager = Arc::new(ConnectionManager::new(peripheral, self.events.clone()));
        manager.watch_disconnect(self.scanner.adapter()).await?;

        if self.connection.write().replace(manager.clone()).is_some() {
            debug!("Replacing previous connection");
        }

        manager.connect().await
    }

    async fn discover_services(&self) -> Result<()> {
        self.connection()?.discover_services().await
    }

    async fn discover_details(&self, service: Uuid) -> Result<()> {
        self.connection()?.discover_details(service).await
    }

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.connection()?
            .write_descriptor(service, characteristic, descriptor, value)
            .await
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.connection()?
            .write(service, characteristic, value, mode)
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        let connection = self.connection.write().take();
        match connection {
            Some(connection) => connection.disconnect().await,
            None => Ok(()),
        }
    }
}
