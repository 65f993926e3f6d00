//! BLE scanning functionality.
//!
//! Runs a bounded LE scan on a btleplug adapter and reports every observed
//! peripheral to the session as a `DeviceFound` event.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::ble::filter::{Advertisement, Transports};
use crate::error::{Error, Result};
use crate::session::SessionEvent;

/// BLE scanner for discovering probes.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Peripherals observed during scans, by identifier.
    discovered: Arc<RwLock<HashMap<String, Peripheral>>>,
    /// Session event channel.
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Handle to the scanning task.
    scan_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BleScanner {
    /// Create a scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, events))
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(HashMap::new())),
            events,
            scan_handle: RwLock::new(None),
        }
    }

    /// Start scanning, reporting `ScanDone` once `timeout` expires.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning is already active or cannot be started.
    pub async fn start_scanning(&self, timeout: Duration) -> Result<()> {
        if *self.is_scanning.read() {
            return Err(Error::ScanFailed {
                reason: "scan already in progress".to_string(),
            });
        }

        debug!("Starting LE scan with {:?} timeout", timeout);

        // Subscribe before starting so no early advertisement is missed
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::ScanFailed {
                reason: e.to_string(),
            })?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let discovered = self.discovered.clone();
        let session_tx = self.events.clone();

        let handle = tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &discovered, &session_tx).await;
                    }
                    _ = &mut deadline => {
                        debug!("Scan timeout reached");
                        *is_scanning.write() = false;
                        if let Err(e) = adapter.stop_scan().await {
                            warn!("Failed to stop scan: {}", e);
                        }
                        let _ = session_tx.send(SessionEvent::ScanDone);
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        // Check if we should stop scanning
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning without reporting `ScanDone`.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Look up a peripheral observed during a scan.
    pub fn peripheral(&self, identifier: &str) -> Option<Peripheral> {
        self.discovered.read().get(identifier).cloned()
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        discovered: &Arc<RwLock<HashMap<String, Peripheral>>>,
        session_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, session_tx).await;
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, session_tx).await;
            }
            _ => {}
        }
    }

    /// Report a peripheral's advertisement to the session.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        discovered: &Arc<RwLock<HashMap<String, Peripheral>>>,
        session_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to read peripheral properties: {}", e);
                return;
            }
        };

        let identifier = id.to_string();

        // btleplug only surfaces LE peripherals
        let advertisement = Advertisement {
            identifier: identifier.clone(),
            name: properties.local_name,
            transports: Transports::LOW_ENERGY,
            rssi: properties.rssi,
        };

        discovered.write().insert(identifier, peripheral);

        let _ = session_tx.send(SessionEvent::DeviceFound(advertisement));
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
