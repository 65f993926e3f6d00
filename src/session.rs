//! GATT session state machine.
//!
//! [`GattSession`] drives one probe session from scan to steady-state
//! streaming. It performs no I/O: every transport notification is fed in as a
//! [`SessionEvent`], and each step returns the transport [`Command`]s to run
//! and the [`ClientEvent`]s to publish. The async driver in
//! [`client`](crate::client) executes the commands in order before feeding the
//! next event.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> DiscoveringServices
//!      -> SubscribingIndications -> Streaming
//! any connected state -> Disconnected | Failed(reason)
//! ```

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::assembler::MeasurementAssembler;
use crate::ble::filter::{Advertisement, DeviceFilter};
use crate::ble::transport::{CharacteristicInfo, WriteMode};
use crate::ble::uuids::*;
use crate::config::ClientConfig;
use crate::data::{DeviceTimestamp, FragmentKind, Measurement};
use crate::error::{Error, Result};
use crate::protocol::codec::{decode_fragment, encode_command, encode_time_write};

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Looking for a probe.
    Scanning,
    /// Connecting to the accepted probe.
    Connecting,
    /// Enumerating services.
    DiscoveringServices,
    /// Resolving characteristics and enabling indications.
    SubscribingIndications,
    /// Receiving measurements.
    Streaming,
    /// The link dropped.
    Disconnected,
    /// The controller reported an unrecoverable error.
    Failed(String),
}

impl SessionState {
    /// Check if a link to the probe is up.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringServices | Self::SubscribingIndications | Self::Streaming
        )
    }

    /// Check if a new scan may be started.
    pub fn can_start_scan(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::SubscribingIndications => write!(f, "SubscribingIndications"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Inbound notification from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An advertisement was observed.
    DeviceFound(Advertisement),
    /// The scan ran to its timeout.
    ScanDone,
    /// The scan failed at the transport level.
    ScanError(String),
    /// The link to the device is up.
    Connected,
    /// The link to the device went down.
    Disconnected,
    /// The controller reported an error.
    ControllerError(String),
    /// A service was found during enumeration.
    ServiceFound(Uuid),
    /// Service enumeration finished.
    ServicesDone,
    /// A service's characteristics were resolved.
    ServiceResolved {
        /// Service UUID.
        service: Uuid,
        /// Characteristics found on the service.
        characteristics: Vec<CharacteristicInfo>,
    },
    /// A characteristic value changed (notification or indication).
    CharacteristicChanged {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// New value.
        value: Vec<u8>,
    },
}

/// Outbound transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start discovery.
    StartScan {
        /// Scan duration.
        timeout: Duration,
    },
    /// Stop discovery.
    StopScan,
    /// Connect to a device.
    Connect {
        /// Platform identifier of the device.
        identifier: String,
    },
    /// Enumerate services.
    DiscoverServices,
    /// Resolve a service's characteristics.
    DiscoverDetails {
        /// Service UUID.
        service: Uuid,
    },
    /// Write a descriptor.
    WriteDescriptor {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Descriptor UUID.
        descriptor: Uuid,
        /// Value to write.
        value: Vec<u8>,
    },
    /// Write a characteristic.
    WriteCharacteristic {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Value to write.
        value: Vec<u8>,
        /// Acknowledgment mode.
        mode: WriteMode,
    },
    /// Drop the link.
    Disconnect,
}

/// Event published to collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The session changed state.
    StateChanged(SessionState),
    /// Services were enumerated on the connected probe.
    Connected,
    /// The probe disconnected.
    Disconnected,
    /// A complete measurement was assembled.
    Measurement(Measurement),
    /// Human-readable status or warning.
    Info(String),
}

/// Result of one state machine step.
#[derive(Debug, Default, PartialEq)]
pub struct Output {
    /// Transport operations to execute, in order.
    pub commands: Vec<Command>,
    /// Events to publish, in order.
    pub events: Vec<ClientEvent>,
}

impl Output {
    fn info(&mut self, message: impl Into<String>) {
        self.events.push(ClientEvent::Info(message.into()));
    }
}

/// A discovered service and, once resolved, its characteristics.
#[derive(Debug, Clone)]
struct ServiceHandle {
    uuid: Uuid,
    characteristics: Option<HashMap<Uuid, CharacteristicInfo>>,
}

impl ServiceHandle {
    fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: None,
        }
    }

    fn resolve(&mut self, characteristics: Vec<CharacteristicInfo>) {
        self.characteristics = Some(
            characteristics
                .into_iter()
                .map(|c| (c.uuid, c))
                .collect(),
        );
    }

    fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.as_ref()?.get(uuid)
    }
}

/// Resolve the service owning a writable characteristic.
fn write_target(handle: Option<&ServiceHandle>, characteristic: Uuid) -> Result<Uuid> {
    let handle = handle.ok_or(Error::NotConnected)?;
    let characteristics = handle
        .characteristics
        .as_ref()
        .ok_or(Error::NotConnected)?;

    if !characteristics.contains_key(&characteristic) {
        return Err(Error::CharacteristicNotFound {
            uuid: characteristic.to_string(),
        });
    }

    Ok(handle.uuid)
}

/// State machine for a single probe session.
#[derive(Debug)]
pub struct GattSession {
    state: SessionState,
    filter: DeviceFilter,
    scan_timeout: Duration,
    write_mode: WriteMode,
    device: Option<Advertisement>,
    measurement_service: Option<ServiceHandle>,
    control_service: Option<ServiceHandle>,
    assembler: MeasurementAssembler,
}

impl GattSession {
    /// Create an idle session.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: SessionState::Idle,
            filter: config.filter(),
            scan_timeout: config.scan_timeout,
            write_mode: config.write_mode(),
            device: None,
            measurement_service: None,
            control_service: None,
            assembler: MeasurementAssembler::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The accepted device, while a connection attempt is alive.
    pub fn device(&self) -> Option<&Advertisement> {
        self.device.as_ref()
    }

    /// Begin scanning for a probe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is idle,
    /// disconnected or failed.
    pub fn start_scan(&mut self) -> Result<Output> {
        if !self.state.can_start_scan() {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
            });
        }

        info!("Starting BLE scan for devices named {}*", self.filter.name_prefix());

        let mut out = Output::default();
        self.release();
        self.set_state(SessionState::Scanning, &mut out);
        out.commands.push(Command::StartScan {
            timeout: self.scan_timeout,
        });
        Ok(out)
    }

    /// Abort an active scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the session is not scanning.
    pub fn stop_scan(&mut self) -> Result<Output> {
        if self.state != SessionState::Scanning {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
            });
        }

        info!("Stopping BLE scan");

        let mut out = Output::default();
        out.commands.push(Command::StopScan);
        self.set_state(SessionState::Idle, &mut out);
        Ok(out)
    }

    /// Request the link to be dropped.
    ///
    /// The state changes once the transport reports `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if no device is held.
    pub fn disconnect(&mut self) -> Result<Output> {
        if self.device.is_none() {
            return Err(Error::NotConnected);
        }

        let mut out = Output::default();
        out.commands.push(Command::Disconnect);
        Ok(out)
    }

    /// Build the last-time write for `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] until the measurement sync service is
    /// resolved, or [`Error::CharacteristicNotFound`] if it lacks the
    /// last-time characteristic.
    pub fn write_device_time(&self, timestamp: &DeviceTimestamp) -> Result<Command> {
        let service = write_target(self.measurement_service.as_ref(), LAST_TIME_UUID)?;

        Ok(Command::WriteCharacteristic {
            service,
            characteristic: LAST_TIME_UUID,
            value: encode_time_write(timestamp).to_vec(),
            mode: self.write_mode,
        })
    }

    /// Build a device control write for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] until the device control service is
    /// resolved, or [`Error::CharacteristicNotFound`] if it lacks the control
    /// characteristic.
    pub fn send_command(&self, command: &[u8]) -> Result<Command> {
        let service = write_target(self.control_service.as_ref(), DEVICE_CONTROL_UUID)?;

        Ok(Command::WriteCharacteristic {
            service,
            characteristic: DEVICE_CONTROL_UUID,
            value: encode_command(command),
            mode: self.write_mode,
        })
    }

    /// Advance the state machine with one transport event.
    pub fn handle(&mut self, event: SessionEvent) -> Output {
        let mut out = Output::default();

        match event {
            SessionEvent::DeviceFound(advertisement) => {
                self.on_device_found(advertisement, &mut out)
            }
            SessionEvent::ScanDone => self.on_scan_done(&mut out),
            SessionEvent::ScanError(reason) => self.on_scan_error(reason, &mut out),
            SessionEvent::Connected => self.on_connected(&mut out),
            SessionEvent::Disconnected => self.on_disconnected(&mut out),
            SessionEvent::ControllerError(reason) => self.on_controller_error(reason, &mut out),
            SessionEvent::ServiceFound(uuid) => self.on_service_found(uuid),
            SessionEvent::ServicesDone => self.on_services_done(&mut out),
            SessionEvent::ServiceResolved {
                service,
                characteristics,
            } => self.on_service_resolved(service, characteristics, &mut out),
            SessionEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_characteristic_changed(characteristic, &value, &mut out),
        }

        out
    }

    fn on_device_found(&mut self, advertisement: Advertisement, out: &mut Output) {
        if self.state != SessionState::Scanning {
            trace!("Ignoring advertisement outside of scan: {}", advertisement.identifier);
            return;
        }

        if !self.filter.accepts(&advertisement) {
            trace!(
                "Ignoring device {} ({:?})",
                advertisement.identifier,
                advertisement.name
            );
            return;
        }

        info!(
            "Device found: {} ({})",
            advertisement.name.as_deref().unwrap_or_default(),
            advertisement.identifier
        );

        out.commands.push(Command::StopScan);
        out.commands.push(Command::Connect {
            identifier: advertisement.identifier.clone(),
        });
        self.device = Some(advertisement);
        self.set_state(SessionState::Connecting, out);
    }

    fn on_scan_done(&mut self, out: &mut Output) {
        if self.state != SessionState::Scanning {
            debug!("Ignoring scan completion in state {}", self.state);
            return;
        }

        info!("Scan finished without finding a probe");
        out.info("Scan finished");
        self.set_state(SessionState::Idle, out);
    }

    fn on_scan_error(&mut self, reason: String, out: &mut Output) {
        warn!("Scan error: {}", reason);
        out.info(format!("Scan error: {}", reason));

        if self.state == SessionState::Scanning {
            self.set_state(SessionState::Idle, out);
        }
    }

    fn on_connected(&mut self, out: &mut Output) {
        if self.state != SessionState::Connecting {
            debug!("Ignoring connection event in state {}", self.state);
            return;
        }

        out.info("Connected");
        out.commands.push(Command::DiscoverServices);
        self.set_state(SessionState::DiscoveringServices, out);
    }

    fn on_service_found(&mut self, uuid: Uuid) {
        if self.state != SessionState::DiscoveringServices {
            debug!("Ignoring service {} in state {}", uuid, self.state);
            return;
        }

        match ServiceKind::classify(&uuid) {
            ServiceKind::MeasurementSync => {
                debug!("Found measurement sync service");
                self.measurement_service = Some(ServiceHandle::new(uuid));
            }
            ServiceKind::DeviceControl => {
                debug!("Found device control service");
                self.control_service = Some(ServiceHandle::new(uuid));
            }
            ServiceKind::Battery | ServiceKind::DeviceInfo => {
                debug!("Found optional service {}", uuid);
            }
            ServiceKind::Unknown => {
                trace!("Ignoring unknown service {}", uuid);
            }
        }
    }

    fn on_services_done(&mut self, out: &mut Output) {
        if self.state != SessionState::DiscoveringServices {
            debug!("Ignoring service discovery completion in state {}", self.state);
            return;
        }

        out.events.push(ClientEvent::Connected);
        self.set_state(SessionState::SubscribingIndications, out);

        if let Some(service) = &self.measurement_service {
            out.commands.push(Command::DiscoverDetails {
                service: service.uuid,
            });
        }
        if let Some(service) = &self.control_service {
            out.commands.push(Command::DiscoverDetails {
                service: service.uuid,
            });
        } else {
            warn!("Device control service not found");
        }

        if self.measurement_service.is_none() {
            warn!("Measurement sync service not found, no measurements will stream");
            out.info("Measurement service missing");
            self.set_state(SessionState::Streaming, out);
        }
    }

    fn on_service_resolved(
        &mut self,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
        out: &mut Output,
    ) {
        if !matches!(
            self.state,
            SessionState::SubscribingIndications | SessionState::Streaming
        ) {
            debug!("Ignoring resolved service {} in state {}", service, self.state);
            return;
        }

        debug!(
            "Service {} resolved with {} characteristics",
            service,
            characteristics.len()
        );

        match ServiceKind::classify(&service) {
            ServiceKind::MeasurementSync => {
                let Some(handle) = self.measurement_service.as_mut() else {
                    return;
                };
                handle.resolve(characteristics);
                self.subscribe_indications(out);

                if self.state == SessionState::SubscribingIndications {
                    self.set_state(SessionState::Streaming, out);
                }
            }
            ServiceKind::DeviceControl => {
                let Some(handle) = self.control_service.as_mut() else {
                    return;
                };
                handle.resolve(characteristics);

                if handle.characteristic(&DEVICE_CONTROL_UUID).is_none() {
                    warn!("Characteristic {} missing", DEVICE_CONTROL_UUID);
                    out.info(format!("Characteristic {} missing", DEVICE_CONTROL_UUID));
                }
            }
            _ => {}
        }
    }

    /// Enable indications on each measurement characteristic that is present.
    fn subscribe_indications(&self, out: &mut Output) {
        let Some(handle) = &self.measurement_service else {
            return;
        };

        for kind in FragmentKind::ALL {
            let uuid = fragment_characteristic(kind);

            let Some(characteristic) = handle.characteristic(&uuid) else {
                warn!("Characteristic {} missing", uuid);
                out.info(format!("Characteristic {} missing", uuid));
                continue;
            };

            if !characteristic.has_descriptor(&CCCD_UUID) {
                warn!("CCC missing for {}", uuid);
                out.info(format!("CCC missing for {}", uuid));
                continue;
            }

            debug!("Enabling {} indications", kind);
            out.commands.push(Command::WriteDescriptor {
                service: handle.uuid,
                characteristic: uuid,
                descriptor: CCCD_UUID,
                value: ENABLE_INDICATION_VALUE.to_vec(),
            });
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: Uuid, value: &[u8], out: &mut Output) {
        if !matches!(
            self.state,
            SessionState::SubscribingIndications | SessionState::Streaming
        ) {
            debug!("Ignoring value of {} in state {}", characteristic, self.state);
            return;
        }

        let Some(kind) = fragment_kind(&characteristic) else {
            trace!("Ignoring value of characteristic {}", characteristic);
            return;
        };

        trace!("{} indication: {} bytes {:02X?}", kind, value.len(), value);

        match decode_fragment(kind, value) {
            Ok(fragment) => {
                if let Some(measurement) = self.assembler.push(fragment) {
                    debug!("Measurement complete: {}", measurement);
                    out.events.push(ClientEvent::Measurement(measurement));
                }
            }
            Err(e) => {
                warn!("Dropping {} fragment: {}", kind, e);
                out.info(format!("Dropped {} fragment: {}", kind, e));
            }
        }
    }

    fn on_disconnected(&mut self, out: &mut Output) {
        if self.device.is_none() {
            debug!("Ignoring disconnect in state {}", self.state);
            return;
        }

        info!("Probe disconnected");
        self.release();
        out.events.push(ClientEvent::Disconnected);
        self.set_state(SessionState::Disconnected, out);
    }

    fn on_controller_error(&mut self, reason: String, out: &mut Output) {
        warn!("Controller error: {}", reason);
        out.info(format!("Controller error: {}", reason));

        let was_connected = self.state.is_connected();
        if self.device.is_some() {
            out.commands.push(Command::Disconnect);
        }
        self.release();

        if was_connected {
            out.events.push(ClientEvent::Disconnected);
        }
        self.set_state(SessionState::Failed(reason), out);
    }

    /// Drop the device, service handles and any partial measurement.
    fn release(&mut self) {
        self.device = None;
        self.measurement_service = None;
        self.control_service = None;
        self.assembler.reset();
    }

    fn set_state(&mut self, new_state: SessionState, out: &mut Output) {
        if self.state == new_state {
            return;
        }

        debug!("Session state changed: {} -> {}", self.state, new_state);
        self.state = new_state.clone();
        out.events.push(ClientEvent::StateChanged(new_state));
    }
}
