//! Client for a BRIC5 probe session.
//!
//! [`BricClient`] owns a background driver task. The driver feeds transport
//! events and API requests into the [`GattSession`] state machine one at a
//! time, executes the commands it returns against a [`GattTransport`], and
//! publishes the resulting [`ClientEvent`]s on a broadcast channel.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::platform::BtleplugTransport;
use crate::ble::transport::GattTransport;
use crate::config::ClientConfig;
use crate::data::{DeviceTimestamp, Measurement};
use crate::error::{Error, Result};
use crate::session::{ClientEvent, Command, GattSession, Output, SessionEvent, SessionState};

/// Registration returned by [`BricClient::on_event`] and
/// [`BricClient::on_measurement`].
///
/// Each registration runs its own forwarding task over the event broadcast.
/// Dropping the handle cancels that task.
pub struct CallbackHandle {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop delivering events to the callback now.
    pub fn unregister(mut self) {
        self.cancel_task();
    }

    /// Registration number, unique per client.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn cancel_task(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

type Reply = oneshot::Sender<Result<()>>;

/// API call forwarded to the driver task.
enum Request {
    StartScan(Reply),
    StopScan(Reply),
    WriteDeviceTime(DeviceTimestamp, Reply),
    SendCommand(Vec<u8>, Reply),
    Disconnect(Reply),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a probe session.
pub struct BricClient {
    /// Requests to the driver task.
    request_tx: mpsc::UnboundedSender<Request>,
    /// Published client events.
    event_tx: broadcast::Sender<ClientEvent>,
    /// Last published session state.
    state: Arc<RwLock<SessionState>>,
    /// Driver task handle.
    driver_handle: Mutex<Option<JoinHandle<()>>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl BricClient {
    /// Create a client on the host Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = BtleplugTransport::new(inbound_tx).await?;

        Ok(Self::with_transport(
            Arc::new(transport),
            inbound_rx,
            config,
        ))
    }

    /// Create a client over an arbitrary transport.
    ///
    /// The transport reports its events on the sender half of `inbound`.
    /// Must be called within a Tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn GattTransport>,
        inbound: mpsc::UnboundedReceiver<SessionEvent>,
        config: ClientConfig,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let state = Arc::new(RwLock::new(SessionState::Idle));

        let driver = Driver {
            session: GattSession::new(&config),
            transport,
            event_tx: event_tx.clone(),
            state: state.clone(),
        };
        let handle = tokio::spawn(driver.run(request_rx, inbound));

        Self {
            request_tx,
            event_tx,
            state,
            driver_handle: Mutex::new(Some(handle)),
            callback_counter: AtomicU64::new(0),
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(make(reply_tx))
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Start scanning for a probe. The first matching device is connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is idle,
    /// disconnected or failed.
    pub async fn start_scan(&self) -> Result<()> {
        self.request(Request::StartScan).await
    }

    /// Abort an active scan.
    pub async fn stop_scan(&self) -> Result<()> {
        self.request(Request::StopScan).await
    }

    /// Write `timestamp` to the probe's last-time characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] until the measurement service has been
    /// resolved.
    pub async fn write_device_time(&self, timestamp: DeviceTimestamp) -> Result<()> {
        self.request(|reply| Request::WriteDeviceTime(timestamp, reply))
            .await
    }

    /// Write the host's local time to the probe.
    pub async fn sync_device_time(&self) -> Result<()> {
        self.write_device_time(DeviceTimestamp::now_local()).await
    }

    /// Send raw bytes to the device control characteristic.
    ///
    /// Commands longer than 20 bytes are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] until the control service has been
    /// resolved.
    pub async fn send_command(&self, command: impl AsRef<[u8]>) -> Result<()> {
        let command = command.as_ref().to_vec();
        self.request(|reply| Request::SendCommand(command, reply))
            .await
    }

    /// Drop the link to the probe.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect).await
    }

    /// Stop the session, releasing the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the driver task terminated
    /// abnormally.
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.request_tx.send(Request::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }

        let handle = self.driver_handle.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                error!("Session driver terminated abnormally: {}", e);
                Error::SessionClosed
            })?;
        }

        Ok(())
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Check if measurements are streaming.
    pub fn is_streaming(&self) -> bool {
        *self.state.read() == SessionState::Streaming
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for complete measurements.
    pub fn on_measurement<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Measurement) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::Measurement(measurement) = event {
                callback(measurement);
            }
        })
    }

    /// Register a callback for every client event.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Callback {} skipped {} events", callback_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

/// Background task serializing all session access.
struct Driver {
    session: GattSession,
    transport: Arc<dyn GattTransport>,
    event_tx: broadcast::Sender<ClientEvent>,
    state: Arc<RwLock<SessionState>>,
}

impl Driver {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut inbound: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!("Session driver started");

        loop {
            // Queued transport events go first, so a request sent after an
            // event is observed sees every resolution that event triggered
            tokio::select! {
                biased;

                Some(event) = inbound.recv() => {
                    trace!("Transport event: {:?}", event);
                    let out = self.session.handle(event);
                    self.process(out).await;
                }
                request = requests.recv() => match request {
                    Some(Request::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(request) => self.on_request(request).await,
                    None => {
                        debug!("Client dropped");
                        break;
                    }
                },
            }
        }

        debug!("Session driver stopped");
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::StartScan(reply) => {
                let result = self.session.start_scan();
                self.reply_and_process(result, reply).await;
            }
            Request::StopScan(reply) => {
                let result = self.session.stop_scan();
                self.reply_and_process(result, reply).await;
            }
            Request::Disconnect(reply) => {
                let result = self.session.disconnect();
                self.reply_and_process(result, reply).await;
            }
            Request::WriteDeviceTime(timestamp, reply) => {
                debug!("Writing device time {}", timestamp);
                let result = match self.session.write_device_time(&timestamp) {
                    Ok(command) => self.run_command(&command).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::SendCommand(command, reply) => {
                debug!("Sending command {:02X?}", command);
                let result = match self.session.send_command(&command) {
                    Ok(command) => self.run_command(&command).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn reply_and_process(&mut self, result: Result<Output>, reply: Reply) {
        match result {
            Ok(out) => {
                self.process(out).await;
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Publish events and execute commands, feeding transport failures back
    /// into the session until it settles.
    async fn process(&mut self, out: Output) {
        let mut pending = VecDeque::from([out]);

        while let Some(out) = pending.pop_front() {
            self.publish(out.events);

            for command in out.commands {
                if let Err(e) = self.run_command(&command).await {
                    if let Some(event) = self.failure_event(&command, e) {
                        pending.push_back(self.session.handle(event));
                    }
                }
            }
        }
    }

    async fn run_command(&self, command: &Command) -> Result<()> {
        trace!("Executing {:?}", command);

        match command {
            Command::StartScan { timeout } => self.transport.start_scan(*timeout).await,
            Command::StopScan => self.transport.stop_scan().await,
            Command::Connect { identifier } => self.transport.connect(identifier).await,
            Command::DiscoverServices => self.transport.discover_services().await,
            Command::DiscoverDetails { service } => {
                self.transport.discover_details(*service).await
            }
            Command::WriteDescriptor {
                service,
                characteristic,
                descriptor,
                value,
            } => {
                self.transport
                    .write_descriptor(*service, *characteristic, *descriptor, value)
                    .await
            }
            Command::WriteCharacteristic {
                service,
                characteristic,
                value,
                mode,
            } => {
                self.transport
                    .write_characteristic(*service, *characteristic, value, *mode)
                    .await
            }
            Command::Disconnect => self.transport.disconnect().await,
        }
    }

    /// Map a failed command to the session event that reports it, if any.
    fn failure_event(&self, command: &Command, error: Error) -> Option<SessionEvent> {
        match command {
            Command::StartScan { .. } => Some(SessionEvent::ScanError(error.to_string())),
            Command::Connect { .. }
            | Command::DiscoverServices
            | Command::DiscoverDetails { .. } => {
                Some(SessionEvent::ControllerError(error.to_string()))
            }
            Command::WriteDescriptor { characteristic, .. } => {
                warn!("Failed to enable indications on {}: {}", characteristic, error);
                self.publish(vec![ClientEvent::Info(format!(
                    "Failed to enable indications on {}: {}",
                    characteristic, error
                ))]);
                None
            }
            Command::StopScan | Command::WriteCharacteristic { .. } | Command::Disconnect => {
                warn!("{:?} failed: {}", command, error);
                None
            }
        }
    }

    fn publish(&self, events: Vec<ClientEvent>) {
        for event in events {
            if let ClientEvent::StateChanged(state) = &event {
                *self.state.write() = state.clone();
            }
            if let ClientEvent::Info(message) = &event {
                info!("{}", message);
            }

            // No receivers is fine
            let _ = self.event_tx.send(event);
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session in state {}", self.session.state());

        if *self.session.state() == SessionState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
        if self.session.device().is_some() {
            if let Err(e) = self.transport.disconnect().await {
                warn!("Failed to disconnect: {}", e);
            }
        }
    }
}
