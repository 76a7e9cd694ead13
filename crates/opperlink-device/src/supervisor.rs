use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use opperlink_frame::{decode_chunk, Attribute, AttributeCommand, Value};
use opperlink_transport::{
    uuid_eq, BleTransport, CharacteristicValue, DeviceInfoField, TransportError,
    ADVERTISE_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID,
    WRITE_CHARACTERISTIC_UUID,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ScaleConfig, DEFAULT_TRANSFER_UNIT};
use crate::emitter::Emitter;
use crate::error::{DeviceError, Result};
use crate::negotiate::{negotiate, PayloadSize};
use crate::stream::CommandStream;

/// Lifecycle of the link to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything scoped to one physical connection.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) transport: Arc<dyn BleTransport>,
    pub(crate) payload: Arc<PayloadSize>,
    pub(crate) cancel: CancellationToken,
}

impl Link {
    fn teardown(&self) {
        self.cancel.cancel();
        self.payload.reset();
    }
}

struct ActiveLink {
    id: u64,
    link: Link,
}

/// A connected (or connectable) OPPER scale.
///
/// `Scale` is cheap to clone; clones share the connection and every
/// subscription. Subscriptions taken from [`Scale::stream`] outlive
/// reconnects; work tied to one connection stops when it ends.
#[derive(Clone)]
pub struct Scale {
    shared: Arc<Shared>,
}

struct Shared {
    config: ScaleConfig,
    stream: CommandStream,
    emitter: Emitter,
    state: watch::Sender<ConnectionState>,
    active: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scale")
            .field("state", &self.state())
            .field("transfer_unit", &self.transfer_unit())
            .finish_non_exhaustive()
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new(ScaleConfig::default())
    }
}

impl Scale {
    pub fn new(config: ScaleConfig) -> Self {
        let stream = CommandStream::new(config.grammars.clone(), config.channel_capacity)
            .with_stability_window(config.stability_window);
        let emitter = Emitter::new(stream.clone(), &config);
        Self {
            shared: Arc::new(Shared {
                config,
                stream,
                emitter,
                state: watch::Sender::new(ConnectionState::Disconnected),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Inbound command stream and derived values.
    pub fn stream(&self) -> &CommandStream {
        &self.shared.stream
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver of connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Transfer unit of the current connection, or the protocol default.
    pub fn transfer_unit(&self) -> u16 {
        self.link()
            .map(|link| link.payload.transfer_unit())
            .unwrap_or(DEFAULT_TRANSFER_UNIT)
    }

    /// Connect to a scale through `transport`.
    ///
    /// Any previous connection's background work is stopped first. The
    /// call returns once services and characteristics are discovered, the
    /// transfer unit is negotiated and notifications are enabled. A health
    /// check is sent in the background after the first notification.
    pub async fn connect(&self, transport: Arc<dyn BleTransport>) -> Result<()> {
        let link = Link {
            transport: Arc::clone(&transport),
            payload: Arc::new(PayloadSize::default()),
            cancel: CancellationToken::new(),
        };
        let id = self.install(link.clone());
        info!(device = transport.id(), "connecting");

        let values = transport.subscribe_values();
        self.spawn_drop_watcher(id, &link, transport.subscribe_connection());

        let result = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => Err(DeviceError::Disconnected("connect superseded".into())),
            result = self.establish(id, &link, values) => result,
        };

        if let Err(err) = &result {
            warn!(device = transport.id(), %err, "connect failed");
            self.release(Some(id), "connect failed");
        }
        result
    }

    async fn establish(
        &self,
        id: u64,
        link: &Link,
        values: broadcast::Receiver<CharacteristicValue>,
    ) -> Result<()> {
        let transport = &link.transport;
        let config = &self.shared.config;

        match transport.connect().await {
            Ok(()) => {}
            Err(TransportError::AlreadyConnected) => debug!("transport already connected"),
            Err(err @ TransportError::ConnectionFailed(_)) => {
                if let Err(cleanup) = transport.disconnect().await {
                    warn!(%cleanup, "disconnect after failed connect also failed");
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }

        // Some platform stacks refuse characteristic discovery before services.
        let services = transport.services().await?;
        debug!(services = services.len(), "services discovered");
        self.mark_connected(id);

        let characteristics = transport.characteristics(ADVERTISE_SERVICE_UUID).await?;
        if config.require_characteristics {
            for required in [WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID] {
                if !characteristics.iter().any(|c| uuid_eq(&c.uuid, required)) {
                    return Err(DeviceError::MissingCharacteristic(required.to_string()));
                }
            }
        }

        tokio::spawn(self.shared.stream.clone().pump(values, link.cancel.clone()));

        let transfer_unit = negotiate(transport.as_ref(), &config.transfer_unit_ladder).await;
        link.payload.set(transfer_unit);

        let first_value = transport.subscribe_values();
        transport
            .start_notifications(ADVERTISE_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
            .await?;
        self.spawn_initial_check(link, first_value);

        info!(
            device = transport.id(),
            transfer_unit,
            chunk_len = link.payload.chunk_len(),
            "connected"
        );
        Ok(())
    }

    /// Close the connection. Calling it while disconnected does nothing.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(link) = self.release(None, "disconnect requested") else {
            return Ok(());
        };
        link.transport.disconnect().await?;
        Ok(())
    }

    /// Negotiate the transfer unit again on the live connection.
    pub async fn renegotiate(&self) -> Result<u16> {
        let link = self.link()?;
        let transfer_unit = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => {
                return Err(DeviceError::Disconnected("link closed during negotiation".into()));
            }
            settled = negotiate(link.transport.as_ref(), &self.shared.config.transfer_unit_ladder) => settled,
        };
        link.payload.set(transfer_unit);
        info!(transfer_unit, chunk_len = link.payload.chunk_len(), "transfer unit renegotiated");
        Ok(transfer_unit)
    }

    /// Send a command and wait for its acknowledgement.
    pub async fn emit(
        &self,
        attribute: Attribute,
        value: Option<Value>,
    ) -> Result<Arc<AttributeCommand>> {
        let link = self.link()?;
        self.shared
            .emitter
            .emit(&link, &attribute, value.as_ref())
            .await
    }

    /// Calibrate against a reference weight of `calibration_value` grams.
    ///
    /// `zero_sample` is the sample value read with nothing on the scale.
    /// `correction_sample` is the sample value with the reference weight on
    /// it; when absent, the next live sample is used.
    pub async fn calibrate(
        &self,
        zero_sample: i64,
        calibration_value: f64,
        correction_sample: Option<i64>,
    ) -> Result<Arc<AttributeCommand>> {
        let link = self.link()?;
        self.shared
            .emitter
            .calibrate(&link, zero_sample, calibration_value, correction_sample)
            .await
    }

    pub async fn check(&self) -> Result<Arc<AttributeCommand>> {
        self.emit(Attribute::HealthCheck, None).await
    }

    /// Power the scale off.
    pub async fn shutdown(&self) -> Result<Arc<AttributeCommand>> {
        self.emit(Attribute::PowerOff, None).await
    }

    pub async fn reboot(&self) -> Result<Arc<AttributeCommand>> {
        self.emit(Attribute::Reboot, None).await
    }

    pub async fn factory_reset(&self) -> Result<Arc<AttributeCommand>> {
        self.emit(Attribute::FactoryReset, None).await
    }

    /// Set the idle power-off timeout in minutes.
    pub async fn set_idle(&self, minutes: u32) -> Result<Arc<AttributeCommand>> {
        let ack = self.emit(Attribute::IdleTimeout, Some(minutes.into())).await?;
        self.shared.stream.record_idle(minutes);
        Ok(ack)
    }

    /// Set the display accuracy in grams.
    pub async fn set_accuracy(&self, grams: f64) -> Result<Arc<AttributeCommand>> {
        let ack = self.emit(Attribute::Accuracy, Some(grams.into())).await?;
        self.shared.stream.record_accuracy(grams);
        Ok(ack)
    }

    /// Set the stability lock threshold in grams.
    pub async fn set_lock(&self, grams: f64) -> Result<Arc<AttributeCommand>> {
        let ack = self.emit(Attribute::LockThreshold, Some(grams.into())).await?;
        self.shared.stream.record_lock(grams);
        Ok(ack)
    }

    pub async fn set_filter(&self, level: u32) -> Result<Arc<AttributeCommand>> {
        let ack = self.emit(Attribute::Filter, Some(level.into())).await?;
        self.shared.stream.record_filter(level);
        Ok(ack)
    }

    /// Read one field of the device information service.
    pub async fn device_info(&self, field: DeviceInfoField) -> Result<String> {
        let link = self.link()?;
        let raw = link
            .transport
            .read_characteristic_value(DEVICE_INFO_SERVICE_UUID, field.characteristic_uuid())
            .await?;
        Ok(decode_chunk(&raw))
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> Result<Link> {
        self.slot()
            .as_ref()
            .map(|active| active.link.clone())
            .ok_or(DeviceError::NotConnected)
    }

    fn install(&self, link: Link) -> u64 {
        let id = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.slot().replace(ActiveLink { id, link });
        if let Some(previous) = previous {
            debug!(previous = previous.id, "tearing down previous connection");
            previous.link.teardown();
        }
        self.shared.state.send_replace(ConnectionState::Connecting);
        id
    }

    fn mark_connected(&self, id: u64) {
        let slot = self.slot();
        if slot.as_ref().is_some_and(|active| active.id == id) {
            self.shared.state.send_replace(ConnectionState::Connected);
        }
    }

    /// End the connection `id` (or whichever is active when `None`).
    fn release(&self, id: Option<u64>, reason: &str) -> Option<Link> {
        let active = {
            let mut slot = self.slot();
            if let (Some(active), Some(id)) = (slot.as_ref(), id) {
                if active.id != id {
                    return None;
                }
            }
            slot.take()?
        };
        active.link.teardown();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!(reason, "disconnected");
        Some(active.link)
    }

    fn spawn_drop_watcher(&self, id: u64, link: &Link, mut connection: broadcast::Receiver<bool>) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let cancel = link.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = connection.recv() => event,
                };
                match event {
                    Ok(false) | Err(RecvError::Closed) => break,
                    Ok(true) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connection event receiver lagged");
                    }
                }
            }
            if let Some(shared) = shared.upgrade() {
                Scale { shared }.release(Some(id), "link dropped");
            }
        });
    }

    fn spawn_initial_check(&self, link: &Link, mut first_value: broadcast::Receiver<CharacteristicValue>) {
        let emitter = self.shared.emitter.clone();
        let link = link.clone();
        tokio::spawn(async move {
            let observed = tokio::select! {
                biased;
                _ = link.cancel.cancelled() => return,
                observed = first_value.recv() => observed,
            };
            if let Err(RecvError::Closed) = observed {
                return;
            }
            match emitter.emit(&link, &Attribute::HealthCheck, None).await {
                Ok(_) => debug!("initial health check acknowledged"),
                Err(err) => warn!(%err, "initial health check failed"),
            }
        });
    }
}
