//! The inbound command pipeline and the sequences derived from it.
//!
//! Notifications from the protocol notify characteristic are decoded to
//! text, reassembled into frames, grammar-checked and decoded. Every
//! surviving command is published once on a multicast channel. Derived
//! values that late subscribers need (last sample, battery, config
//! echoes) are kept in `watch` slots and replayed on subscribe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opperlink_frame::{decode_chunk, Attribute, AttributeCommand, FrameReassembler, GrammarRegistry};
use opperlink_transport::{CharacteristicValue, ADVERTISE_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{
    DEFAULT_ACCURACY, DEFAULT_FILTER, DEFAULT_IDLE_MINUTES, DEFAULT_LOCK_THRESHOLD,
    DEFAULT_STABILITY_WINDOW, LOW_BATTERY,
};
use crate::parser::{DefaultWeightParser, Stability, StabilityWindow, WeightParser};

/// Battery report of the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    /// Charge level, 0 to 100 on current firmware.
    pub level: u16,
    /// Whether the scale is on its charger.
    pub charging: bool,
}

impl Battery {
    pub fn is_low(&self) -> bool {
        self.level <= LOW_BATTERY
    }
}

/// Device-initiated notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceEvent {
    /// The scale will power itself off in `seconds`.
    AutoClose { seconds: u32 },
}

/// Shared multicast sequence of validated inbound commands.
///
/// Cloning is cheap; all clones publish to and subscribe from the same
/// channels.
#[derive(Clone)]
pub struct CommandStream {
    inner: Arc<StreamInner>,
    stability_window: usize,
}

/// A published command and the connection it arrived on.
#[derive(Debug, Clone)]
struct Inbound {
    connection: u64,
    command: Arc<AttributeCommand>,
}

struct StreamInner {
    grammars: GrammarRegistry,
    connection: AtomicU64,
    commands: broadcast::Sender<Inbound>,
    events: broadcast::Sender<DeviceEvent>,
    parser: watch::Sender<Arc<dyn WeightParser>>,
    sample: watch::Sender<Option<i64>>,
    battery: watch::Sender<Option<Battery>>,
    idle: watch::Sender<u32>,
    accuracy: watch::Sender<f64>,
    lock: watch::Sender<f64>,
    filter: watch::Sender<u32>,
}

impl std::fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStream")
            .field("subscribers", &self.inner.commands.receiver_count())
            .field("parser", &self.inner.parser.borrow().id())
            .field("stability_window", &self.stability_window)
            .finish_non_exhaustive()
    }
}

impl CommandStream {
    pub fn new(grammars: GrammarRegistry, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (commands, _) = broadcast::channel(capacity);
        let (events, _) = broadcast::channel(capacity);
        let parser: Arc<dyn WeightParser> = Arc::new(DefaultWeightParser);

        Self {
            inner: Arc::new(StreamInner {
                grammars,
                connection: AtomicU64::new(0),
                commands,
                events,
                parser: watch::Sender::new(parser),
                sample: watch::Sender::new(None),
                battery: watch::Sender::new(None),
                idle: watch::Sender::new(DEFAULT_IDLE_MINUTES),
                accuracy: watch::Sender::new(DEFAULT_ACCURACY),
                lock: watch::Sender::new(DEFAULT_LOCK_THRESHOLD),
                filter: watch::Sender::new(DEFAULT_FILTER),
            }),
            stability_window: DEFAULT_STABILITY_WINDOW,
        }
    }

    /// Use `window` readings for [`stable_weights`](Self::stable_weights)
    /// and [`unstable_weights`](Self::unstable_weights).
    pub fn with_stability_window(self, window: usize) -> Self {
        Self {
            stability_window: window.max(1),
            ..self
        }
    }

    pub fn stability_window(&self) -> usize {
        self.stability_window
    }

    pub(crate) fn grammars(&self) -> &GrammarRegistry {
        &self.inner.grammars
    }

    /// Every validated inbound command.
    pub fn commands(&self) -> CommandSubscription {
        CommandSubscription {
            rx: self.inner.commands.subscribe(),
        }
    }

    /// Weight in grams of every weight frame, via the current parser.
    pub fn weights(&self) -> WeightSubscription {
        WeightSubscription {
            commands: self.commands(),
            parser: self.inner.parser.subscribe(),
        }
    }

    /// Stable weights over the configured window.
    pub fn stable_weights(&self) -> WindowedWeightSubscription {
        self.stable_weights_over(self.stability_window)
    }

    /// Unstable weights over the configured window.
    pub fn unstable_weights(&self) -> WindowedWeightSubscription {
        self.unstable_weights_over(self.stability_window)
    }

    /// Weight of the latest reading whenever the last `window` readings were all stable.
    ///
    /// The window starts empty again on every new connection.
    pub fn stable_weights_over(&self, window: usize) -> WindowedWeightSubscription {
        self.windowed(window, Stability::Stable)
    }

    /// Weight of the latest reading whenever the last `window` readings were all unstable.
    pub fn unstable_weights_over(&self, window: usize) -> WindowedWeightSubscription {
        self.windowed(window, Stability::Unstable)
    }

    fn windowed(&self, window: usize, target: Stability) -> WindowedWeightSubscription {
        WindowedWeightSubscription {
            weights: self.weights(),
            window: StabilityWindow::new(window, target),
            connection: None,
        }
    }

    /// Last ADC sample reported alongside a weight reading.
    pub fn samples(&self) -> watch::Receiver<Option<i64>> {
        self.inner.sample.subscribe()
    }

    /// Last battery report.
    pub fn battery(&self) -> watch::Receiver<Option<Battery>> {
        self.inner.battery.subscribe()
    }

    /// Idle power-off timeout in minutes.
    pub fn idle(&self) -> watch::Receiver<u32> {
        self.inner.idle.subscribe()
    }

    /// Display accuracy in grams.
    pub fn accuracy(&self) -> watch::Receiver<f64> {
        self.inner.accuracy.subscribe()
    }

    /// Stability lock threshold in grams.
    pub fn lock(&self) -> watch::Receiver<f64> {
        self.inner.lock.subscribe()
    }

    /// Output filter level.
    pub fn filter(&self) -> watch::Receiver<u32> {
        self.inner.filter.subscribe()
    }

    /// Device-initiated events.
    pub fn events(&self) -> EventSubscription {
        EventSubscription {
            rx: self.inner.events.subscribe(),
        }
    }

    /// Replace the weight parsing strategy.
    pub fn set_parser(&self, parser: Arc<dyn WeightParser>) {
        debug!(parser = parser.id(), "weight parser replaced");
        self.inner.parser.send_replace(parser);
    }

    /// Current weight parsing strategy.
    pub fn parser(&self) -> Arc<dyn WeightParser> {
        self.inner.parser.borrow().clone()
    }

    pub(crate) fn record_idle(&self, minutes: u32) {
        self.inner.idle.send_replace(minutes);
    }

    pub(crate) fn record_accuracy(&self, grams: f64) {
        self.inner.accuracy.send_replace(grams);
    }

    pub(crate) fn record_lock(&self, grams: f64) {
        self.inner.lock.send_replace(grams);
    }

    pub(crate) fn record_filter(&self, level: u32) {
        self.inner.filter.send_replace(level);
    }

    /// Feed transport notifications through the pipeline until `cancel` fires.
    ///
    /// Reassembly state lives in this call, so each connection starts clean.
    pub(crate) async fn pump(
        self,
        mut values: broadcast::Receiver<CharacteristicValue>,
        cancel: CancellationToken,
    ) {
        let connection = self.inner.connection.fetch_add(1, Ordering::AcqRel) + 1;
        let mut reassembler = FrameReassembler::new();
        loop {
            let value = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = values.recv() => match received {
                    Ok(value) => value,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification receiver lagged; dropping partial frame");
                        reassembler.reset();
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if !value.is_from(ADVERTISE_SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID) {
                continue;
            }

            let chunk = decode_chunk(&value.value);
            trace!(chunk = %chunk.escape_debug(), "raw notification");
            for frame in reassembler.push(&chunk) {
                self.ingest(&frame, connection);
            }
        }
        debug!(connection, "command pipeline stopped");
    }

    /// Publish one frame as part of the current connection.
    #[cfg(test)]
    pub(crate) fn ingest_frame(&self, frame: &str) -> Option<Arc<AttributeCommand>> {
        self.ingest(frame, self.inner.connection.load(Ordering::Acquire))
    }

    /// Validate, decode and publish one frame. Malformed frames are dropped.
    fn ingest(&self, frame: &str, connection: u64) -> Option<Arc<AttributeCommand>> {
        match self.inner.grammars.parse(frame) {
            Ok(command) => Some(self.publish(command, connection)),
            Err(err) => {
                debug!(%err, "dropped malformed frame");
                None
            }
        }
    }

    fn publish(&self, command: AttributeCommand, connection: u64) -> Arc<AttributeCommand> {
        debug!(command = %command, "inbound");
        let inner = &self.inner;
        match &command.attribute {
            Attribute::Weight => {
                if let Some(sample) = command.number::<i64>(1) {
                    inner.sample.send_replace(Some(sample));
                }
            }
            Attribute::Battery => {
                if let (Some(level), Some(charging)) =
                    (command.number::<u16>(0), command.number::<u8>(1))
                {
                    inner.battery.send_replace(Some(Battery {
                        level,
                        charging: charging == 1,
                    }));
                }
            }
            Attribute::IdleTimeout => {
                if let Some(minutes) = command.number(0) {
                    inner.idle.send_replace(minutes);
                }
            }
            Attribute::Accuracy => {
                if let Some(grams) = command.number(0) {
                    inner.accuracy.send_replace(grams);
                }
            }
            Attribute::LockThreshold => {
                if let Some(grams) = command.number(0) {
                    inner.lock.send_replace(grams);
                }
            }
            Attribute::Filter => {
                if let Some(level) = command.number(0) {
                    inner.filter.send_replace(level);
                }
            }
            Attribute::AutoClose => {
                if let Some(seconds) = command.number(0) {
                    let _ = inner.events.send(DeviceEvent::AutoClose { seconds });
                }
            }
            _ => {}
        }

        let command = Arc::new(command);
        let _ = inner.commands.send(Inbound {
            connection,
            command: Arc::clone(&command),
        });
        command
    }
}

/// Receiver of every validated inbound command.
#[derive(Debug)]
pub struct CommandSubscription {
    rx: broadcast::Receiver<Inbound>,
}

impl CommandSubscription {
    /// Next command, or `None` once the stream is gone.
    ///
    /// Commands missed because the subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<Arc<AttributeCommand>> {
        self.recv_inbound().await.map(|inbound| inbound.command)
    }

    async fn recv_inbound(&mut self) -> Option<Inbound> {
        loop {
            match self.rx.recv().await {
                Ok(inbound) => return Some(inbound),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "command subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next command of the given attribute.
    pub async fn recv_attribute(&mut self, attribute: &Attribute) -> Option<Arc<AttributeCommand>> {
        self.recv_inbound_attribute(attribute)
            .await
            .map(|inbound| inbound.command)
    }

    async fn recv_inbound_attribute(&mut self, attribute: &Attribute) -> Option<Inbound> {
        loop {
            let inbound = self.recv_inbound().await?;
            if &inbound.command.attribute == attribute {
                return Some(inbound);
            }
        }
    }
}

/// Receiver of parsed weights.
#[derive(Debug)]
pub struct WeightSubscription {
    commands: CommandSubscription,
    parser: watch::Receiver<Arc<dyn WeightParser>>,
}

impl WeightSubscription {
    /// Next weight in grams.
    pub async fn recv(&mut self) -> Option<f64> {
        loop {
            let (_, weight) = self.recv_reading().await?;
            if let Some(weight) = weight {
                return Some(weight);
            }
        }
    }

    async fn recv_reading(&mut self) -> Option<(Inbound, Option<f64>)> {
        let inbound = self
            .commands
            .recv_inbound_attribute(&Attribute::Weight)
            .await?;
        let weight = self.parser.borrow().weight(&inbound.command);
        Some((inbound, weight))
    }
}

/// Receiver of weights that passed a stability window.
#[derive(Debug)]
pub struct WindowedWeightSubscription {
    weights: WeightSubscription,
    window: StabilityWindow,
    connection: Option<u64>,
}

impl WindowedWeightSubscription {
    /// Next weight whose window matched.
    pub async fn recv(&mut self) -> Option<f64> {
        loop {
            let (inbound, weight) = self.weights.recv_reading().await?;
            if self.connection.replace(inbound.connection) != Some(inbound.connection) {
                self.window.clear();
            }
            if self.window.push(&inbound.command) {
                if let Some(weight) = weight {
                    return Some(weight);
                }
            }
        }
    }
}

/// Receiver of device events.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use opperlink_transport::WRITE_CHARACTERISTIC_UUID;

    fn stream() -> CommandStream {
        CommandStream::new(GrammarRegistry::new(), 16)
    }

    #[derive(Debug)]
    struct KilogramParser;

    impl WeightParser for KilogramParser {
        fn id(&self) -> &str {
            "kg"
        }

        fn weight(&self, command: &AttributeCommand) -> Option<f64> {
            command.number::<f64>(0).map(|grams| grams / 1000.0)
        }
    }

    #[tokio::test]
    async fn malformed_frames_never_reach_subscribers() {
        let stream = stream();
        let mut commands = stream.commands();

        assert!(stream.ingest_frame("ATT+ACK=2").is_none());
        assert!(stream.ingest_frame("ATT+WGT=-1.23,1721251").is_none());
        assert!(stream.ingest_frame("garbage").is_none());
        stream.ingest_frame("ATT+ACK=0");

        let command = commands.recv().await.unwrap();
        assert_eq!(command.attribute, Attribute::Acknowledge);
        assert_eq!(command.value, vec!["0"]);
    }

    #[tokio::test]
    async fn stable_window_of_three() {
        let stream = stream();
        let mut stable = stream.stable_weights_over(3);

        for frame in [
            "ATT+WGT=10,100,1",
            "ATT+WGT=11,100,1",
            "ATT+WGT=12,100,0",
            "ATT+WGT=13,100,1",
            "ATT+WGT=14,100,1",
            "ATT+WGT=15,100,1",
        ] {
            stream.ingest_frame(frame);
        }

        assert_eq!(stable.recv().await, Some(15.0));
        drop(stream);
        assert_eq!(stable.recv().await, None);
    }

    #[tokio::test]
    async fn unstable_window_ignores_stable_readings() {
        let stream = stream();
        let mut unstable = stream.unstable_weights_over(2);
        for frame in ["ATT+WGT=1,1,0", "ATT+WGT=2,1,1", "ATT+WGT=3,1,0", "ATT+WGT=4,1,0"] {
            stream.ingest_frame(frame);
        }
        assert_eq!(unstable.recv().await, Some(4.0));
    }

    #[tokio::test]
    async fn default_window_passes_every_stable_reading() {
        let stream = stream();
        assert_eq!(stream.stability_window(), 1);
        let mut stable = stream.stable_weights();
        for frame in ["ATT+WGT=1,1,1", "ATT+WGT=2,1,0", "ATT+WGT=3,1,1"] {
            stream.ingest_frame(frame);
        }
        assert_eq!(stable.recv().await, Some(1.0));
        assert_eq!(stable.recv().await, Some(3.0));
    }

    #[tokio::test]
    async fn configured_window_applies_to_default_subscriptions() {
        let stream = stream().with_stability_window(2);
        let mut unstable = stream.unstable_weights();
        for frame in ["ATT+WGT=1,1,0", "ATT+WGT=2,1,1", "ATT+WGT=3,1,0", "ATT+WGT=4,1,0"] {
            stream.ingest_frame(frame);
        }
        assert_eq!(unstable.recv().await, Some(4.0));
    }

    #[tokio::test]
    async fn window_restarts_on_a_new_connection() {
        let stream = stream();
        let mut stable = stream.stable_weights_over(3);

        stream.ingest("ATT+WGT=1,1,1", 1);
        stream.ingest("ATT+WGT=2,1,1", 1);
        stream.ingest("ATT+WGT=3,1,1", 2);
        stream.ingest("ATT+WGT=4,1,1", 2);
        stream.ingest("ATT+WGT=5,1,1", 2);

        assert_eq!(stable.recv().await, Some(5.0));
    }

    #[tokio::test]
    async fn parser_swap_applies_to_existing_subscribers() {
        let stream = stream();
        let mut weights = stream.weights();

        stream.ingest_frame("ATT+WGT=1500,100,1");
        assert_eq!(weights.recv().await, Some(1500.0));

        stream.set_parser(Arc::new(KilogramParser));
        stream.ingest_frame("ATT+WGT=1500,100,1");
        assert_eq!(weights.recv().await, Some(1.5));
        assert_eq!(stream.parser().id(), "kg");
    }

    #[tokio::test]
    async fn replayed_values_reach_late_subscribers() {
        let stream = stream();
        assert_eq!(*stream.idle().borrow(), DEFAULT_IDLE_MINUTES);
        assert_eq!(*stream.filter().borrow(), DEFAULT_FILTER);
        assert_eq!(*stream.samples().borrow(), None);

        stream.ingest_frame("ATT+WGT=-1.23,1721251,1");
        stream.ingest_frame("ATT+BAT=15,1");
        stream.ingest_frame("ATT+IDLE=5");
        stream.ingest_frame("ATT+ACCURACY=0.1");
        stream.ingest_frame("ATT+LOCK=2.5");
        stream.ingest_frame("ATT+FILTER=20");

        assert_eq!(*stream.samples().borrow(), Some(1_721_251));
        let battery = (*stream.battery().borrow()).unwrap();
        assert_eq!(battery, Battery { level: 15, charging: true });
        assert!(battery.is_low());
        assert_eq!(*stream.idle().borrow(), 5);
        assert_eq!(*stream.accuracy().borrow(), 0.1);
        assert_eq!(*stream.lock().borrow(), 2.5);
        assert_eq!(*stream.filter().borrow(), 20);
    }

    #[tokio::test]
    async fn auto_close_becomes_event() {
        let stream = stream();
        let mut events = stream.events();
        stream.ingest_frame("ATT+AUTO_CLOSE=30");
        assert_eq!(events.recv().await, Some(DeviceEvent::AutoClose { seconds: 30 }));
    }

    #[tokio::test]
    async fn pump_reassembles_notify_characteristic_only() {
        let stream = stream();
        let mut commands = stream.commands();
        let (tx, rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(stream.clone().pump(rx, cancel.clone()));

        let notify = |chunk: &'static [u8]| {
            CharacteristicValue::new(
                ADVERTISE_SERVICE_UUID,
                NOTIFY_CHARACTERISTIC_UUID.to_ascii_lowercase(),
                Bytes::from_static(chunk),
            )
        };
        tx.send(notify(b"ATT+BA")).unwrap();
        tx.send(CharacteristicValue::new(
            ADVERTISE_SERVICE_UUID,
            WRITE_CHARACTERISTIC_UUID,
            Bytes::from_static(b"ATT+ACK=0\r\n"),
        ))
        .unwrap();
        tx.send(notify(b"T=99,\x000\r\nATT+IDLE=x\r\nATT+CHECK\r\n")).unwrap();

        let first = commands.recv().await.unwrap();
        assert_eq!(first.to_string(), "ATT+BAT=99,0");
        let second = commands.recv().await.unwrap();
        assert_eq!(second.attribute, Attribute::HealthCheck);

        cancel.cancel();
        task.await.unwrap();
    }
}
