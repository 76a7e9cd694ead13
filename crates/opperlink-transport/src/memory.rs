use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{
    uuid_eq, BleTransport, Characteristic, CharacteristicProperties, CharacteristicValue, Service,
};
use crate::uuids::{
    ADVERTISE_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID, GENERIC_ACCESS_SERVICE_UUID,
    NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID,
};

const EVENT_CAPACITY: usize = 256;
const DEFAULT_TRANSFER_UNIT: u16 = 23;
const DEFAULT_MAX_TRANSFER_UNIT: u16 = 517;
const LINE_DELIMITER: &str = "\r\n";

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// In-process transport that behaves like a connected OPPER scale.
///
/// Writes to the write characteristic are recorded. Once written bytes form
/// a complete `\r\n`-terminated line, the optional responder is called with
/// the line and every chunk it returns is delivered as a notification on the
/// notify characteristic, in order. Failures and link drops can be scripted.
pub struct MemoryTransport {
    id: String,
    values: broadcast::Sender<CharacteristicValue>,
    connection: broadcast::Sender<bool>,
    state: Mutex<MemoryState>,
}

struct MemoryState {
    connected: bool,
    transfer_unit: u16,
    max_transfer_unit: Option<u16>,
    rejected_transfer_units: Vec<u16>,
    transfer_unit_query_fails: bool,
    transfer_unit_stalled: bool,
    connect_errors: VecDeque<TransportError>,
    write_errors: VecDeque<TransportError>,
    services: Vec<Service>,
    characteristics: Vec<(String, Characteristic)>,
    readable: Vec<(String, String, Bytes)>,
    writes: Vec<Bytes>,
    outbound: String,
    responder: Option<Responder>,
    calls: Vec<String>,
}

impl MemoryTransport {
    /// Create a transport exposing the standard OPPER GATT layout.
    pub fn new(id: impl Into<String>) -> Self {
        let (values, _) = broadcast::channel(EVENT_CAPACITY);
        let (connection, _) = broadcast::channel(EVENT_CAPACITY);

        let services = [
            GENERIC_ACCESS_SERVICE_UUID,
            DEVICE_INFO_SERVICE_UUID,
            ADVERTISE_SERVICE_UUID,
        ]
        .into_iter()
        .map(|uuid| Service {
            uuid: uuid.to_string(),
            is_primary: true,
        })
        .collect();

        let characteristics = vec![
            (
                ADVERTISE_SERVICE_UUID.to_string(),
                Characteristic {
                    uuid: WRITE_CHARACTERISTIC_UUID.to_string(),
                    properties: CharacteristicProperties {
                        write: true,
                        write_without_response: true,
                        ..CharacteristicProperties::default()
                    },
                },
            ),
            (
                ADVERTISE_SERVICE_UUID.to_string(),
                Characteristic {
                    uuid: NOTIFY_CHARACTERISTIC_UUID.to_string(),
                    properties: CharacteristicProperties {
                        notify: true,
                        ..CharacteristicProperties::default()
                    },
                },
            ),
        ];

        Self {
            id: id.into(),
            values,
            connection,
            state: Mutex::new(MemoryState {
                connected: false,
                transfer_unit: DEFAULT_TRANSFER_UNIT,
                max_transfer_unit: Some(DEFAULT_MAX_TRANSFER_UNIT),
                rejected_transfer_units: Vec::new(),
                transfer_unit_query_fails: false,
                transfer_unit_stalled: false,
                connect_errors: VecDeque::new(),
                write_errors: VecDeque::new(),
                services,
                characteristics,
                readable: Vec::new(),
                writes: Vec::new(),
                outbound: String::new(),
                responder: None,
                calls: Vec::new(),
            }),
        }
    }

    /// Attach a responder invoked for every complete outbound line.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.set_responder(responder);
        self
    }

    /// Replace the responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    /// Make the next `connect()` fail with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        self.state().connect_errors.push_back(err);
    }

    /// Make the next characteristic write fail with `err`.
    pub fn fail_next_write(&self, err: TransportError) {
        self.state().write_errors.push_back(err);
    }

    /// Reject `set_transfer_unit` for the listed sizes.
    pub fn reject_transfer_units(&self, sizes: &[u16]) {
        self.state().rejected_transfer_units.extend_from_slice(sizes);
    }

    /// Set the largest transfer unit the link accepts; `None` makes
    /// `set_transfer_unit` unsupported.
    pub fn set_max_transfer_unit(&self, max: Option<u16>) {
        self.state().max_transfer_unit = max;
    }

    /// Make `transfer_unit()` fail.
    pub fn fail_transfer_unit_query(&self) {
        self.state().transfer_unit_query_fails = true;
    }

    /// Make every later `set_transfer_unit` call hang forever.
    pub fn stall_transfer_unit(&self) {
        self.state().transfer_unit_stalled = true;
    }

    /// Set the transfer unit the platform reports.
    pub fn set_reported_transfer_unit(&self, value: u16) {
        self.state().transfer_unit = value;
    }

    /// Remove a characteristic from the advertised service.
    pub fn remove_characteristic(&self, characteristic_id: &str) {
        self.state()
            .characteristics
            .retain(|(_, characteristic)| !uuid_eq(&characteristic.uuid, characteristic_id));
    }

    /// Store a value returned by `read_characteristic_value`.
    pub fn set_characteristic_value(
        &self,
        service_id: &str,
        characteristic_id: &str,
        value: impl Into<Bytes>,
    ) {
        let mut state = self.state();
        state
            .readable
            .retain(|(svc, chr, _)| !(uuid_eq(svc, service_id) && uuid_eq(chr, characteristic_id)));
        state.readable.push((
            service_id.to_string(),
            characteristic_id.to_string(),
            value.into(),
        ));
    }

    /// Deliver a notification on the protocol notify characteristic.
    pub fn notify(&self, chunk: impl AsRef<[u8]>) {
        self.notify_on(
            ADVERTISE_SERVICE_UUID,
            NOTIFY_CHARACTERISTIC_UUID,
            Bytes::copy_from_slice(chunk.as_ref()),
        );
    }

    /// Deliver a notification on any characteristic.
    pub fn notify_on(&self, service_id: &str, characteristic_id: &str, value: Bytes) {
        trace!(device = %self.id, len = value.len(), "memory notify");
        let _ = self
            .values
            .send(CharacteristicValue::new(service_id, characteristic_id, value));
    }

    /// Simulate the link dropping on the device side.
    pub fn drop_connection(&self) {
        self.state().connected = false;
        let _ = self.connection.send(false);
    }

    /// Whether the link is currently up.
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Every chunk written so far, in order.
    pub fn writes(&self) -> Vec<Bytes> {
        self.state().writes.clone()
    }

    /// Written bytes reassembled into complete lines (delimiter stripped).
    pub fn written_lines(&self) -> Vec<String> {
        let joined: Vec<u8> = self
            .state()
            .writes
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect();
        let text: String = joined.iter().map(|&b| b as char).collect();
        text.split(LINE_DELIMITER)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Names of trait operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of times an operation was invoked.
    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|call| *call == name).count()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &str) -> MutexGuard<'_, MemoryState> {
        let mut state = self.state();
        state.calls.push(call.to_string());
        state
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BleTransport for MemoryTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe_values(&self) -> broadcast::Receiver<CharacteristicValue> {
        self.values.subscribe()
    }

    fn subscribe_connection(&self) -> broadcast::Receiver<bool> {
        self.connection.subscribe()
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.record("connect");
            if let Some(err) = state.connect_errors.pop_front() {
                return Err(err);
            }
            if state.connected {
                return Err(TransportError::AlreadyConnected);
            }
            state.connected = true;
        }
        debug!(device = %self.id, "memory transport connected");
        let _ = self.connection.send(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = {
            let mut state = self.record("disconnect");
            let was_connected = state.connected;
            state.connected = false;
            state.transfer_unit = DEFAULT_TRANSFER_UNIT;
            state.outbound.clear();
            was_connected
        };
        if was_connected {
            let _ = self.connection.send(false);
        }
        Ok(())
    }

    async fn services(&self) -> Result<Vec<Service>> {
        let state = self.record("services");
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.services.clone())
    }

    async fn characteristics(&self, service_id: &str) -> Result<Vec<Characteristic>> {
        let state = self.record("characteristics");
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state
            .services
            .iter()
            .any(|service| uuid_eq(&service.uuid, service_id))
        {
            return Err(TransportError::NotFound(service_id.to_string()));
        }
        Ok(state
            .characteristics
            .iter()
            .filter(|(svc, _)| uuid_eq(svc, service_id))
            .map(|(_, characteristic)| characteristic.clone())
            .collect())
    }

    async fn read_characteristic_value(
        &self,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<Bytes> {
        let state = self.record("read_characteristic_value");
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state
            .readable
            .iter()
            .find(|(svc, chr, _)| uuid_eq(svc, service_id) && uuid_eq(chr, characteristic_id))
            .map(|(_, _, value)| value.clone())
            .ok_or_else(|| TransportError::NotFound(characteristic_id.to_string()))
    }

    async fn write_characteristic_value(
        &self,
        value: Bytes,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<()> {
        let replies = {
            let mut state = self.record("write_characteristic_value");
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(err) = state.write_errors.pop_front() {
                return Err(err);
            }
            state.writes.push(value.clone());

            if !(uuid_eq(service_id, ADVERTISE_SERVICE_UUID)
                && uuid_eq(characteristic_id, WRITE_CHARACTERISTIC_UUID))
            {
                return Ok(());
            }

            state.outbound.extend(value.iter().map(|&b| b as char));
            let mut replies = Vec::new();
            while let Some(end) = state.outbound.find(LINE_DELIMITER) {
                let line: String = state.outbound.drain(..end + LINE_DELIMITER.len()).collect();
                let line = &line[..end];
                if let Some(responder) = state.responder.as_mut() {
                    replies.extend(responder(line));
                }
            }
            replies
        };

        for reply in replies {
            self.notify(reply.as_bytes());
        }
        Ok(())
    }

    async fn start_notifications(&self, service_id: &str, characteristic_id: &str) -> Result<()> {
        let state = self.record("start_notifications");
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        debug!(device = %self.id, service_id, characteristic_id, "notifications enabled");
        Ok(())
    }

    async fn stop_notifications(&self, _service_id: &str, _characteristic_id: &str) -> Result<()> {
        let state = self.record("stop_notifications");
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn transfer_unit(&self) -> Result<u16> {
        let state = self.record("transfer_unit");
        if state.transfer_unit_query_fails {
            return Err(TransportError::Unsupported("transfer_unit"));
        }
        Ok(state.transfer_unit)
    }

    async fn set_transfer_unit(&self, value: u16) -> Result<u16> {
        let stalled = self.record("set_transfer_unit").transfer_unit_stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        let Some(max) = state.max_transfer_unit else {
            return Err(TransportError::Unsupported("set_transfer_unit"));
        };
        if state.rejected_transfer_units.contains(&value) {
            return Err(TransportError::Rejected {
                code: 10008,
                message: format!("transfer unit {value} rejected"),
            });
        }
        let settled = value.min(max);
        state.transfer_unit = settled;
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_twice_reports_already_connected() {
        let transport = MemoryTransport::new("mem");
        transport.connect().await.unwrap();
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err, TransportError::AlreadyConnected);
    }

    #[tokio::test]
    async fn connection_changes_are_broadcast() {
        let transport = MemoryTransport::new("mem");
        let mut rx = transport.subscribe_connection();

        transport.connect().await.unwrap();
        transport.drop_connection();

        assert!(rx.recv().await.unwrap());
        assert!(!rx.recv().await.unwrap());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn responder_sees_lines_across_chunks() {
        let transport = MemoryTransport::new("mem")
            .with_responder(|line| vec![format!("ECHO {line}\r\n")]);
        let mut values = transport.subscribe_values();
        transport.connect().await.unwrap();

        transport
            .write_in_chunks(
                b"ATT+CHECK\r\nATT+IDLE=5\r\n",
                4,
                ADVERTISE_SERVICE_UUID,
                WRITE_CHARACTERISTIC_UUID,
            )
            .await
            .unwrap();

        assert_eq!(transport.writes().len(), 6);
        assert_eq!(transport.written_lines(), vec!["ATT+CHECK", "ATT+IDLE=5"]);
        let first = values.recv().await.unwrap();
        assert_eq!(first.value.as_ref(), b"ECHO ATT+CHECK\r\n");
        let second = values.recv().await.unwrap();
        assert_eq!(second.value.as_ref(), b"ECHO ATT+IDLE=5\r\n");
    }

    #[tokio::test]
    async fn transfer_unit_scripting() {
        let transport = MemoryTransport::new("mem");
        transport.reject_transfer_units(&[517]);

        assert!(transport.set_transfer_unit(517).await.is_err());
        assert_eq!(transport.set_transfer_unit(247).await.unwrap(), 247);
        assert_eq!(transport.transfer_unit().await.unwrap(), 247);

        transport.set_max_transfer_unit(None);
        assert_eq!(
            transport.set_transfer_unit(185).await.unwrap_err(),
            TransportError::Unsupported("set_transfer_unit")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transfer_unit_never_settles() {
        let transport = MemoryTransport::new("mem");
        transport.stall_transfer_unit();

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            transport.set_transfer_unit(247),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(transport.call_count("set_transfer_unit"), 1);
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let transport = MemoryTransport::new("mem");
        assert_eq!(
            transport.services().await.unwrap_err(),
            TransportError::NotConnected
        );
        assert_eq!(
            transport
                .write_characteristic_value(
                    Bytes::from_static(b"x"),
                    ADVERTISE_SERVICE_UUID,
                    WRITE_CHARACTERISTIC_UUID
                )
                .await
                .unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[tokio::test]
    async fn reads_stored_characteristic_values() {
        let transport = MemoryTransport::new("mem");
        transport.connect().await.unwrap();
        transport.set_characteristic_value(
            DEVICE_INFO_SERVICE_UUID,
            "00002a25-0000-1000-8000-00805f9b34fb",
            Bytes::from_static(b"SN-1\0\0"),
        );

        let value = transport
            .read_characteristic_value(
                DEVICE_INFO_SERVICE_UUID,
                "00002A25-0000-1000-8000-00805F9B34FB",
            )
            .await
            .unwrap();
        assert_eq!(value.as_ref(), b"SN-1\0\0");
    }
}
