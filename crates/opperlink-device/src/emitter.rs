//! Acknowledged command transmission.
//!
//! The wire carries no transaction tag, so an acknowledgement can only be
//! matched to "the command currently waiting". Emits on one scale are
//! therefore serialized: a second caller queues until the first has its
//! terminal result.

use std::sync::Arc;
use std::time::Duration;

use opperlink_frame::{encode_str, Attribute, AttributeCommand, Value, LINE_DELIMITER};
use opperlink_transport::{ADVERTISE_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::config::ScaleConfig;
use crate::error::{DeviceError, Result};
use crate::stream::CommandStream;
use crate::supervisor::Link;

const ACK_SUCCESS: &str = "0";

#[derive(Debug, Clone)]
pub(crate) struct Emitter {
    stream: CommandStream,
    ack_timeout: Duration,
    retries: u32,
    sample_timeout: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl Emitter {
    pub(crate) fn new(stream: CommandStream, config: &ScaleConfig) -> Self {
        Self {
            stream,
            ack_timeout: config.ack_timeout,
            retries: config.emit_retries,
            sample_timeout: config.sample_timeout,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Send a command and wait for the device to acknowledge it.
    ///
    /// A rejected or unanswered command is sent again up to the configured
    /// retry count. Returns the successful acknowledgement. A command its
    /// own grammar rejects is never written.
    pub(crate) async fn emit(
        &self,
        link: &Link,
        attribute: &Attribute,
        value: Option<&Value>,
    ) -> Result<Arc<AttributeCommand>> {
        let line = encode_str(attribute, value);
        if let Err(err) = self
            .stream
            .grammars()
            .parse(line.trim_end_matches(LINE_DELIMITER))
        {
            warn!(%attribute, %err, "refusing malformed command");
            return Err(err.into());
        }
        let frame = line.into_bytes();

        let _in_flight = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => return Err(DeviceError::Disconnected("link closed before send".into())),
            guard = self.in_flight.lock() => guard,
        };

        let mut attempt = 0;
        loop {
            match self.transmit(link, attribute, &frame).await {
                Ok(ack) => return Ok(ack),
                Err(err) if attempt < self.retries && err.is_retryable() => {
                    attempt += 1;
                    warn!(%attribute, %err, attempt, "command failed; retrying");
                }
                Err(err) => {
                    warn!(%attribute, %err, "command failed");
                    return Err(err);
                }
            }
        }
    }

    /// One physical transmission: chunked write, then the acknowledgement wait.
    async fn transmit(
        &self,
        link: &Link,
        attribute: &Attribute,
        frame: &[u8],
    ) -> Result<Arc<AttributeCommand>> {
        // Subscribe first: the device may answer before the last write returns.
        let mut acks = self.stream.commands();

        let chunk_len = link.payload.chunk_len();
        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => {
                return Err(DeviceError::Disconnected("link closed during write".into()));
            }
            written = link.transport.write_in_chunks(
                frame,
                chunk_len,
                ADVERTISE_SERVICE_UUID,
                WRITE_CHARACTERISTIC_UUID,
            ) => written?,
        }
        debug!(%attribute, len = frame.len(), chunk_len, "outbound");

        let ack = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => {
                return Err(DeviceError::Disconnected("link closed awaiting acknowledgement".into()));
            }
            waited = tokio::time::timeout(self.ack_timeout, acks.recv_attribute(&Attribute::Acknowledge)) => {
                match waited {
                    Err(_) => {
                        return Err(DeviceError::AckTimeout {
                            attribute: attribute.clone(),
                            timeout: self.ack_timeout,
                        });
                    }
                    Ok(None) => return Err(DeviceError::Disconnected("command stream closed".into())),
                    Ok(Some(ack)) => ack,
                }
            }
        };

        match ack.token(0) {
            Some(ACK_SUCCESS) => Ok(ack),
            code => Err(DeviceError::Rejected {
                attribute: attribute.clone(),
                ack: code.unwrap_or_default().to_string(),
            }),
        }
    }

    /// Zero-reference then calibration-reference, strictly in that order.
    ///
    /// Without `correction_sample`, the first sample value reported after
    /// the zero-reference is sent is used.
    pub(crate) async fn calibrate(
        &self,
        link: &Link,
        zero_sample: i64,
        calibration_value: f64,
        correction_sample: Option<i64>,
    ) -> Result<Arc<AttributeCommand>> {
        let mut samples = self.stream.samples();
        samples.borrow_and_update();

        self.emit(link, &Attribute::ZeroReference, Some(&Value::from(zero_sample)))
            .await?;

        let correction = match correction_sample {
            Some(sample) => sample,
            None => self.next_sample(link, &mut samples).await?,
        };
        debug!(zero_sample, correction, calibration_value, "calibrating");

        let reference = Value::List(vec![correction.to_string(), calibration_value.to_string()]);
        self.emit(link, &Attribute::CalibrationReference, Some(&reference))
            .await
    }

    async fn next_sample(
        &self,
        link: &Link,
        samples: &mut watch::Receiver<Option<i64>>,
    ) -> Result<i64> {
        let wait = async {
            loop {
                if samples.changed().await.is_err() {
                    return Err(DeviceError::Disconnected("command stream closed".into()));
                }
                if let Some(sample) = *samples.borrow_and_update() {
                    return Ok(sample);
                }
            }
        };

        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => Err(DeviceError::Disconnected("link closed awaiting sample".into())),
            waited = tokio::time::timeout(self.sample_timeout, wait) => {
                waited.map_err(|_| DeviceError::SampleTimeout(self.sample_timeout))?
            }
        }
    }
}
