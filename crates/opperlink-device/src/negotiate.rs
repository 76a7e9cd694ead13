use std::sync::atomic::{AtomicU16, Ordering};

use opperlink_transport::BleTransport;
use tracing::{debug, warn};

use crate::config::{ATT_HEADER_LEN, DEFAULT_TRANSFER_UNIT, MAX_WRITE_LEN};

/// Longest chunk that fits in one write at transfer unit `transfer_unit`.
pub fn chunk_len(transfer_unit: u16) -> usize {
    usize::from(transfer_unit)
        .saturating_sub(ATT_HEADER_LEN)
        .clamp(1, MAX_WRITE_LEN)
}

/// Transfer unit in effect on one connection.
#[derive(Debug)]
pub struct PayloadSize {
    transfer_unit: AtomicU16,
}

impl Default for PayloadSize {
    fn default() -> Self {
        Self {
            transfer_unit: AtomicU16::new(DEFAULT_TRANSFER_UNIT),
        }
    }
}

impl PayloadSize {
    pub fn transfer_unit(&self) -> u16 {
        self.transfer_unit.load(Ordering::Acquire)
    }

    /// Outbound chunk length for the current transfer unit.
    pub fn chunk_len(&self) -> usize {
        chunk_len(self.transfer_unit())
    }

    pub fn set(&self, transfer_unit: u16) {
        self.transfer_unit.store(transfer_unit, Ordering::Release);
    }

    /// Back to the protocol default.
    pub fn reset(&self) {
        self.set(DEFAULT_TRANSFER_UNIT);
    }
}

/// Settle on a transfer unit for a live link.
///
/// Sizes in `ladder` are requested in order and the first accepted one wins.
/// When every size is refused, the transport's current transfer unit is
/// used; when that cannot be read either, the protocol default.
pub async fn negotiate(transport: &dyn BleTransport, ladder: &[u16]) -> u16 {
    for &size in ladder {
        match transport.set_transfer_unit(size).await {
            Ok(settled) => {
                debug!(requested = size, settled, "transfer unit accepted");
                return settled;
            }
            Err(err) => debug!(requested = size, %err, "transfer unit refused"),
        }
    }

    match transport.transfer_unit().await {
        Ok(current) => {
            debug!(current, "using reported transfer unit");
            current
        }
        Err(err) => {
            warn!(%err, default = DEFAULT_TRANSFER_UNIT, "transfer unit unknown; using default");
            DEFAULT_TRANSFER_UNIT
        }
    }
}
