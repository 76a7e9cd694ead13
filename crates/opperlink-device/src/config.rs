use std::time::Duration;

use opperlink_frame::GrammarRegistry;

/// Transfer unit every BLE link starts with.
pub const DEFAULT_TRANSFER_UNIT: u16 = 23;

/// Per-write ATT header overhead in bytes.
pub const ATT_HEADER_LEN: usize = 3;

/// Largest single write some host stacks accept, whatever the transfer unit.
pub const MAX_WRITE_LEN: usize = 512;

/// Battery level at or below which the scale reports low battery.
pub const LOW_BATTERY: u16 = 20;

/// Idle timeout (minutes) the device starts with.
pub const DEFAULT_IDLE_MINUTES: u32 = 10;
/// Display accuracy (grams) the device starts with.
pub const DEFAULT_ACCURACY: f64 = 1.0;
/// Lock threshold (grams) the device starts with.
pub const DEFAULT_LOCK_THRESHOLD: f64 = 10.0;
/// Filter level the device starts with.
pub const DEFAULT_FILTER: u32 = 40;

/// Readings a stability window spans unless configured otherwise.
pub const DEFAULT_STABILITY_WINDOW: usize = 1;

/// Configuration for a [`Scale`](crate::Scale).
#[derive(Debug, Clone)]
pub struct ScaleConfig {
    /// How long to wait for the acknowledgement of a command.
    pub ack_timeout: Duration,
    /// How many times a failed command is sent again.
    pub emit_retries: u32,
    /// How long `calibrate` waits for a live sample value.
    pub sample_timeout: Duration,
    /// Transfer units tried in order during negotiation.
    pub transfer_unit_ladder: Vec<u16>,
    /// Readings behind `stable_weights` / `unstable_weights`.
    pub stability_window: usize,
    /// Capacity of the command and event broadcast channels.
    pub channel_capacity: usize,
    /// Fail `connect` when the write or notify characteristic is missing.
    pub require_characteristics: bool,
    /// Grammars applied to inbound frames.
    pub grammars: GrammarRegistry,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(3000),
            emit_retries: 1,
            sample_timeout: Duration::from_millis(3000),
            transfer_unit_ladder: vec![517, 247, 185],
            stability_window: DEFAULT_STABILITY_WINDOW,
            channel_capacity: 64,
            require_characteristics: true,
            grammars: GrammarRegistry::new(),
        }
    }
}
