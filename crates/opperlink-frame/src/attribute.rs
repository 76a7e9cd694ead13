//! Attribute tags of the scale protocol.
//!
//! Tags are the text between `ATT+` and `=` on the wire. Tags the engine
//! does not know are preserved as [`Attribute::Other`].

use std::fmt;

/// A named field of the device command protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    /// `ATT+WGT=<grams>,<sample>,<stability>`; stability 0 unstable, 1 stable, 2 overload.
    Weight,
    /// `ATT+REF0=<sample>`: sample value at zero load.
    ZeroReference,
    /// `ATT+REF1=<sample>,<grams>`: sample value with a reference weight.
    CalibrationReference,
    /// `ATT+FACTORY`: restore factory settings.
    FactoryReset,
    /// `ATT+ACK=<code>`: 0 success, anything else failure.
    Acknowledge,
    /// `ATT+CHECK`: health check.
    HealthCheck,
    /// `ATT+CLOSE`: power off.
    PowerOff,
    /// `ATT+AUTO_CLOSE=<seconds>`: device will power off on low battery.
    AutoClose,
    /// `ATT+IDLE=<minutes>`: idle power-off timeout.
    IdleTimeout,
    /// `ATT+BAT=<level>,<charging>`.
    Battery,
    /// `ATT+ACCURACY=<grams>`: display resolution.
    Accuracy,
    /// `ATT+LOCK=<grams>`: stability fluctuation threshold.
    LockThreshold,
    /// `ATT+FILTER=<level>`: output filter.
    Filter,
    /// `ATT+RST`: reboot.
    Reboot,
    /// Any tag outside the catalogue.
    Other(String),
}

impl Attribute {
    /// Every known attribute.
    pub const KNOWN: [Attribute; 14] = [
        Self::Weight,
        Self::ZeroReference,
        Self::CalibrationReference,
        Self::FactoryReset,
        Self::Acknowledge,
        Self::HealthCheck,
        Self::PowerOff,
        Self::AutoClose,
        Self::IdleTimeout,
        Self::Battery,
        Self::Accuracy,
        Self::LockThreshold,
        Self::Filter,
        Self::Reboot,
    ];

    /// Wire tag of this attribute.
    pub fn tag(&self) -> &str {
        match self {
            Self::Weight => "WGT",
            Self::ZeroReference => "REF0",
            Self::CalibrationReference => "REF1",
            Self::FactoryReset => "FACTORY",
            Self::Acknowledge => "ACK",
            Self::HealthCheck => "CHECK",
            Self::PowerOff => "CLOSE",
            Self::AutoClose => "AUTO_CLOSE",
            Self::IdleTimeout => "IDLE",
            Self::Battery => "BAT",
            Self::Accuracy => "ACCURACY",
            Self::LockThreshold => "LOCK",
            Self::Filter => "FILTER",
            Self::Reboot => "RST",
            Self::Other(tag) => tag,
        }
    }

    /// Resolve a wire tag. Unknown tags become [`Attribute::Other`].
    pub fn from_tag(tag: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|attribute| attribute.tag() == tag)
            .cloned()
            .unwrap_or_else(|| Self::Other(tag.to_string()))
    }

    /// Returns true if the attribute is part of the catalogue.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Attribute {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}
