/// A device seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDevice {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl BleDevice {
    /// Returns true if the advertised name follows the OPPER naming convention.
    pub fn is_opper(&self) -> bool {
        self.name.as_deref().is_some_and(is_opper_device)
    }
}

/// Match `OPPER-M<digits> <4 word characters>`, e.g. `OPPER-M12 AB3_`.
pub fn is_opper_device(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("OPPER-M") else {
        return false;
    };
    let Some((model, suffix)) = rest.split_once(|c: char| c.is_whitespace()) else {
        return false;
    };

    !model.is_empty()
        && model.chars().all(|c| c.is_ascii_digit())
        && suffix.chars().count() == 4
        && suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
