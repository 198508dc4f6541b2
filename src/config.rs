//! Sensor identity and timing configuration.

use core::time::Duration;

use snafu::ensure;

use crate::formatter::{DEFAULT_FIELD_CAP, DEFAULT_PRECISION};
use crate::types::{Error, InvalidIdentitySnafu};

/// SDI-12 protocol version reported by `aI!`.
pub const PROTOCOL_VERSION: &str = "14";

/// The fields of the `aI!` reply: `llccccccccmmmmmmvvvxxx..xx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    vendor: String,
    model: String,
    version: String,
    serial: String,
}

impl Identity {
    /// Vendor, model and version are padded with spaces to 8, 6 and 3 characters.
    /// # Errors
    /// Returns [`Error::InvalidIdentity`] if a field is too long or not printable ASCII.
    pub fn new(vendor: &str, model: &str, version: &str, serial: &str) -> Result<Self, Error> {
        Ok(Self {
            vendor: field("vendor", vendor, 8)?,
            model: field("model", model, 6)?,
            version: field("version", version, 3)?,
            serial: field("serial", serial, 0)?,
        })
    }

    /// The reply payload, without the address.
    pub fn payload(&self) -> String {
        format!(
            "{}{}{}{}{}",
            PROTOCOL_VERSION, self.vendor, self.model, self.version, self.serial
        )
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            vendor: "SDI12RS ".into(),
            model: "SENSOR".into(),
            version: "010".into(),
            serial: String::new(),
        }
    }
}

// A zero `width` marks the variable length serial field.
fn field(name: &'static str, value: &str, width: usize) -> Result<String, Error> {
    let max = if width == 0 { 13 } else { width };
    ensure!(
        value.len() <= max && value.bytes().all(|c| c.is_ascii_graphic() || c == b' '),
        InvalidIdentitySnafu { field: name }
    );
    Ok(format!("{:<width$}", value, width = width))
}

/// Metadata returned by `aIM_nnn!` style commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    pub id: String,
    pub units: String,
}

impl ParameterInfo {
    pub fn new(id: &str, units: &str) -> Self {
        Self {
            id: id.into(),
            units: units.into(),
        }
    }
}

/// Behaviour of every device on a sensor.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub identity: Identity,
    /// How long an acquisition actually takes.
    pub acquisition_delay: Duration,
    /// The `ttt` seconds advertised in timing replies.
    pub latency_seconds: u16,
    /// The number of values advertised in timing replies.
    pub value_count: u16,
    pub precision: u8,
    pub field_cap: u8,
    /// Indexed by the `_nnn` suffix, starting at `_001`.
    pub parameters: Vec<ParameterInfo>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            acquisition_delay: Duration::from_secs(2),
            latency_seconds: 21,
            value_count: 9,
            precision: DEFAULT_PRECISION,
            field_cap: DEFAULT_FIELD_CAP,
            parameters: Vec::new(),
        }
    }
}

impl SensorConfig {
    pub(crate) fn parameter(&self, number: u16) -> Option<&ParameterInfo> {
        self.parameters.get(usize::from(number).checked_sub(1)?)
    }
}
