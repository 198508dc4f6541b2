//! The command record produced by the parser and consumed by the state machine.

use crate::nom_parser::{parse_command, CommandToken};
use crate::types::Address;

/// Who a command is addressed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    Device(Address),
    /// The `?` wildcard, answered by any device.
    Any,
}

impl Target {
    /// True if a device with `address` must look at this command.
    pub fn matches(self, address: Address) -> bool {
        match self {
            Self::Device(target) => target == address,
            Self::Any => true,
        }
    }
}

/// The command verb.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Primary {
    /// `?!`
    AddressQuery,
    /// `a!`
    Acknowledge,
    /// `aI!` and the `aI<mode>!` identify forms
    Identification,
    /// `aAb!`
    AddressChange,
    /// `aM!`
    Measurement,
    /// `aC!`
    ConcurrentMeasurement,
    /// `aHA!`
    HighVolumeAscii,
    /// `aHB!`
    HighVolumeByte,
    /// `aRn!`
    ContinuousMeasurement,
    /// `aDn!`
    DataRequest,
    /// `aDBn!`
    ByteDataRequest,
    /// `aV!`
    Verification,
    Unknown,
}

/// Qualifier of the primary verb. For [`Primary::Identification`] it names the
/// measurement mode being probed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Secondary {
    None,
    Measurement,
    ConcurrentMeasurement,
    ContinuousMeasurement,
    HighVolumeAscii,
    HighVolumeByte,
    Verification,
}

/// A parsed bus command.
///
/// `param1` holds the measurement, data line or byte offset index. For
/// [`Primary::AddressChange`] it holds the requested address byte. `param2` is the
/// parameter number of the `_nnn` suffix on identify commands, zero when absent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Command {
    pub target: Target,
    pub primary: Primary,
    pub secondary: Secondary,
    /// The command asked for a CRC (`aMC!`, `aCC!`, `aRCn!`, ...).
    pub crc: bool,
    pub param1: u16,
    pub param2: u16,
}

impl Command {
    pub const fn new(target: Target, primary: Primary) -> Self {
        Self {
            target,
            primary,
            secondary: Secondary::None,
            crc: false,
            param1: 0,
            param2: 0,
        }
    }

    /// Parse one complete `!`-terminated command.
    ///
    /// ```
    /// use sdi12_sensor::{Command, Primary};
    /// let cmd = Command::parse(b"0MC!").unwrap();
    /// assert_eq!(cmd.primary, Primary::Measurement);
    /// assert!(cmd.crc);
    /// ```
    pub fn parse(data: &[u8]) -> Option<Self> {
        match parse_command(data) {
            (consumed, CommandToken::Command(cmd)) if consumed == data.len() => Some(cmd),
            _ => None,
        }
    }

    pub const fn with_secondary(mut self, secondary: Secondary) -> Self {
        self.secondary = secondary;
        self
    }

    pub const fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    pub const fn with_params(mut self, param1: u16, param2: u16) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self
    }

    /// The requested address of an address change command, unvalidated.
    pub fn new_address(&self) -> Option<u8> {
        if self.primary == Primary::AddressChange && self.param1 <= 0x7f {
            Some(self.param1 as u8)
        } else {
            None
        }
    }

    /// An identify command that probes a measurement mode instead of requesting one.
    pub fn is_probe(&self) -> bool {
        self.primary == Primary::Identification && self.secondary != Secondary::None
    }
}
