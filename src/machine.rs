//! The command/response state machine.
//!
//! [`step`] maps a device and a command to the state the device enters and the
//! [`Effect`]s the caller has to carry out. It never touches the bus, the clock or
//! the measurement source itself, see [`crate::driver`] for the loop that does.

use arrayvec::ArrayVec;
use core::time::Duration;
use log::{debug, warn};

use crate::checksum::Checksum;
use crate::command::{Command, Primary, Secondary, Target};
use crate::config::SensorConfig;
use crate::device::{Device, State};
use crate::encoder::encode;
use crate::formatter::{pack, LONG_LINE_CAP, SHORT_LINE_CAP};
use crate::types::Address;

/// Payload sent for a command addressed to us that we don't understand.
pub const REJECTION: &[u8] = b"?";

/// Binary packet type tag for "no valid data".
pub const INVALID_DATA_TYPE: u8 = 0;

// address + 75 data characters + CRC + CR LF, rounded up
pub type ReplyBytes = ArrayVec<u8, 96>;

pub type Effects = ArrayVec<Effect, 3>;

/// Something the caller of [`step`] has to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Put a reply on the bus.
    Send(ReplyBytes),
    /// Mirror the new device address to persistent storage.
    Persist { slot: u16, address: Address },
    /// Wait for the acquisition, poll the source, check for cancellation and
    /// hand the outcome to [`complete`].
    Acquire(Acquisition),
    /// Poll the source right away and reply with [`sample_reply`].
    Sample(Sample),
}

impl Effect {
    fn is_deferred(&self) -> bool {
        matches!(self, Self::Acquire(_) | Self::Sample(_))
    }
}

/// The result of one [`step`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The state the command put the device in.
    pub state: State,
    pub effects: Effects,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// `aM!`, the device holds the bus until the data is ready.
    Measurement,
    /// `aC!`, the bus is free for other traffic meanwhile.
    Concurrent,
    HighVolumeAscii,
    HighVolumeByte,
}

impl AcquisitionMode {
    fn state(self) -> State {
        match self {
            Self::Measurement => State::Measurement,
            Self::Concurrent => State::Concurrent,
            Self::HighVolumeAscii | Self::HighVolumeByte => State::HighVolumeMeasurement,
        }
    }

    // digits of the value count in the timing reply
    fn count_width(self) -> usize {
        match self {
            Self::Measurement => 1,
            Self::Concurrent => 2,
            Self::HighVolumeAscii | Self::HighVolumeByte => 3,
        }
    }
}

/// What aborts a pending acquisition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelPolicy {
    /// A line break, or any new command taking the bus from the device.
    LineBreak,
    /// A new command addressed to the measuring device.
    AddressedCommand,
}

/// A pending measurement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub mode: AcquisitionMode,
    pub delay: Duration,
    pub crc: bool,
}

impl Acquisition {
    pub fn policy(&self) -> CancelPolicy {
        match self.mode {
            AcquisitionMode::Measurement => CancelPolicy::LineBreak,
            _ => CancelPolicy::AddressedCommand,
        }
    }

    pub fn line_cap(&self) -> usize {
        match self.mode {
            AcquisitionMode::Measurement => SHORT_LINE_CAP,
            _ => LONG_LINE_CAP,
        }
    }

    /// Whether completion is announced with a service request.
    pub fn notifies(&self) -> bool {
        self.mode == AcquisitionMode::Measurement
    }

    /// True if `activity` cancels this acquisition on the device at `address`.
    pub fn cancelled_by(&self, activity: &BusActivity, address: Address) -> bool {
        match self.policy() {
            CancelPolicy::LineBreak => activity.line_break,
            CancelPolicy::AddressedCommand => activity.addresses(address),
        }
    }
}

/// A single continuous measurement value request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Sample {
    pub index: u16,
    pub crc: bool,
}

/// What happened on the bus while an acquisition was running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusActivity {
    pub line_break: bool,
    /// Targets of the complete commands received meanwhile.
    pub targets: Vec<Target>,
}

impl BusActivity {
    pub fn addresses(&self, address: Address) -> bool {
        self.targets.iter().any(|t| t.matches(address))
    }

    pub fn has_commands(&self) -> bool {
        !self.targets.is_empty()
    }
}

/// How an acquisition ended.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Outcome<'a> {
    Values(&'a [f64]),
    Cancelled,
}

/// Apply `command` to `device`.
///
/// `taken` holds the addresses of the other devices sharing the sensor, an
/// address change to one of them is refused. The device is left in the returned
/// state while a deferred effect is pending, and in [`State::Ready`] otherwise.
pub fn step(
    device: &mut Device,
    command: &Command,
    config: &SensorConfig,
    taken: &[Address],
) -> Transition {
    let mut effects = Effects::new();
    if device.state == State::LowPower {
        debug!("Device {} is asleep, ignoring {:?}", device.address(), command.primary);
        return Transition {
            state: State::LowPower,
            effects,
        };
    }

    device.crc_requested = command.crc;
    let address = device.address();
    let state = match command.primary {
        Primary::AddressQuery | Primary::Acknowledge => {
            effects.push(Effect::Send(ascii_reply(address, b"", false)));
            State::Ready
        }
        Primary::Identification if !command.is_probe() => {
            let reply = ascii_reply(address, config.identity.payload().as_bytes(), false);
            effects.push(Effect::Send(reply));
            State::Ready
        }
        Primary::Identification => {
            probe(device, command, config, &mut effects);
            State::Ready
        }
        Primary::AddressChange => {
            change_address(device, command, taken, &mut effects);
            State::Ready
        }
        Primary::Measurement => {
            measure(device, command, config, AcquisitionMode::Measurement, &mut effects)
        }
        Primary::ConcurrentMeasurement => {
            measure(device, command, config, AcquisitionMode::Concurrent, &mut effects)
        }
        Primary::HighVolumeAscii => {
            measure(device, command, config, AcquisitionMode::HighVolumeAscii, &mut effects)
        }
        Primary::HighVolumeByte => {
            measure(device, command, config, AcquisitionMode::HighVolumeByte, &mut effects)
        }
        Primary::ContinuousMeasurement => {
            effects.push(Effect::Sample(Sample {
                index: command.param1,
                crc: command.crc,
            }));
            State::Continuous
        }
        Primary::DataRequest => {
            let line = device.lines.get(usize::from(command.param1)).unwrap_or("");
            let reply = ascii_reply(address, line.as_bytes(), device.lines.crc());
            effects.push(Effect::Send(reply));
            State::Ready
        }
        Primary::ByteDataRequest => {
            // binary payloads are not produced, every packet reports no data
            effects.push(Effect::Send(binary_reply(address, INVALID_DATA_TYPE, &[])));
            State::Ready
        }
        Primary::Verification => {
            device.lines.clear();
            effects.push(Effect::Send(ascii_reply(address, b"0000", false)));
            State::Verify
        }
        Primary::Unknown => {
            debug!("Device {} rejects unknown command", address);
            effects.push(Effect::Send(ascii_reply(address, REJECTION, false)));
            State::Ready
        }
    };

    device.state = if effects.iter().any(Effect::is_deferred) {
        state
    } else {
        State::Ready
    };
    debug!("Device {}: {:?} -> {:?}", address, command.primary, state);
    Transition { state, effects }
}

// Answer a metadata query about a measurement mode, no acquisition is started.
fn probe(device: &Device, command: &Command, config: &SensorConfig, effects: &mut Effects) {
    let address = device.address();
    let supported = command.param1 == 0;
    if command.param2 > 0 {
        let payload = match config.parameter(command.param2) {
            Some(p) if supported => format!(",{},{};", p.id, p.units),
            _ => String::new(),
        };
        effects.push(Effect::Send(ascii_reply(address, payload.as_bytes(), command.crc)));
        return;
    }
    let token = match command.secondary {
        Secondary::Measurement => timing_token(config, AcquisitionMode::Measurement, supported),
        Secondary::ConcurrentMeasurement => {
            timing_token(config, AcquisitionMode::Concurrent, supported)
        }
        Secondary::HighVolumeAscii => {
            timing_token(config, AcquisitionMode::HighVolumeAscii, supported)
        }
        Secondary::HighVolumeByte => {
            timing_token(config, AcquisitionMode::HighVolumeByte, supported)
        }
        Secondary::ContinuousMeasurement if supported => {
            format!("000{}", config.value_count.min(9))
        }
        Secondary::None | Secondary::ContinuousMeasurement | Secondary::Verification => {
            "0000".into()
        }
    };
    effects.push(Effect::Send(ascii_reply(address, token.as_bytes(), false)));
}

fn change_address(
    device: &mut Device,
    command: &Command,
    taken: &[Address],
    effects: &mut Effects,
) {
    let requested = command.new_address().unwrap_or(0);
    let in_use = taken.iter().any(|a| a.as_byte() == requested);
    if in_use {
        warn!("Address {:?} is used by another device", requested as char);
    } else if device.set_address(requested) {
        if let Some(slot) = device.storage_slot() {
            effects.push(Effect::Persist {
                slot,
                address: device.address(),
            });
        }
    }
    effects.push(Effect::Send(ascii_reply(device.address(), b"", false)));
}

fn measure(
    device: &mut Device,
    command: &Command,
    config: &SensorConfig,
    mode: AcquisitionMode,
    effects: &mut Effects,
) -> State {
    let supported = command.param1 == 0;
    let token = timing_token(config, mode, supported);
    effects.push(Effect::Send(ascii_reply(device.address(), token.as_bytes(), false)));
    if supported {
        effects.push(Effect::Acquire(Acquisition {
            mode,
            delay: config.acquisition_delay,
            crc: command.crc,
        }));
    } else {
        device.lines.clear();
    }
    mode.state()
}

/// `tttn`, `tttnn` or `tttnnn`, all zeros for an unsupported measurement.
fn timing_token(config: &SensorConfig, mode: AcquisitionMode, supported: bool) -> String {
    let width = mode.count_width();
    if !supported {
        return "0".repeat(3 + width);
    }
    let max_count = 10u16.pow(width as u32) - 1;
    format!(
        "{:03}{:0width$}",
        config.latency_seconds.min(999),
        config.value_count.min(max_count),
        width = width
    )
}

/// Finish an acquisition started by [`Effect::Acquire`]. Returns the service
/// request to send, if any.
pub fn complete(
    device: &mut Device,
    acquisition: &Acquisition,
    outcome: Outcome<'_>,
    config: &SensorConfig,
) -> Option<ReplyBytes> {
    device.state = State::Ready;
    let values = match outcome {
        Outcome::Values(values) => values,
        Outcome::Cancelled => {
            debug!("Device {}: measurement cancelled", device.address());
            device.lines.clear();
            return None;
        }
    };
    if acquisition.mode == AcquisitionMode::HighVolumeByte {
        debug!("Device {}: byte payloads are not implemented", device.address());
        device.lines.clear();
        return None;
    }

    device.lines = pack(
        values,
        config.precision,
        config.field_cap,
        acquisition.line_cap(),
    );
    device.lines.set_crc(acquisition.crc);
    if acquisition.notifies() {
        Some(ascii_reply(device.address(), b"", false))
    } else {
        None
    }
}

/// The reply to an `aRn!` request, given the values just read from the source.
pub fn sample_reply(
    device: &mut Device,
    sample: &Sample,
    values: &[f64],
    config: &SensorConfig,
) -> ReplyBytes {
    device.state = State::Ready;
    let field = values
        .get(usize::from(sample.index))
        .map(|&v| encode(v, config.precision, config.field_cap, false, true));
    let payload = field.as_ref().map_or("", |f| f.as_str());
    ascii_reply(device.address(), payload.as_bytes(), sample.crc)
}

/// `<address><payload>[<CRC>]<CR><LF>`, the payload is cut to fit.
pub fn ascii_reply(address: Address, payload: &[u8], crc: bool) -> ReplyBytes {
    let mut data = ReplyBytes::new();
    data.push(address.as_byte());
    let room = data.remaining_capacity() - 5;
    data.try_extend_from_slice(&payload[..payload.len().min(room)])
        .expect("BUG: Send buffer too small.");
    if crc {
        let code = Checksum::new(&data).ascii();
        data.try_extend_from_slice(&code)
            .expect("BUG: Send buffer too small.");
    }
    data.try_extend_from_slice(b"\r\n")
        .expect("BUG: Send buffer too small.");
    data
}

/// `<address><size:u16 LE><type><payload><CRC:u16 LE>`
pub fn binary_reply(address: Address, data_type: u8, payload: &[u8]) -> ReplyBytes {
    let mut data = ReplyBytes::new();
    data.push(address.as_byte());
    let mut crc = Checksum::new(&data);
    let room = data.remaining_capacity() - 5;
    let payload = &payload[..payload.len().min(room)];
    let header = (payload.len() as u16).to_le_bytes();
    for &byte in header.iter().chain(&[data_type]).chain(payload) {
        data.push(byte);
        crc.add(byte);
    }
    data.try_extend_from_slice(&crc.value().to_le_bytes())
        .expect("BUG: Send buffer too small.");
    data
}
