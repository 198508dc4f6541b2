//! Runs a [`Sensor`] on a bus connection.
//!
//! [`Driver::poll`] reads what the bus has received, dispatches every complete
//! command and carries out the resulting effects: replies are sent, addresses
//! persisted, acquisitions waited for with the injected delay and checked for
//! cancellation before their data is stored.

use core::convert::TryFrom;
use std::io;

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, trace, warn};
use snafu::{ResultExt, Snafu};

use crate::buffer::Buffer;
use crate::command::Command;
use crate::device::{Device, Storage};
use crate::machine::{Acquisition, BusActivity, CancelPolicy, Effect, Outcome};
use crate::nom_parser::{parse_command, CommandToken};
use crate::sensor::{Dispatch, DeviceId, Sensor};
use crate::types::{self, Address, IntoAddress};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Sending a reply failed.
    #[snafu(display("Bus I/O error"))]
    Io { source: io::Error },
    /// The sensor refused an operation.
    #[snafu(display("Sensor error"))]
    Sensor { source: types::Error },
}

/// The half-duplex serial line the sensor is connected to.
pub trait Bus {
    /// Number of received bytes waiting. Negative after a framing error.
    fn available(&mut self) -> i32;
    fn read_byte(&mut self) -> u8;
    /// # Errors
    /// Any transport error.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
    /// Release the line and listen for the next command.
    fn force_listen(&mut self);
    /// Take the line for transmitting.
    fn force_hold(&mut self);
    fn line_break_received(&mut self) -> bool;
    fn clear_line_break(&mut self);
    /// Drop everything the transport has buffered.
    fn clear_buffer(&mut self);
}

/// Where measurement values come from. Called once per acquisition.
pub trait MeasurementSource {
    fn measure(&mut self, address: Address) -> Vec<f64>;
}

impl<F> MeasurementSource for F
where
    F: FnMut(Address) -> Vec<f64>,
{
    fn measure(&mut self, address: Address) -> Vec<f64> {
        self(address)
    }
}

/// [`DelayMs`] that blocks the thread.
#[derive(Debug, Default, Copy, Clone)]
pub struct StdDelay;

impl DelayMs<u32> for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms.into()));
    }
}

/// Bus driver for a [`Sensor`].
///
/// # Example
///
/// ```
/// use sdi12_sensor::driver::{Bus, Driver};
/// use sdi12_sensor::{Address, Device, Sensor, SensorConfig};
/// # use std::collections::VecDeque;
/// # #[derive(Default)]
/// # struct Loopback { rx: VecDeque<u8>, tx: Vec<u8> }
/// # impl Bus for Loopback {
/// #     fn available(&mut self) -> i32 { self.rx.len() as i32 }
/// #     fn read_byte(&mut self) -> u8 { self.rx.pop_front().unwrap_or(0) }
/// #     fn send(&mut self, data: &[u8]) -> std::io::Result<()> { self.tx.extend_from_slice(data); Ok(()) }
/// #     fn force_listen(&mut self) {}
/// #     fn force_hold(&mut self) {}
/// #     fn line_break_received(&mut self) -> bool { false }
/// #     fn clear_line_break(&mut self) {}
/// #     fn clear_buffer(&mut self) { self.rx.clear() }
/// # }
/// # struct NoDelay;
/// # impl embedded_hal::blocking::delay::DelayMs<u32> for NoDelay { fn delay_ms(&mut self, _: u32) {} }
///
/// let mut sensor = Sensor::new(SensorConfig::default());
/// sensor.add_device(Device::new(b'0'))?;
/// let source = |_: Address| vec![21.5, -3.0];
/// let mut bus = Loopback::default();
/// bus.rx.extend(b"0M!");
/// let mut driver = Driver::new(bus, source, NoDelay, sensor);
/// driver.poll()?;
/// assert_eq!(driver.bus().tx, b"00219\r\n0\r\n");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Driver<B, S, D> {
    bus: B,
    source: S,
    delay: D,
    sensor: Sensor,
    buffer: Buffer,
    storage: Option<Box<dyn Storage>>,
}

impl<B, S, D> Driver<B, S, D>
where
    B: Bus,
    S: MeasurementSource,
    D: DelayMs<u32>,
{
    pub fn new(bus: B, source: S, delay: D, sensor: Sensor) -> Self {
        Self {
            bus,
            source,
            delay,
            sensor,
            buffer: Buffer::new(),
            storage: None,
        }
    }

    /// Persist address changes of devices created by [`Driver::add_stored_device`] to `storage`.
    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn sensor(&self) -> &Sensor {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut Sensor {
        &mut self.sensor
    }

    pub fn storage(&self) -> Option<&dyn Storage> {
        self.storage.as_deref()
    }

    /// Add a device whose address is restored from, and saved to, `slot` of the
    /// driver storage. Without storage the device gets the volatile `fallback` address.
    /// # Errors
    /// Returns [`Error::Sensor`] if the address is already in use.
    pub fn add_stored_device(&mut self, fallback: u8, slot: u16) -> Result<DeviceId, Error> {
        let device = match self.storage.as_deref() {
            Some(storage) => Device::with_storage(fallback, slot, storage),
            None => Device::new(fallback),
        };
        self.sensor.add_device(device).context(SensorSnafu)
    }

    /// Change the address of the device at `current`, saving it if the device
    /// has a storage slot. Returns false if there is no such device or the new
    /// address is invalid or taken.
    pub fn set_address(&mut self, current: impl IntoAddress, address: u8) -> bool {
        let id = match current.into_address().ok().and_then(|a| self.sensor.find(a)) {
            Some(id) => id,
            None => return false,
        };
        if !self.sensor.set_address(id, address) {
            return false;
        }
        let device = self.sensor.device(id);
        if let Some(slot) = device.storage_slot() {
            let address = device.address();
            self.persist(slot, address);
        }
        true
    }

    /// Run one cycle: handle everything received so far, then re-arm reception.
    /// # Errors
    /// Returns [`Error::Io`] if a reply could not be sent.
    pub fn poll(&mut self) -> Result<(), Error> {
        self.receive();
        while let Some(command) = self.next_command() {
            self.handle(&command)?;
        }
        self.bus.force_listen();
        Ok(())
    }

    // Move received bytes into the parse buffer. Returns true on a line break.
    fn receive(&mut self) -> bool {
        let line_break = self.bus.line_break_received();
        if line_break {
            self.bus.clear_line_break();
            // complete commands before the break are still handled in order
            let dropped = self.buffer.discard_partial();
            if dropped > 0 {
                debug!("Line break, discarding {} received bytes", dropped);
            }
        }

        let available = self.bus.available();
        if available < 0 {
            warn!("Framing error, flushing receive buffers");
            self.bus.clear_buffer();
            self.buffer.clear();
            return line_break;
        }
        let data: Vec<u8> = (0..available).map(|_| self.bus.read_byte()).collect();
        if !data.is_empty() {
            trace!("Received {:?}", data);
            self.buffer.write(&data);
        }
        line_break
    }

    fn next_command(&mut self) -> Option<Command> {
        loop {
            match parse_command(self.buffer.as_ref()) {
                (0, _) => return None,
                (consumed, token) => {
                    self.buffer.consume(consumed);
                    if let CommandToken::Command(command) = token {
                        return Some(command);
                    }
                    trace!("Discarding frame without address");
                }
            }
        }
    }

    fn handle(&mut self, command: &Command) -> Result<(), Error> {
        let dispatch = self.sensor.dispatch(command).context(SensorSnafu)?;
        let Dispatch { device, transition } = match dispatch {
            Some(dispatch) => dispatch,
            None => return Ok(()),
        };
        for effect in transition.effects {
            let result = match effect {
                Effect::Send(reply) => self.send(&reply),
                Effect::Persist { slot, address } => {
                    self.persist(slot, address);
                    Ok(())
                }
                Effect::Acquire(acquisition) => self.acquire(device, &acquisition),
                Effect::Sample(sample) => {
                    let address = self.sensor.device(device).address();
                    let values = self.source.measure(address);
                    let reply = self.sensor.sample(device, &sample, &values);
                    self.send(&reply)
                }
            };
            if let Err(e) = result {
                self.sensor.abort(device);
                return Err(e);
            }
        }
        self.bus.force_listen();
        Ok(())
    }

    fn acquire(&mut self, id: DeviceId, acquisition: &Acquisition) -> Result<(), Error> {
        let address = self.sensor.device(id).address();
        if acquisition.policy() == CancelPolicy::AddressedCommand {
            // the bus is free for other traffic until the data is collected
            self.bus.force_listen();
        }
        debug!("Device {} acquiring for {:?}", address, acquisition.delay);
        let ms = u32::try_from(acquisition.delay.as_millis()).unwrap_or(u32::MAX);
        self.delay.delay_ms(ms);

        let values = self.source.measure(address);
        let activity = self.drain();
        let outcome = if self.sensor.observe(id, acquisition, &activity) {
            Outcome::Cancelled
        } else {
            Outcome::Values(&values)
        };
        match self.sensor.complete(id, acquisition, outcome) {
            Some(notice) => self.send(&notice),
            None => Ok(()),
        }
    }

    // What arrived during an acquisition. Complete commands stay buffered and are
    // handled after it.
    fn drain(&mut self) -> BusActivity {
        let line_break = self.receive();
        let mut targets = Vec::new();
        let mut rest = self.buffer.as_ref();
        loop {
            match parse_command(rest) {
                (0, _) => break,
                (consumed, token) => {
                    if let CommandToken::Command(command) = token {
                        targets.push(command.target);
                    }
                    rest = &rest[consumed..];
                }
            }
        }
        BusActivity {
            line_break,
            targets,
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        trace!("Sending {:?}", data);
        self.bus.force_hold();
        self.bus.send(data).context(IoSnafu)
    }

    fn persist(&mut self, slot: u16, address: Address) {
        match self.storage.as_mut() {
            Some(storage) => {
                info!("Saving address {} to slot {}", address, slot);
                storage.write(slot, address.as_byte());
            }
            None => warn!("No storage for address {} in slot {}", address, slot),
        }
    }
}
