//! The devices emulated by one sensor, see [`Sensor`].

use log::{debug, trace, warn};
use snafu::ensure;

use crate::command::{Command, Primary, Target};
use crate::config::SensorConfig;
use crate::device::{Device, State};
use crate::machine::{
    self, Acquisition, BusActivity, CancelPolicy, Effect, Outcome, ReplyBytes, Sample, Transition,
};
use crate::types::{AlreadyActiveSnafu, DuplicateAddressSnafu, Error, IntoAddress};

/// Handle to a device registered with a [`Sensor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceId(usize);

/// The device a command was dispatched to, and what it asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub device: DeviceId,
    pub transition: Transition,
}

/// Registry of the devices sharing one bus connection.
///
/// At most one device is active at a time. A device becomes active when a
/// command leaves it with deferred work ([`Effect::Acquire`] or
/// [`Effect::Sample`]) and stays so until [`Sensor::complete`] or
/// [`Sensor::sample`] is called for it.
///
/// # Example
///
/// ```
/// use sdi12_sensor::{Command, Device, Sensor, SensorConfig};
/// use sdi12_sensor::machine::Effect;
///
/// let mut sensor = Sensor::new(SensorConfig::default());
/// sensor.add_device(Device::new(b'0')).unwrap();
///
/// let dispatch = sensor.dispatch(&Command::parse(b"0!").unwrap()).unwrap().unwrap();
/// match &dispatch.transition.effects[0] {
///     Effect::Send(reply) => assert_eq!(&reply[..], b"0\r\n"),
///     other => panic!("unexpected {:?}", other),
/// }
/// // Commands for other addresses are not ours to answer
/// assert!(sensor.dispatch(&Command::parse(b"1!").unwrap()).unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct Sensor {
    devices: Vec<Device>,
    active: Option<DeviceId>,
    config: SensorConfig,
}

impl Sensor {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            devices: Vec::new(),
            active: None,
            config,
        }
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Register another device.
    /// # Errors
    /// Returns [`Error::DuplicateAddress`] if a registered device already uses its address.
    pub fn add_device(&mut self, device: Device) -> Result<DeviceId, Error> {
        let address = device.address();
        ensure!(self.find(address).is_none(), DuplicateAddressSnafu { address });
        self.devices.push(device);
        Ok(DeviceId(self.devices.len() - 1))
    }

    /// Look up a device by address.
    pub fn find(&self, address: impl IntoAddress) -> Option<DeviceId> {
        let address = address.into_address().ok()?;
        self.devices
            .iter()
            .position(|d| d.address() == address)
            .map(DeviceId)
    }

    pub fn device(&self, id: DeviceId) -> &Device {
        &self.devices[id.0]
    }

    pub fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        &mut self.devices[id.0]
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// The device currently owing the bus a response.
    pub fn active(&self) -> Option<DeviceId> {
        self.active
    }

    /// Mark `id` as the responding device.
    /// # Errors
    /// Returns [`Error::AlreadyActive`] if any device is active already.
    pub fn activate(&mut self, id: DeviceId) -> Result<(), Error> {
        if let Some(current) = self.active {
            let address = self.device(current).address();
            warn!("Device {} is still active", address);
            return AlreadyActiveSnafu { address }.fail();
        }
        self.active = Some(id);
        self.devices[id.0].active = true;
        Ok(())
    }

    pub fn deactivate(&mut self) {
        if let Some(id) = self.active.take() {
            self.devices[id.0].active = false;
        }
    }

    /// Route `command` to the device it addresses and run it through the state machine.
    ///
    /// Returns `Ok(None)` when no device here should answer, such as traffic for
    /// other addresses or a wildcard used with anything but an address query.
    /// # Errors
    /// Returns [`Error::AlreadyActive`] if a device still has deferred work pending.
    pub fn dispatch(&mut self, command: &Command) -> Result<Option<Dispatch>, Error> {
        if let Some(current) = self.active {
            let address = self.device(current).address();
            return AlreadyActiveSnafu { address }.fail();
        }
        let id = match self.resolve(command) {
            Some(id) => id,
            None => {
                trace!("Ignoring {:?} for {:?}", command.primary, command.target);
                return Ok(None);
            }
        };

        let taken: Vec<_> = self
            .devices
            .iter()
            .enumerate()
            .filter(|(n, _)| *n != id.0)
            .map(|(_, d)| d.address())
            .collect();
        let transition = machine::step(&mut self.devices[id.0], command, &self.config, &taken);
        let deferred = transition
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Acquire(_) | Effect::Sample(_)));
        if deferred {
            self.activate(id)?;
        }
        Ok(Some(Dispatch {
            device: id,
            transition,
        }))
    }

    fn resolve(&self, command: &Command) -> Option<DeviceId> {
        match command.target {
            Target::Any if command.primary == Primary::AddressQuery => {
                (!self.devices.is_empty()).then(|| DeviceId(0))
            }
            Target::Any => None,
            Target::Device(address) => self.find(address),
        }
    }

    /// Check what happened on the bus during the acquisition running on `id`.
    /// Returns true if the acquisition is cancelled.
    ///
    /// A measurement holding the bus loses it, and the device its active
    /// status, to any new command.
    pub fn observe(
        &mut self,
        id: DeviceId,
        acquisition: &Acquisition,
        activity: &BusActivity,
    ) -> bool {
        if acquisition.policy() == CancelPolicy::LineBreak && activity.has_commands() {
            debug!("New command while device {} holds the bus", self.device(id).address());
            self.deactivate();
        }
        let address = self.device(id).address();
        acquisition.cancelled_by(activity, address) || self.active != Some(id)
    }

    /// Finish the acquisition on `id`, see [`machine::complete`].
    pub fn complete(
        &mut self,
        id: DeviceId,
        acquisition: &Acquisition,
        outcome: Outcome<'_>,
    ) -> Option<ReplyBytes> {
        if self.active == Some(id) {
            self.deactivate();
        }
        machine::complete(&mut self.devices[id.0], acquisition, outcome, &self.config)
    }

    /// Build the continuous measurement reply for `id`, see [`machine::sample_reply`].
    pub fn sample(&mut self, id: DeviceId, sample: &Sample, values: &[f64]) -> ReplyBytes {
        if self.active == Some(id) {
            self.deactivate();
        }
        machine::sample_reply(&mut self.devices[id.0], sample, values, &self.config)
    }

    /// Drop the deferred work of `id` after a bus fault.
    pub fn abort(&mut self, id: DeviceId) {
        if self.active == Some(id) {
            self.deactivate();
        }
        let device = &mut self.devices[id.0];
        device.lines.clear();
        device.state = State::Ready;
    }

    // Change the address of `id` in memory. Fails on non-alphanumeric addresses
    // and on addresses used by another device. Saving it is left to the driver.
    pub(crate) fn set_address(&mut self, id: DeviceId, address: u8) -> bool {
        match self.find(address) {
            Some(other) if other != id => {
                warn!("Address {:?} is used by another device", address as char);
                false
            }
            _ => self.devices[id.0].set_address(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::addr;

    fn command(data: &[u8]) -> Command {
        Command::parse(data).unwrap()
    }

    fn sensor(addresses: &[u8]) -> Sensor {
        let mut sensor = Sensor::new(SensorConfig::default());
        for &a in addresses {
            sensor.add_device(Device::new(a)).unwrap();
        }
        sensor
    }

    fn acquisition(dispatch: &Dispatch) -> Acquisition {
        dispatch
            .transition
            .effects
            .iter()
            .find_map(|e| match e {
                Effect::Acquire(acq) => Some(*acq),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_duplicate_address() {
        let mut sensor = sensor(b"0");
        assert_eq!(
            sensor.add_device(Device::new(b'0')),
            Err(Error::DuplicateAddress { address: addr(b'0') })
        );
        assert!(sensor.add_device(Device::new(b'1')).is_ok());
    }

    #[test]
    fn test_routing() {
        let mut sensor = sensor(b"0a");
        let d = sensor.dispatch(&command(b"a!")).unwrap().unwrap();
        assert_eq!(sensor.device(d.device).address(), 'a');
        assert!(sensor.dispatch(&command(b"b!")).unwrap().is_none());
        // wildcard only for address queries
        let d = sensor.dispatch(&command(b"?!")).unwrap().unwrap();
        assert_eq!(d.device, sensor.find(b'0').unwrap());
        assert!(sensor.dispatch(&command(b"?I!")).unwrap().is_none());
    }

    #[test]
    fn test_single_active() {
        let mut sensor = sensor(b"01");
        let first = sensor.dispatch(&command(b"0M!")).unwrap().unwrap();
        assert_eq!(sensor.active(), Some(first.device));
        assert!(sensor.device(first.device).is_active());

        let other = sensor.find(b'1').unwrap();
        assert_eq!(
            sensor.activate(other),
            Err(Error::AlreadyActive { address: addr(b'0') })
        );
        assert!(sensor.dispatch(&command(b"1!")).is_err());

        let acq = acquisition(&first);
        sensor.complete(first.device, &acq, Outcome::Values(&[1.0]));
        assert_eq!(sensor.active(), None);
        assert!(!sensor.device(first.device).is_active());
        assert!(sensor.dispatch(&command(b"1!")).unwrap().is_some());
    }

    #[test]
    fn test_observe_hold() {
        let mut sensor = sensor(b"01");
        let d = sensor.dispatch(&command(b"0M!")).unwrap().unwrap();
        let acq = acquisition(&d);

        let quiet = BusActivity::default();
        assert!(!sensor.observe(d.device, &acq, &quiet));

        // traffic for another device still takes the bus away
        let traffic = BusActivity {
            line_break: false,
            targets: vec![Target::Device(addr(b'1'))],
        };
        assert!(sensor.observe(d.device, &acq, &traffic));
        assert_eq!(sensor.active(), None);
        assert_eq!(sensor.complete(d.device, &acq, Outcome::Cancelled), None);
        assert_eq!(sensor.device(d.device).state(), State::Ready);
    }

    #[test]
    fn test_observe_concurrent() {
        let mut sensor = sensor(b"01");
        let d = sensor.dispatch(&command(b"0C!")).unwrap().unwrap();
        let acq = acquisition(&d);
        let other = BusActivity {
            line_break: true,
            targets: vec![Target::Device(addr(b'1'))],
        };
        assert!(!sensor.observe(d.device, &acq, &other));
        assert_eq!(sensor.active(), Some(d.device));
        let mine = BusActivity {
            line_break: false,
            targets: vec![Target::Device(addr(b'0'))],
        };
        assert!(sensor.observe(d.device, &acq, &mine));
    }

    #[test]
    fn test_sample_deactivates() {
        let mut sensor = sensor(b"0");
        let d = sensor.dispatch(&command(b"0R0!")).unwrap().unwrap();
        assert_eq!(sensor.active(), Some(d.device));
        let reply = sensor.sample(d.device, &Sample { index: 0, crc: false }, &[7.0]);
        assert_eq!(&reply[..], b"0+7\r\n");
        assert_eq!(sensor.active(), None);
    }

    #[test]
    fn test_set_address() {
        let mut sensor = sensor(b"01");
        let id = sensor.find(b'0').unwrap();
        assert!(!sensor.set_address(id, b'$'));
        assert!(!sensor.set_address(id, b'1'));
        assert!(sensor.set_address(id, b'0'));
        assert!(sensor.set_address(id, b'5'));
        assert_eq!(sensor.find(b'5'), Some(id));
        assert_eq!(sensor.find(b'0'), None);

        // refused by the state machine as well
        let d = sensor.dispatch(&command(b"5A1!")).unwrap().unwrap();
        assert_eq!(sensor.device(d.device).address(), '5');
    }
}
