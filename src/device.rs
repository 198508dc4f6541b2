//! A sensor identity on the bus and its persistent address storage.

use log::{info, warn};

use crate::formatter::ResponseLines;
use crate::types::{Address, DEFAULT_ADDRESS};

/// Byte storage surviving power cycles, such as an EEPROM.
pub trait Storage {
    fn read(&self, slot: u16) -> u8;
    fn write(&mut self, slot: u16, value: u8);
}

/// [`Storage`] kept in memory, reads of unwritten slots return 0xff like erased EEPROM.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, slot: u16) -> u8 {
        self.data.get(usize::from(slot)).copied().unwrap_or(0xff)
    }

    fn write(&mut self, slot: u16, value: u8) {
        let slot = usize::from(slot);
        if self.data.len() <= slot {
            self.data.resize(slot + 1, 0xff);
        }
        self.data[slot] = value;
    }
}

/// Where a device is in the command/response cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    LowPower,
    Ready,
    Measurement,
    Concurrent,
    HighVolumeMeasurement,
    Continuous,
    Verify,
}

/// One sensor identity on the bus.
#[derive(Debug, Clone)]
pub struct Device {
    address: Address,
    storage_slot: Option<u16>,
    pub(crate) active: bool,
    pub(crate) state: State,
    pub(crate) crc_requested: bool,
    pub(crate) lines: ResponseLines,
}

impl Device {
    /// A device with a volatile address. Falls back to `'0'` if `address` isn't
    /// alphanumeric.
    pub fn new(address: u8) -> Self {
        Self::create(Address::new(address).unwrap_or(DEFAULT_ADDRESS), None)
    }

    /// A device whose address lives in `storage` at `slot`. The stored address is
    /// used if valid, then `fallback`, then `'0'`.
    pub fn with_storage(fallback: u8, slot: u16, storage: &dyn Storage) -> Self {
        let address = Address::new(storage.read(slot))
            .or_else(|_| Address::new(fallback))
            .unwrap_or(DEFAULT_ADDRESS);
        Self::create(address, Some(slot))
    }

    fn create(address: Address, storage_slot: Option<u16>) -> Self {
        Self {
            address,
            storage_slot,
            active: false,
            state: State::Ready,
            crc_requested: false,
            lines: ResponseLines::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    // Change the address in memory. Returns false and keeps the current address if
    // `address` isn't alphanumeric. Callers mirror the change to `storage_slot`.
    pub(crate) fn set_address(&mut self, address: u8) -> bool {
        match Address::new(address) {
            Ok(address) => {
                info!("Device {} changes address to {}", self.address, address);
                self.address = address;
                true
            }
            Err(_) => {
                warn!("Device {} rejects address {:?}", self.address, address as char);
                false
            }
        }
    }

    pub fn storage_slot(&self) -> Option<u16> {
        self.storage_slot
    }

    /// True while the device owes the bus a response.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The current command asked for a CRC.
    pub fn crc_requested(&self) -> bool {
        self.crc_requested
    }

    pub fn lines(&self) -> &ResponseLines {
        &self.lines
    }

    /// Stop answering commands until [`Device::wake`].
    pub fn sleep(&mut self) {
        self.state = State::LowPower;
    }

    pub fn wake(&mut self) {
        if self.state == State::LowPower {
            self.state = State::Ready;
        }
    }
}
