//! Sensor (slave) side of the SDI-12 bus.
//!
//! Commands are parsed from the bus bytes, routed to one of the [`Device`]s of a
//! [`Sensor`] and run through the [`machine`], which answers with effects instead
//! of doing I/O. [`driver::Driver`] carries those out on a [`driver::Bus`].

mod buffer;
pub mod checksum;
mod command;
mod config;
mod device;
pub mod driver;
pub mod encoder;
pub mod formatter;
pub mod machine;
mod nom_parser;
mod sensor;
mod types;

pub use crate::command::{Command, Primary, Secondary, Target};
pub use crate::config::{Identity, ParameterInfo, SensorConfig, PROTOCOL_VERSION};
pub use crate::device::{Device, MemoryStorage, State, Storage};
pub use crate::sensor::{DeviceId, Dispatch, Sensor};
pub use crate::types::{addr, Address, Error, IntoAddress, DEFAULT_ADDRESS};
