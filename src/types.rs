//! This module defines the range-checked sensor address and the crate error type.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid SDI-12 sensor address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
    /// An identification field is too long or contains non-printable characters.
    #[snafu(display("Invalid identification field: {}", field))]
    InvalidIdentity { field: &'static str },
    /// Another device on the same sensor already answers to this address.
    #[snafu(display("Address {} is already in use", address))]
    DuplicateAddress { address: Address },
    /// A device was activated while another one still owns the bus.
    #[snafu(display("Device {} is already active", address))]
    AlreadyActive { address: Address },
}

const fn invalid_address() -> InvalidAddressSnafu {
    InvalidAddressSnafu
}

/// Address is a single alphanumeric ASCII character identifying a sensor on the bus.
///
/// ## Example
/// ```
/// use sdi12_sensor::Address;
/// let addr = Address::new(b'5').unwrap();
/// assert_eq!(addr.as_char(), '5');
/// assert!(Address::new(b'$').is_err());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u8);

/// The address a device falls back to when none valid is available.
pub const DEFAULT_ADDRESS: Address = Address(b'0');

/// Create a new [`Address`], panics if it isn't alphanumeric.
pub const fn addr(a: u8) -> Address {
    if a.is_ascii_alphanumeric() {
        return Address(a);
    }
    panic!("Invalid address.")
}

impl Address {
    /// Create a new address, checking that it is an alphanumeric ASCII character.
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` isn't alphanumeric.
    pub fn new(address: impl TryInto<u8>) -> Result<Self, Error> {
        let address = address.try_into().ok().with_context(invalid_address)?;
        ensure!(address.is_ascii_alphanumeric(), invalid_address());
        Ok(Self(address))
    }

    /// The on-wire byte of this address.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    pub const fn as_char(self) -> char {
        self.0 as char
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl PartialEq<char> for Address {
    fn eq(&self, other: &char) -> bool {
        self.as_char() == *other
    }
}

/// Trait to convert `T: TryInto<u8>` into an [`Address`].
pub trait IntoAddress {
    /// Convert self to an Address.
    /// # Errors
    /// Returns `Error:InvalidAddress` if self isn't a valid address.
    fn into_address(self) -> Result<Address, Error>;
}

impl IntoAddress for Address {
    fn into_address(self) -> Result<Address, Error> {
        Ok(self)
    }
}

impl<T> IntoAddress for T
where
    T: TryInto<u8>,
{
    fn into_address(self) -> Result<Address, Error> {
        Address::new(self)
    }
}

impl TryFrom<char> for Address {
    type Error = Error;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        ensure!(value.is_ascii(), invalid_address());
        Self::new(value as u8)
    }
}
