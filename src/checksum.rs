//! SDI-12 check codes.
//!
//! The bus uses CRC-16/ARC (polynomial 0xA001 reflected, zero init) over the reply,
//! starting with the address character. ASCII replies carry it as three printable
//! characters, binary packets as two little-endian bytes.

use crc::{Crc, Digest, CRC_16_ARC};

static SDI12_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Running checksum over a reply.
pub struct Checksum {
    digest: Digest<'static, u16>,
}

impl Checksum {
    /// Start a checksum over the reply assembled so far.
    pub fn new(reply: &[u8]) -> Self {
        let mut digest = SDI12_CRC.digest();
        digest.update(reply);
        Self { digest }
    }

    pub fn add(&mut self, value: u8) {
        self.digest.update(&[value]);
    }

    pub fn value(self) -> u16 {
        self.digest.finalize()
    }

    /// The three character form appended to ASCII replies.
    pub fn ascii(self) -> [u8; 3] {
        encode_ascii(self.value())
    }
}

pub(crate) const fn encode_ascii(crc: u16) -> [u8; 3] {
    [
        0x40 | (crc >> 12) as u8,
        0x40 | ((crc >> 6) & 0x3f) as u8,
        0x40 | (crc & 0x3f) as u8,
    ]
}
