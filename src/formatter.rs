//! Packing of measurement values into `aDn!` response lines.

use log::warn;

use crate::encoder::encode;

/// Line cap for data from a measurement that holds the bus (`aM!`).
pub const SHORT_LINE_CAP: usize = 35;
/// Line cap for data from measurements that release the bus (`aC!`, `aHA!`).
pub const LONG_LINE_CAP: usize = 75;
/// Number of data lines, `aD0!` through `aD9!`.
pub const LINE_SLOTS: usize = 10;

/// Precision used for packed values.
pub const DEFAULT_PRECISION: u8 = 6;
/// Sign, up to seven digits and the decimal point.
pub const DEFAULT_FIELD_CAP: u8 = 9;

/// The data lines produced by one measurement cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLines {
    lines: [String; LINE_SLOTS],
    crc: bool,
}

impl ResponseLines {
    /// The line for `aD<index>!`, `None` past the last slot.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// True when no slot holds data.
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(String::is_empty)
    }

    /// The measurement that produced these lines asked for a CRC.
    pub fn crc(&self) -> bool {
        self.crc
    }

    pub(crate) fn set_crc(&mut self, crc: bool) {
        self.crc = crc;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Pack `values` into lines shorter than `line_cap`, first fit in order.
///
/// Each value is encoded with a leading sign. A value that does not fit on the
/// current line starts the next one; values past the last slot are dropped.
///
/// ```
/// use sdi12_sensor::formatter::{pack, SHORT_LINE_CAP};
/// let lines = pack(&[1.5, -20.25], 6, 9, SHORT_LINE_CAP);
/// assert_eq!(lines.get(0), Some("+1.5-20.25"));
/// assert_eq!(lines.get(1), Some(""));
/// ```
pub fn pack(values: &[f64], precision: u8, field_cap: u8, line_cap: usize) -> ResponseLines {
    let mut lines = ResponseLines::default();
    let mut slot = 0;
    for (n, &value) in values.iter().enumerate() {
        let field = encode(value, precision, field_cap, false, true);
        let field = field.as_str();
        if lines.lines[slot].len() + field.len() >= line_cap {
            slot += 1;
            if slot == LINE_SLOTS {
                warn!("Response lines full, dropping {} values", values.len() - n);
                break;
            }
        }
        lines.lines[slot].push_str(field);
    }
    lines
}
