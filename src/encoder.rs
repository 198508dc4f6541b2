//! Fixed-width ASCII rendering of measurement values.
//!
//! [`encode`] produces the shortest field that satisfies a width and precision
//! contract. Digits are generated least significant first into a bounded scratch
//! buffer and reversed at the end, so the output for a given input never depends on
//! locale or global state.

use arrayvec::ArrayVec;

/// Highest number of fractional digits the encoder will produce.
pub const MAX_PRECISION: u8 = 9;

/// What an unrepresentable value is sent as.
pub const OVERFLOW_TOKEN: &str = "NaN";

// Largest magnitude handled by the digit generator below.
const FAST_PATH_LIMIT: f64 = i32::MAX as f64;

// sign + 10 integral digits + '.' + 9 fractional digits
type Scratch = ArrayVec<u8, 24>;

/// One encoded measurement value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedField {
    Digits(String),
    /// The value is NaN, infinite or too wide for the field.
    Overflow,
}

impl EncodedField {
    /// The text to put on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Digits(text) => text,
            Self::Overflow => OVERFLOW_TOKEN,
        }
    }

    /// Number of encoded characters, zero for [`EncodedField::Overflow`].
    pub fn len(&self) -> usize {
        match self {
            Self::Digits(text) => text.len(),
            Self::Overflow => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_overflow(&self) -> bool {
        *self == Self::Overflow
    }
}

/// Encode `value` with at most `precision` fractional digits.
///
/// With a non-zero `max_field_len` the result never exceeds that many characters:
/// the precision is reduced until the value fits, and [`EncodedField::Overflow`] is
/// returned when even the integral part does not. Ties are broken towards an even
/// last kept digit.
///
/// ```
/// use sdi12_sensor::encoder::encode;
/// assert_eq!(encode(4.56789, 6, 5, false, true).as_str(), "+4.57");
/// assert_eq!(encode(-2.5, 3, 0, true, false).as_str(), "-2.500");
/// assert_eq!(encode(f64::NAN, 2, 0, false, false).as_str(), "NaN");
/// ```
pub fn encode(
    value: f64,
    precision: u8,
    max_field_len: u8,
    keep_trailing_zeros: bool,
    show_plus_sign: bool,
) -> EncodedField {
    if !value.is_finite() {
        return EncodedField::Overflow;
    }
    let negative = value < 0.0;
    let magnitude = value.abs();
    let sign = negative || show_plus_sign;
    let mut precision = precision.min(MAX_PRECISION);

    if max_field_len > 0 {
        let cap = i32::from(max_field_len);
        let integral_digits = integral_digit_count(magnitude);
        if integral_digits >= cap {
            return EncodedField::Overflow;
        }
        // one character each for the sign and the decimal point
        let mut budget = cap - integral_digits - 2;
        if !sign {
            budget += 1;
        }
        if i32::from(precision) > budget {
            precision = budget.max(0) as u8;
        }
    }

    let fmt = Format {
        negative,
        show_plus_sign,
        keep_trailing_zeros,
    };
    loop {
        let text = if magnitude > FAST_PATH_LIMIT {
            fmt.render_wide(magnitude, precision)
        } else {
            fmt.render(magnitude, precision)
        };
        if max_field_len == 0 || text.len() <= usize::from(max_field_len) {
            return EncodedField::Digits(text);
        }
        // rounding carried into a new integral digit
        if precision == 0 {
            return EncodedField::Overflow;
        }
        precision -= 1;
    }
}

fn integral_digit_count(magnitude: f64) -> i32 {
    let mut digits = 1;
    let mut rest = magnitude;
    while rest >= 10.0 {
        rest /= 10.0;
        digits += 1;
    }
    digits
}

struct Format {
    negative: bool,
    show_plus_sign: bool,
    keep_trailing_zeros: bool,
}

impl Format {
    fn render(&self, magnitude: f64, precision: u8) -> String {
        let scale = 10u64.pow(u32::from(precision));
        let mut integral = magnitude.trunc() as u64;
        let scaled = (magnitude - integral as f64) * scale as f64;
        let mut fraction = scaled.trunc() as u64;
        let remainder = scaled - fraction as f64;

        let last_kept = if precision == 0 { integral } else { fraction };
        let round_up = remainder > 0.499 && (remainder != 0.5 || last_kept % 2 == 1);
        if round_up {
            if precision == 0 {
                integral += 1;
            } else {
                fraction += 1;
                if fraction >= scale {
                    fraction -= scale;
                    integral += 1;
                }
            }
        }

        let mut digits = precision;
        if !self.keep_trailing_zeros {
            while digits > 0 && fraction % 10 == 0 {
                fraction /= 10;
                digits -= 1;
            }
        }

        let mut buf = Scratch::new();
        for _ in 0..digits {
            buf.push(b'0' + (fraction % 10) as u8); // push panics on overflow
            fraction /= 10;
        }
        if digits > 0 {
            buf.push(b'.');
        }
        loop {
            buf.push(b'0' + (integral % 10) as u8);
            integral /= 10;
            if integral == 0 {
                break;
            }
        }
        if let Some(sign) = self.sign() {
            buf.push(sign);
        }
        buf.reverse();
        buf.iter().map(|&c| c as char).collect()
    }

    /// Values beyond the digit generator go through the standard formatter.
    fn render_wide(&self, magnitude: f64, precision: u8) -> String {
        let mut text = format!("{:.*}", usize::from(precision), magnitude);
        if !self.keep_trailing_zeros && text.contains('.') {
            let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
            text.truncate(trimmed);
        }
        if let Some(sign) = self.sign() {
            text.insert(0, sign as char);
        }
        text
    }

    fn sign(&self) -> Option<u8> {
        if self.negative {
            Some(b'-')
        } else if self.show_plus_sign {
            Some(b'+')
        } else {
            None
        }
    }
}
