use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::bytes::streaming::take_till;
use nom::character::complete::{anychar, char as ascii_char, satisfy};
use nom::combinator::{all_consuming, eof, map, map_res, opt, value};
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use crate::command::{Command, Primary, Secondary, Target};
use crate::types::Address;

type Char = u8;
type Buf = [u8];

pub(crate) const TERMINATOR: u8 = b'!';

#[derive(PartialEq, Debug, Copy, Clone)]
pub(crate) enum CommandToken {
    Command(Command),
    /// A terminated frame without a usable address. Nobody answers it.
    Invalid,
    NeedData,
}

/// Everything after the address, up to the terminator.
#[derive(PartialEq, Debug, Copy, Clone)]
struct Verb {
    primary: Primary,
    secondary: Secondary,
    crc: bool,
    param1: u16,
    param2: u16,
}

impl Verb {
    const fn new(primary: Primary) -> Self {
        Self {
            primary,
            secondary: Secondary::None,
            crc: false,
            param1: 0,
            param2: 0,
        }
    }

    fn into_command(self, target: Target) -> Command {
        Command::new(target, self.primary)
            .with_secondary(self.secondary)
            .with_crc(self.crc)
            .with_params(self.param1, self.param2)
    }
}

/// Returns the number of bytes consumed from `buf` along with the parsed token.
/// Zero bytes are consumed while the terminator is missing.
pub(crate) fn parse_command(buf: &Buf) -> (usize, CommandToken) {
    match frame(buf) {
        Ok((remaining, body)) => (buf.len() - remaining.len(), command(body)),
        Err(_) => (0, CommandToken::NeedData),
    }
}

fn frame(buf: &Buf) -> IResult<&Buf, &Buf> {
    terminated(
        take_till(|c| c == TERMINATOR),
        nom::character::streaming::char(TERMINATOR as char),
    )(buf)
}

fn command(body: &Buf) -> CommandToken {
    let (rest, target) = match target(body) {
        Ok(x) => x,
        Err(_) => return CommandToken::Invalid,
    };
    let verb = match all_consuming(verb)(rest) {
        Ok((_, verb)) => verb,
        Err(_) => Verb::new(Primary::Unknown),
    };
    let verb = match (target, verb.primary) {
        (Target::Any, Primary::Acknowledge) => Verb::new(Primary::AddressQuery),
        _ => verb,
    };
    CommandToken::Command(verb.into_command(target))
}

fn target(buf: &Buf) -> IResult<&Buf, Target> {
    alt((
        value(Target::Any, ascii_char('?')),
        map_res(satisfy(|c| c.is_ascii_alphanumeric()), |c| {
            Address::new(c as u8).map(Target::Device)
        }),
    ))(buf)
}

fn verb(buf: &Buf) -> IResult<&Buf, Verb> {
    alt((
        value(Verb::new(Primary::Acknowledge), eof),
        address_change,
        identify,
        measurement('M', Primary::Measurement),
        measurement('C', Primary::ConcurrentMeasurement),
        value(Verb::new(Primary::HighVolumeAscii), tag("HA")),
        value(Verb::new(Primary::HighVolumeByte), tag("HB")),
        continuous,
        map(preceded(tag("DB"), number(1, 3)), |n| Verb {
            param1: n,
            ..Verb::new(Primary::ByteDataRequest)
        }),
        map(preceded(ascii_char('D'), number(1, 1)), |n| Verb {
            param1: n,
            ..Verb::new(Primary::DataRequest)
        }),
        value(Verb::new(Primary::Verification), ascii_char('V')),
    ))(buf)
}

fn address_change(buf: &Buf) -> IResult<&Buf, Verb> {
    map(preceded(ascii_char('A'), anychar), |c| Verb {
        param1: c as u16,
        ..Verb::new(Primary::AddressChange)
    })(buf)
}

/// `M[C][n]` or `C[C][n]`
fn measurement<'a>(
    letter: char,
    primary: Primary,
) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, Verb> {
    map(
        tuple((ascii_char(letter), crc_flag, opt(number(1, 1)))),
        move |(_, crc, index)| Verb {
            crc,
            param1: index.unwrap_or(0),
            ..Verb::new(primary)
        },
    )
}

fn continuous(buf: &Buf) -> IResult<&Buf, Verb> {
    map(
        tuple((ascii_char('R'), crc_flag, number(1, 1))),
        |(_, crc, index)| Verb {
            crc,
            param1: index,
            ..Verb::new(Primary::ContinuousMeasurement)
        },
    )(buf)
}

/// `I`, or `I<mode>[n][_nnn]`
fn identify(buf: &Buf) -> IResult<&Buf, Verb> {
    let (buf, _) = ascii_char('I')(buf)?;
    alt((
        map(
            tuple((
                identify_mode,
                opt(number(1, 1)),
                opt(preceded(ascii_char('_'), number(3, 3))),
            )),
            |((secondary, crc), index, parameter)| Verb {
                secondary,
                crc,
                param1: index.unwrap_or(0),
                param2: parameter.unwrap_or(0),
                ..Verb::new(Primary::Identification)
            },
        ),
        value(Verb::new(Primary::Identification), eof),
    ))(buf)
}

fn identify_mode(buf: &Buf) -> IResult<&Buf, (Secondary, bool)> {
    alt((
        map(tag("HA"), |_| (Secondary::HighVolumeAscii, false)),
        map(tag("HB"), |_| (Secondary::HighVolumeByte, false)),
        map(preceded(ascii_char('M'), crc_flag), |crc| {
            (Secondary::Measurement, crc)
        }),
        map(preceded(ascii_char('C'), crc_flag), |crc| {
            (Secondary::ConcurrentMeasurement, crc)
        }),
        map(preceded(ascii_char('R'), crc_flag), |crc| {
            (Secondary::ContinuousMeasurement, crc)
        }),
        map(ascii_char('V'), |_| (Secondary::Verification, false)),
    ))(buf)
}

fn crc_flag(buf: &Buf) -> IResult<&Buf, bool> {
    map(opt(ascii_char('C')), |c| c.is_some())(buf)
}

fn number<'a>(min: usize, max: usize) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, u16> {
    map_int(take_while_m_n(min, max, |c: Char| c.is_ascii_digit()))
}

fn map_int<'a, O, F>(first: F) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, O>
where
    F: FnMut(&'a Buf) -> IResult<&'a Buf, &'a Buf>,
    O: core::str::FromStr,
{
    let to_str = map_res(first, |u: &'a Buf| core::str::from_utf8(u));
    map_res(to_str, |s| s.parse::<O>())
}
