mod common;

use common::{init_logger, Injection, ScriptedDelay, SerialIOPlane, SerialInterface};
use sdi12_sensor::checksum::Checksum;
use sdi12_sensor::driver::{Driver, Error};
use sdi12_sensor::{Address, Device, MemoryStorage, Sensor, SensorConfig, Storage};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const VALUES: [f64; 9] = [
    1.1,
    -2.22,
    3.333,
    -4.4444,
    5.55555,
    -6.666666,
    78.777777,
    -890.888888,
    -0.11111111,
];

type Source = Box<dyn FnMut(Address) -> Vec<f64>>;
type TestDriver = Driver<SerialIOPlane, Source, ScriptedDelay>;

struct Fixture {
    serial: Rc<RefCell<SerialInterface>>,
    calls: Rc<Cell<usize>>,
    waited_ms: Rc<Cell<u64>>,
    driver: TestDriver,
}

fn fixture(addresses: &[u8], script: Vec<Option<Injection>>) -> Fixture {
    init_logger();
    let serial = SerialInterface::new();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let source: Source = Box::new(move |_| {
        counter.set(counter.get() + 1);
        VALUES.to_vec()
    });
    let delay = ScriptedDelay::new(&serial).script(script);
    let waited_ms = delay.waited_ms.clone();

    let mut sensor = Sensor::new(SensorConfig::default());
    for &a in addresses {
        sensor.add_device(Device::new(a)).unwrap();
    }
    let driver = Driver::new(SerialIOPlane::new(&serial), source, delay, sensor);
    Fixture {
        serial,
        calls,
        waited_ms,
        driver,
    }
}

impl Fixture {
    fn exchange(&mut self, command: &[u8]) -> Vec<u8> {
        self.serial.borrow_mut().push(command);
        self.driver.poll().unwrap();
        self.serial.borrow_mut().take_tx()
    }
}

fn with_crc(reply: &[u8]) -> Vec<u8> {
    let mut data = reply.to_vec();
    data.extend_from_slice(&Checksum::new(reply).ascii());
    data.extend_from_slice(b"\r\n");
    data
}

#[test]
fn measurement_and_data() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0M!"), b"00219\r\n0\r\n");
    assert_eq!(f.calls.get(), 1);
    assert_eq!(f.waited_ms.get(), 2000);

    assert_eq!(f.exchange(b"0D0!"), b"0+1.1-2.22+3.333-4.4444+5.55555\r\n");
    assert_eq!(f.exchange(b"0D1!"), b"0-6.666666+78.77778-890.8889\r\n");
    assert_eq!(f.exchange(b"0D2!"), b"0-0.111111\r\n");
    assert_eq!(f.exchange(b"0D3!"), b"0\r\n");
}

#[test]
fn measurement_with_crc() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0MC!"), b"00219\r\n0\r\n");
    assert_eq!(
        f.exchange(b"0D0!"),
        with_crc(b"0+1.1-2.22+3.333-4.4444+5.55555")
    );
}

#[test]
fn measurement_cancelled_by_command() {
    let mut f = fixture(b"0", vec![Some(Injection::Bytes(b"0!"))]);
    // no service request, the acknowledge is answered afterwards
    assert_eq!(f.exchange(b"0M!"), b"00219\r\n0\r\n");
    assert!(f.driver.sensor().devices().all(|d| d.lines().is_empty()));
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");
}

#[test]
fn measurement_cancelled_by_line_break() {
    let mut f = fixture(b"0", vec![Some(Injection::LineBreak)]);
    assert_eq!(f.exchange(b"0M!"), b"00219\r\n");
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");
    assert_eq!(f.driver.sensor().active(), None);
}

#[test]
fn measurement_cancelled_by_other_device() {
    let mut f = fixture(b"01", vec![Some(Injection::Bytes(b"1!"))]);
    assert_eq!(f.exchange(b"0M!"), b"00219\r\n1\r\n");
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");
}

#[test]
fn concurrent_measurement() {
    let mut f = fixture(b"0", vec![Some(Injection::LineBreak)]);
    assert_eq!(f.exchange(b"0C!"), b"002109\r\n");
    assert_eq!(
        f.exchange(b"0D0!"),
        b"0+1.1-2.22+3.333-4.4444+5.55555-6.666666+78.77778-890.8889-0.111111\r\n"
    );
}

#[test]
fn concurrent_ignores_other_devices() {
    let mut f = fixture(b"01", vec![Some(Injection::Bytes(b"1M!")), None]);
    assert_eq!(f.exchange(b"0C!"), b"002109\r\n10219\r\n1\r\n");
    assert_eq!(f.calls.get(), 2);
    assert_eq!(
        f.exchange(b"0D0!"),
        b"0+1.1-2.22+3.333-4.4444+5.55555-6.666666+78.77778-890.8889-0.111111\r\n"
    );
    assert_eq!(f.exchange(b"1D0!"), b"1+1.1-2.22+3.333-4.4444+5.55555\r\n");
}

#[test]
fn concurrent_cancelled_by_own_address() {
    let mut f = fixture(b"0", vec![Some(Injection::Bytes(b"0I!"))]);
    assert_eq!(f.exchange(b"0C!"), b"002109\r\n014SDI12RS SENSOR010\r\n");
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");
}

#[test]
fn high_volume() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0HA!"), b"0021009\r\n");
    assert!(f.exchange(b"0D0!").starts_with(b"0+1.1-2.22"));

    assert_eq!(f.exchange(b"0HB!"), b"0021009\r\n");
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");

    let reply = f.exchange(b"0DB0!");
    assert_eq!(&reply[..4], &[b'0', 0, 0, 0]);
    assert_eq!(reply.len(), 6);
}

#[test]
fn unsupported_measurement() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0M3!"), b"00000\r\n");
    assert_eq!(f.exchange(b"0C1!"), b"000000\r\n");
    assert_eq!(f.calls.get(), 0);
}

#[test]
fn identify() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0I!"), b"014SDI12RS SENSOR010\r\n");
    assert_eq!(f.exchange(b"0IM!"), b"00219\r\n");
    assert_eq!(f.exchange(b"0IC!"), b"002109\r\n");
    // probes never start an acquisition
    assert_eq!(f.calls.get(), 0);
    assert_eq!(f.waited_ms.get(), 0);
}

#[test]
fn continuous() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0R0!"), b"0+1.1\r\n");
    assert_eq!(f.exchange(b"0RC3!"), with_crc(b"0-4.4444"));
    assert_eq!(f.exchange(b"0R9!"), b"0\r\n");
    assert_eq!(f.calls.get(), 3);
    assert_eq!(f.waited_ms.get(), 0);
    assert_eq!(f.driver.sensor().active(), None);
}

#[test]
fn verify_and_unknown() {
    let mut f = fixture(b"0", vec![]);
    f.exchange(b"0M!");
    assert_eq!(f.exchange(b"0V!"), b"00000\r\n");
    assert_eq!(f.exchange(b"0D0!"), b"0\r\n");
    assert_eq!(f.exchange(b"0X!"), b"0?\r\n");
}

#[test]
fn ignored_traffic() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"1M!"), b"");
    assert_eq!(f.exchange(b"?M!"), b"");
    assert_eq!(f.exchange(b"$!"), b"");
    assert_eq!(f.exchange(b"!"), b"");
    assert_eq!(f.exchange(b"0"), b"");
    assert_eq!(f.exchange(b"!"), b"0\r\n");
}

#[test]
fn address_change() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0A$!"), b"0\r\n");
    assert_eq!(f.exchange(b"0A5!"), b"5\r\n");
    assert_eq!(f.exchange(b"?!"), b"5\r\n");
    assert_eq!(f.exchange(b"0!"), b"");

    assert!(!f.driver.set_address(b'5', b'$'));
    assert!(!f.driver.set_address(b'0', b'7'));
    assert!(f.driver.set_address(b'5', b'7'));
    assert_eq!(f.exchange(b"?!"), b"7\r\n");
}

#[test]
fn address_change_to_used_address() {
    let mut f = fixture(b"01", vec![]);
    assert_eq!(f.exchange(b"0A1!"), b"0\r\n");
    assert_eq!(f.exchange(b"?!"), b"0\r\n");
}

#[test]
fn stored_address() {
    init_logger();
    let serial = SerialInterface::new();
    let mut storage = MemoryStorage::new();
    storage.write(3, b'4');

    let source = |_: Address| VALUES.to_vec();
    let mut driver = Driver::new(
        SerialIOPlane::new(&serial),
        source,
        ScriptedDelay::new(&serial),
        Sensor::new(SensorConfig::default()),
    )
    .with_storage(Box::new(storage));
    driver.add_stored_device(b'0', 3).unwrap();
    driver.add_stored_device(b'9', 4).unwrap();
    assert!(driver.add_stored_device(b'9', 5).is_err());

    serial.borrow_mut().push(b"?!4Ab!");
    driver.poll().unwrap();
    assert_eq!(serial.borrow_mut().take_tx(), b"4\r\nb\r\n");
    assert_eq!(driver.storage().map(|s| s.read(3)), Some(b'b'));

    assert!(driver.set_address(b'9', b'c'));
    assert_eq!(driver.storage().map(|s| s.read(4)), Some(b'c'));
}

#[test]
fn address_changes_are_saved() {
    init_logger();
    let serial = SerialInterface::new();
    let source = |_: Address| VALUES.to_vec();
    let mut driver = Driver::new(
        SerialIOPlane::new(&serial),
        source,
        ScriptedDelay::new(&serial),
        Sensor::new(SensorConfig::default()),
    )
    .with_storage(Box::new(MemoryStorage::new()));
    driver.add_stored_device(b'0', 0).unwrap();
    assert_eq!(driver.storage().map(|s| s.read(0)), Some(0xff));

    // rejected changes leave storage alone
    serial.borrow_mut().push(b"0A$!");
    driver.poll().unwrap();
    assert!(!driver.set_address(b'0', b'$'));
    assert_eq!(driver.storage().map(|s| s.read(0)), Some(0xff));

    serial.borrow_mut().push(b"0A1!");
    driver.poll().unwrap();
    assert_eq!(driver.storage().map(|s| s.read(0)), Some(b'1'));
    assert!(driver.set_address(b'1', b'2'));
    assert_eq!(driver.storage().map(|s| s.read(0)), Some(b'2'));
    assert_eq!(serial.borrow_mut().take_tx(), b"0\r\n1\r\n");
}

#[test]
fn line_break_discards_partial_command() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0M"), b"");
    f.serial.borrow_mut().line_break();
    assert_eq!(f.exchange(b"0!"), b"0\r\n");
}

#[test]
fn line_break_keeps_complete_commands() {
    let mut f = fixture(b"01", vec![Some(Injection::LineBreak)]);
    assert_eq!(f.exchange(b"0C!1!"), b"002109\r\n1\r\n");
    assert!(f.exchange(b"0D0!").starts_with(b"0+1.1"));
}

#[test]
fn line_break_during_acquisition_drops_fragment() {
    let mut f = fixture(b"01", vec![Some(Injection::LineBreak)]);
    assert_eq!(f.exchange(b"0C!1!1M"), b"002109\r\n1\r\n");
    assert_eq!(f.exchange(b"1!"), b"1\r\n");
}

#[test]
fn long_command_queue() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(&b"0!".repeat(40)), b"0\r\n".repeat(40));
}

#[test]
fn framing_error_flushes() {
    let mut f = fixture(b"0", vec![]);
    assert_eq!(f.exchange(b"0M"), b"");
    f.serial.borrow_mut().trigger_framing_error();
    assert_eq!(f.exchange(b"1!"), b"");
    assert_eq!(f.exchange(b"0!"), b"0\r\n");
}

#[test]
fn bus_direction() {
    let mut f = fixture(b"0", vec![]);
    f.exchange(b"0M!");
    let serial = f.serial.borrow();
    assert_eq!(serial.holds, 2);
    assert!(serial.listens >= 1);
}

#[test]
fn write_error() {
    let mut f = fixture(b"0", vec![]);
    f.serial.borrow_mut().trigger_write_error();
    f.serial.borrow_mut().push(b"0M!");
    assert!(matches!(f.driver.poll(), Err(Error::Io { .. })));
    assert_eq!(f.driver.sensor().active(), None);
    assert_eq!(f.calls.get(), 0);
    assert_eq!(f.exchange(b"0!"), b"0\r\n");
}

#[test]
fn sleeping_device() {
    let mut f = fixture(b"0", vec![]);
    let id = f.driver.sensor().find(b'0').unwrap();
    f.driver.sensor_mut().device_mut(id).sleep();
    assert_eq!(f.exchange(b"0!"), b"");
    f.driver.sensor_mut().device_mut(id).wake();
    assert_eq!(f.exchange(b"0!"), b"0\r\n");
}
