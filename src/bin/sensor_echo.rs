use std::collections::VecDeque;
use std::error::Error;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

use sdi12_sensor::driver::{Bus, Driver, StdDelay};
use sdi12_sensor::{Address, Device, Sensor, SensorConfig};

/// Commands on stdin, replies on stdout. Line endings are dropped so commands can be
/// typed one per line.
struct StdioBus {
    rx: mpsc::Receiver<u8>,
    pending: VecDeque<u8>,
    closed: bool,
}

impl StdioBus {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for byte in io::stdin().bytes() {
                match byte {
                    Ok(b'\r') | Ok(b'\n') => continue,
                    Ok(b) if tx.send(b).is_ok() => continue,
                    _ => break,
                }
            }
        });
        Self {
            rx,
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

impl Bus for StdioBus {
    fn available(&mut self) -> i32 {
        loop {
            match self.rx.try_recv() {
                Ok(b) => self.pending.push_back(b),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        self.pending.len() as i32
    }

    fn read_byte(&mut self) -> u8 {
        self.pending.pop_front().unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(data)?;
        stdout.flush()
    }

    fn force_listen(&mut self) {}

    fn force_hold(&mut self) {}

    fn line_break_received(&mut self) -> bool {
        false
    }

    fn clear_line_break(&mut self) {}

    fn clear_buffer(&mut self) {
        self.pending.clear();
    }
}

fn sensor_main_loop(address: u8) -> Result<(), Box<dyn Error>> {
    let mut sensor = Sensor::new(SensorConfig::default());
    sensor.add_device(Device::new(address))?;

    let mut cycle = 0.0;
    let source = move |_: Address| {
        cycle += 1.0;
        vec![cycle, -cycle / 3.0, 21.5, 1013.25]
    };

    let mut driver = Driver::new(StdioBus::new(), source, StdDelay, sensor);
    loop {
        driver.poll()?;
        let bus = driver.bus();
        if bus.closed && bus.pending.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let address = std::env::args()
        .nth(1)
        .and_then(|a| a.bytes().next())
        .unwrap_or(b'0');
    sensor_main_loop(address)
}
