use anyhow::{Context, Result};
use log::warn;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use sdi12_sensor::driver::{Bus, Driver, StdDelay};
use sdi12_sensor::{Address, Device, Sensor, SensorConfig};

/// SDI-12 over a serial adapter, RTS selects the transmit direction.
struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl Bus for SerialBus {
    fn available(&mut self) -> i32 {
        match self.port.bytes_to_read() {
            Ok(n) => n.min(i32::MAX as u32) as i32,
            Err(e) => {
                warn!("Serial port error: {}", e);
                -1
            }
        }
    }

    fn read_byte(&mut self) -> u8 {
        let mut byte = [0];
        match self.port.read_exact(&mut byte) {
            Ok(()) => byte[0],
            Err(_) => 0,
        }
    }

    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn force_listen(&mut self) {
        if let Err(e) = self.port.write_request_to_send(false) {
            warn!("Failed to release the line: {}", e);
        }
    }

    fn force_hold(&mut self) {
        if let Err(e) = self.port.write_request_to_send(true) {
            warn!("Failed to take the line: {}", e);
        }
    }

    // Breaks are not reported by the serial port API.
    fn line_break_received(&mut self) -> bool {
        false
    }

    fn clear_line_break(&mut self) {}

    fn clear_buffer(&mut self) {
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            warn!("Failed to clear the input buffer: {}", e);
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let address = args.next().and_then(|a| a.bytes().next()).unwrap_or(b'0');

    let serial = serialport::new(&port, 1200)
        .data_bits(DataBits::Seven)
        .parity(Parity::Even)
        .stop_bits(StopBits::One)
        .timeout(Duration::from_millis(100))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port))?;

    let mut sensor = Sensor::new(SensorConfig::default());
    sensor.add_device(Device::new(address))?;

    let start = Instant::now();
    let source = move |_: Address| {
        let t = start.elapsed().as_secs_f64();
        vec![20.0 + (t / 60.0).sin() * 5.0, 55.0 + (t / 90.0).cos() * 10.0]
    };

    let mut driver = Driver::new(SerialBus { port: serial }, source, StdDelay, sensor);
    loop {
        driver.poll()?;
        std::thread::sleep(Duration::from_millis(5));
    }
}
