#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use sdi12_sensor::driver::Bus;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct SerialInterface {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    line_break: bool,
    framing_error: bool,
    do_write_error: bool,
    pub holds: usize,
    pub listens: usize,
}

/// The sensor end of a [`SerialInterface`].
pub struct SerialIOPlane(Rc<RefCell<SerialInterface>>);

impl SerialIOPlane {
    pub fn new(serial_if: &Rc<RefCell<SerialInterface>>) -> SerialIOPlane {
        SerialIOPlane(serial_if.clone())
    }
}

impl SerialInterface {
    pub fn new() -> Rc<RefCell<SerialInterface>> {
        Rc::new(RefCell::new(SerialInterface::default()))
    }

    /// Bytes sent by the master.
    pub fn push(&mut self, data: &[u8]) {
        self.rx.extend(data);
    }

    pub fn line_break(&mut self) {
        self.line_break = true;
    }

    pub fn trigger_framing_error(&mut self) {
        self.framing_error = true;
    }

    pub fn trigger_write_error(&mut self) {
        self.do_write_error = true;
    }

    /// Everything the sensor sent since the last call.
    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl Bus for SerialIOPlane {
    fn available(&mut self) -> i32 {
        let inner = self.0.borrow();
        if inner.framing_error {
            -1
        } else {
            inner.rx.len() as i32
        }
    }

    fn read_byte(&mut self) -> u8 {
        self.0.borrow_mut().rx.pop_front().unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.do_write_error {
            inner.do_write_error = false;
            Err(Error::new(ErrorKind::BrokenPipe, "write failed"))
        } else {
            inner.tx.extend_from_slice(data);
            Ok(())
        }
    }

    fn force_listen(&mut self) {
        self.0.borrow_mut().listens += 1;
    }

    fn force_hold(&mut self) {
        self.0.borrow_mut().holds += 1;
    }

    fn line_break_received(&mut self) -> bool {
        self.0.borrow().line_break
    }

    fn clear_line_break(&mut self) {
        self.0.borrow_mut().line_break = false;
    }

    fn clear_buffer(&mut self) {
        let mut inner = self.0.borrow_mut();
        inner.rx.clear();
        inner.framing_error = false;
    }
}

/// Bus traffic arriving while the sensor waits for an acquisition.
pub enum Injection {
    Bytes(&'static [u8]),
    LineBreak,
}

/// A delay that returns at once, feeding scripted traffic to the bus instead.
pub struct ScriptedDelay {
    serial: Rc<RefCell<SerialInterface>>,
    script: VecDeque<Option<Injection>>,
    pub waited_ms: Rc<Cell<u64>>,
}

impl ScriptedDelay {
    pub fn new(serial: &Rc<RefCell<SerialInterface>>) -> ScriptedDelay {
        ScriptedDelay {
            serial: serial.clone(),
            script: VecDeque::new(),
            waited_ms: Rc::new(Cell::new(0)),
        }
    }

    /// Traffic for the next delays, in order. `None` leaves the bus quiet.
    pub fn script(mut self, steps: Vec<Option<Injection>>) -> ScriptedDelay {
        self.script.extend(steps);
        self
    }
}

impl DelayMs<u32> for ScriptedDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.waited_ms.set(self.waited_ms.get() + u64::from(ms));
        let mut serial = self.serial.borrow_mut();
        match self.script.pop_front().flatten() {
            Some(Injection::Bytes(data)) => serial.push(data),
            Some(Injection::LineBreak) => serial.line_break(),
            None => {}
        }
    }
}
