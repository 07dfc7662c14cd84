//! Test doubles: a scripted driver, a loopback wire, a fake clock and log capture

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    sync::Once,
    time::Duration,
};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::{
    config::{PinConfig, PortConfig, PortId},
    driver::{Buffers, Delay, Driver, Installed, Receive, Transmit},
};

/* Log capture */

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub level: Level,
    pub target: String,
    pub message: String,
}

thread_local! {
    static ENTRIES: RefCell<Vec<Entry>> = RefCell::new(Vec::new());
}

struct Capture;

impl Log for Capture {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let entry = Entry {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };
        ENTRIES.with(|entries| entries.borrow_mut().push(entry));
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture;

/// Starts capturing the log records of the current thread, dropping earlier ones
pub fn capture_logs() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        log::set_logger(&CAPTURE).ok();
        log::set_max_level(LevelFilter::Trace);
    });

    ENTRIES.with(|entries| entries.borrow_mut().clear());
}

pub fn logs() -> Vec<Entry> {
    ENTRIES.with(|entries| entries.borrow().clone())
}

pub fn messages() -> Vec<String> {
    logs().into_iter().map(|entry| entry.message).collect()
}

/* Driver */

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Install(PortId, Buffers),
    Configure(u32),
    SetPins(PinConfig),
    Write(Vec<u8>),
    Read(usize),
}

#[derive(Clone, Default)]
pub struct Ops(Rc<RefCell<Vec<Op>>>);

impl Ops {
    fn push(&self, op: Op) {
        self.0.borrow_mut().push(op)
    }

    pub fn take(&self) -> Vec<Op> {
        self.0.borrow_mut().drain(..).collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum Fail {
    Install,
    Configure,
    SetPins,
}

pub struct MockDriver {
    ops: Ops,
    fail: Option<Fail>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            ops: Ops::default(),
            fail: None,
        }
    }

    pub fn failing(step: Fail) -> Self {
        Self {
            ops: Ops::default(),
            fail: Some(step),
        }
    }

    pub fn ops(&self) -> Ops {
        self.ops.clone()
    }
}

impl Driver for MockDriver {
    type Error = &'static str;
    type Installed = MockPort;

    fn install(self, port: PortId, buffers: &Buffers) -> Result<MockPort, &'static str> {
        self.ops.push(Op::Install(port, *buffers));
        if self.fail == Some(Fail::Install) {
            return Err("install");
        }

        Ok(MockPort {
            ops: self.ops,
            fail: self.fail,
        })
    }
}

pub struct MockPort {
    ops: Ops,
    fail: Option<Fail>,
}

impl Installed for MockPort {
    type Error = &'static str;
    type Tx = PortTx;
    type Rx = PortRx;

    fn configure(&mut self, config: &PortConfig) -> Result<(), &'static str> {
        self.ops.push(Op::Configure(config.baud_rate));
        if self.fail == Some(Fail::Configure) {
            Err("configure")
        } else {
            Ok(())
        }
    }

    fn set_pins(&mut self, pins: &PinConfig) -> Result<(), &'static str> {
        self.ops.push(Op::SetPins(*pins));
        if self.fail == Some(Fail::SetPins) {
            Err("set_pins")
        } else {
            Ok(())
        }
    }

    fn split(self) -> (PortTx, PortRx) {
        (
            PortTx {
                ops: self.ops.clone(),
            },
            PortRx { ops: self.ops },
        )
    }
}

pub struct PortTx {
    ops: Ops,
}

impl Transmit for PortTx {
    async fn write(&mut self, bytes: &[u8]) -> usize {
        self.ops.push(Op::Write(bytes.to_vec()));
        bytes.len()
    }
}

pub struct PortRx {
    ops: Ops,
}

impl Receive for PortRx {
    type Error = &'static str;

    async fn read(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, &'static str> {
        self.ops.push(Op::Read(buf.len()));
        Ok(0)
    }
}

/* Time */

#[derive(Clone, Default)]
pub struct Clock(Rc<Cell<Duration>>);

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.0.get()
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay {
            clock: self.clone(),
        }
    }
}

pub struct MockDelay {
    clock: Clock,
}

impl Delay for MockDelay {
    async fn delay(&mut self, dur: Duration) {
        let clock = &self.clock.0;
        clock.set(clock.get() + dur);
    }
}

/* Tasks' peers */

pub struct MockTx {
    clock: Clock,
    accept: Option<usize>,
    written: Vec<Vec<u8>>,
    times: Vec<Duration>,
}

impl MockTx {
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
            accept: None,
            written: Vec::new(),
            times: Vec::new(),
        }
    }

    /// Accepts at most `n` bytes per write
    pub fn accepting(clock: &Clock, n: usize) -> Self {
        Self {
            accept: Some(n),
            ..Self::new(clock)
        }
    }

    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    pub fn write_times(&self) -> &[Duration] {
        &self.times
    }
}

impl Transmit for MockTx {
    async fn write(&mut self, bytes: &[u8]) -> usize {
        let n = self.accept.map_or(bytes.len(), |n| n.min(bytes.len()));
        self.times.push(self.clock.now());
        self.written.push(bytes[..n].to_vec());
        n
    }
}

pub struct MockRx {
    script: VecDeque<Result<Vec<u8>, &'static str>>,
    requests: Vec<(usize, Duration)>,
}

impl MockRx {
    /// Each read returns the next scripted result; an exhausted script times out
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<u8>, &'static str>>,
    {
        Self {
            script: script.into_iter().collect(),
            requests: Vec::new(),
        }
    }

    pub fn requests(&self) -> &[(usize, Duration)] {
        &self.requests
    }
}

impl Receive for MockRx {
    type Error = &'static str;

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, &'static str> {
        self.requests.push((buf.len(), timeout));

        let bytes = self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
}

/// A TX pin jumpered to an RX pin
#[derive(Clone, Default)]
pub struct Loopback(Rc<RefCell<VecDeque<u8>>>);

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx(&self) -> Loopback {
        self.clone()
    }

    pub fn rx(&self) -> Loopback {
        self.clone()
    }
}

impl Transmit for Loopback {
    async fn write(&mut self, bytes: &[u8]) -> usize {
        self.0.borrow_mut().extend(bytes);
        bytes.len()
    }
}

impl Receive for Loopback {
    type Error = &'static str;

    async fn read(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, &'static str> {
        let mut wire = self.0.borrow_mut();
        let n = wire.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(wire.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
