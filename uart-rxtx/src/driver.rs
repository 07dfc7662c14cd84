//! Driver seams and the serial port initializer

use core::{fmt, time::Duration};

use log::info;

use crate::config::{ConfigError, PinConfig, PortConfig, PortId, RX_RING_FACTOR};

/// Log target of the initializer
pub const MAIN_TAG: &str = "UART_MAIN";

/// Sizes of the resources a driver allocates on install
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffers {
    /// Receive ring, in bytes
    pub rx: usize,
    /// Transmit ring, in bytes (`0` = writes go straight to the peripheral)
    pub tx: usize,
    /// Event queue length (`0` = no event queue)
    pub event_queue: usize,
}

/// A serial peripheral driver that has not been installed yet
pub trait Driver {
    /// Error reported by every driver step
    type Error: fmt::Debug;

    /// The driver once its resources are allocated
    type Installed: Installed<Error = Self::Error>;

    /// Allocates the driver resources of `port`
    fn install(self, port: PortId, buffers: &Buffers) -> Result<Self::Installed, Self::Error>;
}

/// A serial peripheral driver whose resources are allocated
pub trait Installed {
    /// Error reported by every driver step
    type Error: fmt::Debug;

    /// Transmit half
    type Tx: Transmit;

    /// Receive half
    type Rx: Receive;

    /// Applies baud rate, frame format, flow control and clock source
    fn configure(&mut self, config: &PortConfig) -> Result<(), Self::Error>;

    /// Routes the signals to pins; `PinSelect::NoChange` signals keep their current routing
    fn set_pins(&mut self, pins: &PinConfig) -> Result<(), Self::Error>;

    /// Splits the port in its transmit and receive halves
    fn split(self) -> (Self::Tx, Self::Rx);
}

/// Transmit half of a serial port
#[allow(async_fn_in_trait)]
pub trait Transmit {
    /// Writes `bytes` and returns how many of them the driver accepted
    async fn write(&mut self, bytes: &[u8]) -> usize;
}

/// Receive half of a serial port
#[allow(async_fn_in_trait)]
pub trait Receive {
    /// Error reported by a failed read
    type Error: fmt::Debug;

    /// Reads until `buf` is full or `timeout` elapses; returns the number of bytes read
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;
}

/// Something that can suspend the current task
#[allow(async_fn_in_trait)]
pub trait Delay {
    /// Suspends the caller for at least `dur`
    async fn delay(&mut self, dur: Duration);
}

/// Failure of one initialization step; `E` is the driver's error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitError<E> {
    /// Driver resources could not be allocated
    Install(E),
    /// The configuration record is invalid
    InvalidConfig(ConfigError),
    /// The driver rejected the configuration record
    Configure(E),
    /// The driver could not route the pins
    SetPins(E),
}

impl<E> fmt::Display for InitError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Install(e) => write!(f, "driver install failed: {:?}", e),
            InitError::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
            InitError::Configure(e) => write!(f, "parameter configuration failed: {:?}", e),
            InitError::SetPins(e) => write!(f, "pin assignment failed: {:?}", e),
        }
    }
}

/// [Singleton] A configured serial port
///
/// The configuration is fixed for the lifetime of the handle
pub struct SerialPort<P> {
    inner: P,
    port: PortId,
    config: PortConfig,
}

impl<P> SerialPort<P>
where
    P: Installed,
{
    /// The peripheral instance this handle owns
    pub fn port(&self) -> PortId {
        self.port
    }

    /// The configuration the port was initialized with
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Splits the port in transmit and receive halves
    pub fn split(self) -> (P::Tx, P::Rx) {
        self.inner.split()
    }
}

/// Installs, configures and routes `port`, in that order
///
/// A failed step aborts initialization; the steps after it never run
pub fn init<D>(
    driver: D,
    port: PortId,
    config: &PortConfig,
) -> Result<SerialPort<D::Installed>, InitError<D::Error>>
where
    D: Driver,
{
    let buffers = Buffers {
        rx: config.rx_buffer_size.saturating_mul(RX_RING_FACTOR),
        tx: 0,
        event_queue: 0,
    };
    let mut inner = driver.install(port, &buffers).map_err(InitError::Install)?;

    config.validate().map_err(InitError::InvalidConfig)?;
    inner.configure(config).map_err(InitError::Configure)?;

    inner.set_pins(&config.pins).map_err(InitError::SetPins)?;

    info!(
        target: MAIN_TAG,
        "UART initialized on TX={}, RX={} at {} baud",
        config.pins.tx,
        config.pins.rx,
        config.baud_rate
    );

    Ok(SerialPort {
        inner,
        port,
        config: *config,
    })
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::{
        config::{self, Gpio, PinSelect},
        mock::{self, Clock, Fail, MockDriver, Op},
        rx::Receiver,
        tx::Transmitter,
    };

    #[test]
    fn steps_run_in_order() {
        mock::capture_logs();
        let driver = MockDriver::new();
        let ops = driver.ops();

        let port = init(driver, config::PORT, &config::DEFAULT).unwrap();

        assert_eq!(port.port(), config::PORT);
        assert_eq!(port.config(), &config::DEFAULT);
        assert_eq!(
            ops.take(),
            [
                Op::Install(
                    config::PORT,
                    Buffers {
                        rx: 2048,
                        tx: 0,
                        event_queue: 0
                    }
                ),
                Op::Configure(115_200),
                Op::SetPins(config::DEFAULT.pins),
            ]
        );

        let logs = mock::logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].target, MAIN_TAG);
        assert_eq!(logs[0].message, "UART initialized on TX=P0.28, RX=P0.29 at 115200 baud");
    }

    #[test]
    fn install_failure_stops_initialization() {
        mock::capture_logs();
        let driver = MockDriver::failing(Fail::Install);
        let ops = driver.ops();

        let err = init(driver, config::PORT, &config::DEFAULT).err().unwrap();

        assert_eq!(err, InitError::Install("install"));
        assert_eq!(ops.take().len(), 1);
        assert!(mock::logs().is_empty());
    }

    #[test]
    fn invalid_config_is_never_applied() {
        mock::capture_logs();
        let driver = MockDriver::new();
        let ops = driver.ops();
        let mut bad = config::DEFAULT;
        bad.baud_rate = 0;

        let err = init(driver, config::PORT, &bad).err().unwrap();

        assert_eq!(err, InitError::InvalidConfig(ConfigError::ZeroBaudRate));
        assert!(matches!(ops.take()[..], [Op::Install(..)]));
        assert!(mock::logs().is_empty());
    }

    #[test]
    fn rejected_config_skips_pin_assignment() {
        let driver = MockDriver::failing(Fail::Configure);
        let ops = driver.ops();

        let err = init(driver, config::PORT, &config::DEFAULT).err().unwrap();

        assert_eq!(err, InitError::Configure("configure"));
        assert!(matches!(ops.take()[..], [Op::Install(..), Op::Configure(_)]));
    }

    #[test]
    fn pin_failure_is_reported_as_such() {
        let driver = MockDriver::failing(Fail::SetPins);

        let err = init(driver, config::PORT, &config::DEFAULT).err().unwrap();

        assert_eq!(err, InitError::SetPins("set_pins"));
        assert_eq!(err.to_string(), "pin assignment failed: \"set_pins\"");
    }

    #[test]
    fn unchanged_pins_are_logged_as_such() {
        mock::capture_logs();
        let mut config = config::DEFAULT;
        config.pins.tx = PinSelect::NoChange;
        config.pins.rx = PinSelect::Pin(Gpio::new(1, 3));

        init(MockDriver::new(), config::PORT, &config).unwrap();

        assert_eq!(
            mock::logs()[0].message,
            "UART initialized on TX=unchanged, RX=P1.03 at 115200 baud"
        );
    }

    #[test]
    fn loops_start_after_initialization() {
        mock::capture_logs();
        let driver = MockDriver::new();
        let ops = driver.ops();
        let clock = Clock::new();

        let port = init(driver, config::PORT, &config::DEFAULT).unwrap();
        let (tx, rx) = port.split();
        let mut receiver: Receiver<_> = Receiver::new(rx);
        let mut transmitter = Transmitter::new(tx, clock.delay());
        block_on(receiver.step());
        block_on(transmitter.step());

        let ops = ops.take();
        assert!(matches!(
            ops[..3],
            [Op::Install(..), Op::Configure(_), Op::SetPins(_)]
        ));
        assert_eq!(
            ops[3..],
            [Op::Read(1024), Op::Write(b"Hello Mahender\r\n".to_vec())]
        );

        let messages = mock::messages();
        assert!(messages[0].starts_with("UART initialized"));
        assert_eq!(messages[1], "Waiting for data...");
    }
}
