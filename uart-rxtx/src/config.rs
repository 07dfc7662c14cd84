//! Serial port configuration
//!
//! These types are HAL-agnostic; each driver maps them onto its own registers and rejects the
//! values its hardware cannot do.

use core::{fmt, time::Duration};

/// Identifies a serial peripheral instance (`0` is the first UART of the device)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortId(pub u8);

/// Number of data bits per frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataBits {
    /// 5 bits per frame
    Five,
    /// 6 bits per frame
    Six,
    /// 7 bits per frame
    Seven,
    /// 8 bits per frame
    Eight,
}

/// Parity bit mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity bit
    Even,
    /// Odd parity bit
    Odd,
}

/// Number of stop bits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// Hardware flow control
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control
    None,
    /// RTS only
    Rts,
    /// CTS only
    Cts,
    /// RTS and CTS
    RtsCts,
}

/// Clock that feeds the baud rate generator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Whatever the driver picks
    Default,
    /// The internal oscillator
    Internal,
    /// The external crystal oscillator
    Crystal,
}

/// A GPIO pin: `port` and `pin` number within the port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gpio {
    /// GPIO port
    pub port: u8,
    /// Pin number within `port`
    pub pin: u8,
}

impl Gpio {
    /// Creates a pin identifier
    pub const fn new(port: u8, pin: u8) -> Self {
        Self { port, pin }
    }
}

impl fmt::Display for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}.{:02}", self.port, self.pin)
    }
}

/// Pin selection for one serial signal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinSelect {
    /// Keep whatever is currently routed to the signal
    NoChange,
    /// Route the signal to this pin
    Pin(Gpio),
}

impl fmt::Display for PinSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinSelect::NoChange => f.write_str("unchanged"),
            PinSelect::Pin(gpio) => gpio.fmt(f),
        }
    }
}

/// Pin assignment of a serial port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinConfig {
    /// Transmit data
    pub tx: PinSelect,
    /// Receive data
    pub rx: PinSelect,
    /// Request to send
    pub rts: PinSelect,
    /// Clear to send
    pub cts: PinSelect,
}

/// Configuration record of a serial port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Data bits per frame
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per frame
    pub stop_bits: StopBits,
    /// Hardware flow control
    pub flow_control: FlowControl,
    /// Baud rate generator clock
    pub clock_source: ClockSource,
    /// Pin assignment
    pub pins: PinConfig,
    /// Capacity of the receive buffer, in bytes
    pub rx_buffer_size: usize,
}

impl PortConfig {
    /// 8N1 without flow control on the given pins; RTS and CTS are left untouched
    pub const fn new(baud_rate: u32, tx: Gpio, rx: Gpio, rx_buffer_size: usize) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            clock_source: ClockSource::Default,
            pins: PinConfig {
                tx: PinSelect::Pin(tx),
                rx: PinSelect::Pin(rx),
                rts: PinSelect::NoChange,
                cts: PinSelect::NoChange,
            },
            rx_buffer_size,
        }
    }

    /// Checks the driver-independent constraints of this record
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }

        if self.rx_buffer_size == 0 {
            return Err(ConfigError::ZeroRxBuffer);
        }

        if let (PinSelect::Pin(tx), PinSelect::Pin(rx)) = (self.pins.tx, self.pins.rx) {
            if tx == rx {
                return Err(ConfigError::SharedPin(tx));
            }
        }

        Ok(())
    }
}

/// A configuration record that no driver can apply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The baud rate is zero
    ZeroBaudRate,
    /// The receive buffer has no capacity
    ZeroRxBuffer,
    /// TX and RX are routed to the same pin
    SharedPin(Gpio),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroBaudRate => f.write_str("baud rate must be non-zero"),
            ConfigError::ZeroRxBuffer => f.write_str("receive buffer must be non-empty"),
            ConfigError::SharedPin(gpio) => write!(f, "TX and RX both routed to {}", gpio),
        }
    }
}

/// Serial port used by the firmware
pub const PORT: PortId = PortId(0);

/// Transmit pin; jumper it to [`RX_PIN`]
pub const TX_PIN: Gpio = Gpio::new(0, 28);

/// Receive pin
pub const RX_PIN: Gpio = Gpio::new(0, 29);

/// Baud rate of the firmware's port
pub const BAUD_RATE: u32 = 115_200;

/// Capacity of the receive buffer
pub const RX_BUF_SIZE: usize = 1024;

/// The driver's receive ring holds this many receive buffers
pub const RX_RING_FACTOR: usize = 2;

/// Configuration applied by the firmware
pub const DEFAULT: PortConfig = PortConfig::new(BAUD_RATE, TX_PIN, RX_PIN, RX_BUF_SIZE);

/// Delay between initialization and spawning the tasks
pub const STARTUP_DELAY: Duration = Duration::from_millis(500);

/// Pause between two transmissions
pub const TX_INTERVAL: Duration = Duration::from_millis(2_000);

/// Longest a single read waits for data
pub const RX_TIMEOUT: Duration = Duration::from_millis(1_000);

/// What the transmit task sends
pub const MESSAGE: &[u8] = b"Hello Mahender\r\n";

/// Priority of the receive task; higher is serviced first
pub const RX_TASK_PRIORITY: u8 = 2;

/// Priority of the transmit task
pub const TX_TASK_PRIORITY: u8 = RX_TASK_PRIORITY - 1;
