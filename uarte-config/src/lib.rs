//! nRF52840 UARTE line settings, as register values
//!
//! Nothing here touches registers: the `nrf52` HAL writes the results into `BAUDRATE`, `CONFIG`
//! and `PSEL.*`, decodes `ERRORSRC` through [`Error::from_latched`] and buffers received bytes in
//! an [`RxQueue`].

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

use core::fmt;

use heapless::{consts::U2048, spsc::Queue};
use uart_rxtx::config::{DataBits, FlowControl, Gpio, Parity, PortConfig, PortId, StopBits};

/// Largest receive ring a port can install
pub const RX_RING_CAPACITY: usize = 2048;

/// Receive ring of one port; holds up to [`RX_RING_CAPACITY`] bytes
pub type RxQueue = Queue<u8, U2048>;

/// `ERRORSRC.OVERRUN`
pub const OVERRUN: u8 = 1 << 0;
/// `ERRORSRC.PARITY`
pub const PARITY: u8 = 1 << 1;
/// `ERRORSRC.FRAMING`
pub const FRAMING: u8 = 1 << 2;
/// `ERRORSRC.BREAK`
pub const BREAK: u8 = 1 << 3;
/// All the bits of `ERRORSRC`
pub const LINE_ERRORS: u8 = OVERRUN | PARITY | FRAMING | BREAK;
/// Not a hardware bit: the receive ring dropped a byte
pub const RING_FULL: u8 = 1 << 4;

/// Serial driver errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// There's no UARTE instance with this id
    InvalidPort(PortId),
    /// The port has already been installed
    AlreadyInstalled,
    /// The receive ring can't be larger than [`RX_RING_CAPACITY`]
    RxBufferTooLarge(usize),
    /// Writes are never buffered
    TxBufferUnsupported,
    /// The driver reports no events
    EventQueueUnsupported,
    /// Not in the UARTE baud rate table
    UnsupportedBaudRate(u32),
    /// Only 8 data bits are supported
    UnsupportedDataBits(DataBits),
    /// Odd parity is not supported
    UnsupportedParity(Parity),
    /// RTS and CTS can only be enabled together
    UnsupportedFlowControl(FlowControl),
    /// The pin doesn't exist
    InvalidPin(Gpio),
    /// A byte arrived before the previous one was consumed
    Overrun,
    /// Parity check failed
    Parity,
    /// No valid stop bit
    Framing,
    /// RX held low for longer than a frame
    Break,
    /// The receive ring overflowed
    RingFull,
}

impl Error {
    /// The receive error a set of latched bits reports, if any
    ///
    /// When several bits are set, hardware conditions win over [`RING_FULL`], in `ERRORSRC` bit
    /// order
    pub fn from_latched(bits: u8) -> Option<Self> {
        Some(if bits & OVERRUN != 0 {
            Error::Overrun
        } else if bits & PARITY != 0 {
            Error::Parity
        } else if bits & FRAMING != 0 {
            Error::Framing
        } else if bits & BREAK != 0 {
            Error::Break
        } else if bits & RING_FULL != 0 {
            Error::RingFull
        } else {
            return None;
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPort(port) => write!(f, "no UARTE{}", port.0),
            Error::AlreadyInstalled => f.write_str("driver already installed"),
            Error::RxBufferTooLarge(size) => write!(
                f,
                "receive buffer of {} bytes exceeds {}",
                size, RX_RING_CAPACITY
            ),
            Error::TxBufferUnsupported => f.write_str("transmit buffers are not supported"),
            Error::EventQueueUnsupported => f.write_str("event queues are not supported"),
            Error::UnsupportedBaudRate(baud) => write!(f, "unsupported baud rate {}", baud),
            Error::UnsupportedDataBits(bits) => write!(f, "unsupported data bits {:?}", bits),
            Error::UnsupportedParity(parity) => write!(f, "unsupported parity {:?}", parity),
            Error::UnsupportedFlowControl(fc) => write!(f, "unsupported flow control {:?}", fc),
            Error::InvalidPin(gpio) => write!(f, "no such pin {}", gpio),
            Error::Overrun => f.write_str("overrun"),
            Error::Parity => f.write_str("parity error"),
            Error::Framing => f.write_str("framing error"),
            Error::Break => f.write_str("break condition"),
            Error::RingFull => f.write_str("receive buffer full"),
        }
    }
}

/// `BAUDRATE` value for `baud`
pub fn baudrate(baud: u32) -> Result<u32, Error> {
    Ok(match baud {
        1_200 => 0x0004_F000,
        2_400 => 0x0009_D000,
        4_800 => 0x0013_B000,
        9_600 => 0x0027_5000,
        14_400 => 0x003A_F000,
        19_200 => 0x004E_A000,
        28_800 => 0x0075_C000,
        31_250 => 0x0080_0000,
        38_400 => 0x009D_0000,
        56_000 => 0x00E5_0000,
        57_600 => 0x00EB_0000,
        76_800 => 0x013A_9000,
        115_200 => 0x01D6_0000,
        230_400 => 0x03B0_0000,
        250_000 => 0x0400_0000,
        460_800 => 0x0740_0000,
        921_600 => 0x0F00_0000,
        1_000_000 => 0x1000_0000,
        _ => return Err(Error::UnsupportedBaudRate(baud)),
    })
}

/// `CONFIG` value: HWFC (bit 0), PARITY (bits 1..=3), STOP (bit 4)
pub fn frame(config: &PortConfig) -> Result<u32, Error> {
    if config.data_bits != DataBits::Eight {
        return Err(Error::UnsupportedDataBits(config.data_bits));
    }

    let hwfc = match config.flow_control {
        FlowControl::None => 0,
        FlowControl::RtsCts => 1,
        fc => return Err(Error::UnsupportedFlowControl(fc)),
    };

    let parity = match config.parity {
        Parity::None => 0,
        Parity::Even => 0b111 << 1,
        parity => return Err(Error::UnsupportedParity(parity)),
    };

    let stop = match config.stop_bits {
        StopBits::One => 0,
        StopBits::Two => 1 << 4,
    };

    Ok(hwfc | parity | stop)
}

/// Checks that `gpio` exists: P0 has 32 pins, P1 has 16
pub fn check_pin(gpio: Gpio) -> Result<(), Error> {
    let exists = match gpio.port {
        0 => gpio.pin < 32,
        1 => gpio.pin < 16,
        _ => false,
    };

    if exists {
        Ok(())
    } else {
        Err(Error::InvalidPin(gpio))
    }
}

/// `PSEL.*` value that connects the signal to `gpio`
pub fn psel(gpio: Gpio) -> u32 {
    u32::from(gpio.port) << 5 | u32::from(gpio.pin)
}

/// Stores `byte` unless `ring` already holds `limit` bytes; returns whether it was stored
pub fn enqueue_limited(ring: &mut RxQueue, limit: usize, byte: u8) -> bool {
    ring.len() < limit && ring.enqueue(byte).is_ok()
}

/// Moves the oldest bytes of `ring` into `buf`; returns how many were moved
pub fn dequeue_into(ring: &mut RxQueue, buf: &mut [u8]) -> usize {
    let mut n = 0;
    for slot in buf.iter_mut() {
        match ring.dequeue() {
            Some(byte) => *slot = byte,
            None => break,
        }
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use uart_rxtx::config::{self, PortConfig};

    use super::*;

    #[test]
    fn default_config() {
        assert_eq!(baudrate(config::BAUD_RATE), Ok(0x01D6_0000));
        assert_eq!(frame(&config::DEFAULT), Ok(0));
    }

    #[test]
    fn baud_rates_outside_the_table() {
        assert_eq!(baudrate(9_600), Ok(0x0027_5000));
        assert_eq!(baudrate(1_000_000), Ok(0x1000_0000));

        for &baud in &[0, 300, 115_201, 2_000_000] {
            assert_eq!(baudrate(baud), Err(Error::UnsupportedBaudRate(baud)));
        }
    }

    #[test]
    fn frame_bits() {
        let mut config = config::DEFAULT;
        config.parity = Parity::Even;
        config.stop_bits = StopBits::Two;
        config.flow_control = FlowControl::RtsCts;

        assert_eq!(frame(&config), Ok(0b1_111_1));
    }

    #[test]
    fn unsupported_frames() {
        let base = config::DEFAULT;

        for &bits in &[DataBits::Five, DataBits::Six, DataBits::Seven] {
            let config = PortConfig {
                data_bits: bits,
                ..base
            };
            assert_eq!(frame(&config), Err(Error::UnsupportedDataBits(bits)));
        }

        let odd = PortConfig {
            parity: Parity::Odd,
            ..base
        };
        assert_eq!(frame(&odd), Err(Error::UnsupportedParity(Parity::Odd)));

        for &fc in &[FlowControl::Rts, FlowControl::Cts] {
            let config = PortConfig {
                flow_control: fc,
                ..base
            };
            assert_eq!(frame(&config), Err(Error::UnsupportedFlowControl(fc)));
        }
    }

    #[test]
    fn pins() {
        assert_eq!(check_pin(Gpio::new(0, 0)), Ok(()));
        assert_eq!(check_pin(Gpio::new(0, 31)), Ok(()));
        assert_eq!(check_pin(Gpio::new(1, 15)), Ok(()));

        for &gpio in &[Gpio::new(0, 32), Gpio::new(1, 16), Gpio::new(2, 0)] {
            assert_eq!(check_pin(gpio), Err(Error::InvalidPin(gpio)));
        }

        assert_eq!(psel(config::TX_PIN), 28);
        assert_eq!(psel(config::RX_PIN), 29);
        assert_eq!(psel(Gpio::new(1, 2)), 0b1_00010);
    }

    #[test]
    fn latched_errors() {
        assert_eq!(Error::from_latched(0), None);
        assert_eq!(Error::from_latched(OVERRUN), Some(Error::Overrun));
        assert_eq!(Error::from_latched(PARITY), Some(Error::Parity));
        assert_eq!(Error::from_latched(FRAMING), Some(Error::Framing));
        assert_eq!(Error::from_latched(BREAK), Some(Error::Break));
        assert_eq!(Error::from_latched(RING_FULL), Some(Error::RingFull));

        // hardware conditions first, lowest bit first
        assert_eq!(Error::from_latched(RING_FULL | FRAMING), Some(Error::Framing));
        assert_eq!(Error::from_latched(LINE_ERRORS | RING_FULL), Some(Error::Overrun));

        // bits above the ones we latch are ignored
        assert_eq!(Error::from_latched(1 << 7), None);
    }

    #[test]
    fn ring_stops_at_the_installed_size() {
        let mut ring = RxQueue::new();

        for byte in 0..4 {
            assert!(enqueue_limited(&mut ring, 4, byte));
        }
        assert!(!enqueue_limited(&mut ring, 4, 4));
        assert_eq!(ring.len(), 4);

        // a smaller limit leaves the queued bytes alone
        assert!(!enqueue_limited(&mut ring, 2, 5));

        let mut buf = [0; 8];
        assert_eq!(dequeue_into(&mut ring, &mut buf), 4);
        assert_eq!(buf[..4], [0, 1, 2, 3]);
    }

    #[test]
    fn ring_drains_in_order_across_reads() {
        let mut ring = RxQueue::new();
        let mut buf = [0; 3];

        // keep the stored bytes travelling around the storage
        for round in 0..1_000u32 {
            let base = (round * 3) as u8;
            for k in 0..3 {
                assert!(enqueue_limited(&mut ring, RX_RING_CAPACITY, base.wrapping_add(k)));
            }

            assert_eq!(dequeue_into(&mut ring, &mut buf[..2]), 2);
            assert_eq!(dequeue_into(&mut ring, &mut buf[2..]), 1);
            assert_eq!(buf, [base, base.wrapping_add(1), base.wrapping_add(2)]);
        }

        assert!(ring.is_empty());
        assert_eq!(dequeue_into(&mut ring, &mut buf), 0);
    }

    #[test]
    fn empty_buffers_take_nothing() {
        let mut ring = RxQueue::new();
        assert!(enqueue_limited(&mut ring, RX_RING_CAPACITY, 0xaa));

        assert_eq!(dequeue_into(&mut ring, &mut []), 0);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::RxBufferTooLarge(4096).to_string(),
            "receive buffer of 4096 bytes exceeds 2048"
        );
        assert_eq!(Error::InvalidPin(Gpio::new(1, 20)).to_string(), "no such pin P1.20");
        assert_eq!(Error::InvalidPort(PortId(3)).to_string(), "no UARTE3");
    }
}
