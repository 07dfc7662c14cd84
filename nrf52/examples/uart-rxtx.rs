//! Transmit and receive on UARTE0 from two concurrent tasks
//!
//! TXD = P0.28
//! RXD = P0.29
//!
//! Jumper TXD to RXD to see the message loop back. A read returns once its buffer is full or
//! after a second, so the echo is only logged when the receive timeout expires. Expected output
//! (timestamps vary; the dump address is that of the receive buffer, in RAM):
//!
//! ```
//! I (0) UART_MAIN: UART initialized on TX=P0.28, RX=P0.29 at 115200 baud
//! I (500) RX_TASK: Waiting for data...
//! I (500) TX_TASK: Wrote 16 bytes
//! I (1500) RX_TASK: Read 16 bytes: 'Hello Mahender
//! '
//! I (1500) RX_TASK: 0x20000a10   48 65 6c 6c 6f 20 4d 61  68 65 6e 64 65 72 0d 0a  |Hello Mahender..|
//! I (1501) RX_TASK: Waiting for data...
//! I (2500) TX_TASK: Wrote 16 bytes
//! ```

#![deny(unsafe_code)]
#![no_main]
#![no_std]

use core::convert::Infallible;

use async_cortex_m::task;
use cortex_m_rt::entry;
use log::{error, LevelFilter};
use nrf52::{logger, serial::Uarte, timer::Timer};
use panic_semihosting as _; // panic handler
use uart_rxtx::{config, rx::Receiver, tx::Transmitter, MAIN_TAG};

#[entry]
fn main() -> ! {
    // NOTE only fails if a logger is already installed
    logger::init(LevelFilter::Info).ok();

    let mut timer = Timer::take();
    let port = match uart_rxtx::init(Uarte::new(Timer::take()), config::PORT, &config::DEFAULT) {
        Ok(port) => port,
        Err(e) => {
            error!(target: MAIN_TAG, "{}", e);
            panic!("serial port initialization failed")
        }
    };

    // let the line settle
    task::block_on(timer.wait(config::STARTUP_DELAY));

    let (tx, rx) = port.split();

    let receiver: Receiver<_> = Receiver::new(rx);
    task::spawn_with_priority(config::RX_TASK_PRIORITY, receiver.run());
    task::spawn_with_priority(config::TX_TASK_PRIORITY, Transmitter::new(tx, timer).run());

    // the spawned tasks run forever
    match task::block_on(core::future::pending::<Infallible>()) {}
}
