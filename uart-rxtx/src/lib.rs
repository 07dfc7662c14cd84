//! Two independent tasks sharing one serial port
//!
//! After [`init`] the port is split: a [`Transmitter`](tx::Transmitter) sends a fixed message
//! every two seconds and a [`Receiver`](rx::Receiver) logs whatever comes back. With TX
//! jumpered to RX the message loops back. The tasks exchange nothing and take no locks; each
//! owns one half of the port.
//!
//! Nothing here touches hardware: a HAL plugs in through the [`Driver`] / [`Installed`] traits.

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod driver;
pub mod hexdump;
pub mod rx;
pub mod tx;

#[cfg(test)]
mod mock;

pub use driver::{
    init, Buffers, Delay, Driver, InitError, Installed, Receive, SerialPort, Transmit, MAIN_TAG,
};
