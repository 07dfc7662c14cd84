//! Transmit task

use core::{convert::Infallible, time::Duration};

use log::info;

use crate::{
    config::{MESSAGE, TX_INTERVAL},
    driver::{Delay, Transmit},
};

/// Log target of the transmit task
pub const TX_TASK_TAG: &str = "TX_TASK";

/// Writes `data` to `tx` and logs, under `tag`, how many bytes the driver accepted
pub async fn send_data<T>(tx: &mut T, tag: &str, data: &[u8]) -> usize
where
    T: Transmit,
{
    let written = tx.write(data).await;
    info!(target: tag, "Wrote {} bytes", written);
    written
}

/// Periodically sends a fixed message
pub struct Transmitter<T, D> {
    tx: T,
    delay: D,
    message: &'static [u8],
    interval: Duration,
}

impl<T, D> Transmitter<T, D>
where
    T: Transmit,
    D: Delay,
{
    /// Sends [`MESSAGE`] every [`TX_INTERVAL`]
    pub fn new(tx: T, delay: D) -> Self {
        Self {
            tx,
            delay,
            message: MESSAGE,
            interval: TX_INTERVAL,
        }
    }

    /// One iteration: send, log, then sleep for the interval
    ///
    /// Returns the number of bytes the driver accepted; a short write is not retried
    pub async fn step(&mut self) -> usize {
        let written = send_data(&mut self.tx, TX_TASK_TAG, self.message).await;
        self.delay.delay(self.interval).await;
        written
    }

    /// Runs forever
    pub async fn run(mut self) -> Infallible {
        loop {
            self.step().await;
        }
    }
}
