//! Receive task

use core::{convert::Infallible, fmt, str, time::Duration};

use log::{info, Level};

use crate::{
    config::{RX_BUF_SIZE, RX_TIMEOUT},
    driver::Receive,
    hexdump,
};

/// Log target of the receive task
pub const RX_TASK_TAG: &str = "RX_TASK";

/// Length of the default scratch buffer: the receive buffer plus a NUL terminator
pub const SCRATCH_LEN: usize = RX_BUF_SIZE + 1;

/// Outcome of one receive iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// This many bytes arrived
    Data(usize),
    /// The read timed out without data
    Nothing,
    /// The read failed; logged exactly like [`Received::Nothing`]
    Failed,
}

/// Logs whatever arrives on a serial port
///
/// The scratch buffer holds `N - 1` bytes of data plus the terminator written after them
pub struct Receiver<R, const N: usize = SCRATCH_LEN> {
    rx: R,
    scratch: [u8; N],
    timeout: Duration,
}

impl<R, const N: usize> Receiver<R, N>
where
    R: Receive,
{
    /// Bytes requested per read
    pub const CAPACITY: usize = N - 1;

    /// Waits up to [`RX_TIMEOUT`] per read
    pub fn new(rx: R) -> Self {
        Self {
            rx,
            scratch: [0; N],
            timeout: RX_TIMEOUT,
        }
    }

    /// One iteration: announce, read, then log what arrived
    pub async fn step(&mut self) -> Received {
        info!(target: RX_TASK_TAG, "Waiting for data...");

        let capacity = Self::CAPACITY;
        match self.rx.read(&mut self.scratch[..capacity], self.timeout).await {
            Ok(0) => {
                no_data();
                Received::Nothing
            }

            Ok(count) => {
                let count = count.min(capacity);
                self.scratch[count] = 0;

                let data = &self.scratch[..count];
                info!(
                    target: RX_TASK_TAG,
                    "Read {} bytes: '{}'",
                    count,
                    CText(&self.scratch[..=count])
                );
                log_hexdump(RX_TASK_TAG, data, Level::Info);

                Received::Data(count)
            }

            // NOTE indistinguishable from a timeout in the log; only the return value tells
            Err(_) => {
                no_data();
                Received::Failed
            }
        }
    }

    /// The bytes of the last read, NUL terminator included
    pub fn scratch(&self) -> &[u8] {
        &self.scratch
    }

    /// Runs forever
    pub async fn run(mut self) -> Infallible {
        loop {
            self.step().await;
        }
    }
}

fn no_data() {
    info!(target: RX_TASK_TAG, "No data received yet.");
}

/// Logs `data` as a hex dump, one record per line
pub fn log_hexdump(tag: &str, data: &[u8], level: Level) {
    for line in hexdump::lines(data.as_ptr() as usize, data) {
        log::log!(target: tag, level, "{}", line);
    }
}

/// Formats bytes the way `%s` prints a C string: up to the first NUL, invalid UTF-8 replaced
struct CText<'a>(&'a [u8]);

impl fmt::Display for CText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        let mut rest = &self.0[..end];

        loop {
            match str::from_utf8(rest) {
                Ok(s) => return f.write_str(s),
                Err(e) => {
                    let (valid, invalid) = rest.split_at(e.valid_up_to());
                    // NOTE(unsafe) `valid_up_to` delimits valid UTF-8
                    f.write_str(unsafe { str::from_utf8_unchecked(valid) })?;
                    f.write_str("\u{fffd}")?;
                    rest = &invalid[e.error_len().unwrap_or(invalid.len())..];
                }
            }
        }
    }
}
