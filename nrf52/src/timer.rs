//! Timers
//!
//! RTC0 runs off the LFCLK; each of its compare channels backs one [`Timer`]

use core::{
    cell::RefCell,
    future::Future,
    ops,
    pin::Pin,
    sync::atomic::{AtomicU32, AtomicU8, Ordering},
    task::{Context, Poll, Waker},
    time::Duration,
};

use cortex_m::{
    interrupt::{self, Mutex},
    peripheral::NVIC,
};
use pac::{Interrupt, RTC0};
use uart_rxtx::Delay;

use crate::{BorrowUnchecked as _, NotSync};

/// Frequency of the LFCLK
const F: u64 = 32_768;

/// RTC0 has three compare registers
const NCHANNELS: usize = 3;

/// Width of the RTC counter
const COUNTER_BITS: u32 = 24;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Closest deadline, in ticks, the compare registers can reliably catch
const MIN_TICKS: u64 = 2;

// bit positions in INTEN{SET,CLR}
const OVRFLW: u32 = 1 << 1;
const COMPARE0: u32 = 1 << 16;

static OVERFLOWS: AtomicU32 = AtomicU32::new(0);
static WAKERS: Mutex<RefCell<[Option<Waker>; NCHANNELS]>> =
    Mutex::new(RefCell::new([None, None, None]));

// NOTE called from `pre_init`
pub(crate) fn init() {
    RTC0::borrow_unchecked(|rtc| {
        // overflows extend the 24-bit counter; see `now`
        rtc.intenset.write(|w| unsafe { w.bits(OVRFLW) });
        rtc.tasks_clear.write(|w| w.tasks_clear().set_bit());
        rtc.tasks_start.write(|w| w.tasks_start().set_bit());
    });
}

/// A point in time, counted in LFCLK ticks since boot
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant {
    ticks: u64,
}

impl Instant {
    /// Milliseconds since boot
    pub fn as_millis(self) -> u64 {
        self.ticks * 1_000 / F
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, dur: Duration) -> Instant {
        // TODO do this without 64-bit arithmetic
        let ticks = dur.as_secs() * F + (u64::from(dur.subsec_nanos()) * F) / 1_000_000_000;
        Instant {
            ticks: self.ticks + ticks,
        }
    }
}

/// Returns the current time
pub fn now() -> Instant {
    interrupt::free(|_| {
        RTC0::borrow_unchecked(|rtc| {
            let mut overflows = OVERFLOWS.load(Ordering::Relaxed);
            let mut counter = rtc.counter.read().bits();

            // the counter may have wrapped around before the interrupt handler could account
            // for it; re-read it so that it's guaranteed to be post-overflow
            if rtc.events_ovrflw.read().bits() != 0 {
                overflows += 1;
                counter = rtc.counter.read().bits();
            }

            Instant {
                ticks: (u64::from(overflows) << COUNTER_BITS) | u64::from(counter),
            }
        })
    })
}

/// [singleton] An `async`-aware timer
pub struct Timer {
    channel: usize,
    _not_sync: NotSync,
}

impl Timer {
    /// Takes one of the compare channels of the RTC
    ///
    /// Each call returns a different channel; this panics when all of them have been taken
    pub fn take() -> Self {
        // NOTE peripheral initialization is done in `#[pre_init]`

        static TAKEN: AtomicU8 = AtomicU8::new(0);

        let channel = usize::from(TAKEN.fetch_add(1, Ordering::Relaxed));
        if channel >= NCHANNELS {
            panic!("all `Timer` channels have been taken")
        }

        if channel == 0 {
            // NOTE(unsafe) the handler only touches state guarded by critical sections
            unsafe { NVIC::unmask(Interrupt::RTC0) }
        }

        Self {
            channel,
            _not_sync: NotSync::new(),
        }
    }

    /// Waits for at least `dur`
    pub async fn wait(&mut self, dur: Duration) {
        let deadline = now() + dur;
        self.wait_until(deadline).await
    }

    /// Waits until `deadline` has passed
    pub async fn wait_until(&mut self, deadline: Instant) {
        struct Wait<'a> {
            timer: &'a mut Timer,
            deadline: Instant,
            armed: bool,
        }

        impl Wait<'_> {
            fn disarm(&mut self) {
                let channel = self.timer.channel;
                RTC0::borrow_unchecked(|rtc| {
                    rtc.intenclr.write(|w| unsafe { w.bits(COMPARE0 << channel) });
                    rtc.events_compare[channel].reset();
                });
                // NOTE the interrupt must be disabled before we take down the waker
                interrupt::free(|cs| drop(WAKERS.borrow(cs).borrow_mut()[channel].take()));
            }
        }

        impl Future for Wait<'_> {
            type Output = ();

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if now() >= self.deadline {
                    self.disarm();
                    return Poll::Ready(());
                }

                let channel = self.timer.channel;
                interrupt::free(|cs| {
                    WAKERS.borrow(cs).borrow_mut()[channel] = Some(cx.waker().clone());
                });

                if !self.armed {
                    let cc = (self.deadline.ticks & COUNTER_MASK) as u32;
                    RTC0::borrow_unchecked(|rtc| {
                        rtc.events_compare[channel].reset();
                        // NOTE(unsafe) this operation shouldn't be marked as `unsafe`
                        rtc.cc[channel].write(|w| unsafe { w.compare().bits(cc) });
                    });
                    self.armed = true;
                }

                // one-shot interrupt; the handler disables it again
                RTC0::borrow_unchecked(|rtc| {
                    rtc.intenset.write(|w| unsafe { w.bits(COMPARE0 << channel) })
                });

                // a compare register set to COUNTER or COUNTER + 1 may never match; deadlines
                // that close are busy-waited instead
                if now().ticks + MIN_TICKS >= self.deadline.ticks {
                    while now() < self.deadline {
                        continue;
                    }
                    self.disarm();
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
        }

        impl Drop for Wait<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.disarm();
                }
            }
        }

        Wait {
            timer: self,
            deadline,
            armed: false,
        }
        .await
    }
}

impl Delay for Timer {
    async fn delay(&mut self, dur: Duration) {
        self.wait(dur).await
    }
}

#[allow(non_snake_case)]
#[no_mangle]
fn RTC0() {
    RTC0::borrow_unchecked(|rtc| {
        if rtc.events_ovrflw.read().bits() != 0 {
            rtc.events_ovrflw.reset();
            OVERFLOWS.fetch_add(1, Ordering::Relaxed);
        }

        for channel in 0..NCHANNELS {
            if rtc.events_compare[channel].read().bits() != 0 {
                rtc.events_compare[channel].reset();
                rtc.intenclr.write(|w| unsafe { w.bits(COMPARE0 << channel) });

                interrupt::free(|cs| {
                    if let Some(waker) = WAKERS.borrow(cs).borrow()[channel].as_ref() {
                        waker.wake_by_ref();
                    }
                });
            }
        }
    });
}
