//! Serial interface
//!
//! Both UARTE instances are supported. Transmission uses EasyDMA straight from the caller's
//! buffer; reception runs continuously, one byte per DMA transfer, into a ring buffer that the
//! receiver drains.

// TX is based on https://github.com/nrf-rs/nrf52-hal/commit/f05d471996c63f605cab43aa76c8fd990b852460

use core::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    ptr,
    sync::atomic::{self, AtomicBool, AtomicU8, AtomicUsize, Ordering},
    task::{Context, Poll, Waker},
    time::Duration,
};

use cortex_m::{
    interrupt::{self, Mutex},
    peripheral::NVIC,
};
use embassy_futures::select::{select, Either};
use pac::{uarte0::RegisterBlock, Interrupt};
use uart_rxtx::{
    config::{ClockSource, Gpio, PinConfig, PinSelect, PortConfig, PortId},
    Buffers, Driver, Installed, Receive, Transmit,
};
pub use uarte_config::{Error, RX_RING_CAPACITY};
use uarte_config::{RxQueue, LINE_ERRORS, RING_FULL};

use crate::{
    timer::{self, Timer},
    BorrowUnchecked as _, NotSync,
};

/// Number of UARTE instances
const NPORTS: usize = 2;

// bit positions in INTEN{SET,CLR}
const ENDRX: u32 = 1 << 4;
const ENDTX: u32 = 1 << 8;
const ERROR: u32 = 1 << 9;
const RXSTARTED: u32 = 1 << 19;

// SHORTS
const ENDRX_STARTRX: u32 = 1 << 5;

// largest EasyDMA transfer (MAXCNT is 16 bits wide)
const DMA_MAX: usize = 0xffff;

static INSTALLED: [AtomicBool; NPORTS] = [AtomicBool::new(false), AtomicBool::new(false)];
// `None` until the port is installed
static RX_RINGS: [Mutex<RefCell<Option<RxQueue>>>; NPORTS] =
    [Mutex::new(RefCell::new(None)), Mutex::new(RefCell::new(None))];
// the ring size requested at install time; never above `RX_RING_CAPACITY`
static RX_LIMITS: [AtomicUsize; NPORTS] = [AtomicUsize::new(0), AtomicUsize::new(0)];
static RX_ERRORS: [AtomicU8; NPORTS] = [AtomicU8::new(0), AtomicU8::new(0)];
static RX_WAKERS: Mutex<RefCell<[Option<Waker>; NPORTS]>> = Mutex::new(RefCell::new([None, None]));
static TX_WAKERS: Mutex<RefCell<[Option<Waker>; NPORTS]>> = Mutex::new(RefCell::new([None, None]));

// index of the slot the ongoing single-byte transfer fills
static RX_CURRENT: [AtomicU8; NPORTS] = [AtomicU8::new(0), AtomicU8::new(0)];
// DMA targets: two single-byte slots per port so the next transfer can be queued while the
// current one runs
static mut RX_SLOTS: [[u8; 2]; NPORTS] = [[0; 2]; NPORTS];

#[derive(Clone, Copy, PartialEq)]
enum Instance {
    Uarte0 = 0,
    Uarte1 = 1,
}

impl Instance {
    fn from_port(port: PortId) -> Option<Self> {
        match port.0 {
            0 => Some(Instance::Uarte0),
            1 => Some(Instance::Uarte1),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn interrupt(self) -> Interrupt {
        match self {
            Instance::Uarte0 => Interrupt::UARTE0_UART0,
            Instance::Uarte1 => Interrupt::UARTE1,
        }
    }

    fn borrow<T>(self, f: impl FnOnce(&RegisterBlock) -> T) -> T {
        match self {
            Instance::Uarte0 => pac::UARTE0::borrow_unchecked(|uarte| f(uarte)),
            Instance::Uarte1 => pac::UARTE1::borrow_unchecked(|uarte| f(uarte)),
        }
    }

    /// Address of one of this instance's DMA landing slots
    fn rx_slot(self, slot: usize) -> *mut u8 {
        // NOTE(unsafe) in bounds; no reference to the `static mut` is created
        unsafe { (ptr::addr_of_mut!(RX_SLOTS) as *mut u8).add(self.index() * 2 + slot) }
    }
}

/// [Singleton] Driver for the UARTE peripherals
pub struct Uarte {
    timer: Timer,
    _not_sync: NotSync,
}

impl Uarte {
    /// Creates the driver; `timer` bounds the duration of reads
    pub fn new(timer: Timer) -> Self {
        Self {
            timer,
            _not_sync: NotSync::new(),
        }
    }
}

impl Driver for Uarte {
    type Error = Error;
    type Installed = Port;

    fn install(self, port: PortId, buffers: &Buffers) -> Result<Port, Error> {
        let instance = Instance::from_port(port).ok_or(Error::InvalidPort(port))?;

        if buffers.tx != 0 {
            return Err(Error::TxBufferUnsupported);
        }

        if buffers.event_queue != 0 {
            return Err(Error::EventQueueUnsupported);
        }

        if buffers.rx > RX_RING_CAPACITY {
            return Err(Error::RxBufferTooLarge(buffers.rx));
        }

        let i = instance.index();
        if INSTALLED[i].swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyInstalled);
        }

        RX_LIMITS[i].store(buffers.rx, Ordering::Relaxed);
        RX_ERRORS[i].store(0, Ordering::Relaxed);
        interrupt::free(|cs| *RX_RINGS[i].borrow(cs).borrow_mut() = Some(RxQueue::new()));

        Ok(Port {
            instance,
            timer: self.timer,
            _not_sync: NotSync::new(),
        })
    }
}

/// A UARTE instance whose driver resources are installed
pub struct Port {
    instance: Instance,
    timer: Timer,
    _not_sync: NotSync,
}

impl Installed for Port {
    type Error = Error;
    type Tx = Tx;
    type Rx = Rx;

    fn configure(&mut self, config: &PortConfig) -> Result<(), Error> {
        let baudrate = uarte_config::baudrate(config.baud_rate)?;
        let frame = uarte_config::frame(config)?;

        if config.clock_source == ClockSource::Crystal {
            start_hfxo();
        }

        self.instance.borrow(|uarte| {
            uarte.baudrate.write(|w| unsafe { w.bits(baudrate) });
            uarte.config.write(|w| unsafe { w.bits(frame) });
        });

        Ok(())
    }

    fn set_pins(&mut self, pins: &PinConfig) -> Result<(), Error> {
        for select in [pins.tx, pins.rx, pins.rts, pins.cts].iter() {
            if let PinSelect::Pin(gpio) = *select {
                uarte_config::check_pin(gpio)?;
            }
        }

        self.instance.borrow(|uarte| {
            // PSEL may only change while the peripheral is disabled
            uarte.enable.write(|w| w.enable().disabled());

            if let PinSelect::Pin(gpio) = pins.tx {
                output_high(gpio);
                uarte.psel.txd.write(|w| unsafe { w.bits(uarte_config::psel(gpio)) });
            }

            if let PinSelect::Pin(gpio) = pins.rx {
                input(gpio);
                uarte.psel.rxd.write(|w| unsafe { w.bits(uarte_config::psel(gpio)) });
            }

            if let PinSelect::Pin(gpio) = pins.rts {
                output_high(gpio);
                uarte.psel.rts.write(|w| unsafe { w.bits(uarte_config::psel(gpio)) });
            }

            if let PinSelect::Pin(gpio) = pins.cts {
                input(gpio);
                uarte.psel.cts.write(|w| unsafe { w.bits(uarte_config::psel(gpio)) });
            }

            uarte.enable.write(|w| w.enable().enabled());
        });

        start_rx(self.instance);

        Ok(())
    }

    fn split(self) -> (Tx, Rx) {
        (
            Tx {
                instance: self.instance,
                _not_sync: NotSync::new(),
            },
            Rx {
                instance: self.instance,
                timer: self.timer,
                _not_sync: NotSync::new(),
            },
        )
    }
}

// NOTE(borrow_unchecked) all writes are single-instruction, atomic operations
// on a stateless register (`OUTSET`) or on the pin's own `PIN_CNF`
fn output_high(gpio: Gpio) {
    let mask = 1 << gpio.pin;
    let pin = usize::from(gpio.pin);
    // DIR = output, INPUT = disconnected
    let cnf = 0b11;
    match gpio.port {
        0 => pac::P0::borrow_unchecked(|p0| {
            p0.outset.write(|w| unsafe { w.bits(mask) });
            p0.pin_cnf[pin].write(|w| unsafe { w.bits(cnf) });
        }),
        _ => pac::P1::borrow_unchecked(|p1| {
            p1.outset.write(|w| unsafe { w.bits(mask) });
            p1.pin_cnf[pin].write(|w| unsafe { w.bits(cnf) });
        }),
    }
}

fn input(gpio: Gpio) {
    let pin = usize::from(gpio.pin);
    // DIR = input, INPUT = connected, no pull
    let cnf = 0;
    match gpio.port {
        0 => pac::P0::borrow_unchecked(|p0| p0.pin_cnf[pin].write(|w| unsafe { w.bits(cnf) })),
        _ => pac::P1::borrow_unchecked(|p1| p1.pin_cnf[pin].write(|w| unsafe { w.bits(cnf) })),
    }
}

fn start_hfxo() {
    pac::CLOCK::borrow_unchecked(|clock| {
        clock.events_hfclkstarted.reset();
        clock
            .tasks_hfclkstart
            .write(|w| w.tasks_hfclkstart().set_bit());
        while clock
            .events_hfclkstarted
            .read()
            .events_hfclkstarted()
            .bit_is_clear()
        {
            // busy wait
            continue;
        }
    });
}

fn start_rx(instance: Instance) {
    RX_CURRENT[instance.index()].store(0, Ordering::Relaxed);
    let first = instance.rx_slot(0);

    instance.borrow(|uarte| {
        // reset events
        uarte.events_endrx.reset();
        uarte.events_rxstarted.reset();
        uarte.events_error.reset();

        uarte.rxd.maxcnt.write(|w| unsafe { w.maxcnt().bits(1) });
        uarte
            .rxd
            .ptr
            .write(|w| unsafe { w.ptr().bits(first as usize as u32) });

        // restart reception as soon as a byte has landed
        uarte.shorts.write(|w| unsafe { w.bits(ENDRX_STARTRX) });
        uarte
            .intenset
            .write(|w| unsafe { w.bits(ENDRX | RXSTARTED | ERROR) });

        // NOTE(compiler_fence) the slot address must be written before the transfer starts
        atomic::compiler_fence(Ordering::Release);
        uarte.tasks_startrx.write(|w| unsafe { w.bits(1) });
    });

    // NOTE(unsafe) the handler only touches state guarded by critical sections or atomics
    unsafe { NVIC::unmask(instance.interrupt()) }
}

fn wake(wakers: &Mutex<RefCell<[Option<Waker>; NPORTS]>>, i: usize) {
    interrupt::free(|cs| {
        if let Some(waker) = wakers.borrow(cs).borrow()[i].as_ref() {
            waker.wake_by_ref();
        }
    });
}

/// Stores a received byte unless the ring already holds as many as were installed
fn enqueue(i: usize, byte: u8) -> bool {
    let limit = RX_LIMITS[i].load(Ordering::Relaxed);
    interrupt::free(|cs| match RX_RINGS[i].borrow(cs).borrow_mut().as_mut() {
        Some(ring) => uarte_config::enqueue_limited(ring, limit, byte),
        None => false,
    })
}

fn on_interrupt(instance: Instance) {
    let i = instance.index();

    instance.borrow(|uarte| {
        if uarte.events_error.read().bits() != 0 {
            uarte.events_error.reset();

            // ERRORSRC is write-one-to-clear
            let src = uarte.errorsrc.read().bits();
            uarte.errorsrc.write(|w| unsafe { w.bits(src) });
            RX_ERRORS[i].fetch_or(src as u8 & LINE_ERRORS, Ordering::Relaxed);
        }

        // a byte has landed
        if uarte.events_endrx.read().bits() != 0 {
            uarte.events_endrx.reset();

            let slot = usize::from(RX_CURRENT[i].load(Ordering::Relaxed));
            if uarte.rxd.amount.read().bits() != 0 {
                // NOTE(unsafe) the DMA is done with this slot; the next transfer targets the
                // other one
                let byte = unsafe { instance.rx_slot(slot).read_volatile() };
                if !enqueue(i, byte) {
                    RX_ERRORS[i].fetch_or(RING_FULL, Ordering::Relaxed);
                }
            }
            RX_CURRENT[i].store((slot ^ 1) as u8, Ordering::Relaxed);

            wake(&RX_WAKERS, i);
        }

        // the short started the next transfer; queue the one after it
        if uarte.events_rxstarted.read().bits() != 0 {
            uarte.events_rxstarted.reset();

            let next = usize::from(RX_CURRENT[i].load(Ordering::Relaxed)) ^ 1;
            let ptr = instance.rx_slot(next) as usize as u32;
            uarte.rxd.ptr.write(|w| unsafe { w.ptr().bits(ptr) });
        }

        // a write has completed; the `Write` future consumes the event
        if uarte.events_endtx.read().bits() != 0 && uarte.intenset.read().bits() & ENDTX != 0 {
            uarte.intenclr.write(|w| unsafe { w.bits(ENDTX) });

            wake(&TX_WAKERS, i);
        }
    });
}

/// [Singleton] Receiver component of the serial interface
pub struct Rx {
    instance: Instance,
    timer: Timer,
    _not_sync: NotSync,
}

impl Rx {
    /// Moves buffered bytes into `buf`; returns how many were moved
    fn drain(&self, buf: &mut [u8]) -> usize {
        let i = self.instance.index();
        interrupt::free(|cs| match RX_RINGS[i].borrow(cs).borrow_mut().as_mut() {
            Some(ring) => uarte_config::dequeue_into(ring, buf),
            None => 0,
        })
    }
}

impl Receive for Rx {
    type Error = Error;

    /// Fills `buf` with received bytes, giving up after `timeout`
    ///
    /// Receive errors latched since the previous read are only reported when no byte arrived
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        struct DataReady {
            instance: Instance,
        }

        impl Future for DataReady {
            type Output = ();

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                let i = self.instance.index();
                interrupt::free(|cs| {
                    let mut wakers = RX_WAKERS.borrow(cs).borrow_mut();
                    let empty = RX_RINGS[i]
                        .borrow(cs)
                        .borrow()
                        .as_ref()
                        .map_or(true, |ring| ring.is_empty());
                    if empty {
                        wakers[i] = Some(cx.waker().clone());
                        Poll::Pending
                    } else {
                        wakers[i] = None;
                        Poll::Ready(())
                    }
                })
            }
        }

        impl Drop for DataReady {
            fn drop(&mut self) {
                let i = self.instance.index();
                interrupt::free(|cs| RX_WAKERS.borrow(cs).borrow_mut()[i] = None);
            }
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = timer::now() + timeout;
        let mut count = self.drain(buf);
        while count < buf.len() {
            let ready = DataReady {
                instance: self.instance,
            };
            if let Either::Second(()) = select(ready, self.timer.wait_until(deadline)).await {
                break;
            }

            let n = self.drain(&mut buf[count..]);
            count += n;
        }

        let errors = RX_ERRORS[self.instance.index()].swap(0, Ordering::AcqRel);
        match Error::from_latched(errors) {
            Some(e) if count == 0 => Err(e),
            _ => Ok(count),
        }
    }
}

/// [Singleton] Transmitter component of the serial interface
pub struct Tx {
    instance: Instance,
    _not_sync: NotSync,
}

impl Transmit for Tx {
    /// Sends *all* `bytes` over the serial interface; returns the number of bytes sent
    // NOTE starting a `write` on a `bytes` that points into the stack, `poll`-ing the future and
    // then `mem::forget`-ing it is a Bad Thing To Do. This operation is not unsound on the device
    // side but will sent junk through the serial interface
    async fn write(&mut self, bytes: &[u8]) -> usize {
        let mut sent = 0;
        if crate::slice_in_ram(bytes) {
            for chunk in bytes.chunks(DMA_MAX) {
                sent += self.write_from_ram(chunk).await;
            }
        } else {
            // EasyDMA can't read from flash
            const BUFSZ: usize = 128;
            let mut on_the_stack = [0; BUFSZ];
            for chunk in bytes.chunks(BUFSZ) {
                let n = chunk.len();
                on_the_stack[..n].copy_from_slice(chunk);
                sent += self.write_from_ram(&on_the_stack[..n]).await;
            }
        }
        sent
    }
}

impl Tx {
    // `bytes` has already been checked to point into RAM and fit in a single transfer
    async fn write_from_ram(&mut self, bytes: &[u8]) -> usize {
        struct Write<'t, 'b> {
            tx: &'t mut Tx,
            bytes: &'b [u8],
            state: State,
        }

        impl Future for Write<'_, '_> {
            type Output = usize;

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
                let instance = self.tx.instance;
                let i = instance.index();

                match self.state {
                    // nothing to do
                    State::NotStarted if self.bytes.is_empty() => {
                        self.state = State::Finished;

                        Poll::Ready(0)
                    }

                    State::NotStarted => {
                        let (ptr, len) = (self.bytes.as_ptr() as usize as u32, self.bytes.len());

                        // install the waker
                        interrupt::free(|cs| {
                            TX_WAKERS.borrow(cs).borrow_mut()[i] = Some(cx.waker().clone())
                        });

                        instance.borrow(|uarte| {
                            // reset events
                            uarte.events_endtx.reset();

                            uarte
                                .txd
                                .maxcnt
                                .write(|w| unsafe { w.maxcnt().bits(len as u16) });
                            uarte.txd.ptr.write(|w| unsafe { w.ptr().bits(ptr) });

                            // NOTE(compiler_fence) writing the waker must complete before the
                            // interrupt is enabled
                            atomic::compiler_fence(Ordering::Release);
                            uarte.intenset.write(|w| unsafe { w.bits(ENDTX) });

                            // start the transfer
                            // semantically this complete the transfer of the
                            // reference to the DMA; any pending write to
                            // `bytes` must complete before the transfer, hence
                            // the compiler fence -- but it's redundant because
                            // of the preceding barrier
                            atomic::compiler_fence(Ordering::Release);
                            uarte.tasks_starttx.write(|w| unsafe { w.bits(1) });
                        });

                        self.state = State::InProgress;

                        Poll::Pending
                    }

                    State::InProgress => instance.borrow(|uarte| {
                        if uarte.events_endtx.read().bits() != 0 {
                            uarte.events_endtx.reset();
                            let sent = uarte.txd.amount.read().bits() as usize;

                            self.state = State::Finished;

                            // uninstall the waker
                            uarte.intenclr.write(|w| unsafe { w.bits(ENDTX) });
                            // NOTE(compiler_fence) the interrupt must be disabled before we
                            // take down the waker
                            atomic::compiler_fence(Ordering::SeqCst);
                            interrupt::free(|cs| drop(TX_WAKERS.borrow(cs).borrow_mut()[i].take()));

                            Poll::Ready(sent)
                        } else {
                            // spurious wake up; re-arm the one-shot interrupt
                            interrupt::free(|cs| {
                                TX_WAKERS.borrow(cs).borrow_mut()[i] = Some(cx.waker().clone())
                            });
                            uarte.intenset.write(|w| unsafe { w.bits(ENDTX) });

                            Poll::Pending
                        }
                    }),

                    State::Finished => unreachable!(),
                }
            }
        }

        impl Drop for Write<'_, '_> {
            fn drop(&mut self) {
                if self.state == State::InProgress {
                    let i = self.tx.instance.index();

                    // stop the transfer; the DMA must be done with `bytes` before they go away
                    self.tx.instance.borrow(|uarte| {
                        uarte.intenclr.write(|w| unsafe { w.bits(ENDTX) });
                        uarte.events_txstopped.reset();
                        uarte.tasks_stoptx.write(|w| unsafe { w.bits(1) });
                        while uarte.events_txstopped.read().bits() == 0 {
                            // busy wait
                            continue;
                        }
                        uarte.events_txstopped.reset();
                        uarte.events_endtx.reset();
                    });

                    interrupt::free(|cs| drop(TX_WAKERS.borrow(cs).borrow_mut()[i].take()));
                }
            }
        }

        Write {
            tx: self,
            bytes,
            state: State::NotStarted,
        }
        .await
    }
}

#[allow(non_snake_case)]
#[no_mangle]
fn UARTE0_UART0() {
    on_interrupt(Instance::Uarte0)
}

#[allow(non_snake_case)]
#[no_mangle]
fn UARTE1() {
    on_interrupt(Instance::Uarte1)
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    NotStarted,
    InProgress,
    Finished,
}
