use core::{
    cell::{Cell, UnsafeCell},
    future::Future,
    mem::MaybeUninit,
    pin::Pin,
    ptr,
    sync::atomic::{self, AtomicBool, Ordering},
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

use heapless::Vec;
use pin_utils::pin_mut;

use crate::{alloc::Alloc, ARENA_SIZE, NTASKS};

/// A single-threaded executor that only works in ARM Cortex-M "Thread mode"
/// (outside of interrupt context)
///
/// Spawned tasks are serviced in priority order: whenever several are ready the one with the
/// highest priority gets polled first
///
/// This is a singleton
pub struct Executor {
    in_block_on: Cell<bool>,
    // NOTE `UnsafeCell` is used to minimize the span of references to the `Vec`
    tasks: UnsafeCell<Vec<&'static Task, NTASKS>>,
}

// NOTE `*const ()` is &AtomicBool
static VTABLE: RawWakerVTable = {
    unsafe fn clone(p: *const ()) -> RawWaker {
        RawWaker::new(p, &VTABLE)
    }
    unsafe fn wake(p: *const ()) {
        wake_by_ref(p)
    }
    unsafe fn wake_by_ref(p: *const ()) {
        (*(p as *const AtomicBool)).store(true, Ordering::Release);
        crate::signal_event_ready();
    }
    unsafe fn drop(_: *const ()) {
        // no-op
    }

    RawWakerVTable::new(clone, wake, wake_by_ref, drop)
};

impl Executor {
    /// Creates a new instance of the executor
    pub fn new() -> Self {
        Self {
            in_block_on: Cell::new(false),
            tasks: UnsafeCell::new(Vec::new()),
        }
    }

    pub fn block_on<T>(&self, f: impl Future<Output = T>) -> T {
        // we want to avoid reentering `block_on` because then all the code
        // below has to become more complex. It's also likely that the
        // application will only call `block_on` once on an infinite task
        // (`Future<Output = !>`)
        if self.in_block_on.get() {
            // nested `block_on`
            crate::abort();
        }
        self.in_block_on.set(true);

        pin_mut!(f);
        let ready = AtomicBool::new(true);
        let waker =
            unsafe { Waker::from_raw(RawWaker::new(&ready as *const _ as *const _, &VTABLE)) };
        let val = loop {
            // advance the main task
            if ready.load(Ordering::Acquire) {
                ready.store(false, Ordering::Release);

                let mut cx = Context::from_waker(&waker);
                if let Poll::Ready(val) = f.as_mut().poll(&mut cx) {
                    break val;
                }
            }

            // advance the highest priority task that's ready, then start over so that a
            // higher priority task woken in the meantime is serviced next
            if let Some(task) = self.next_ready() {
                // we are about to service the task so switch the `ready` flag to `false`
                task.ready.store(false, Ordering::Release);

                // NOTE we never deallocate tasks so `&ready` is always pointing to
                // allocated memory (`&'static AtomicBool`)
                let waker = unsafe {
                    Waker::from_raw(RawWaker::new(&task.ready as *const _ as *const _, &VTABLE))
                };
                let mut cx = Context::from_waker(&waker);
                // this points into a `static` memory so it's already pinned; spawned tasks never
                // complete (see `Task::new`) so the result can be ignored
                let _ = unsafe { Pin::new_unchecked(&mut *task.f.get()).poll(&mut cx) };

                continue;
            }

            if ready.load(Ordering::Acquire) {
                continue;
            }

            // try to sleep; this will be a no-op if any of the previous tasks generated a SEV or an
            // interrupt ran (regardless of whether it generated a wake-up or not)
            crate::wait_for_event();
        };
        self.in_block_on.set(false);
        val
    }

    fn next_ready(&self) -> Option<&'static Task> {
        // NOTE iteration ought to be OK because `tasks` can't be reallocated (it's a statically
        // allocated `heapless::Vec<T>`); `tasks` can't shrink either
        let len = unsafe { (&(*self.tasks.get())).len() }; // (A)
        let task = |i: usize| -> &'static Task {
            // NOTE(unsafe) `i < len`
            unsafe { *(&(*self.tasks.get())).get_unchecked(i) }
        };

        // NOTE we don't need a CAS operation here because `wake` invocations that come from
        // interrupt handlers (the only source of 'race conditions' (!= data races)) only ever
        // set the flag to `true`; the flag is cleared right before polling the task
        let states = (0..len).map(|i| {
            let task = task(i);
            (task.ready.load(Ordering::Acquire), task.priority)
        });
        highest_ready(states).map(task)
    }

    // NOTE CAREFUL! this method can overlap with `block_on`
    // FIXME we want to use `Future<Output = !>` here but the never type (`!`) is unstable; so as a
    // workaround we'll "abort" if the task / future terminates (see `Task::new`)
    pub fn spawn(&self, priority: u8, f: impl Future + 'static) {
        // NOTE(unsafe) only safe as long as `spawn` is never re-entered and this does not overlap
        // with operation `(A)` (see `Executor::next_ready`)
        let res = unsafe { (*self.tasks.get()).push(Task::new(priority, f)) };
        if res.is_err() {
            // OOM
            crate::abort()
        }
    }
}

/// Picks, from `(ready, priority)` pairs in spawn order, the index of the task to poll next
///
/// That's the ready task with the highest priority; ties go to the task that was spawned first
fn highest_ready(tasks: impl IntoIterator<Item = (bool, u8)>) -> Option<usize> {
    let mut next: Option<(usize, u8)> = None;
    for (i, (ready, priority)) in tasks.into_iter().enumerate() {
        if ready && next.map_or(true, |(_, best)| priority > best) {
            next = Some((i, priority));
        }
    }
    next.map(|(i, _)| i)
}

type Task = Node<dyn Future<Output = ()> + 'static>;

pub struct Node<F>
where
    F: ?Sized,
{
    ready: AtomicBool,
    priority: u8,
    f: UnsafeCell<F>,
}

impl Task {
    fn new(priority: u8, f: impl Future + 'static) -> &'static mut Self {
        // NOTE(unsafe) Only safe as long as `Executor::spawn` is not re-entered
        unsafe {
            // Already initialized at this point
            let alloc = ptr::addr_of_mut!(ALLOC) as *mut Alloc;
            (*alloc).alloc_init(Node {
                ready: AtomicBool::new(true),
                priority,
                f: UnsafeCell::new(async {
                    f.await;
                    // `spawn`-ed tasks must never terminate
                    crate::abort()
                }),
            })
        }
    }
}

static mut ALLOC: MaybeUninit<Alloc> = MaybeUninit::uninit();

/// Returns a handle to the executor singleton
///
/// This lazily initializes the executor and allocator when first called
pub(crate) fn current() -> &'static Executor {
    static INIT: AtomicBool = AtomicBool::new(false);
    static mut EXECUTOR: MaybeUninit<Executor> = MaybeUninit::uninit();

    if !in_thread_mode() {
        // tried to access the executor from a thread that's not `main`
        crate::abort()
    }

    if INIT.load(Ordering::Relaxed) {
        unsafe { &*(ptr::addr_of!(EXECUTOR) as *const Executor) }
    } else {
        unsafe {
            /// Reserved memory for the bump allocator
            static mut MEMORY: [u8; ARENA_SIZE] = [0; ARENA_SIZE];

            let executorp = ptr::addr_of_mut!(EXECUTOR) as *mut Executor;
            executorp.write(Executor::new());
            let allocp = ptr::addr_of_mut!(ALLOC) as *mut Alloc;
            allocp.write(Alloc::new(&mut *ptr::addr_of_mut!(MEMORY)));
            // force the `allocp` write to complete before returning from this function
            atomic::compiler_fence(Ordering::Release);
            INIT.store(true, Ordering::Relaxed);
            &*executorp
        }
    }
}

fn in_thread_mode() -> bool {
    const SCB_ICSR: *const u32 = 0xE000_ED04 as *const u32;
    // NOTE(unsafe) single-instruction load with no side effects
    unsafe { SCB_ICSR.read_volatile() as u8 == 0 }
}

#[cfg(test)]
mod tests {
    use super::highest_ready;

    #[test]
    fn higher_priority_first() {
        assert_eq!(highest_ready(vec![(true, 1), (true, 2)]), Some(1));
        assert_eq!(highest_ready(vec![(true, 2), (true, 1)]), Some(0));
    }

    #[test]
    fn ties_go_to_the_earlier_spawn() {
        assert_eq!(highest_ready(vec![(true, 1), (true, 1), (true, 1)]), Some(0));
        assert_eq!(highest_ready(vec![(true, 0), (true, 3), (true, 3)]), Some(1));
    }

    #[test]
    fn pending_tasks_are_skipped() {
        assert_eq!(highest_ready(vec![(false, 2), (true, 1)]), Some(1));
        assert_eq!(highest_ready(vec![(false, 2), (false, 1)]), None);
        assert_eq!(highest_ready(Vec::new()), None);
    }

    #[test]
    fn receiver_runs_ahead_of_transmitter() {
        // the demo spawns RX (2) before TX (1); both become ready at startup
        assert_eq!(highest_ready(vec![(true, 2), (true, 1)]), Some(0));
        // the transmitter still runs while the receiver waits
        assert_eq!(highest_ready(vec![(false, 2), (true, 1)]), Some(1));
    }
}
