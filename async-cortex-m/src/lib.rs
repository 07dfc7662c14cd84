//! Proof of Concept async runtime for the Cortex-M architecture

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

mod alloc;
mod executor;
pub mod task;

use cortex_m::asm;

/// Maximum number of tasks (TODO this could be user configurable)
type NTASKS = typenum::consts::U8;

/// Size of the memory reserved for spawned tasks, in bytes
const ARENA_SIZE: usize = 4 * 1024;

/// Undefined Instruction -- this will cause the HardFault handler to preempt the caller's context
pub fn abort() -> ! {
    asm::udf()
}

#[inline]
/// Makes the next `wait_for_event` return immediately
pub(crate) fn signal_event_ready() {
    asm::sev();
}

#[inline]
/// Sleeps until an interrupt fires or `signal_event_ready` is called
pub(crate) fn wait_for_event() {
    asm::wfe();
}
