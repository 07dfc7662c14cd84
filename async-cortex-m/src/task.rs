//! Asynchronous tasks

use core::future::Future;

use crate::executor;

/// Drives the future `f` to completion
///
/// This also makes any previously `spawn`-ed future make progress
pub fn block_on<T>(f: impl Future<Output = T>) -> T {
    executor::current().block_on(f)
}

/// Spawns a task with the lowest priority (`0`) onto the executor
///
/// The spawned task will not make any progress until `block_on` is called.
///
/// The future `f` must never terminate. The program will *abort* if `f` (the async code) returns.
/// The right signature here would be `f: impl Future<Output = !>` but that requires nightly
pub fn spawn<T>(f: impl Future<Output = T> + 'static) {
    spawn_with_priority(0, f)
}

/// Spawns a task onto the executor
///
/// When several tasks are ready the one with the highest `priority` is polled first; tasks of
/// equal priority are polled in the order they were spawned. Otherwise this behaves like
/// [`spawn`]
pub fn spawn_with_priority<T>(priority: u8, f: impl Future<Output = T> + 'static) {
    executor::current().spawn(priority, f)
}
