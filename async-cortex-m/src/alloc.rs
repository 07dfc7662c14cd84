//! Bump allocator for task storage; memory is never freed

use core::mem::{self, MaybeUninit};

pub(crate) struct Alloc {
    // next free address
    start: usize,
    end: usize,
}

impl Alloc {
    pub(crate) fn new(memory: &'static mut [u8]) -> Self {
        let start = memory.as_mut_ptr() as usize;
        Self {
            start,
            end: start + memory.len(),
        }
    }

    /// Reserves properly aligned memory for a `T`; aborts when the arena is exhausted
    pub(crate) fn alloc<T>(&mut self) -> &'static mut MaybeUninit<T> {
        let align = mem::align_of::<T>();
        let size = mem::size_of::<T>();

        // `align` is always a power of 2
        let start = (self.start + align - 1) & !(align - 1);
        let end = match start.checked_add(size) {
            Some(end) if end <= self.end => end,
            // OOM
            _ => crate::abort(),
        };
        self.start = end;

        // NOTE(unsafe) the range `start..end` is aligned, in bounds and handed out only once
        unsafe { &mut *(start as *mut MaybeUninit<T>) }
    }

    pub(crate) fn alloc_init<T>(&mut self, val: T) -> &'static mut T {
        self.alloc().write(val)
    }
}
