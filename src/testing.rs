//! Test-support backing mapper, hidden from the public API.
//!
//! Honours the exact-placement contract of [`BackingMapper`] by translating
//! the reserved window onto a leaked arena, and can be told to start
//! refusing mappings to exercise growth-failure paths. Compiled for unit
//! tests and, through the `testing` feature, for the integration suite, so
//! both share one implementation.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use crate::bootstrap::{BackingMapper, BACKING_BASE};

pub struct ArenaMapper {
    base: *mut u8,
    len: usize,
    /// Arena offset standing in for `BACKING_BASE`; keeps room below the
    /// base for shadow mappings.
    origin: usize,
    /// Mappings still granted before the injected failure.
    remaining: Cell<usize>,
    /// Every `(addr, len)` request seen, granted or not.
    pub calls: RefCell<Vec<(usize, usize)>>,
}

impl ArenaMapper {
    pub fn new() -> Self {
        Self::with_capacity(8 * 1024 * 1024)
    }

    pub fn with_capacity(bytes: usize) -> Self {
        let arena = Box::leak(vec![0u8; bytes].into_boxed_slice());
        Self {
            base: arena.as_mut_ptr(),
            len: bytes,
            origin: bytes / 2,
            remaining: Cell::new(usize::MAX),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Grant `n` more mappings, then refuse every request.
    pub fn fail_after(&self, n: usize) {
        self.remaining.set(n);
    }
}

impl Default for ArenaMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingMapper for ArenaMapper {
    fn map_fixed(&self, addr: usize, len: usize) -> Option<NonNull<u8>> {
        self.calls.borrow_mut().push((addr, len));
        if self.remaining.get() == 0 {
            return None;
        }
        self.remaining.set(self.remaining.get() - 1);

        let off = self
            .origin
            .checked_add_signed(addr as isize - BACKING_BASE as isize)?;
        if off.checked_add(len)? > self.len {
            return None;
        }
        NonNull::new(unsafe { self.base.add(off) })
    }
}
