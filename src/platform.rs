//! Platform-specific release behaviour.
//!
//! The one behavioural difference between targets lives behind a single
//! adapter injected into `release`, rather than per-target conditionals
//! scattered through the algorithm.

use crate::interval::Interval;

/// What the target's native unmap can and cannot do.
pub trait PlatformAdapter {
    /// Whether the native API can release a strict sub-range of one
    /// mapping (a hole punch). When it cannot, splitting an interval would
    /// promise an unmap the OS will refuse, so `release` fails instead.
    fn supports_partial_release(&self) -> bool;

    /// Called once for every entry `release` removes outright. Only
    /// meaningful on targets that keep one native mapping per tracked
    /// frame; elsewhere it stays a no-op.
    fn finalize(&self, _entry: &Interval) {}
}

/// Targets whose unmap takes arbitrary sub-ranges (the usual mmap shape).
pub struct SubRangeAdapter;

impl PlatformAdapter for SubRangeAdapter {
    fn supports_partial_release(&self) -> bool {
        true
    }
}

/// Targets that can only drop whole mappings at frame granularity and so
/// keep one native mapping per tracked frame. The native release itself
/// stays with the caller, which knows how to close its handles.
pub struct PerFrameAdapter<F: Fn(&Interval)> {
    release_native: F,
}

impl<F: Fn(&Interval)> PerFrameAdapter<F> {
    pub fn new(release_native: F) -> Self {
        Self { release_native }
    }
}

impl<F: Fn(&Interval)> PlatformAdapter for PerFrameAdapter<F> {
    fn supports_partial_release(&self) -> bool {
        false
    }

    fn finalize(&self, entry: &Interval) {
        (self.release_native)(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SIZE;
    use crate::interval::{Handle, MapFlags, Protection};
    use core::cell::Cell;

    #[test]
    fn test_adapter_capabilities() {
        assert!(SubRangeAdapter.supports_partial_release());
        assert!(!PerFrameAdapter::new(|_| {}).supports_partial_release());
    }

    #[test]
    fn test_per_frame_finalizer_sees_the_entry() {
        let seen = Cell::new(0i64);
        let adapter = PerFrameAdapter::new(|iv: &Interval| seen.set(iv.handle.raw()));
        let iv = Interval {
            x: 3,
            y: 3,
            size: FRAME_SIZE,
            handle: Handle::new(42),
            prot: Protection::READ,
            flags: MapFlags::SHARED,
            offset: 0,
            is_cow: false,
            read_only_file: false,
        };
        adapter.finalize(&iv);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn test_sub_range_finalizer_is_a_no_op() {
        let iv = Interval {
            x: 0,
            y: 0,
            size: FRAME_SIZE,
            handle: Handle::ANONYMOUS,
            prot: Protection::NONE,
            flags: MapFlags::empty(),
            offset: 0,
            is_cow: false,
            read_only_file: false,
        };
        SubRangeAdapter.finalize(&iv);
    }
}
