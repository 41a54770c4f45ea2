//! memtrack — memory-region tracker for a portable libc runtime.
//!
//! The store mirrors every mapping the process holds so that the runtime's
//! `map`/`unmap`/`protect` wrappers behave uniformly, including on targets
//! whose native API can only release whole mappings at a fixed granularity.
//! It bootstraps its own backing storage from raw mappings because it runs
//! in allocator-sensitive and signal-handling contexts, and it can keep a
//! parallel shadow region for poison tracking.
//!
//! The raw OS mapping primitives themselves live behind
//! [`bootstrap::BackingMapper`] and [`platform::PlatformAdapter`]; this
//! crate never unmaps anything on its own, not even its backing storage.

#![cfg_attr(not(test), no_std)]

pub mod bootstrap;
pub mod frame;
pub mod interval;
pub mod platform;
pub mod store;

#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

pub use bootstrap::BackingMapper;
#[cfg(unix)]
pub use bootstrap::OsMapper;
pub use interval::{Handle, Interval, MapFlags, Protection};
pub use platform::{PerFrameAdapter, PlatformAdapter, SubRangeAdapter};
pub use store::{IntervalStore, TrackerError};

use spin::mutex::SpinMutex;

/// The process-wide store. Every mutating or lookup-for-mutation caller
/// goes through [`with_regions`]; one lock serializes the map/unmap/protect
/// wrappers, thread-exit cleanup and fork handling alike.
static REGIONS: SpinMutex<IntervalStore> = SpinMutex::new(IntervalStore::new());

/// Run `f` with the global store locked.
pub fn with_regions<R>(f: impl FnOnce(&mut IntervalStore) -> R) -> R {
    f(&mut REGIONS.lock())
}

/// Crash-reporting dump of the global store without taking the lock.
///
/// # Safety
///
/// May observe a torn snapshot while another thread mutates the store.
/// Acceptable for diagnostics only; never feed the result back into a
/// correctness-affecting path.
pub unsafe fn dump_unlocked() {
    (*REGIONS.as_mut_ptr()).log_entries();
}
