//! Self-hosting backing storage for the interval store.
//!
//! The entry array must grow without ever touching a general allocator:
//! growth can run before the allocator is initialized, while another thread
//! holds an allocator lock, or inside a signal handler. Capacity therefore
//! comes from raw anonymous mappings placed at a reserved address, kept as
//! one contiguous run that is extended in place and never relocated after
//! the first move off the inline seed array.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::interval::Interval;
use crate::store::TrackerError;

/// Reserved base of the backing run; outside the zones the runtime hands to
/// the heap, thread stacks and user mappings.
pub const BACKING_BASE: usize = 0x6000_0000_0000;

/// Minimum bytes mapped per growth step (one frame granule).
pub const GROWTH_GRANULE: usize = 64 * 1024;

/// Real-to-shadow size ratio in poison-tracking mode.
pub const SHADOW_SCALE: usize = 8;

/// Entries held inline before the first growth. A handful of mappings exist
/// before the store can map anything for itself, so it must start on
/// storage that costs nothing to obtain.
pub const INLINE_CAPACITY: usize = 64;

/// Raw anonymous read-write mapping placed at an exact address.
///
/// This is the one slice of the OS mapping surface growth needs. `None`
/// means the mapping could not be placed there; the caller reports
/// out-of-memory and commits nothing.
pub trait BackingMapper {
    fn map_fixed(&self, addr: usize, len: usize) -> Option<NonNull<u8>>;
}

/// Owner of the store's entry array: the caller's inline seed until it
/// fills, then a contiguous mapped run starting at [`BACKING_BASE`].
pub(crate) struct Backing {
    /// Start of the mapped run; null while still on the inline array.
    run: *mut Interval,
    /// Entry capacity of whichever storage is current.
    capacity: usize,
    /// Bytes mapped so far at the reserved base.
    mapped_bytes: usize,
    /// Poison-tracking shadow region active.
    shadow: bool,
}

impl Backing {
    pub(crate) const fn new() -> Self {
        Self {
            run: ptr::null_mut(),
            capacity: INLINE_CAPACITY,
            mapped_bytes: 0,
            shadow: false,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_inline(&self) -> bool {
        self.run.is_null()
    }

    pub(crate) fn run(&self) -> *mut Interval {
        self.run
    }

    pub(crate) fn set_shadow(&mut self, on: bool) {
        self.shadow = on;
    }

    /// Extend capacity by mapping more of the reserved run, doubling the
    /// mapped size each time. On the first call the `seed` entries move
    /// into the new run; afterwards the run only ever gains granules at its
    /// end, so entry pointers stay stable across growth.
    ///
    /// Failure commits nothing: capacity, the run and the seed are left
    /// exactly as they were.
    pub(crate) fn grow(
        &mut self,
        mapper: &dyn BackingMapper,
        seed: &[Interval],
    ) -> Result<(), TrackerError> {
        let delta = if self.mapped_bytes == 0 {
            GROWTH_GRANULE
        } else {
            self.mapped_bytes
        };
        let addr = BACKING_BASE + self.mapped_bytes;
        log::trace!("memtrack: growing backing run by {delta} bytes at {addr:#x}");

        let granule = match mapper.map_fixed(addr, delta) {
            Some(p) => p.as_ptr(),
            None => {
                log::error!("memtrack: backing growth of {delta} bytes refused");
                return Err(TrackerError::OutOfMemory);
            }
        };
        // Contiguity is what lets the array extend without relocating.
        if !self.run.is_null() && granule as usize != self.run as usize + self.mapped_bytes {
            log::error!("memtrack: backing granule landed off the run");
            return Err(TrackerError::OutOfMemory);
        }

        if self.shadow {
            let total = self.mapped_bytes + delta;
            let shadow_addr = BACKING_BASE - total / SHADOW_SCALE;
            let shadow_len = delta / SHADOW_SCALE;
            if mapper.map_fixed(shadow_addr, shadow_len).is_none() {
                // The real granule stays mapped; the next attempt re-places
                // it at the same address before committing anything.
                log::error!("memtrack: shadow growth of {shadow_len} bytes refused");
                return Err(TrackerError::OutOfMemory);
            }
        }

        if self.run.is_null() {
            let run = granule as *mut Interval;
            unsafe { ptr::copy_nonoverlapping(seed.as_ptr(), run, seed.len()) };
            self.run = run;
        }
        self.mapped_bytes += delta;
        self.capacity = self.mapped_bytes / size_of::<Interval>();
        log::trace!("memtrack: backing capacity now {} entries", self.capacity);
        Ok(())
    }
}

/// [`BackingMapper`] over the host `mmap`, used by the real wrappers.
#[cfg(unix)]
pub struct OsMapper;

#[cfg(unix)]
impl BackingMapper for OsMapper {
    fn map_fixed(&self, addr: usize, len: usize) -> Option<NonNull<u8>> {
        let p = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(p as *mut u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SIZE;
    use crate::interval::{Handle, MapFlags, Protection};
    use crate::testing::ArenaMapper;
    use core::cell::Cell;

    fn seed_entries(n: u64) -> Vec<Interval> {
        (0..n)
            .map(|k| Interval {
                x: 2 * k,
                y: 2 * k,
                size: FRAME_SIZE,
                handle: Handle::ANONYMOUS,
                prot: Protection::READ,
                flags: MapFlags::PRIVATE,
                offset: 0,
                is_cow: false,
                read_only_file: false,
            })
            .collect()
    }

    #[test]
    fn test_first_growth_moves_seed() {
        let mapper = ArenaMapper::new();
        let mut backing = Backing::new();
        let seed = seed_entries(INLINE_CAPACITY as u64);

        assert!(backing.is_inline());
        backing.grow(&mapper, &seed).unwrap();
        assert!(!backing.is_inline());
        assert_eq!(backing.capacity(), GROWTH_GRANULE / size_of::<Interval>());

        let moved = unsafe { core::slice::from_raw_parts(backing.run(), seed.len()) };
        assert_eq!(moved, &seed[..]);

        let calls = mapper.calls.borrow();
        assert_eq!(calls[0], (BACKING_BASE, GROWTH_GRANULE));
    }

    #[test]
    fn test_growth_doubles_and_stays_contiguous() {
        let mapper = ArenaMapper::new();
        let mut backing = Backing::new();
        backing.grow(&mapper, &[]).unwrap();
        let first_capacity = backing.capacity();
        let run = backing.run();

        backing.grow(&mapper, &[]).unwrap();
        assert_eq!(backing.capacity(), 2 * first_capacity);
        assert_eq!(backing.run(), run);

        let calls = mapper.calls.borrow();
        assert_eq!(calls[1], (BACKING_BASE + GROWTH_GRANULE, GROWTH_GRANULE));
    }

    #[test]
    fn test_failed_growth_commits_nothing() {
        let mapper = ArenaMapper::new();
        mapper.fail_after(0);
        let mut backing = Backing::new();
        let seed = seed_entries(4);

        assert_eq!(
            backing.grow(&mapper, &seed),
            Err(TrackerError::OutOfMemory)
        );
        assert!(backing.is_inline());
        assert_eq!(backing.capacity(), INLINE_CAPACITY);
    }

    #[test]
    fn test_misplaced_granule_fails_growth() {
        // A mapper that ignores the address hint breaks the contiguous-run
        // contract; growth must notice rather than corrupt the array.
        struct StuckMapper {
            buf: Box<[u8]>,
            calls: Cell<usize>,
        }
        impl BackingMapper for StuckMapper {
            fn map_fixed(&self, _addr: usize, _len: usize) -> Option<NonNull<u8>> {
                self.calls.set(self.calls.get() + 1);
                NonNull::new(self.buf.as_ptr() as *mut u8)
            }
        }
        let mapper = StuckMapper {
            buf: vec![0u8; 2 * GROWTH_GRANULE].into_boxed_slice(),
            calls: Cell::new(0),
        };

        let mut backing = Backing::new();
        backing.grow(&mapper, &[]).unwrap();
        let capacity = backing.capacity();
        assert_eq!(
            backing.grow(&mapper, &[]),
            Err(TrackerError::OutOfMemory)
        );
        assert_eq!(backing.capacity(), capacity);
        assert_eq!(mapper.calls.get(), 2);
    }

    #[test]
    fn test_shadow_growth_maps_below_the_run() {
        let mapper = ArenaMapper::new();
        let mut backing = Backing::new();
        backing.set_shadow(true);
        backing.grow(&mapper, &[]).unwrap();

        let calls = mapper.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (BACKING_BASE, GROWTH_GRANULE));
        assert_eq!(
            calls[1],
            (
                BACKING_BASE - GROWTH_GRANULE / SHADOW_SCALE,
                GROWTH_GRANULE / SHADOW_SCALE
            )
        );
    }
}
