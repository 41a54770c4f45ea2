//! The interval store: an address-sorted flat array of tracked mappings.
//!
//! A flat array beats an interval tree at the scale this runtime sees (tens
//! to low thousands of mappings): lookups stay O(log n) via binary search,
//! inserts and deletes are one cache-friendly `memmove`, and the structure
//! needs no per-node allocation, which matters because it must work before
//! any allocator does.

use core::ptr;
use core::slice;

use crate::bootstrap::{Backing, BackingMapper, INLINE_CAPACITY};
use crate::frame::{size_is_valid, FRAME_SIZE};
use crate::interval::Interval;
use crate::platform::PlatformAdapter;

/// Errors surfaced by the tracking entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    /// Backing growth could not map more capacity.
    OutOfMemory,
    /// A hole punch was requested on a platform that cannot release a
    /// sub-range of one native mapping.
    InvalidOperation,
}

/// Address-sorted set of every mapping the process holds.
///
/// Entries never overlap, and neighbours that `track` could have coalesced
/// do not exist. The store exclusively owns both its entries and the memory
/// they live in; see [`crate::bootstrap`] for how that memory is obtained
/// without an allocator.
pub struct IntervalStore {
    inline: [Interval; INLINE_CAPACITY],
    backing: Backing,
    len: usize,
}

// The backing-run pointer is exclusively owned by the store, which is only
// ever reached through the process-wide lock.
unsafe impl Send for IntervalStore {}

impl IntervalStore {
    pub const fn new() -> Self {
        Self {
            inline: [Interval::EMPTY; INLINE_CAPACITY],
            backing: Backing::new(),
            len: 0,
        }
    }

    /// Turn on poison-tracking shadow growth. Call before the first
    /// mapping is tracked; already-mapped capacity gains no shadow.
    pub fn enable_shadow(&mut self) {
        self.backing.set_shadow(true);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.backing.capacity()
    }

    fn base(&self) -> *const Interval {
        if self.backing.is_inline() {
            self.inline.as_ptr()
        } else {
            self.backing.run()
        }
    }

    fn base_mut(&mut self) -> *mut Interval {
        if self.backing.is_inline() {
            self.inline.as_mut_ptr()
        } else {
            self.backing.run()
        }
    }

    /// The tracked intervals, sorted by start frame.
    pub fn entries(&self) -> &[Interval] {
        unsafe { slice::from_raw_parts(self.base(), self.len) }
    }

    fn entries_mut(&mut self) -> &mut [Interval] {
        unsafe { slice::from_raw_parts_mut(self.base_mut(), self.len) }
    }

    /// Lowest index whose entry ends at or after `frame`; `len()` if none.
    pub fn find(&self, frame: u64) -> usize {
        self.entries().partition_point(|iv| iv.y < frame)
    }

    /// Open an empty slot at `i`, growing the backing first when full. On
    /// growth failure nothing is shifted and no entry is touched.
    pub(crate) fn create_slot(
        &mut self,
        i: usize,
        mapper: &dyn BackingMapper,
    ) -> Result<(), TrackerError> {
        debug_assert!(i <= self.len);
        if self.len == self.backing.capacity() {
            let seed = self.len.min(INLINE_CAPACITY);
            self.backing.grow(mapper, &self.inline[..seed])?;
        }
        unsafe {
            let base = self.base_mut();
            ptr::copy(base.add(i), base.add(i + 1), self.len - i);
        }
        self.len += 1;
        Ok(())
    }

    /// Delete `n` entries starting at `i` by shifting the tail left.
    pub(crate) fn remove_slots(&mut self, i: usize, n: usize) {
        debug_assert!(i + n <= self.len);
        unsafe {
            let base = self.base_mut();
            ptr::copy(base.add(i + n), base.add(i), self.len - i - n);
        }
        self.len -= n;
    }

    /// Register the mapping `iv`, coalescing into a neighbour when the
    /// attributes match and no partially-backed frame would be folded away.
    pub fn track(
        &mut self,
        iv: Interval,
        mapper: &dyn BackingMapper,
    ) -> Result<(), TrackerError> {
        debug_assert!(iv.y >= iv.x);
        debug_assert!(size_is_valid(iv.x, iv.y, iv.size));
        let i = self.find(iv.x);

        // Extend the left neighbour in place when the new span continues
        // it. A partially-backed incoming mapping never merges: its exact
        // byte count must stay observable as its own entry.
        if i > 0 && iv.is_fully_backed() && self.entries()[i - 1].can_extend_with(&iv) {
            {
                let left = &mut self.entries_mut()[i - 1];
                left.y = iv.y;
                left.size += iv.size;
            }
            // The extension may have closed the gap to the right neighbour.
            if i < self.len {
                let merged = self.entries()[i - 1];
                let right = self.entries()[i];
                if merged.can_extend_with(&right) {
                    log::trace!(
                        "memtrack: bridging [{:#x},{:#x}] into its right neighbour",
                        merged.x,
                        merged.y
                    );
                    let left = &mut self.entries_mut()[i - 1];
                    left.y = right.y;
                    left.size += right.size;
                    self.remove_slots(i, 1);
                }
            }
            debug_assert!(self.check());
            return Ok(());
        }

        // Fold the new span onto the front of the right neighbour.
        if i < self.len && iv.can_extend_with(&self.entries()[i]) {
            let right = &mut self.entries_mut()[i];
            right.x = iv.x;
            right.size += iv.size;
            right.offset = iv.offset;
            debug_assert!(self.check());
            return Ok(());
        }

        self.create_slot(i, mapper)?;
        self.entries_mut()[i] = iv;
        debug_assert!(self.check());
        Ok(())
    }

    /// Fold entry `i` into its left neighbour when the pair has become
    /// coalescible. Trimming away a partially-backed tail leaves a fully
    /// backed kept piece, which can sit frame-adjacent to a neighbour with
    /// matching attributes; `release` must restore the no-mergeable-
    /// neighbours invariant itself, since nothing re-tracks the kept piece.
    fn coalesce_left(&mut self, i: usize) {
        if i == 0 || i >= self.len {
            return;
        }
        let prev = self.entries()[i - 1];
        let cur = self.entries()[i];
        if cur.is_fully_backed() && prev.can_extend_with(&cur) {
            log::trace!(
                "memtrack: re-coalescing [{:#x},{:#x}] after trim",
                cur.x,
                cur.y
            );
            let left = &mut self.entries_mut()[i - 1];
            left.y = cur.y;
            left.size += cur.size;
            self.remove_slots(i, 1);
        }
    }

    /// Deregister the frame range `[x, y]`.
    ///
    /// A range nothing overlaps is a successful no-op. Entries straddling
    /// an end of the range are trimmed; entries wholly inside are handed to
    /// `adapter.finalize` one by one and removed. A range strictly interior
    /// to one entry splits it, which constrained platforms refuse: the
    /// capability is checked before any mutation, and the split's slot is
    /// allocated before the original entry is touched, so every failure
    /// leaves the store byte-for-byte unchanged.
    pub fn release(
        &mut self,
        x: u64,
        y: u64,
        adapter: &dyn PlatformAdapter,
        mapper: &dyn BackingMapper,
    ) -> Result<(), TrackerError> {
        debug_assert!(y >= x);
        let l = self.find(x);
        if l == self.len || y < self.entries()[l].x {
            return Ok(());
        }
        let mut r = self.find(y);
        if r == self.len || y < self.entries()[r].x {
            r -= 1;
        }

        let first = self.entries()[l];
        if l == r && x > first.x && y < first.y {
            // Interior hole: one entry becomes two.
            if !adapter.supports_partial_release() {
                return Err(TrackerError::InvalidOperation);
            }
            self.create_slot(l + 1, mapper)?;
            let skip = (y + 1 - first.x) * FRAME_SIZE;
            let entries = self.entries_mut();
            entries[l].y = x - 1;
            entries[l].size = (x - first.x) * FRAME_SIZE;
            entries[l + 1] = Interval {
                x: y + 1,
                size: first.size - skip,
                offset: first.offset + skip,
                ..first
            };
            log::trace!(
                "memtrack: punched [{x:#x},{y:#x}] out of [{:#x},{:#x}]",
                first.x,
                first.y
            );
            self.coalesce_left(l);
            debug_assert!(self.check());
            return Ok(());
        }

        // Entries straddling either end of the range are trimmed and kept;
        // `del` narrows to the entries wholly inside.
        let mut del_start = l;
        let mut del_end = r + 1;
        if x > self.entries()[l].x {
            let left = &mut self.entries_mut()[l];
            left.size = (x - left.x) * FRAME_SIZE;
            left.y = x - 1;
            del_start = l + 1;
        }
        if y < self.entries()[r].y {
            let right = &mut self.entries_mut()[r];
            let skip = (y + 1 - right.x) * FRAME_SIZE;
            right.size -= skip;
            right.offset += skip;
            right.x = y + 1;
            del_end = r;
        }

        if del_start < del_end {
            for k in del_start..del_end {
                adapter.finalize(&self.entries()[k]);
            }
            self.remove_slots(del_start, del_end - del_start);
            log::trace!(
                "memtrack: released {} whole intervals in [{x:#x},{y:#x}]",
                del_end - del_start
            );
        }
        if del_start > l {
            // A left trim just made the kept piece fully backed.
            self.coalesce_left(l);
        }
        debug_assert!(self.check());
        Ok(())
    }

    /// Consistency oracle: every entry well-formed, entries strictly
    /// ordered without overlap, and no neighbour pair that `track` should
    /// have coalesced. Mutating operations assert this in debug builds.
    pub fn check(&self) -> bool {
        let entries = self.entries();
        for i in 0..entries.len() {
            let iv = &entries[i];
            if iv.y < iv.x {
                return false;
            }
            if !size_is_valid(iv.x, iv.y, iv.size) {
                return false;
            }
            if i > 0 {
                let prev = &entries[i - 1];
                if iv.x <= prev.y {
                    return false;
                }
                // Adjacency `track` would have coalesced: matching
                // attributes and a fully backed pair.
                if iv.is_fully_backed() && prev.can_extend_with(iv) {
                    return false;
                }
            }
        }
        true
    }

    /// One log line per entry. The crash path calls this without the lock
    /// and tolerates a torn snapshot.
    pub fn log_entries(&self) {
        log::debug!("memtrack: {} tracked intervals", self.len);
        for iv in self.entries() {
            log::debug!(
                "memtrack: [{:#x},{:#x}] size={} handle={} prot={:#x} flags={:#x} offset={}{}{}",
                iv.x,
                iv.y,
                iv.size,
                iv.handle.raw(),
                iv.prot.bits(),
                iv.flags.bits(),
                iv.offset,
                if iv.is_cow { " cow" } else { "" },
                if iv.read_only_file { " rofile" } else { "" },
            );
        }
    }
}

impl Default for IntervalStore {
    fn default() -> Self {
        Self::new()
    }
}
