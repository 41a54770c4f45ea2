//! Frame granule arithmetic.
//!
//! Mappings are tracked at a fixed 64 KiB granule so that one bookkeeping
//! scheme works even on targets whose native API allocates and releases
//! whole mappings at that granularity.

/// log2 of the tracking granule.
pub const FRAME_SHIFT: u32 = 16;

/// Size in bytes of one tracked frame (64 KiB).
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;

/// Number of frames spanned by the inclusive range `[x, y]`.
pub fn span(x: u64, y: u64) -> u64 {
    debug_assert!(y >= x);
    y - x + 1
}

/// Whether `size` bytes over `[x, y]` back every frame completely.
///
/// A partially-backed final frame records an exact byte count that folding
/// the interval into a neighbour would silently lose, so only fully backed
/// spans may take part in coalescing.
pub fn is_fully_backed(x: u64, y: u64, size: u64) -> bool {
    size == span(x, y) * FRAME_SIZE
}

/// Whether `size` is a legal byte length for `[x, y]`: every frame but the
/// last fully backed, the last backed by at least one byte.
pub fn size_is_valid(x: u64, y: u64, size: u64) -> bool {
    if y < x {
        return false;
    }
    let whole = (y - x) * FRAME_SIZE;
    size > whole && size <= whole + FRAME_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span() {
        assert_eq!(span(10, 10), 1);
        assert_eq!(span(10, 13), 4);
    }

    #[test]
    fn test_is_fully_backed() {
        assert!(is_fully_backed(10, 10, FRAME_SIZE));
        assert!(is_fully_backed(10, 12, 3 * FRAME_SIZE));
        // One byte short or long must not count as fully backed.
        assert!(!is_fully_backed(10, 10, FRAME_SIZE - 1));
        assert!(!is_fully_backed(10, 10, FRAME_SIZE + 1));
        assert!(!is_fully_backed(10, 12, 2 * FRAME_SIZE + 1));
    }

    #[test]
    fn test_size_is_valid() {
        assert!(size_is_valid(10, 10, 1));
        assert!(size_is_valid(10, 10, FRAME_SIZE));
        assert!(!size_is_valid(10, 10, 0));
        assert!(!size_is_valid(10, 10, FRAME_SIZE + 1));

        assert!(size_is_valid(10, 11, FRAME_SIZE + 1));
        assert!(size_is_valid(10, 11, 2 * FRAME_SIZE));
        assert!(!size_is_valid(10, 11, FRAME_SIZE));
        assert!(!size_is_valid(11, 10, FRAME_SIZE));
    }
}
