//! Shared test support: interval constructors and a deterministic
//! generator for the operation fuzzers. The backing mapper itself lives in
//! the crate's `testing` module so unit and integration tests share one.

pub use memtrack::testing::ArenaMapper;
use memtrack::{Handle, Interval, MapFlags, Protection};

pub const FRAME_SIZE: u64 = memtrack::frame::FRAME_SIZE;

/// Fully backed anonymous read-write interval over `[x, y]`.
pub fn anon(x: u64, y: u64) -> Interval {
    Interval {
        x,
        y,
        size: (y - x + 1) * FRAME_SIZE,
        handle: Handle::ANONYMOUS,
        prot: Protection::READ.union(Protection::WRITE),
        flags: MapFlags::PRIVATE.union(MapFlags::ANONYMOUS),
        offset: 0,
        is_cow: false,
        read_only_file: false,
    }
}

/// Small deterministic generator for the operation fuzzers.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}
