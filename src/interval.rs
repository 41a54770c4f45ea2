//! Tracked mapping intervals and their attributes.
//!
//! One `Interval` mirrors one contiguous mapping the process holds. The
//! attribute types are deliberately thin wrappers over the wire bits so the
//! store can compare them without caring what the target OS calls them.

use crate::frame::{is_fully_backed, FRAME_SIZE};

/// Memory protection flags (PROT_* shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection(u32);

impl Protection {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const EXEC: Self = Self(4);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x7)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Memory mapping flags (MAP_* shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags(u32);

impl MapFlags {
    pub const SHARED: Self = Self(0x01);
    pub const PRIVATE: Self = Self(0x02);
    pub const FIXED: Self = Self(0x10);
    pub const ANONYMOUS: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x33)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Opaque native mapping reference.
///
/// The store never dereferences a handle; it only compares them to decide
/// mergeability and hands them to the platform finalizer on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(i64);

impl Handle {
    /// Sentinel for mappings with no native object behind them.
    pub const ANONYMOUS: Self = Self(-1);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i64 {
        self.0
    }

    pub fn is_anonymous(&self) -> bool {
        *self == Self::ANONYMOUS
    }
}

/// One contiguous tracked mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// First frame index (inclusive).
    pub x: u64,
    /// Last frame index (inclusive). Always `>= x`.
    pub y: u64,
    /// Bytes actually backed; only the final frame may be partial.
    pub size: u64,
    /// Native mapping reference, or [`Handle::ANONYMOUS`].
    pub handle: Handle,
    pub prot: Protection,
    pub flags: MapFlags,
    /// Byte offset into the native object at frame `x`.
    pub offset: u64,
    /// Copy-on-write view of the native object.
    pub is_cow: bool,
    /// Backed by a file opened read-only.
    pub read_only_file: bool,
}

impl Interval {
    pub(crate) const EMPTY: Self = Self {
        x: 0,
        y: 0,
        size: 0,
        handle: Handle::ANONYMOUS,
        prot: Protection::NONE,
        flags: MapFlags::empty(),
        offset: 0,
        is_cow: false,
        read_only_file: false,
    };

    /// Check if this interval covers the given frame.
    pub fn contains(&self, frame: u64) -> bool {
        self.x <= frame && frame <= self.y
    }

    /// Number of frames this interval spans.
    pub fn frames(&self) -> u64 {
        self.y - self.x + 1
    }

    /// Whole byte span of the frames, ignoring the partial tail.
    pub fn frame_bytes(&self) -> u64 {
        self.frames() * FRAME_SIZE
    }

    /// Whether every frame, including the last, is completely backed.
    pub fn is_fully_backed(&self) -> bool {
        is_fully_backed(self.x, self.y, self.size)
    }

    /// Whether `other` could be folded onto the end of `self`: it must
    /// start on the very next frame, carry the same handle, protection and
    /// flags, and `self` must not end in a partially-backed frame.
    pub(crate) fn can_extend_with(&self, other: &Interval) -> bool {
        self.y + 1 == other.x
            && self.handle == other.handle
            && self.prot == other.prot
            && self.flags == other.flags
            && self.is_fully_backed()
    }
}
