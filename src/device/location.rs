//! Memory residency flags
//!
//! A [`Location`] is a small flag set: `HOST`, `DEVICE`, their union `ALL`,
//! and `DEFAULT` which resolves to whatever a buffer is already allocated at.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Residency flag set (host, device, or both)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location(u8);

impl Location {
    /// No residency
    pub const NONE: Self = Self(0);
    /// Host memory
    pub const HOST: Self = Self(0b001);
    /// Memory of the currently bound accelerator
    pub const DEVICE: Self = Self(0b010);
    /// Host and device
    pub const ALL: Self = Self(0b011);
    /// Resolve to the buffer's current allocation
    pub const DEFAULT: Self = Self(0b100);

    /// True if every flag of `other` is set in `self`
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True if any flag is shared
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if no residency flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    /// `self` with the flags of `other` cleared
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Replace `DEFAULT` with `fallback`; other values pass through
    #[must_use]
    pub const fn resolve(self, fallback: Self) -> Self {
        if self.0 & Self::DEFAULT.0 != 0 {
            Self(fallback.0 & Self::ALL.0)
        } else {
            self
        }
    }

    /// Iterate the concrete sides (`HOST` then `DEVICE`)
    pub fn sides(self) -> impl Iterator<Item = Self> {
        [Self::HOST, Self::DEVICE]
            .into_iter()
            .filter(move |side| self.contains(*side))
    }
}

impl BitOr for Location {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Location {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "none",
            Self::HOST => "host",
            Self::DEVICE => "device",
            Self::ALL => "all",
            _ => "default",
        };
        f.write_str(name)
    }
}
