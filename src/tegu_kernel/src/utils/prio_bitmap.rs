//! Provides `PrioBitmap`, a one-word bit array supporting a constant-time
//! highest-set-bit scan.
//!
//! One bit per priority level, which caps the kernel at 32 levels. The scan
//! compiles down to a single count-leading-zeros instruction on targets that
//! have one; ports expose the same operation through
//! [`Port::count_leading_zeros`](crate::Port::count_leading_zeros).
use core::fmt;

/// The maximum bit count supported by [`PrioBitmap`].
pub(crate) const PRIO_BITMAP_LEN: usize = 32;

/// A bit array with one bit per priority level.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PrioBitmap {
    bits: u32,
}

impl PrioBitmap {
    pub(crate) const fn new() -> Self {
        Self { bits: 0 }
    }

    pub(crate) fn get(&self, i: usize) -> bool {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits & (1 << i) != 0
    }

    pub(crate) fn set(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits |= 1 << i;
    }

    pub(crate) fn clear(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits &= !(1 << i);
    }

    /// The raw word, for scanning through a port's count-leading-zeros
    /// primitive.
    pub(crate) fn word(&self) -> u32 {
        self.bits
    }

    /// Get the position of the highest set bit.
    pub(crate) fn find_highest_set(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some((31 - self.bits.leading_zeros()) as usize)
        }
    }
}

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries((0..PRIO_BITMAP_LEN).filter(|&i| self.get(i)))
            .finish()
    }
}
