//! Monotonic generation counters.
//!
//! Generations order local writes against the same entity and identify
//! session epochs. A write acknowledgement carrying a generation at or below
//! the last folded one is stale and must be discarded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in a monotonically increasing sequence.
///
/// Generations compare by value only; two counters never share a sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// The generation preceding every issued one.
    pub const ZERO: Generation = Generation(0);

    /// Create a generation with an explicit value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// The generation immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check if this generation was issued strictly after `other`.
    pub fn is_newer_than(self, other: Generation) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Issues strictly increasing generations.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Generation,
}

impl GenerationCounter {
    /// Create a counter starting at [`Generation::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The last issued generation.
    pub fn current(&self) -> Generation {
        self.current
    }

    /// Advance the counter and return the new generation.
    pub fn tick(&mut self) -> Generation {
        self.current = self.current.next();
        self.current
    }

    /// Make sure future ticks are issued after `seen`.
    pub fn observe(&mut self, seen: Generation) {
        self.current = self.current.max(seen);
    }
}
