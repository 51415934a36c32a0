//! Fingerprints of cache inputs
//!
//! A fingerprint collapses every input a cached object was built from into a
//! single `u64`: descriptor stamps, physical ids of dependencies, derived
//! formats. Two fingerprints differ whenever any input differs, so a slot
//! lookup with a new fingerprint means "rebuild".

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::resources::tracked::Stamp;

/// Incremental fingerprint builder.
#[derive(Default)]
pub struct Fingerprint {
    hasher: FxHasher,
}

impl Fingerprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixes one input in.
    #[inline]
    pub fn push<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash(&mut self.hasher);
        self
    }

    #[inline]
    pub fn push_stamp(&mut self, stamp: Stamp) -> &mut Self {
        self.push(&stamp)
    }

    /// Mixes in an optional input, distinguishing `None` from any value.
    #[inline]
    pub fn push_optional<T: Hash>(&mut self, value: Option<&T>) -> &mut Self {
        self.push(&value.is_some());
        if let Some(value) = value {
            self.push(value);
        }
        self
    }

    #[must_use]
    pub fn finish(&self) -> u64 {
        self.hasher.finish()
    }
}
