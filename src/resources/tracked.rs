//! Versioned descriptor wrapper
//!
//! Every caller-authored descriptor lives inside a [`Tracked<T>`]. The wrapper
//! gives it three things the caches rely on:
//!
//! 1. **Identity**: a process-unique [`ResourceId`] that never changes for the
//!    lifetime of the descriptor, shared by all clones.
//! 2. **Generation**: a counter bumped whenever a [`MutGuard`] obtained from
//!    [`Tracked::write`] is dropped. Cache lookups compare generations (or the
//!    content they guard) instead of subscribing to individual fields.
//! 3. **Liveness**: a [`Liveness`] token the caches keep so they can destroy
//!    derived GPU objects once the last clone of the descriptor is dropped.
//!
//! Mutating a descriptor through any other path is not possible: the value is
//! only reachable through the read and write guards.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-unique identifier of a tracked descriptor.
pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh [`ResourceId`].
#[inline]
pub fn next_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// `(id, generation)` pair identifying one snapshot of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp {
    pub id: ResourceId,
    pub version: u64,
}

/// Weak liveness token of a tracked descriptor.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Option<Weak<()>>);

impl Liveness {
    /// A token that is always alive (for entries without an owner).
    #[must_use]
    pub fn detached() -> Self {
        Self(None)
    }

    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.as_ref().is_none_or(|weak| weak.strong_count() > 0)
    }

    #[inline]
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.0.is_some()
    }
}

struct TrackedInner<T> {
    id: ResourceId,
    version: AtomicU64,
    value: RwLock<T>,
    token: Arc<()>,
}

/// Shared, versioned descriptor.
///
/// Cloning is cheap and yields another handle to the same descriptor.
pub struct Tracked<T> {
    inner: Arc<TrackedInner<T>>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("id", &self.inner.id)
            .field("version", &self.version())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> Tracked<T> {
    /// Wraps a descriptor and assigns it a new id.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(TrackedInner {
                id: next_resource_id(),
                version: AtomicU64::new(0),
                value: RwLock::new(value),
                token: Arc::new(()),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Current generation.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp {
            id: self.id(),
            version: self.version(),
        }
    }

    #[must_use]
    pub fn liveness(&self) -> Liveness {
        Liveness(Some(Arc::downgrade(&self.inner.token)))
    }

    /// Read access. Does not change the generation.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read()
    }

    /// Write access. The generation is bumped when the guard drops.
    pub fn write(&self) -> MutGuard<'_, T> {
        MutGuard {
            guard: self.inner.value.write(),
            version: &self.inner.version,
        }
    }

    /// Replaces the whole descriptor.
    pub fn set(&self, value: T) {
        *self.write() = value;
    }

    /// Bumps the generation without touching the value.
    pub fn touch(&self) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Default> Default for Tracked<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Mutable guard - bumps the descriptor generation when the scope ends.
pub struct MutGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    version: &'a AtomicU64,
}

impl<T> std::ops::Deref for MutGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for MutGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> Drop for MutGuard<'_, T> {
    fn drop(&mut self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
