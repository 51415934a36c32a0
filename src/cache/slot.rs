//! Identity-keyed cache slots
//!
//! A [`SlotCache`] maps a key (an identity tuple) to one cached GPU object.
//! Each slot remembers:
//!
//! - a **fingerprint** of every input the object was built from (descriptor
//!   generations, physical ids of dependencies). A lookup with a different
//!   fingerprint destroys the old object *before* building the new one.
//! - the **owner** liveness token. Slots whose owner has been dropped are
//!   destroyed by [`SlotCache::sweep`].
//! - the frame the slot was **last used**, for idle eviction of entries
//!   without an owner. An ownerless entry is never idle while a live slot
//!   lists it among its [`GpuObject::dependencies`].

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};

use crate::backend::{
    BindGroupId, BindGroupLayoutId, BufferId, ComputePipelineId, GpuBackend, GpuHandle,
    PipelineLayoutId, QuerySetId, RenderBundleId, RenderPipelineId, SamplerId, ShaderModuleId,
    TextureId, TextureViewId,
};
use crate::cache::stats::CacheStats;
use crate::commands::RenderCommand;
use crate::errors::Result;
use crate::resources::tracked::Liveness;

/// A cached value and the backend objects it owns.
pub trait GpuObject: Clone {
    /// Objects destroyed together with the slot.
    fn handles(&self) -> SmallVec<[GpuHandle; 2]>;

    /// Shared objects this value was built from.
    fn dependencies(&self) -> SmallVec<[GpuHandle; 4]> {
        SmallVec::new()
    }
}

macro_rules! impl_single_handle {
    ($($id:ty),* $(,)?) => {
        $(impl GpuObject for $id {
            fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
                smallvec![GpuHandle::from(*self)]
            }
        })*
    };
}

impl_single_handle!(
    ShaderModuleId,
    BufferId,
    TextureId,
    TextureViewId,
    SamplerId,
    BindGroupLayoutId,
    PipelineLayoutId,
    BindGroupId,
    RenderPipelineId,
    ComputePipelineId,
    QuerySetId,
    RenderBundleId,
);

/// Recorded command lists own nothing on the device.
impl GpuObject for Arc<[RenderCommand]> {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        SmallVec::new()
    }
}

/// Result of an ensure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureResult<H> {
    pub handle: H,
    /// Whether the object was just created or rebuilt.
    pub was_recreated: bool,
}

impl<H> EnsureResult<H> {
    #[inline]
    #[must_use]
    pub fn existing(handle: H) -> Self {
        Self {
            handle,
            was_recreated: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn created(handle: H) -> Self {
        Self {
            handle,
            was_recreated: true,
        }
    }
}

struct Slot<H> {
    value: H,
    fingerprint: u64,
    owner: Liveness,
    last_used: u64,
}

/// One cache table.
pub struct SlotCache<K, H> {
    name: &'static str,
    slots: FxHashMap<K, Slot<H>>,
    stats: CacheStats,
}

impl<K, H> SlotCache<K, H>
where
    K: Eq + Hash + Clone + Debug,
    H: GpuObject,
{
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: FxHashMap::default(),
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the cached value for `key` if its fingerprint still matches.
    #[must_use]
    pub fn peek(&self, key: &K, fingerprint: u64) -> Option<&H> {
        self.slots
            .get(key)
            .filter(|slot| slot.fingerprint == fingerprint)
            .map(|slot| &slot.value)
    }

    /// Returns a clone of the value cached under `key` when its fingerprint
    /// still matches, counting the hit and marking the slot used.
    pub fn get(&mut self, key: &K, fingerprint: u64, frame: u64) -> Option<H> {
        let slot = self.slots.get_mut(key).filter(|slot| slot.fingerprint == fingerprint)?;
        slot.last_used = frame;
        self.stats.hits += 1;
        Some(slot.value.clone())
    }

    /// Mutable access to a cached value, without touching statistics.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut H> {
        self.slots.get_mut(key).map(|slot| &mut slot.value)
    }

    /// Returns the value cached under `key`, building it with `create` on a
    /// miss or when `fingerprint` changed.
    ///
    /// On a fingerprint change the previous value's objects are destroyed
    /// before `create` runs. If `create` fails the slot is left empty.
    pub fn get_or_create<B, F>(
        &mut self,
        backend: &mut B,
        key: K,
        fingerprint: u64,
        owner: Liveness,
        frame: u64,
        create: F,
    ) -> Result<EnsureResult<H>>
    where
        B: GpuBackend + ?Sized,
        F: FnOnce(&mut B) -> Result<H>,
    {
        if let Some(slot) = self.slots.get_mut(&key) {
            if slot.fingerprint == fingerprint {
                slot.last_used = frame;
                self.stats.hits += 1;
                log::trace!("{} cache hit: {key:?}", self.name);
                return Ok(EnsureResult::existing(slot.value.clone()));
            }
            if let Some(stale) = self.slots.remove(&key) {
                for handle in stale.value.handles() {
                    backend.destroy(handle);
                }
            }
            self.stats.recreations += 1;
            log::debug!("{} cache recreate: {key:?}", self.name);
        } else {
            self.stats.misses += 1;
            log::debug!("{} cache miss: {key:?}", self.name);
        }

        let value = create(backend)?;
        self.slots.insert(
            key,
            Slot {
                value: value.clone(),
                fingerprint,
                owner,
                last_used: frame,
            },
        );
        Ok(EnsureResult::created(value))
    }

    /// Destroys and forgets the slot under `key`.
    pub fn remove<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, key: &K) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                for handle in slot.value.handles() {
                    backend.destroy(handle);
                }
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }

    /// Destroys slots whose owner is gone, and slots without an owner that
    /// have not been used for more than `max_idle` frames.
    ///
    /// Returns the number of evicted slots.
    pub fn sweep<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, frame: u64, max_idle: Option<u64>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, slot| {
            let idle = !slot.owner.is_owned()
                && max_idle.is_some_and(|max| frame.saturating_sub(slot.last_used) > max);
            let keep = slot.owner.is_alive() && !idle;
            if !keep {
                log::debug!("{} cache evict: {key:?}", self.name);
                for handle in slot.value.handles() {
                    backend.destroy(handle);
                }
            }
            keep
        });
        let evicted = before - self.slots.len();
        self.stats.evictions += evicted as u64;
        evicted
    }

    /// Adds the dependencies of every slot to `out`.
    pub fn collect_dependencies(&self, out: &mut FxHashSet<GpuHandle>) {
        for slot in self.slots.values() {
            out.extend(slot.value.dependencies());
        }
    }

    /// Marks every slot holding one of `pinned` as used in `frame`.
    pub fn pin(&mut self, pinned: &FxHashSet<GpuHandle>, frame: u64) {
        for slot in self.slots.values_mut() {
            if slot.value.handles().iter().any(|handle| pinned.contains(handle)) {
                slot.last_used = frame;
            }
        }
    }

    /// Destroys every slot.
    pub fn destroy_all<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, slot) in self.slots.drain() {
            for handle in slot.value.handles() {
                backend.destroy(handle);
            }
        }
    }

    /// Forgets every slot without destroying anything (the device is gone).
    pub fn forget_all(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
