//! Query sets and their read-back buffers
//!
//! Each pass that measures something owns one query set per [`QueryKind`],
//! plus a pair of buffers: one the set resolves into, one mapped for the
//! CPU to read. A pass whose previous read-back is still mapping skips its
//! copy for that frame instead of stalling.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use smallvec::{SmallVec, smallvec};

use crate::backend::{BufferId, GpuBackend, GpuBufferDescriptor, GpuHandle, QuerySetId};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::slot::GpuObject;
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::resources::buffer::align_to_copy;
use crate::resources::tracked::{Liveness, ResourceId};

/// Size in bytes of one resolved query value.
pub const QUERY_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Occlusion,
    Timestamp,
}

impl QueryKind {
    #[must_use]
    pub fn query_type(self) -> wgpu::QueryType {
        match self {
            Self::Occlusion => wgpu::QueryType::Occlusion,
            Self::Timestamp => wgpu::QueryType::Timestamp,
        }
    }
}

/// `(pass id, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub pass: ResourceId,
    pub kind: QueryKind,
}

/// Resolve target and mappable copy of one query set.
#[derive(Debug, Clone)]
pub struct QueryBuffers {
    pub resolve: BufferId,
    pub readback: BufferId,
    pub size: u64,
    /// Set while `readback` is being mapped.
    pub in_flight: Arc<AtomicBool>,
}

impl GpuObject for QueryBuffers {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::Buffer(self.resolve), GpuHandle::Buffer(self.readback)]
    }
}

impl ResourceCache {
    /// Query set of `count` queries owned by a pass.
    pub fn query_set<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: QueryKey,
        owner: Liveness,
        count: u32,
    ) -> Result<QuerySetId> {
        if count == 0 {
            return Err(StratumError::Validation("query set with no queries".to_string()));
        }
        let label = self.settings.label("QuerySet", Some(&format!("{:?}", key.kind)));
        let ty = key.kind.query_type();
        self.query_sets
            .get_or_create(backend, key, u64::from(count), owner, self.frame, |backend| {
                backend.create_query_set(&label, ty, count)
            })
            .map(|r| r.handle)
    }

    /// Resolve and read-back buffers sized for `count` queries.
    pub fn query_buffers<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: QueryKey,
        owner: Liveness,
        count: u32,
    ) -> Result<QueryBuffers> {
        let size = align_to_copy(u64::from(count) * QUERY_SIZE);
        let fingerprint = Fingerprint::new().push(&size).finish();
        let resolve_label = self.settings.label("QueryResolve", Some(&format!("{:?}", key.kind)));
        let readback_label = self.settings.label("QueryReadback", Some(&format!("{:?}", key.kind)));
        self.query_buffers
            .get_or_create(backend, key, fingerprint, owner, self.frame, |backend| {
                let resolve = backend.create_buffer(&GpuBufferDescriptor {
                    label: resolve_label,
                    size,
                    usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                    contents: None,
                })?;
                let readback = match backend.create_buffer(&GpuBufferDescriptor {
                    label: readback_label,
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    contents: None,
                }) {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        backend.destroy(GpuHandle::Buffer(resolve));
                        return Err(err);
                    }
                };
                Ok(QueryBuffers {
                    resolve,
                    readback,
                    size,
                    in_flight: Arc::new(AtomicBool::new(false)),
                })
            })
            .map(|r| r.handle)
    }
}
