//! Strongly-typed pipeline cache keys.
//!
//! A pipeline slot is addressed by *who* asked for it ([`RenderPipelineSlot`]:
//! descriptor id, target formats, strip index format) and validated by *what*
//! it was built from ([`RenderPipelineState`]: shader modules, layout, vertex
//! layouts and every fixed-function state). The state key is hashed with
//! [`fx_hash_key`] into the slot fingerprint, so editing any field of the
//! descriptor rebuilds exactly that slot.
//!
//! `wgpu` state types implement `Hash`/`Eq` (float fields hash by bits), so
//! they are embedded directly.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::backend::{PipelineLayoutId, ShaderModuleId};
use crate::graph::RenderPassFormat;
use crate::resources::pipeline::VertexBufferLayout;
use crate::resources::tracked::ResourceId;

// ─── Slot Keys ────────────────────────────────────────────────────────────────

/// Identity of a render pipeline slot.
///
/// The same descriptor drawn into passes with different target formats, or
/// with different strip index formats, needs distinct pipeline objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPipelineSlot {
    pub pipeline: ResourceId,
    /// Target formats with the attachment size cleared.
    pub format: RenderPassFormat,
    pub strip_index_format: Option<wgpu::IndexFormat>,
}

// ─── State Keys ───────────────────────────────────────────────────────────────

/// Hashable view of one vertex buffer layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayoutKey {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: SmallVec<[wgpu::VertexAttribute; 4]>,
}

impl From<&VertexBufferLayout> for VertexLayoutKey {
    fn from(layout: &VertexBufferLayout) -> Self {
        Self {
            array_stride: layout.array_stride,
            step_mode: layout.step_mode,
            attributes: layout.attributes.iter().copied().collect(),
        }
    }
}

/// Everything a render pipeline object is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPipelineState {
    pub vertex_module: ShaderModuleId,
    pub vertex_entry: String,
    pub fragment: Option<(ShaderModuleId, String)>,
    pub layout: PipelineLayoutId,
    pub vertex_buffers: SmallVec<[VertexLayoutKey; 2]>,
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub multisample: wgpu::MultisampleState,
    pub targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]>,
}

/// Everything a compute pipeline object is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineState {
    pub module: ShaderModuleId,
    pub entry: String,
    pub layout: PipelineLayoutId,
}

// ─── Convenience helpers ──────────────────────────────────────────────────────

/// Compute a `u64` hash of any `Hash`-able value using `FxHasher`.
#[inline]
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}
