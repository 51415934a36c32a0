//! Resource Cache Layer
//!
//! Every GPU object derived from caller descriptors lives in one table of
//! [`ResourceCache`]. A table is a [`SlotCache`]: an identity key (descriptor
//! id, pass format, bind group index...) mapped to one object, validated by a
//! fingerprint of everything the object was built from.
//!
//! # Update Policy
//!
//! Resolution is pull-based. Each `prepare_*` / `*_for` call recomputes the
//! fingerprint from descriptor generations and the physical ids of its
//! dependencies, resolving the dependencies first:
//!
//! ```text
//! render pipeline ─┬─ shader modules ── reflection (memoized by source)
//!                  └─ pipeline layout ── bind group layouts
//! bind group ─────┬─ bind group layout
//!                 └─ buffers / value buffers / texture views / samplers
//! texture view ──── texture
//! ```
//!
//! A recreated dependency gets a new handle, so the fingerprint of every
//! direct dependent changes and exactly those are rebuilt on their next use.
//! Stale objects are destroyed before their replacement is created.
//!
//! # Eviction
//!
//! - **Owned** slots (keyed by a caller descriptor) die with the descriptor:
//!   [`ResourceCache::sweep`] destroys them once the last clone is dropped.
//! - **Content-keyed** slots (shader modules, layouts, samplers) have no
//!   owner and are evicted after `max_idle_frames` frames without use.

pub mod bind_group;
pub mod buffer;
pub mod fingerprint;
pub mod layout;
pub mod pipeline;
pub mod pipeline_key;
pub mod query;
pub mod sampler;
pub mod shader;
pub mod slot;
pub mod stats;
pub mod texture;

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::backend::{
    BindGroupLayoutId, BufferId, GpuBackend, PipelineLayoutId, QuerySetId,
    RenderBundleId, SamplerId, ShaderModuleId, TextureId, TextureViewId,
};
use crate::commands::RenderCommand;
use crate::graph::RenderPassFormat;
use crate::reflection::ReflectionCache;
use crate::resources::sampler::SamplerKey;
use crate::resources::texture::TextureViewDescriptor;
use crate::resources::tracked::ResourceId;
use crate::settings::Settings;

pub use bind_group::{BindGroupKey, CachedBindGroup};
pub use buffer::{ValueBuffer, ValueBufferKey};
pub use fingerprint::Fingerprint;
pub use pipeline::{ResolvedComputePipeline, ResolvedRenderPipeline, validate_vertex_inputs};
pub use pipeline_key::{ComputePipelineState, RenderPipelineSlot, RenderPipelineState, VertexLayoutKey};
pub use query::{QueryBuffers, QueryKey, QueryKind};
pub use shader::{Program, ProgramStage};
pub use slot::{EnsureResult, GpuObject, SlotCache};
pub use stats::{CacheStats, DeviceStats};
pub use texture::{AttachmentKey, AttachmentRole, AutoAttachment};

// ─── Capabilities ─────────────────────────────────────────────────────────────

/// Optional device features, detected once per device.
///
/// A missing feature is reported once per device through
/// [`report_gap`](Self::report_gap) and the work that needs it is skipped.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub features: wgpu::Features,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    reported: FxHashSet<String>,
}

impl Capabilities {
    pub fn detect<B: GpuBackend + ?Sized>(backend: &B) -> Self {
        let caps = Self {
            features: backend.features(),
            timestamp_period: backend.timestamp_period(),
            reported: FxHashSet::default(),
        };
        log::info!(
            "{}: features {:?}, timestamp period {} ns",
            backend.name(),
            caps.features,
            caps.timestamp_period
        );
        caps
    }

    #[inline]
    #[must_use]
    pub fn supports(&self, feature: wgpu::Features) -> bool {
        self.features.contains(feature)
    }

    /// Logs a capability gap the first time `what` is hit on this device.
    ///
    /// Returns `true` when this call logged.
    pub fn report_gap(&mut self, what: &str, consequence: &str) -> bool {
        if self.reported.contains(what) {
            return false;
        }
        log::warn!("Device does not support {what}; {consequence}");
        self.reported.insert(what.to_string());
        true
    }
}

// ─── Resource Cache ───────────────────────────────────────────────────────────

/// All cache tables of one device.
pub struct ResourceCache {
    pub(crate) settings: Settings,
    pub(crate) capabilities: Capabilities,
    /// Index of the frame being recorded.
    pub(crate) frame: u64,
    pub(crate) device_recoveries: u64,

    pub(crate) reflection: ReflectionCache,
    pub(crate) programs: FxHashMap<ResourceId, Arc<Program>>,

    pub(crate) shader_modules: SlotCache<u128, ShaderModuleId>,
    pub(crate) bind_group_layouts: SlotCache<Vec<wgpu::BindGroupLayoutEntry>, BindGroupLayoutId>,
    pub(crate) pipeline_layouts: SlotCache<SmallVec<[BindGroupLayoutId; 4]>, PipelineLayoutId>,
    pub(crate) samplers: SlotCache<SamplerKey, SamplerId>,

    pub(crate) buffers: SlotCache<ResourceId, BufferId>,
    pub(crate) value_buffers: SlotCache<ValueBufferKey, ValueBuffer>,
    pub(crate) textures: SlotCache<ResourceId, TextureId>,
    pub(crate) texture_views: SlotCache<(ResourceId, TextureViewDescriptor), TextureViewId>,
    pub(crate) attachments: SlotCache<AttachmentKey, AutoAttachment>,

    pub(crate) bind_groups: SlotCache<BindGroupKey, CachedBindGroup>,
    pub(crate) render_pipelines: SlotCache<RenderPipelineSlot, ResolvedRenderPipeline>,
    pub(crate) compute_pipelines: SlotCache<ResourceId, ResolvedComputePipeline>,

    pub(crate) query_sets: SlotCache<QueryKey, QuerySetId>,
    pub(crate) query_buffers: SlotCache<QueryKey, QueryBuffers>,
    pub(crate) render_bundles: SlotCache<(ResourceId, RenderPassFormat), RenderBundleId>,
    pub(crate) render_objects: SlotCache<(ResourceId, RenderPassFormat), Arc<[RenderCommand]>>,
}

impl ResourceCache {
    #[must_use]
    pub fn new(settings: Settings, capabilities: Capabilities) -> Self {
        Self {
            settings,
            capabilities,
            frame: 0,
            device_recoveries: 0,
            reflection: ReflectionCache::new(),
            programs: FxHashMap::default(),
            shader_modules: SlotCache::new("shader module"),
            bind_group_layouts: SlotCache::new("bind group layout"),
            pipeline_layouts: SlotCache::new("pipeline layout"),
            samplers: SlotCache::new("sampler"),
            buffers: SlotCache::new("buffer"),
            value_buffers: SlotCache::new("value buffer"),
            textures: SlotCache::new("texture"),
            texture_views: SlotCache::new("texture view"),
            attachments: SlotCache::new("attachment"),
            bind_groups: SlotCache::new("bind group"),
            render_pipelines: SlotCache::new("render pipeline"),
            compute_pipelines: SlotCache::new("compute pipeline"),
            query_sets: SlotCache::new("query set"),
            query_buffers: SlotCache::new("query buffer"),
            render_bundles: SlotCache::new("render bundle"),
            render_objects: SlotCache::new("render object"),
        }
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Changes whenever an object that recorded command lists can reference
    /// (buffers, bind groups, pipelines) is destroyed.
    ///
    /// Cached render-object command lists embed it in their fingerprint, so a
    /// list never outlives a handle it contains.
    #[must_use]
    pub(crate) fn command_epoch(&self) -> u64 {
        [
            self.buffers.stats(),
            self.value_buffers.stats(),
            self.bind_groups.stats(),
            self.render_pipelines.stats(),
        ]
        .iter()
        .map(|s| s.recreations + s.evictions)
        .sum()
    }

    /// Destroys slots of dropped descriptors and idle content-keyed slots.
    pub fn sweep<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) -> usize {
        let frame = self.frame;
        let idle = self.settings.max_idle_frames;

        self.programs.retain(|_, program| program.owner.is_alive());

        let mut evicted = 0;
        evicted += self.render_objects.sweep(backend, frame, idle);
        evicted += self.render_bundles.sweep(backend, frame, idle);
        evicted += self.query_buffers.sweep(backend, frame, idle);
        evicted += self.query_sets.sweep(backend, frame, idle);
        evicted += self.bind_groups.sweep(backend, frame, idle);
        evicted += self.render_pipelines.sweep(backend, frame, idle);
        evicted += self.compute_pipelines.sweep(backend, frame, idle);
        evicted += self.attachments.sweep(backend, frame, idle);
        evicted += self.texture_views.sweep(backend, frame, idle);
        evicted += self.textures.sweep(backend, frame, idle);
        evicted += self.value_buffers.sweep(backend, frame, idle);
        evicted += self.buffers.sweep(backend, frame, idle);

        // Shared objects stay while a surviving pipeline or bind group uses them.
        let mut pinned = FxHashSet::default();
        self.render_pipelines.collect_dependencies(&mut pinned);
        self.compute_pipelines.collect_dependencies(&mut pinned);
        self.bind_groups.collect_dependencies(&mut pinned);
        self.samplers.pin(&pinned, frame);
        self.pipeline_layouts.pin(&pinned, frame);
        self.bind_group_layouts.pin(&pinned, frame);
        self.shader_modules.pin(&pinned, frame);

        evicted += self.samplers.sweep(backend, frame, idle);
        evicted += self.pipeline_layouts.sweep(backend, frame, idle);
        evicted += self.bind_group_layouts.sweep(backend, frame, idle);
        evicted += self.shader_modules.sweep(backend, frame, idle);
        if evicted > 0 {
            log::debug!("Frame {frame}: evicted {evicted} cache entries");
        }
        evicted
    }

    /// Destroys every cached object.
    pub fn destroy_all<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.render_objects.destroy_all(backend);
        self.render_bundles.destroy_all(backend);
        self.query_buffers.destroy_all(backend);
        self.query_sets.destroy_all(backend);
        self.bind_groups.destroy_all(backend);
        self.render_pipelines.destroy_all(backend);
        self.compute_pipelines.destroy_all(backend);
        self.attachments.destroy_all(backend);
        self.texture_views.destroy_all(backend);
        self.textures.destroy_all(backend);
        self.value_buffers.destroy_all(backend);
        self.buffers.destroy_all(backend);
        self.samplers.destroy_all(backend);
        self.pipeline_layouts.destroy_all(backend);
        self.bind_group_layouts.destroy_all(backend);
        self.shader_modules.destroy_all(backend);
    }

    /// Forgets every device object after a device loss.
    ///
    /// Reflection results and derived programs do not depend on the device
    /// and are kept.
    pub fn forget_device_objects(&mut self) {
        self.render_objects.forget_all();
        self.render_bundles.forget_all();
        self.query_buffers.forget_all();
        self.query_sets.forget_all();
        self.bind_groups.forget_all();
        self.render_pipelines.forget_all();
        self.compute_pipelines.forget_all();
        self.attachments.forget_all();
        self.texture_views.forget_all();
        self.textures.forget_all();
        self.value_buffers.forget_all();
        self.buffers.forget_all();
        self.samplers.forget_all();
        self.pipeline_layouts.forget_all();
        self.bind_group_layouts.forget_all();
        self.shader_modules.forget_all();
    }

    /// Per-table statistics.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let (hits, misses) = self.reflection.counters();
        DeviceStats {
            reflections: CacheStats {
                hits,
                misses,
                ..Default::default()
            },
            shader_modules: self.shader_modules.stats(),
            bind_group_layouts: self.bind_group_layouts.stats(),
            pipeline_layouts: self.pipeline_layouts.stats(),
            bind_groups: self.bind_groups.stats(),
            render_pipelines: self.render_pipelines.stats(),
            compute_pipelines: self.compute_pipelines.stats(),
            buffers: self.buffers.stats(),
            value_buffers: self.value_buffers.stats(),
            textures: self.textures.stats(),
            texture_views: self.texture_views.stats(),
            attachments: self.attachments.stats(),
            samplers: self.samplers.stats(),
            query_sets: self.query_sets.stats() + self.query_buffers.stats(),
            render_bundles: self.render_bundles.stats(),
            render_objects: self.render_objects.stats(),
            frames: self.frame,
            device_recoveries: self.device_recoveries,
        }
    }
}
