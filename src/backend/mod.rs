//! GPU backend abstraction layer.
//!
//! The caches and the graph executor never talk to a GPU API directly. They
//! go through [`GpuBackend`], which exposes:
//! - Object creation and destruction, addressed by typed slot-map handles
//! - Queue writes and submission of recorded encoders
//! - Buffer read-back through one-shot callbacks
//! - Device status polling and re-acquisition after loss
//!
//! # Available Backends
//!
//! - [`WgpuBackend`]: drives a real `wgpu::Device`
//! - [`DummyBackend`]: allocates nothing on a GPU; simulates buffer contents
//!   and query results and records every call, for tests and headless use
//!
//! Handles are generational, so a handle that outlives its object (or its
//! device) never aliases a newer one.

pub mod dummy;
pub mod wgpu_backend;

use std::sync::Arc;

use crate::commands::{RecordedEncoder, RenderCommand};
use crate::errors::Result;
use crate::resources::pipeline::VertexBufferLayout;
use crate::resources::sampler::SamplerKey;
use crate::resources::texture::{TextureViewDescriptor, TextureWrite};

pub use dummy::DummyBackend;
pub use wgpu_backend::{WgpuBackend, WgpuBackendOptions};

slotmap::new_key_type! {
    pub struct ShaderModuleId;
    pub struct BufferId;
    pub struct TextureId;
    pub struct TextureViewId;
    pub struct SamplerId;
    pub struct BindGroupLayoutId;
    pub struct PipelineLayoutId;
    pub struct BindGroupId;
    pub struct RenderPipelineId;
    pub struct ComputePipelineId;
    pub struct QuerySetId;
    pub struct RenderBundleId;
}

/// Any backend object, for destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuHandle {
    ShaderModule(ShaderModuleId),
    Buffer(BufferId),
    Texture(TextureId),
    TextureView(TextureViewId),
    Sampler(SamplerId),
    BindGroupLayout(BindGroupLayoutId),
    PipelineLayout(PipelineLayoutId),
    BindGroup(BindGroupId),
    RenderPipeline(RenderPipelineId),
    ComputePipeline(ComputePipelineId),
    QuerySet(QuerySetId),
    RenderBundle(RenderBundleId),
}

impl GpuHandle {
    /// Object kind, for statistics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShaderModule(_) => "shader_module",
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
            Self::TextureView(_) => "texture_view",
            Self::Sampler(_) => "sampler",
            Self::BindGroupLayout(_) => "bind_group_layout",
            Self::PipelineLayout(_) => "pipeline_layout",
            Self::BindGroup(_) => "bind_group",
            Self::RenderPipeline(_) => "render_pipeline",
            Self::ComputePipeline(_) => "compute_pipeline",
            Self::QuerySet(_) => "query_set",
            Self::RenderBundle(_) => "render_bundle",
        }
    }
}

macro_rules! impl_handle_from {
    ($($id:ident => $variant:ident),* $(,)?) => {
        $(impl From<$id> for GpuHandle {
            fn from(id: $id) -> Self {
                Self::$variant(id)
            }
        })*
    };
}

impl_handle_from!(
    ShaderModuleId => ShaderModule,
    BufferId => Buffer,
    TextureId => Texture,
    TextureViewId => TextureView,
    SamplerId => Sampler,
    BindGroupLayoutId => BindGroupLayout,
    PipelineLayoutId => PipelineLayout,
    BindGroupId => BindGroup,
    RenderPipelineId => RenderPipeline,
    ComputePipelineId => ComputePipeline,
    QuerySetId => QuerySet,
    RenderBundleId => RenderBundle,
);

// ─── Creation Descriptors ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GpuBufferDescriptor {
    pub label: String,
    /// Already rounded up to the copy alignment.
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    /// Contents written through map-on-create.
    pub contents: Option<Arc<[u8]>>,
}

#[derive(Debug, Clone)]
pub struct GpuTextureDescriptor {
    pub label: String,
    pub size: wgpu::Extent3d,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: wgpu::TextureDimension,
    pub usage: wgpu::TextureUsages,
    pub view_formats: Vec<wgpu::TextureFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBindingResource {
    Buffer {
        buffer: BufferId,
        offset: u64,
        size: Option<u64>,
    },
    TextureView(TextureViewId),
    Sampler(SamplerId),
}

#[derive(Debug, Clone)]
pub struct GpuBindGroupDescriptor {
    pub label: String,
    pub layout: BindGroupLayoutId,
    /// `(binding, resource)` pairs in binding order.
    pub entries: Vec<(u32, GpuBindingResource)>,
}

/// Shader module plus entry point of one stage.
#[derive(Debug, Clone)]
pub struct GpuProgrammableStage {
    pub module: ShaderModuleId,
    pub entry_point: String,
}

#[derive(Debug, Clone)]
pub struct GpuFragmentState {
    pub stage: GpuProgrammableStage,
    pub targets: Vec<Option<wgpu::ColorTargetState>>,
}

#[derive(Debug, Clone)]
pub struct GpuRenderPipelineDescriptor {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub vertex: GpuProgrammableStage,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub fragment: Option<GpuFragmentState>,
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub multisample: wgpu::MultisampleState,
}

#[derive(Debug, Clone)]
pub struct GpuComputePipelineDescriptor {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub stage: GpuProgrammableStage,
}

#[derive(Debug, Clone)]
pub struct GpuRenderBundleDescriptor<'a> {
    pub label: String,
    pub color_formats: Vec<Option<wgpu::TextureFormat>>,
    pub depth_stencil_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
    pub commands: &'a [RenderCommand],
}

// ─── Device Status ────────────────────────────────────────────────────────────

/// Result of [`GpuBackend::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    Lost {
        reason: String,
        /// The loss was caused by [`GpuBackend::destroy_device`].
        requested: bool,
    },
}

/// One-shot continuation of a buffer read-back.
pub type MapCallback = Box<dyn FnOnce(Result<Vec<u8>>)>;

/// The operations the caches and the graph executor need from a device.
///
/// All creation calls may fail; failures surface as
/// [`StratumError::ResourceCreationFailed`](crate::StratumError::ResourceCreationFailed).
pub trait GpuBackend {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Features enabled on the current device.
    fn features(&self) -> wgpu::Features;

    /// Nanoseconds per timestamp tick.
    fn timestamp_period(&self) -> f32;

    fn create_shader_module(&mut self, label: &str, source: &str) -> Result<ShaderModuleId>;
    fn create_buffer(&mut self, desc: &GpuBufferDescriptor) -> Result<BufferId>;
    fn create_texture(&mut self, desc: &GpuTextureDescriptor) -> Result<TextureId>;
    fn create_texture_view(
        &mut self,
        texture: TextureId,
        label: &str,
        desc: &TextureViewDescriptor,
    ) -> Result<TextureViewId>;
    fn create_sampler(&mut self, label: &str, desc: &SamplerKey) -> Result<SamplerId>;
    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<BindGroupLayoutId>;
    fn create_pipeline_layout(
        &mut self,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId>;
    fn create_bind_group(&mut self, desc: &GpuBindGroupDescriptor) -> Result<BindGroupId>;
    fn create_render_pipeline(&mut self, desc: &GpuRenderPipelineDescriptor) -> Result<RenderPipelineId>;
    fn create_compute_pipeline(&mut self, desc: &GpuComputePipelineDescriptor) -> Result<ComputePipelineId>;
    fn create_query_set(&mut self, label: &str, ty: wgpu::QueryType, count: u32) -> Result<QuerySetId>;
    fn create_render_bundle(&mut self, desc: &GpuRenderBundleDescriptor<'_>) -> Result<RenderBundleId>;

    /// Releases an object. Unknown or stale handles are ignored.
    fn destroy(&mut self, handle: GpuHandle);

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);
    fn write_texture(&mut self, texture: TextureId, write: &TextureWrite);

    /// Replays and submits encoders in order.
    fn submit(&mut self, encoders: &[RecordedEncoder]) -> Result<()>;

    /// Maps `size` bytes of `buffer` for reading. `callback` runs from a later
    /// [`poll`](Self::poll), once the submitted work has finished.
    fn map_read(&mut self, buffer: BufferId, offset: u64, size: u64, callback: MapCallback);

    /// Completes finished map requests and reports device loss.
    fn poll(&mut self) -> DeviceStatus;

    /// Destroys the device on request. Every handle becomes invalid.
    fn destroy_device(&mut self);

    /// Acquires a fresh device after a loss. Every handle becomes invalid.
    fn reacquire(&mut self) -> Result<()>;
}
