#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod cache;
pub mod commands;
pub mod device;
pub mod errors;
pub mod graph;
pub mod reflection;
pub mod resources;
pub mod settings;

pub use backend::{DummyBackend, GpuBackend, WgpuBackend, WgpuBackendOptions};
pub use cache::{CacheStats, DeviceStats};
pub use commands::{ComputeStateTracker, RenderCommand, RenderStateTracker};
pub use device::DeviceContext;
pub use errors::{Result, StratumError};
pub use graph::{
    Callback, ColorAttachment, CommandEncoder, ComputeObject, ComputeObjectDescriptor, ComputePass,
    ComputePassDescriptor, CopyBufferToBuffer, CopyTextureToTexture, DepthStencilAttachment, DrawCall,
    OcclusionQuery, Pass, RenderBundle, RenderBundleDescriptor, RenderObject, RenderObjectDescriptor,
    RenderPass, RenderPassDescriptor, RenderPassFormat, RenderPassObject, ScissorRect, Submit,
    TextureCopy, Viewport, Workgroups,
};
pub use reflection::{ReflectionInfo, encode_value, encode_value_over, merge_stages_layout, reflect};
pub use resources::{
    BindingResource, BindingResources, Bindings, Buffer, ComputePipeline, ComputePipelineDescriptor,
    RenderPipeline, RenderPipelineDescriptor, Sampler, SamplerDescriptor, Texture, TextureDescriptor,
    Tracked, UniformValue,
};
pub use settings::Settings;
