//! Caller-authored descriptors
//!
//! Everything in this module is plain data owned by the application:
//! - [`Buffer`] / [`Texture`]: shape descriptors plus pending-write queues
//! - [`Sampler`]: sampler state, normalised before keying
//! - [`BindingResources`]: name → resource maps for bind groups
//! - [`RenderPipeline`] / [`ComputePipeline`]: pipeline descriptors
//! - [`UniformValue`]: host-side values for uniform/storage bindings
//!
//! All of them are wrapped in [`Tracked`], which is how the caches observe
//! changes.

pub mod binding;
pub mod buffer;
pub mod pipeline;
pub mod sampler;
pub mod texture;
pub mod tracked;
pub mod value;

pub use binding::{BindingResource, BindingResources, Bindings, BufferBinding, TextureBinding};
pub use buffer::{Buffer, BufferDescriptor, BufferWrite, COPY_ALIGNMENT, align_to_copy};
pub use pipeline::{
    ColorTarget, ComputePipeline, ComputePipelineDescriptor, DepthState, FragmentState,
    RenderPipeline, RenderPipelineDescriptor, ShaderStage, VertexBufferLayout,
};
pub use sampler::{Sampler, SamplerDescriptor, SamplerKey};
pub use texture::{Texture, TextureDescriptor, TextureViewDescriptor, TextureWrite};
pub use tracked::{Liveness, MutGuard, ResourceId, Stamp, Tracked};
pub use value::{FieldPath, PathSegment, UniformValue};
