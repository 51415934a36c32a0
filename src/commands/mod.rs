//! Recorded GPU Commands
//!
//! Passes and bundles are not encoded against the backend directly. They are
//! first recorded as plain command lists:
//!
//! - [`RenderCommand`]: the render pass / render bundle vocabulary
//! - [`ComputeCommand`]: the compute pass vocabulary
//! - [`EncoderCommand`]: passes, copies and query resolves of one encoder
//!
//! The lists are produced by the state trackers in [`tracker`], which drop
//! redundant state changes, and replayed in order by the backend at submit
//! time. Because they are plain data, a render object's list can be cached
//! and replayed across frames.

pub mod tracker;

use std::ops::Range;

use smallvec::SmallVec;

use crate::backend::{
    BindGroupId, BufferId, ComputePipelineId, QuerySetId, RenderBundleId, RenderPipelineId,
    TextureId, TextureViewId,
};

pub use tracker::{ComputeStateTracker, RenderStateTracker, TrackerKind};

/// Dynamic offsets of one `set_bind_group` call.
pub type DynamicOffsets = SmallVec<[u32; 4]>;

/// One command of a render pass or render bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    SetPipeline(RenderPipelineId),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
        offsets: DynamicOffsets,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
        offset: u64,
        /// `None` binds to the end of the buffer.
        size: Option<u64>,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: wgpu::IndexFormat,
        offset: u64,
        size: Option<u64>,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissorRect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetBlendConstant(wgpu::Color),
    SetStencilReference(u32),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    DrawIndirect {
        buffer: BufferId,
        offset: u64,
    },
    DrawIndexedIndirect {
        buffer: BufferId,
        offset: u64,
    },
    BeginOcclusionQuery(u32),
    EndOcclusionQuery,
    ExecuteBundles(SmallVec<[RenderBundleId; 4]>),
}

impl RenderCommand {
    /// Short name, used in logs and test assertions.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPipeline(_) => "set_pipeline",
            Self::SetBindGroup { .. } => "set_bind_group",
            Self::SetVertexBuffer { .. } => "set_vertex_buffer",
            Self::SetIndexBuffer { .. } => "set_index_buffer",
            Self::SetViewport { .. } => "set_viewport",
            Self::SetScissorRect { .. } => "set_scissor_rect",
            Self::SetBlendConstant(_) => "set_blend_constant",
            Self::SetStencilReference(_) => "set_stencil_reference",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw_indexed",
            Self::DrawIndirect { .. } => "draw_indirect",
            Self::DrawIndexedIndirect { .. } => "draw_indexed_indirect",
            Self::BeginOcclusionQuery(_) => "begin_occlusion_query",
            Self::EndOcclusionQuery => "end_occlusion_query",
            Self::ExecuteBundles(_) => "execute_bundles",
        }
    }

    /// Pass-level state that a render bundle may not record.
    #[must_use]
    pub fn is_pass_only(&self) -> bool {
        matches!(
            self,
            Self::SetViewport { .. }
                | Self::SetScissorRect { .. }
                | Self::SetBlendConstant(_)
                | Self::SetStencilReference(_)
                | Self::BeginOcclusionQuery(_)
                | Self::EndOcclusionQuery
                | Self::ExecuteBundles(_)
        )
    }

    #[must_use]
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::Draw { .. }
                | Self::DrawIndexed { .. }
                | Self::DrawIndirect { .. }
                | Self::DrawIndexedIndirect { .. }
        )
    }
}

/// One command of a compute pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCommand {
    SetPipeline(ComputePipelineId),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
        offsets: DynamicOffsets,
    },
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: BufferId,
        offset: u64,
    },
}

/// Color attachment of a recorded render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewId,
    pub resolve_target: Option<TextureViewId>,
    pub ops: wgpu::Operations<wgpu::Color>,
}

/// Depth/stencil attachment of a recorded render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachment {
    pub view: TextureViewId,
    pub depth_ops: Option<wgpu::Operations<f32>>,
    pub stencil_ops: Option<wgpu::Operations<u32>>,
}

/// Begin/end timestamp slots of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWrites {
    pub query_set: QuerySetId,
    pub beginning_of_pass: Option<u32>,
    pub end_of_pass: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRenderPass {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthAttachment>,
    pub occlusion_query_set: Option<QuerySetId>,
    pub timestamp_writes: Option<TimestampWrites>,
    pub commands: Vec<RenderCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedComputePass {
    pub label: Option<String>,
    pub timestamp_writes: Option<TimestampWrites>,
    pub commands: Vec<ComputeCommand>,
}

/// Source or destination of a texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCopyLocation {
    pub texture: TextureId,
    pub mip_level: u32,
    pub origin: wgpu::Origin3d,
    pub aspect: wgpu::TextureAspect,
}

/// One command of a command encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCommand {
    RenderPass(RecordedRenderPass),
    ComputePass(RecordedComputePass),
    CopyBufferToBuffer {
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    },
    CopyTextureToTexture {
        source: TextureCopyLocation,
        destination: TextureCopyLocation,
        size: wgpu::Extent3d,
    },
    ResolveQuerySet {
        query_set: QuerySetId,
        queries: Range<u32>,
        destination: BufferId,
        destination_offset: u64,
    },
}

/// A finished command encoder, ready for submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedEncoder {
    pub label: Option<String>,
    pub commands: Vec<EncoderCommand>,
}

impl RecordedEncoder {
    /// Iterates the render passes of this encoder.
    pub fn render_passes(&self) -> impl Iterator<Item = &RecordedRenderPass> {
        self.commands.iter().filter_map(|c| match c {
            EncoderCommand::RenderPass(pass) => Some(pass),
            _ => None,
        })
    }

    pub fn compute_passes(&self) -> impl Iterator<Item = &RecordedComputePass> {
        self.commands.iter().filter_map(|c| match c {
            EncoderCommand::ComputePass(pass) => Some(pass),
            _ => None,
        })
    }
}
