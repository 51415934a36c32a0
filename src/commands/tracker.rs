//! State-tracking command recorders
//!
//! [`RenderStateTracker`] remembers what is currently bound in a pass (or a
//! bundle) and appends a command only when it changes something. Identity is
//! handle equality: two set calls with the same handle are the same state,
//! whatever the handle points to. A cache entry that is recreated gets a new
//! handle, so it is never mistaken for the old one.
//!
//! Bind groups and vertex buffers are tracked per slot; everything else is a
//! single value.

use smallvec::SmallVec;

use crate::backend::{BindGroupId, BufferId, ComputePipelineId, RenderBundleId, RenderPipelineId};
use crate::commands::{ComputeCommand, DynamicOffsets, RenderCommand};

/// What a [`RenderStateTracker`] records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    /// A render pass: every command is allowed.
    Pass,
    /// A render bundle: pass-level state (viewport, scissor, blend constant,
    /// stencil reference, queries, nested bundles) is dropped.
    Bundle,
}

#[derive(Debug, Clone, PartialEq)]
struct BindGroupState {
    bind_group: BindGroupId,
    offsets: DynamicOffsets,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VertexBufferState {
    buffer: BufferId,
    offset: u64,
    size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexBufferState {
    buffer: BufferId,
    format: wgpu::IndexFormat,
    offset: u64,
    size: Option<u64>,
}

fn slot_mut<T>(slots: &mut SmallVec<[Option<T>; 8]>, index: u32) -> &mut Option<T> {
    let index = index as usize;
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    &mut slots[index]
}

/// Render pass / render bundle recorder with redundant-state elimination.
#[derive(Debug)]
pub struct RenderStateTracker {
    kind: TrackerKind,
    commands: Vec<RenderCommand>,

    pipeline: Option<RenderPipelineId>,
    bind_groups: SmallVec<[Option<BindGroupState>; 8]>,
    vertex_buffers: SmallVec<[Option<VertexBufferState>; 8]>,
    index_buffer: Option<IndexBufferState>,
    viewport: Option<[f32; 6]>,
    scissor: Option<[u32; 4]>,
    blend_constant: Option<wgpu::Color>,
    stencil_reference: Option<u32>,

    suppressed: usize,
}

impl RenderStateTracker {
    #[must_use]
    pub fn new(kind: TrackerKind) -> Self {
        Self {
            kind,
            commands: Vec::new(),
            pipeline: None,
            bind_groups: SmallVec::new(),
            vertex_buffers: SmallVec::new(),
            index_buffer: None,
            viewport: None,
            scissor: None,
            blend_constant: None,
            stencil_reference: None,
            suppressed: 0,
        }
    }

    #[must_use]
    pub fn for_pass() -> Self {
        Self::new(TrackerKind::Pass)
    }

    #[must_use]
    pub fn for_bundle() -> Self {
        Self::new(TrackerKind::Bundle)
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    fn skip(&mut self, what: &str) {
        self.suppressed += 1;
        log::trace!("Suppressed redundant {what}");
    }

    fn pass_only(&mut self, what: &str) -> bool {
        if self.kind == TrackerKind::Bundle {
            log::trace!("Dropped {what} from render bundle");
            self.suppressed += 1;
            return false;
        }
        true
    }

    pub fn set_pipeline(&mut self, pipeline: RenderPipelineId) {
        if self.pipeline == Some(pipeline) {
            self.skip("set_pipeline");
            return;
        }
        self.pipeline = Some(pipeline);
        self.commands.push(RenderCommand::SetPipeline(pipeline));
    }

    pub fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId, offsets: &[u32]) {
        let slot = slot_mut(&mut self.bind_groups, index);
        if let Some(state) = slot.as_ref()
            && state.bind_group == bind_group
            && state.offsets.as_slice() == offsets
        {
            self.skip("set_bind_group");
            return;
        }
        let offsets = DynamicOffsets::from_slice(offsets);
        *slot = Some(BindGroupState {
            bind_group,
            offsets: offsets.clone(),
        });
        self.commands.push(RenderCommand::SetBindGroup {
            index,
            bind_group,
            offsets,
        });
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64, size: Option<u64>) {
        let state = VertexBufferState { buffer, offset, size };
        let current = slot_mut(&mut self.vertex_buffers, slot);
        if *current == Some(state) {
            self.skip("set_vertex_buffer");
            return;
        }
        *current = Some(state);
        self.commands.push(RenderCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
            size,
        });
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: BufferId,
        format: wgpu::IndexFormat,
        offset: u64,
        size: Option<u64>,
    ) {
        let state = IndexBufferState {
            buffer,
            format,
            offset,
            size,
        };
        if self.index_buffer == Some(state) {
            self.skip("set_index_buffer");
            return;
        }
        self.index_buffer = Some(state);
        self.commands.push(RenderCommand::SetIndexBuffer {
            buffer,
            format,
            offset,
            size,
        });
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if !self.pass_only("set_viewport") {
            return;
        }
        let state = [x, y, width, height, min_depth, max_depth];
        if self.viewport == Some(state) {
            self.skip("set_viewport");
            return;
        }
        self.viewport = Some(state);
        self.commands.push(RenderCommand::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        });
    }

    pub fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        if !self.pass_only("set_scissor_rect") {
            return;
        }
        let state = [x, y, width, height];
        if self.scissor == Some(state) {
            self.skip("set_scissor_rect");
            return;
        }
        self.scissor = Some(state);
        self.commands.push(RenderCommand::SetScissorRect { x, y, width, height });
    }

    pub fn set_blend_constant(&mut self, color: wgpu::Color) {
        if !self.pass_only("set_blend_constant") {
            return;
        }
        if self.blend_constant == Some(color) {
            self.skip("set_blend_constant");
            return;
        }
        self.blend_constant = Some(color);
        self.commands.push(RenderCommand::SetBlendConstant(color));
    }

    pub fn set_stencil_reference(&mut self, reference: u32) {
        if !self.pass_only("set_stencil_reference") {
            return;
        }
        if self.stencil_reference == Some(reference) {
            self.skip("set_stencil_reference");
            return;
        }
        self.stencil_reference = Some(reference);
        self.commands.push(RenderCommand::SetStencilReference(reference));
    }

    pub fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.commands.push(RenderCommand::Draw { vertices, instances });
    }

    pub fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.commands.push(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    pub fn draw_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.commands.push(RenderCommand::DrawIndirect { buffer, offset });
    }

    pub fn draw_indexed_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.commands.push(RenderCommand::DrawIndexedIndirect { buffer, offset });
    }

    pub fn begin_occlusion_query(&mut self, query_index: u32) {
        if self.pass_only("begin_occlusion_query") {
            self.commands.push(RenderCommand::BeginOcclusionQuery(query_index));
        }
    }

    pub fn end_occlusion_query(&mut self) {
        if self.pass_only("end_occlusion_query") {
            self.commands.push(RenderCommand::EndOcclusionQuery);
        }
    }

    /// Executes pre-recorded bundles.
    ///
    /// Executing bundles leaves the pipeline, bind groups and vertex/index
    /// buffers of the pass undefined, so their tracked state is cleared.
    pub fn execute_bundles(&mut self, bundles: &[RenderBundleId]) {
        if bundles.is_empty() || !self.pass_only("execute_bundles") {
            return;
        }
        self.commands
            .push(RenderCommand::ExecuteBundles(SmallVec::from_slice(bundles)));
        self.pipeline = None;
        self.bind_groups.clear();
        self.vertex_buffers.clear();
        self.index_buffer = None;
    }

    /// Feeds one recorded command through the tracker.
    pub fn apply(&mut self, command: &RenderCommand) {
        match command {
            RenderCommand::SetPipeline(pipeline) => self.set_pipeline(*pipeline),
            RenderCommand::SetBindGroup {
                index,
                bind_group,
                offsets,
            } => self.set_bind_group(*index, *bind_group, offsets),
            RenderCommand::SetVertexBuffer {
                slot,
                buffer,
                offset,
                size,
            } => self.set_vertex_buffer(*slot, *buffer, *offset, *size),
            RenderCommand::SetIndexBuffer {
                buffer,
                format,
                offset,
                size,
            } => self.set_index_buffer(*buffer, *format, *offset, *size),
            RenderCommand::SetViewport {
                x,
                y,
                width,
                height,
                min_depth,
                max_depth,
            } => self.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth),
            RenderCommand::SetScissorRect { x, y, width, height } => {
                self.set_scissor_rect(*x, *y, *width, *height);
            }
            RenderCommand::SetBlendConstant(color) => self.set_blend_constant(*color),
            RenderCommand::SetStencilReference(reference) => self.set_stencil_reference(*reference),
            RenderCommand::Draw { vertices, instances } => self.draw(vertices.clone(), instances.clone()),
            RenderCommand::DrawIndexed {
                indices,
                base_vertex,
                instances,
            } => self.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
            RenderCommand::DrawIndirect { buffer, offset } => self.draw_indirect(*buffer, *offset),
            RenderCommand::DrawIndexedIndirect { buffer, offset } => {
                self.draw_indexed_indirect(*buffer, *offset);
            }
            RenderCommand::BeginOcclusionQuery(index) => self.begin_occlusion_query(*index),
            RenderCommand::EndOcclusionQuery => self.end_occlusion_query(),
            RenderCommand::ExecuteBundles(bundles) => self.execute_bundles(bundles),
        }
    }

    /// Replays a cached command list through the tracker.
    pub fn replay(&mut self, commands: &[RenderCommand]) {
        for command in commands {
            self.apply(command);
        }
    }

    #[must_use]
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Number of calls that produced no command.
    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    #[must_use]
    pub fn finish(self) -> Vec<RenderCommand> {
        self.commands
    }
}

/// Compute pass recorder with redundant-state elimination.
#[derive(Debug, Default)]
pub struct ComputeStateTracker {
    commands: Vec<ComputeCommand>,
    pipeline: Option<ComputePipelineId>,
    bind_groups: SmallVec<[Option<BindGroupState>; 8]>,
    suppressed: usize,
}

impl ComputeStateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pipeline(&mut self, pipeline: ComputePipelineId) {
        if self.pipeline == Some(pipeline) {
            self.suppressed += 1;
            return;
        }
        self.pipeline = Some(pipeline);
        self.commands.push(ComputeCommand::SetPipeline(pipeline));
    }

    pub fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId, offsets: &[u32]) {
        let slot = slot_mut(&mut self.bind_groups, index);
        if let Some(state) = slot.as_ref()
            && state.bind_group == bind_group
            && state.offsets.as_slice() == offsets
        {
            self.suppressed += 1;
            return;
        }
        let offsets = DynamicOffsets::from_slice(offsets);
        *slot = Some(BindGroupState {
            bind_group,
            offsets: offsets.clone(),
        });
        self.commands.push(ComputeCommand::SetBindGroup {
            index,
            bind_group,
            offsets,
        });
    }

    pub fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) {
        self.commands.push(ComputeCommand::Dispatch([x, y, z]));
    }

    pub fn dispatch_workgroups_indirect(&mut self, buffer: BufferId, offset: u64) {
        self.commands.push(ComputeCommand::DispatchIndirect { buffer, offset });
    }

    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    #[must_use]
    pub fn finish(self) -> Vec<ComputeCommand> {
        self.commands
    }
}
