//! Render objects and their cached command lists
//!
//! A render object is one draw: a pipeline, the bindings its shaders read,
//! vertex/index buffers and the draw call itself. Resolving it produces a
//! self-contained command list (pipeline, bind groups, buffers, optional
//! dynamic state, draw) that is cached per `(object, pass format)`.
//!
//! The list is reused verbatim while its dependency fingerprint holds. The
//! fingerprint covers the stamps of the object, its pipeline, its bindings
//! and every buffer, texture and sampler they reference, plus the cache's
//! command epoch. The pass formats are part of the key; the attachment size
//! is not, since nothing in the list depends on it. Queued buffer and texture
//! writes do not change any stamp, so they are flushed separately on every
//! replay.

use std::ops::Range;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::cache::Fingerprint;
use crate::commands::{RenderCommand, RenderStateTracker};
use crate::errors::{Result, StratumError};
use crate::graph::{FrameContext, RenderPassFormat};
use crate::resources::binding::{BindingResource, BindingResources, BufferBinding};
use crate::resources::buffer::Buffer;
use crate::resources::pipeline::RenderPipeline;
use crate::resources::tracked::Tracked;

/// Viewport rectangle and depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-depth viewport covering `width × height` pixels.
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Index buffer range and its index format.
#[derive(Debug, Clone)]
pub struct IndexBufferBinding {
    pub buffer: BufferBinding,
    pub format: wgpu::IndexFormat,
}

#[derive(Debug, Clone)]
pub enum DrawCall {
    Vertices {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Indexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    /// Arguments read from `buffer` at `offset`.
    Indirect { buffer: Buffer, offset: u64 },
    IndexedIndirect { buffer: Buffer, offset: u64 },
}

impl DrawCall {
    #[must_use]
    pub fn vertices(count: u32) -> Self {
        Self::Vertices {
            vertices: 0..count,
            instances: 0..1,
        }
    }

    #[must_use]
    pub fn indexed(count: u32) -> Self {
        Self::Indexed {
            indices: 0..count,
            base_vertex: 0,
            instances: 0..1,
        }
    }

    fn indirect_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Indirect { buffer, .. } | Self::IndexedIndirect { buffer, .. } => Some(buffer),
            _ => None,
        }
    }
}

/// One draw.
#[derive(Debug, Clone)]
pub struct RenderObjectDescriptor {
    pub label: Option<String>,
    pub pipeline: RenderPipeline,
    /// Searched in order for each bind group of the pipeline.
    pub bindings: Vec<BindingResources>,
    /// Bound to slots `0..n` in order.
    pub vertex_buffers: Vec<BufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    pub draw: DrawCall,
    pub viewport: Option<Viewport>,
    pub scissor: Option<ScissorRect>,
    pub blend_constant: Option<wgpu::Color>,
    pub stencil_reference: Option<u32>,
}

impl RenderObjectDescriptor {
    #[must_use]
    pub fn new(pipeline: RenderPipeline, draw: DrawCall) -> Self {
        Self {
            label: None,
            pipeline,
            bindings: Vec::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            draw,
            viewport: None,
            scissor: None,
            blend_constant: None,
            stencil_reference: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: BindingResources) -> Self {
        self.bindings.push(bindings);
        self
    }

    #[must_use]
    pub fn with_vertex_buffer(mut self, buffer: Buffer) -> Self {
        self.vertex_buffers.push(BufferBinding {
            buffer,
            offset: 0,
            size: None,
        });
        self
    }

    #[must_use]
    pub fn with_index_buffer(mut self, buffer: Buffer, format: wgpu::IndexFormat) -> Self {
        self.index_buffer = Some(IndexBufferBinding {
            buffer: BufferBinding {
                buffer,
                offset: 0,
                size: None,
            },
            format,
        });
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    #[must_use]
    pub fn with_scissor(mut self, scissor: ScissorRect) -> Self {
        self.scissor = Some(scissor);
        self
    }

    /// Every buffer the draw reads outside of its bind groups.
    fn geometry_buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.vertex_buffers
            .iter()
            .map(|binding| &binding.buffer)
            .chain(self.index_buffer.iter().map(|index| &index.buffer.buffer))
            .chain(self.draw.indirect_buffer())
    }
}

/// Caller-owned render object.
pub type RenderObject = Tracked<RenderObjectDescriptor>;

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    fn render_object_fingerprint(&self, object: &RenderObject, desc: &RenderObjectDescriptor) -> u64 {
        let mut fp = Fingerprint::new();
        fp.push_stamp(object.stamp()).push_stamp(desc.pipeline.stamp());
        for bindings in &desc.bindings {
            fp.push_stamp(bindings.stamp());
            for (name, resource) in bindings.read().iter() {
                fp.push(name);
                match resource {
                    BindingResource::Buffer(binding) => fp.push_stamp(binding.buffer.stamp()),
                    BindingResource::Texture(binding) => fp.push_stamp(binding.texture.stamp()),
                    BindingResource::Sampler(sampler) => fp.push_stamp(sampler.stamp()),
                    BindingResource::Value(_) => fp.push(&0u8),
                };
            }
        }
        for buffer in desc.geometry_buffers() {
            fp.push_stamp(buffer.stamp());
        }
        fp.push(&self.cache.command_epoch());
        fp.finish()
    }

    /// Uploads writes queued since the list was cached.
    fn flush_render_object(&mut self, desc: &RenderObjectDescriptor) -> Result<()> {
        for buffer in desc.geometry_buffers() {
            self.cache.flush_buffer(self.backend, buffer)?;
        }
        for bindings in &desc.bindings {
            let resources: Vec<BindingResource> = bindings.read().iter().map(|(_, r)| r.clone()).collect();
            for resource in &resources {
                match resource {
                    BindingResource::Buffer(binding) => self.cache.flush_buffer(self.backend, &binding.buffer)?,
                    BindingResource::Texture(binding) => self.cache.flush_texture(self.backend, &binding.texture)?,
                    BindingResource::Sampler(_) | BindingResource::Value(_) => {}
                }
            }
        }
        Ok(())
    }

    fn build_render_object(&mut self, desc: &RenderObjectDescriptor, format: &RenderPassFormat) -> Result<Vec<RenderCommand>> {
        let strip_index_format = desc.index_buffer.as_ref().map(|index| index.format);
        let pipeline = self
            .cache
            .render_pipeline(self.backend, &desc.pipeline, format, strip_index_format)?;

        let declared_buffers = desc.pipeline.read().vertex_buffers.len();
        if desc.vertex_buffers.len() < declared_buffers {
            return Err(StratumError::VertexLayout(format!(
                "pipeline declares {declared_buffers} vertex buffers but the object provides {}",
                desc.vertex_buffers.len()
            )));
        }

        let groups = self.cache.resolve_bind_groups(
            self.backend,
            desc.pipeline.id(),
            &desc.pipeline.liveness(),
            &pipeline.layout,
            &pipeline.group_layouts,
            &desc.bindings,
        )?;

        let mut tracker = RenderStateTracker::for_pass();
        tracker.set_pipeline(pipeline.pipeline);
        for (index, group) in groups.iter().enumerate() {
            tracker.set_bind_group(index as u32, *group, &[]);
        }
        for (slot, binding) in desc.vertex_buffers.iter().enumerate() {
            let buffer = self.cache.prepare_buffer(self.backend, &binding.buffer)?;
            tracker.set_vertex_buffer(slot as u32, buffer, binding.offset, binding.size);
        }
        if let Some(index) = &desc.index_buffer {
            let buffer = self.cache.prepare_buffer(self.backend, &index.buffer.buffer)?;
            tracker.set_index_buffer(buffer, index.format, index.buffer.offset, index.buffer.size);
        }

        if let Some(v) = desc.viewport {
            tracker.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        }
        if let Some(s) = desc.scissor {
            tracker.set_scissor_rect(s.x, s.y, s.width, s.height);
        }
        if let Some(color) = desc.blend_constant {
            tracker.set_blend_constant(color);
        }
        if let Some(reference) = desc.stencil_reference {
            tracker.set_stencil_reference(reference);
        }

        match &desc.draw {
            DrawCall::Vertices { vertices, instances } => tracker.draw(vertices.clone(), instances.clone()),
            DrawCall::Indexed {
                indices,
                base_vertex,
                instances,
            } => {
                if desc.index_buffer.is_none() {
                    return Err(StratumError::Validation("indexed draw without an index buffer".to_string()));
                }
                tracker.draw_indexed(indices.clone(), *base_vertex, instances.clone());
            }
            DrawCall::Indirect { buffer, offset } => {
                let buffer = self.cache.prepare_buffer(self.backend, buffer)?;
                tracker.draw_indirect(buffer, *offset);
            }
            DrawCall::IndexedIndirect { buffer, offset } => {
                if desc.index_buffer.is_none() {
                    return Err(StratumError::Validation("indexed draw without an index buffer".to_string()));
                }
                let buffer = self.cache.prepare_buffer(self.backend, buffer)?;
                tracker.draw_indexed_indirect(buffer, *offset);
            }
        }
        Ok(tracker.finish())
    }

    /// Command list of one render object for one pass format, with the
    /// fingerprint it is cached under.
    pub fn render_object_commands(
        &mut self,
        object: &RenderObject,
        format: &RenderPassFormat,
    ) -> Result<(u64, Arc<[RenderCommand]>)> {
        let desc = object.read().clone();
        let key = (object.id(), format.without_size());
        let frame = self.cache.frame;

        let fingerprint = self.render_object_fingerprint(object, &desc);
        if let Some(commands) = self.cache.render_objects.get(&key, fingerprint, frame) {
            self.flush_render_object(&desc)?;
            return Ok((fingerprint, commands));
        }

        let commands: Arc<[RenderCommand]> = self.build_render_object(&desc, format)?.into();
        // Building may have recreated dependencies; cache under the settled state.
        let fingerprint = self.render_object_fingerprint(object, &desc);
        let cached = Arc::clone(&commands);
        self.cache.render_objects.get_or_create(
            self.backend,
            key,
            fingerprint,
            object.liveness(),
            frame,
            |_| Ok(cached),
        )?;
        Ok((fingerprint, commands))
    }

    /// Replays the command list of `object` into a pass or bundle tracker.
    ///
    /// A soft failure skips the object.
    pub fn draw_render_object(
        &mut self,
        object: &RenderObject,
        format: &RenderPassFormat,
        tracker: &mut RenderStateTracker,
    ) -> Result<Option<u64>> {
        let result = self.render_object_commands(object, format);
        Ok(self.soften(result)?.map(|(fingerprint, commands)| {
            tracker.replay(&commands);
            fingerprint
        }))
    }
}
