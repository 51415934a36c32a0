//! Render and compute pipeline cache
//!
//! A render pipeline descriptor only says what to compute. The attachment
//! formats and sample count come from the pass, and the strip index format
//! from the index buffer of the draw, so one descriptor maps to one pipeline
//! per [`RenderPipelineSlot`].
//!
//! The slot fingerprint is the hash of a [`RenderPipelineState`]: the shader
//! modules, the pipeline layout and every piece of fixed-function state. Vertex
//! inputs are checked against the declared vertex buffer layouts whenever the
//! pipeline is (re)built.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::backend::{
    BindGroupLayoutId, ComputePipelineId, GpuBackend, GpuComputePipelineDescriptor, GpuFragmentState,
    GpuHandle, GpuProgrammableStage, GpuRenderPipelineDescriptor, PipelineLayoutId, RenderPipelineId,
    ShaderModuleId,
};
use crate::cache::pipeline_key::{
    ComputePipelineState, RenderPipelineSlot, RenderPipelineState, VertexLayoutKey, fx_hash_key,
};
use crate::cache::slot::GpuObject;
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::graph::RenderPassFormat;
use crate::reflection::types::vertex_format_shape;
use crate::reflection::{PipelineLayoutDescriptor, VertexInput};
use crate::resources::pipeline::{ComputePipeline, DepthState, RenderPipeline, VertexBufferLayout};

/// A built render pipeline and the layout its bind groups must follow.
#[derive(Debug, Clone)]
pub struct ResolvedRenderPipeline {
    pub pipeline: RenderPipelineId,
    pub layout: Arc<PipelineLayoutDescriptor>,
    /// Bind group layout of every group, in group order.
    pub group_layouts: SmallVec<[BindGroupLayoutId; 4]>,
    pub pipeline_layout: PipelineLayoutId,
    pub modules: SmallVec<[ShaderModuleId; 2]>,
}

impl GpuObject for ResolvedRenderPipeline {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::RenderPipeline(self.pipeline)]
    }

    fn dependencies(&self) -> SmallVec<[GpuHandle; 4]> {
        pipeline_dependencies(self.pipeline_layout, &self.group_layouts, &self.modules)
    }
}

/// A built compute pipeline and the layout its bind groups must follow.
#[derive(Debug, Clone)]
pub struct ResolvedComputePipeline {
    pub pipeline: ComputePipelineId,
    pub layout: Arc<PipelineLayoutDescriptor>,
    pub group_layouts: SmallVec<[BindGroupLayoutId; 4]>,
    pub workgroup_size: [u32; 3],
    pub pipeline_layout: PipelineLayoutId,
    pub module: ShaderModuleId,
}

impl GpuObject for ResolvedComputePipeline {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::ComputePipeline(self.pipeline)]
    }

    fn dependencies(&self) -> SmallVec<[GpuHandle; 4]> {
        pipeline_dependencies(self.pipeline_layout, &self.group_layouts, &[self.module])
    }
}

fn pipeline_dependencies(
    layout: PipelineLayoutId,
    group_layouts: &[BindGroupLayoutId],
    modules: &[ShaderModuleId],
) -> SmallVec<[GpuHandle; 4]> {
    let mut handles: SmallVec<[GpuHandle; 4]> = smallvec![GpuHandle::PipelineLayout(layout)];
    handles.extend(group_layouts.iter().map(|&id| GpuHandle::BindGroupLayout(id)));
    handles.extend(modules.iter().map(|&id| GpuHandle::ShaderModule(id)));
    handles
}

/// Checks every vertex shader input against the vertex buffer layouts.
///
/// Each input location needs an attribute, and the attribute format must
/// have the same numeric class and component count as the input. Formats
/// without a known shape are accepted.
pub fn validate_vertex_inputs(inputs: &[VertexInput], layouts: &[VertexBufferLayout]) -> Result<()> {
    for input in inputs {
        let attribute = layouts
            .iter()
            .flat_map(|layout| layout.attributes.iter())
            .find(|attr| attr.shader_location == input.location);
        let Some(attribute) = attribute else {
            return Err(StratumError::VertexLayout(format!(
                "vertex input `{}` (location {}) has no attribute in the vertex buffer layouts",
                input.name, input.location
            )));
        };
        let Some((class, count)) = vertex_format_shape(attribute.format) else {
            continue;
        };
        let expected_class = input.kind.scalar().numeric_class();
        let expected_count = input.kind.component_count();
        if class != expected_class || count != expected_count {
            return Err(StratumError::VertexLayout(format!(
                "vertex input `{}` (location {}) is {} but its attribute is {:?}",
                input.name, input.location, input.kind, attribute.format
            )));
        }
    }
    Ok(())
}

impl ResourceCache {
    /// Render pipeline of `pipeline` for one pass format.
    pub fn render_pipeline<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pipeline: &RenderPipeline,
        format: &RenderPassFormat,
        strip_index_format: Option<wgpu::IndexFormat>,
    ) -> Result<ResolvedRenderPipeline> {
        let program = self.render_program(pipeline)?;
        let (layout, group_layouts) = self.pipeline_layout(backend, &program.layout)?;

        let vertex_stage = &program.stages[0];
        let vertex_module = self.shader_module(backend, vertex_stage)?;
        let fragment = match program.stages.get(1) {
            Some(stage) => Some((self.shader_module(backend, stage)?, stage.entry_point.clone())),
            None => None,
        };

        let desc = pipeline.read().clone();
        let mut primitive = desc.primitive;
        primitive.strip_index_format = if primitive.topology.is_strip() {
            strip_index_format
        } else {
            None
        };

        let depth_stencil = format
            .depth_stencil_format
            .map(|depth_format| desc.depth.clone().unwrap_or_else(DepthState::passthrough).to_wgpu(depth_format));

        let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = if fragment.is_some() {
            format
                .color_formats
                .iter()
                .enumerate()
                .map(|(index, color_format)| {
                    color_format.map(|color_format| {
                        let target = desc.target(index);
                        wgpu::ColorTargetState {
                            format: color_format,
                            blend: target.blend,
                            write_mask: target.write_mask,
                        }
                    })
                })
                .collect()
        } else {
            SmallVec::new()
        };

        let state = RenderPipelineState {
            vertex_module,
            vertex_entry: vertex_stage.entry_point.clone(),
            fragment,
            layout,
            vertex_buffers: desc.vertex_buffers.iter().map(VertexLayoutKey::from).collect(),
            primitive,
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: format.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: desc.alpha_to_coverage,
            },
            targets,
        };
        let fingerprint = fx_hash_key(&state);
        let slot = RenderPipelineSlot {
            pipeline: pipeline.id(),
            format: format.without_size(),
            strip_index_format: primitive.strip_index_format,
        };

        if self.render_pipelines.peek(&slot, fingerprint).is_none()
            && let Some(entry) = vertex_stage.entry()
            && let Err(err) = validate_vertex_inputs(&entry.vertex_inputs, &desc.vertex_buffers)
        {
            self.settings.soft_error(err)?;
        }

        let label = self.settings.label("RenderPipeline", desc.label.as_deref());
        let layout_descriptor = Arc::clone(&program.layout);
        self.render_pipelines
            .get_or_create(
                backend,
                slot,
                fingerprint,
                pipeline.liveness(),
                self.frame,
                |backend| {
                    let handle = backend.create_render_pipeline(&GpuRenderPipelineDescriptor {
                        label,
                        layout: state.layout,
                        vertex: GpuProgrammableStage {
                            module: state.vertex_module,
                            entry_point: state.vertex_entry.clone(),
                        },
                        vertex_buffers: desc.vertex_buffers.clone(),
                        fragment: state.fragment.as_ref().map(|(module, entry_point)| GpuFragmentState {
                            stage: GpuProgrammableStage {
                                module: *module,
                                entry_point: entry_point.clone(),
                            },
                            targets: state.targets.to_vec(),
                        }),
                        primitive: state.primitive,
                        depth_stencil: state.depth_stencil.clone(),
                        multisample: state.multisample,
                    })?;
                    let mut modules: SmallVec<[ShaderModuleId; 2]> = smallvec![state.vertex_module];
                    modules.extend(state.fragment.as_ref().map(|(module, _)| *module));
                    Ok(ResolvedRenderPipeline {
                        pipeline: handle,
                        layout: layout_descriptor,
                        group_layouts,
                        pipeline_layout: state.layout,
                        modules,
                    })
                },
            )
            .map(|r| r.handle)
    }

    /// Compute pipeline of `pipeline`.
    pub fn compute_pipeline<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pipeline: &ComputePipeline,
    ) -> Result<ResolvedComputePipeline> {
        let program = self.compute_program(pipeline)?;
        let (layout, group_layouts) = self.pipeline_layout(backend, &program.layout)?;
        let stage = &program.stages[0];
        let module = self.shader_module(backend, stage)?;
        let workgroup_size = stage.entry().map_or([1, 1, 1], |ep| ep.workgroup_size);

        let state = ComputePipelineState {
            module,
            entry: stage.entry_point.clone(),
            layout,
        };
        let fingerprint = fx_hash_key(&state);
        let label = self.settings.label("ComputePipeline", pipeline.read().label.as_deref());
        let layout_descriptor = Arc::clone(&program.layout);
        self.compute_pipelines
            .get_or_create(
                backend,
                pipeline.id(),
                fingerprint,
                pipeline.liveness(),
                self.frame,
                |backend| {
                    let handle = backend.create_compute_pipeline(&GpuComputePipelineDescriptor {
                        label,
                        layout: state.layout,
                        stage: GpuProgrammableStage {
                            module: state.module,
                            entry_point: state.entry.clone(),
                        },
                    })?;
                    Ok(ResolvedComputePipeline {
                        pipeline: handle,
                        layout: layout_descriptor,
                        group_layouts,
                        workgroup_size,
                        pipeline_layout: state.layout,
                        module: state.module,
                    })
                },
            )
            .map(|r| r.handle)
    }
}
