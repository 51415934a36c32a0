//! Pipeline descriptors
//!
//! These describe *what* a pipeline computes; the attachment formats and
//! sample count come from the pass it is drawn in, so one descriptor yields
//! one GPU pipeline per distinct [`RenderPassFormat`](crate::graph::RenderPassFormat).

use std::sync::Arc;

use crate::resources::tracked::Tracked;

/// A WGSL module plus an optional entry point.
///
/// When `entry_point` is `None`, the module's single entry point for the
/// stage is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStage {
    pub source: Arc<str>,
    pub entry_point: Option<String>,
}

impl ShaderStage {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            entry_point: None,
        }
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = Some(entry_point.to_string());
        self
    }
}

/// Owned counterpart of `wgpu::VertexBufferLayout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexBufferLayout {
    /// Tightly packed per-vertex layout from `(location, format)` pairs.
    #[must_use]
    pub fn packed(attributes: &[(u32, wgpu::VertexFormat)]) -> Self {
        let mut offset = 0;
        let attributes = attributes
            .iter()
            .map(|&(shader_location, format)| {
                let attr = wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location,
                };
                offset += format.size();
                attr
            })
            .collect();
        Self {
            array_stride: offset,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        }
    }

    #[must_use]
    pub fn instanced(mut self) -> Self {
        self.step_mode = wgpu::VertexStepMode::Instance;
        self
    }
}

/// Blend and write mask of one color target. The format comes from the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTarget {
    pub blend: Option<wgpu::BlendState>,
    pub write_mask: wgpu::ColorWrites,
}

impl Default for ColorTarget {
    fn default() -> Self {
        Self {
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        }
    }
}

/// Depth/stencil test state. The format comes from the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthState {
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub stencil: wgpu::StencilState,
    pub bias: wgpu::DepthBiasState,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

impl DepthState {
    /// State used when the pass has a depth attachment the pipeline ignores.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn to_wgpu(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(self.depth_write_enabled),
            depth_compare: Some(self.depth_compare),
            stencil: self.stencil.clone(),
            bias: self.bias,
        }
    }
}

/// Fragment stage and per-target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentState {
    pub stage: ShaderStage,
    /// One entry per pass color attachment. Missing entries use
    /// [`ColorTarget::default`].
    pub targets: Vec<ColorTarget>,
}

/// Declarative render pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex: ShaderStage,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub fragment: Option<FragmentState>,
    pub primitive: wgpu::PrimitiveState,
    /// `Some` requires depth testing; a depth target is created automatically
    /// when the pass has none.
    pub depth: Option<DepthState>,
    pub alpha_to_coverage: bool,
}

impl RenderPipelineDescriptor {
    /// Pipeline with a vertex and a fragment stage, both taken from `source`.
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        let source = source.into();
        Self {
            label: None,
            vertex: ShaderStage::new(Arc::clone(&source)),
            vertex_buffers: Vec::new(),
            fragment: Some(FragmentState {
                stage: ShaderStage::new(source),
                targets: Vec::new(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth: None,
            alpha_to_coverage: false,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn with_vertex_buffers(mut self, layouts: Vec<VertexBufferLayout>) -> Self {
        self.vertex_buffers = layouts;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.primitive.topology = topology;
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<ColorTarget>) -> Self {
        if let Some(fragment) = &mut self.fragment {
            fragment.targets = targets;
        }
        self
    }

    /// Color target state for attachment `index`.
    #[must_use]
    pub fn target(&self, index: usize) -> ColorTarget {
        self.fragment
            .as_ref()
            .and_then(|f| f.targets.get(index).copied())
            .unwrap_or_default()
    }
}

/// Declarative compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub compute: ShaderStage,
}

impl ComputePipelineDescriptor {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            label: None,
            compute: ShaderStage::new(source),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

/// Caller-owned render pipeline descriptor.
pub type RenderPipeline = Tracked<RenderPipelineDescriptor>;

/// Caller-owned compute pipeline descriptor.
pub type ComputePipeline = Tracked<ComputePipelineDescriptor>;
