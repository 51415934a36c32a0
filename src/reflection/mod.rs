//! WGSL Reflection
//!
//! Static analysis of shader source that recovers everything the caches need
//! to build layouts without the caller spelling them out:
//!
//! - **Resources**: every `@group/@binding` variable, classified into one of
//!   six categories ([`ResourceCategory`]) with the sub-fields each needs.
//! - **Buffer layouts**: a flattened [`BufferBindingInfo`] for every uniform
//!   and storage buffer (see [`layout`]).
//! - **Entry points**: stage, name, workgroup size and vertex inputs.
//!
//! Parsing uses `naga`'s WGSL front end only; nothing is validated or compiled
//! here. A parse failure is always returned as an error carrying a source
//! excerpt.
//!
//! [`ReflectionCache`] memoizes [`reflect`] by source text.

pub mod encode;
pub mod layout;
pub mod merge;
pub mod types;

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{Result, StratumError};

pub use encode::{EncodedValue, encode_value, encode_value_over};
pub use layout::{BufferBindingInfo, LayoutEntry, RuntimeArray, derive_buffer_layout};
pub use merge::{BindGroupLayoutDescriptor, LayoutBinding, PipelineLayoutDescriptor, merge_stages_layout};
pub use types::{NumericClass, ScalarType, WgslKind};

/// The six resource categories a binding can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    UniformBuffer,
    StorageBuffer,
    StorageTexture,
    Texture,
    Sampler,
    ExternalTexture,
}

/// Category plus the sub-fields needed to build a layout entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer {
        min_binding_size: u64,
    },
    StorageBuffer {
        read_only: bool,
        min_binding_size: u64,
    },
    StorageTexture {
        access: wgpu::StorageTextureAccess,
        format: wgpu::TextureFormat,
        view_dimension: wgpu::TextureViewDimension,
    },
    Texture {
        sample_type: wgpu::TextureSampleType,
        view_dimension: wgpu::TextureViewDimension,
        multisampled: bool,
    },
    Sampler {
        comparison: bool,
    },
    ExternalTexture,
}

impl ResourceKind {
    #[must_use]
    pub fn category(&self) -> ResourceCategory {
        match self {
            Self::UniformBuffer { .. } => ResourceCategory::UniformBuffer,
            Self::StorageBuffer { .. } => ResourceCategory::StorageBuffer,
            Self::StorageTexture { .. } => ResourceCategory::StorageTexture,
            Self::Texture { .. } => ResourceCategory::Texture,
            Self::Sampler { .. } => ResourceCategory::Sampler,
            Self::ExternalTexture => ResourceCategory::ExternalTexture,
        }
    }

    /// Stages allowed to see the binding.
    ///
    /// Writable storage is never exposed to the vertex stage.
    #[must_use]
    pub fn visibility(&self) -> wgpu::ShaderStages {
        let writable = wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
        match self {
            Self::StorageBuffer { read_only: false, .. } => writable,
            Self::StorageTexture { access, .. } if *access != wgpu::StorageTextureAccess::ReadOnly => {
                writable
            }
            _ => wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
        }
    }

    /// Layout binding type, with every optional field defaulted.
    #[must_use]
    pub fn binding_type(&self) -> wgpu::BindingType {
        match *self {
            Self::UniformBuffer { min_binding_size } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(min_binding_size),
            },
            Self::StorageBuffer {
                read_only,
                min_binding_size,
            } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(min_binding_size),
            },
            Self::StorageTexture {
                access,
                format,
                view_dimension,
            } => wgpu::BindingType::StorageTexture {
                access,
                format,
                view_dimension,
            },
            Self::Texture {
                sample_type,
                view_dimension,
                multisampled,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled,
            },
            Self::Sampler { comparison: true } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
            }
            Self::Sampler { comparison: false } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
            Self::ExternalTexture => wgpu::BindingType::ExternalTexture,
        }
    }
}

/// One module-scope resource declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    /// Byte layout for uniform and storage buffers.
    pub layout: Option<Arc<BufferBindingInfo>>,
}

/// One vertex-stage input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInput {
    pub location: u32,
    pub name: String,
    pub kind: WgslKind,
}

/// One entry point of the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: wgpu::ShaderStages,
    pub workgroup_size: [u32; 3],
    /// Non-empty only for vertex entry points.
    pub vertex_inputs: Vec<VertexInput>,
}

/// Everything recovered from one WGSL source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReflectionInfo {
    /// Resources in declaration order.
    pub resources: Vec<ResourceBinding>,
    pub entry_points: Vec<EntryPointInfo>,
}

impl ReflectionInfo {
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceBinding> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Resolves the entry point for `stage`.
    ///
    /// An explicit `name` must exist and belong to `stage`; without one the
    /// module must contain exactly one entry point for the stage.
    pub fn entry_point(&self, stage: wgpu::ShaderStages, name: Option<&str>) -> Result<&EntryPointInfo> {
        if let Some(name) = name {
            return self
                .entry_points
                .iter()
                .find(|ep| ep.name == name && ep.stage == stage)
                .ok_or_else(|| StratumError::Validation(format!("no {stage:?} entry point named `{name}`")));
        }
        let mut candidates = self.entry_points.iter().filter(|ep| ep.stage == stage);
        match (candidates.next(), candidates.next()) {
            (Some(ep), None) => Ok(ep),
            (None, _) => Err(StratumError::Validation(format!("module has no {stage:?} entry point"))),
            (Some(_), Some(_)) => Err(StratumError::Validation(format!(
                "module has several {stage:?} entry points; name one explicitly"
            ))),
        }
    }
}

/// Parses `source` and reflects its resources and entry points.
pub fn reflect(source: &str) -> Result<ReflectionInfo> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| StratumError::ShaderParse {
        message: e.message().to_string(),
        excerpt: e.emit_to_string(source),
    })?;

    let loaded = loaded_images(&module);

    let mut resources = Vec::new();
    for (handle, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_else(|| format!("_{}_{}", binding.group, binding.binding));
        let fail = |reason: &str| StratumError::InvalidBindingType {
            name: name.clone(),
            reason: format!("{reason}\n{}", excerpt(source, module.global_variables.get_span(handle))),
        };

        let (kind, layout) = match global.space {
            naga::AddressSpace::Uniform => {
                let layout = buffer_layout(&module, global.ty, source, handle)?;
                (
                    ResourceKind::UniformBuffer {
                        min_binding_size: layout.min_binding_size(),
                    },
                    Some(layout),
                )
            }
            naga::AddressSpace::Storage { access } => {
                let layout = buffer_layout(&module, global.ty, source, handle)?;
                (
                    ResourceKind::StorageBuffer {
                        read_only: !access.contains(naga::StorageAccess::STORE),
                        min_binding_size: layout.min_binding_size(),
                    },
                    Some(layout),
                )
            }
            naga::AddressSpace::Handle => (handle_kind(&module, global.ty, loaded.contains(&handle)).map_err(|r| fail(&r))?, None),
            _ => return Err(fail("resource bindings must be uniform, storage or handle variables")),
        };

        resources.push(ResourceBinding {
            name,
            group: binding.group,
            binding: binding.binding,
            kind,
            layout,
        });
    }

    let entry_points = module
        .entry_points
        .iter()
        .filter_map(|ep| {
            let stage = match ep.stage {
                naga::ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
                naga::ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
                naga::ShaderStage::Compute => wgpu::ShaderStages::COMPUTE,
                _ => return None,
            };
            let vertex_inputs = if stage == wgpu::ShaderStages::VERTEX {
                vertex_inputs(&module, &ep.function)
            } else {
                Vec::new()
            };
            Some(EntryPointInfo {
                name: ep.name.clone(),
                stage,
                workgroup_size: ep.workgroup_size,
                vertex_inputs,
            })
        })
        .collect();

    Ok(ReflectionInfo {
        resources,
        entry_points,
    })
}

fn buffer_layout(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    source: &str,
    global: naga::Handle<naga::GlobalVariable>,
) -> Result<Arc<BufferBindingInfo>> {
    derive_buffer_layout(module, ty)
        .map(Arc::new)
        .map_err(|err| match err {
            StratumError::UnsupportedType { name, excerpt: detail } => StratumError::UnsupportedType {
                name,
                excerpt: format!("{detail}\n{}", excerpt(source, module.global_variables.get_span(global))),
            },
            other => other,
        })
}

fn handle_kind(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    loaded: bool,
) -> std::result::Result<ResourceKind, String> {
    match &module.types[ty].inner {
        naga::TypeInner::Sampler { comparison } => Ok(ResourceKind::Sampler {
            comparison: *comparison,
        }),
        naga::TypeInner::Image { dim, arrayed, class } => {
            let view_dimension = view_dimension(*dim, *arrayed);
            match *class {
                naga::ImageClass::Sampled { kind, multi } => {
                    let sample_type = match kind {
                        naga::ScalarKind::Float => wgpu::TextureSampleType::Float {
                            filterable: !(loaded || multi),
                        },
                        naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                        naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                        other => return Err(format!("unsupported texel type {other:?}")),
                    };
                    Ok(ResourceKind::Texture {
                        sample_type,
                        view_dimension,
                        multisampled: multi,
                    })
                }
                naga::ImageClass::Depth { multi } => Ok(ResourceKind::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension,
                    multisampled: multi,
                }),
                naga::ImageClass::Storage { format, access } => {
                    let format = types::storage_format(format)
                        .ok_or_else(|| format!("unsupported storage format {format:?}"))?;
                    let access = if access.contains(naga::StorageAccess::ATOMIC) {
                        wgpu::StorageTextureAccess::Atomic
                    } else if access.contains(naga::StorageAccess::LOAD | naga::StorageAccess::STORE) {
                        wgpu::StorageTextureAccess::ReadWrite
                    } else if access.contains(naga::StorageAccess::STORE) {
                        wgpu::StorageTextureAccess::WriteOnly
                    } else {
                        wgpu::StorageTextureAccess::ReadOnly
                    };
                    Ok(ResourceKind::StorageTexture {
                        access,
                        format,
                        view_dimension,
                    })
                }
                naga::ImageClass::External => Ok(ResourceKind::ExternalTexture),
            }
        }
        naga::TypeInner::BindingArray { .. } => Err("binding arrays are not supported".to_string()),
        _ => Err("handle variables must be textures or samplers".to_string()),
    }
}

fn view_dimension(dim: naga::ImageDimension, arrayed: bool) -> wgpu::TextureViewDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, _) => wgpu::TextureViewDimension::D1,
        (naga::ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
        (naga::ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
        (naga::ImageDimension::D3, _) => wgpu::TextureViewDimension::D3,
        (naga::ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
        (naga::ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
    }
}

/// Globals read through `textureLoad` anywhere in the module.
fn loaded_images(module: &naga::Module) -> FxHashSet<naga::Handle<naga::GlobalVariable>> {
    let functions = module
        .functions
        .iter()
        .map(|(_, f)| f)
        .chain(module.entry_points.iter().map(|ep| &ep.function));

    let mut loaded = FxHashSet::default();
    for function in functions {
        for (_, expr) in function.expressions.iter() {
            if let naga::Expression::ImageLoad { image, .. } = expr
                && let naga::Expression::GlobalVariable(global) = function.expressions[*image]
            {
                loaded.insert(global);
            }
        }
    }
    loaded
}

fn vertex_inputs(module: &naga::Module, function: &naga::Function) -> Vec<VertexInput> {
    let mut inputs = Vec::new();
    for arg in &function.arguments {
        match &arg.binding {
            Some(naga::Binding::Location { location, .. }) => {
                if let Some(kind) = WgslKind::from_naga(&module.types[arg.ty].inner) {
                    inputs.push(VertexInput {
                        location: *location,
                        name: arg.name.clone().unwrap_or_default(),
                        kind,
                    });
                }
            }
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for member in members {
                        if let Some(naga::Binding::Location { location, .. }) = &member.binding
                            && let Some(kind) = WgslKind::from_naga(&module.types[member.ty].inner)
                        {
                            inputs.push(VertexInput {
                                location: *location,
                                name: member.name.clone().unwrap_or_default(),
                                kind,
                            });
                        }
                    }
                }
            }
        }
    }
    inputs.sort_by_key(|input| input.location);
    inputs
}

/// Source lines around `span`, numbered, with the span's line marked.
pub(crate) fn excerpt(source: &str, span: naga::Span) -> String {
    if !span.is_defined() {
        return String::new();
    }
    let line = span.location(source).line_number as usize;
    let first = line.saturating_sub(2).max(1);
    source
        .lines()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .filter(|(n, _)| *n >= first && *n <= line + 1)
        .map(|(n, text)| {
            let marker = if n == line { '>' } else { ' ' };
            format!("{marker}{n:4} | {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Memoization ──────────────────────────────────────────────────────────────

/// Memoizes [`reflect`] by exact source text.
///
/// Entries are keyed by the xxh3 hash of the source and confirmed against the
/// stored text, so a hash collision costs a re-parse, never a wrong result.
#[derive(Default)]
pub struct ReflectionCache {
    entries: FxHashMap<u64, Vec<(Arc<str>, Arc<ReflectionInfo>)>>,
    hits: u64,
    misses: u64,
}

impl ReflectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached reflection of `source`, parsing it on first use.
    pub fn reflect(&mut self, source: &str) -> Result<Arc<ReflectionInfo>> {
        let hash = xxh3_64(source.as_bytes());
        if let Some(bucket) = self.entries.get(&hash)
            && let Some((_, info)) = bucket.iter().find(|(text, _)| &**text == source)
        {
            self.hits += 1;
            return Ok(Arc::clone(info));
        }

        self.misses += 1;
        let info = Arc::new(reflect(source)?);
        log::debug!(
            "Reflected shader {hash:016x}: {} resources, {} entry points",
            info.resources.len(),
            info.entry_points.len()
        );
        self.entries
            .entry(hash)
            .or_default()
            .push((Arc::from(source), Arc::clone(&info)));
        Ok(info)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
