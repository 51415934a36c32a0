//! Shader modules and derived pipeline programs
//!
//! A [`Program`] is everything a pipeline descriptor implies before any GPU
//! object exists: the reflection of each stage, the resolved entry points and
//! the merged pipeline layout. It is memoized per descriptor and rebuilt only
//! when the descriptor generation moves.
//!
//! Shader modules are content-keyed by the xxh3-128 hash of their source, so
//! two descriptors sharing a source share one module.

use std::sync::Arc;

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_128;

use crate::backend::{GpuBackend, ShaderModuleId};
use crate::cache::ResourceCache;
use crate::errors::Result;
use crate::reflection::{EntryPointInfo, PipelineLayoutDescriptor, ReflectionInfo, merge_stages_layout};
use crate::resources::pipeline::{ComputePipeline, RenderPipeline, ShaderStage};
use crate::resources::tracked::Liveness;

/// One resolved shader stage.
#[derive(Debug, Clone)]
pub struct ProgramStage {
    pub stage: wgpu::ShaderStages,
    pub source: Arc<str>,
    pub source_hash: u128,
    pub entry_point: String,
    pub reflection: Arc<ReflectionInfo>,
}

impl ProgramStage {
    /// Reflection of the resolved entry point.
    #[must_use]
    pub fn entry(&self) -> Option<&EntryPointInfo> {
        self.reflection
            .entry_points
            .iter()
            .find(|ep| ep.stage == self.stage && ep.name == self.entry_point)
    }
}

/// Derived, device-independent metadata of one pipeline descriptor.
#[derive(Debug)]
pub struct Program {
    /// Descriptor generation this program was derived from.
    pub version: u64,
    /// Vertex then fragment for render pipelines; the compute stage otherwise.
    pub stages: SmallVec<[ProgramStage; 2]>,
    pub layout: Arc<PipelineLayoutDescriptor>,
    pub(crate) owner: Liveness,
}

impl ResourceCache {
    fn program_stage(&mut self, stage: wgpu::ShaderStages, shader: &ShaderStage) -> Result<ProgramStage> {
        let reflection = self.reflection.reflect(&shader.source)?;
        let entry_point = reflection
            .entry_point(stage, shader.entry_point.as_deref())?
            .name
            .clone();
        Ok(ProgramStage {
            stage,
            source: Arc::clone(&shader.source),
            source_hash: xxh3_128(shader.source.as_bytes()),
            entry_point,
            reflection,
        })
    }

    fn build_program(&mut self, version: u64, owner: Liveness, stages: SmallVec<[ProgramStage; 2]>) -> Program {
        let layout = {
            let reflections: SmallVec<[&ReflectionInfo; 2]> = stages.iter().map(|s| &*s.reflection).collect();
            merge_stages_layout(&reflections)
        };
        Program {
            version,
            stages,
            layout: Arc::new(layout),
            owner,
        }
    }

    /// Program of a render pipeline descriptor.
    pub fn render_program(&mut self, pipeline: &RenderPipeline) -> Result<Arc<Program>> {
        let version = pipeline.version();
        if let Some(program) = self.programs.get(&pipeline.id())
            && program.version == version
        {
            return Ok(Arc::clone(program));
        }

        let (vertex, fragment) = {
            let desc = pipeline.read();
            (desc.vertex.clone(), desc.fragment.as_ref().map(|f| f.stage.clone()))
        };
        let mut stages = SmallVec::new();
        stages.push(self.program_stage(wgpu::ShaderStages::VERTEX, &vertex)?);
        if let Some(fragment) = &fragment {
            stages.push(self.program_stage(wgpu::ShaderStages::FRAGMENT, fragment)?);
        }

        let program = Arc::new(self.build_program(version, pipeline.liveness(), stages));
        self.programs.insert(pipeline.id(), Arc::clone(&program));
        Ok(program)
    }

    /// Program of a compute pipeline descriptor.
    pub fn compute_program(&mut self, pipeline: &ComputePipeline) -> Result<Arc<Program>> {
        let version = pipeline.version();
        if let Some(program) = self.programs.get(&pipeline.id())
            && program.version == version
        {
            return Ok(Arc::clone(program));
        }

        let compute = pipeline.read().compute.clone();
        let mut stages = SmallVec::new();
        stages.push(self.program_stage(wgpu::ShaderStages::COMPUTE, &compute)?);

        let program = Arc::new(self.build_program(version, pipeline.liveness(), stages));
        self.programs.insert(pipeline.id(), Arc::clone(&program));
        Ok(program)
    }

    /// Shader module of one stage, shared by every stage with the same source.
    pub fn shader_module<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        stage: &ProgramStage,
    ) -> Result<ShaderModuleId> {
        let label = self.settings.label("ShaderModule", Some(&stage.entry_point));
        self.shader_modules
            .get_or_create(
                backend,
                stage.source_hash,
                0,
                Liveness::detached(),
                self.frame,
                |backend| backend.create_shader_module(&label, &stage.source),
            )
            .map(|r| r.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::cache::Capabilities;
    use crate::resources::pipeline::RenderPipelineDescriptor;
    use crate::settings::Settings;

    const SOURCE: &str = "
@group(0) @binding(0) var<uniform> tint: vec4<f32>;
@vertex fn vs(@location(0) pos: vec2<f32>) -> @builtin(position) vec4<f32> { return vec4<f32>(pos, 0.0, 1.0); }
@fragment fn fs() -> @location(0) vec4<f32> { return tint; }
";

    fn cache(backend: &DummyBackend) -> ResourceCache {
        ResourceCache::new(Settings::default(), Capabilities::detect(backend))
    }

    #[test]
    fn program_is_memoized_until_descriptor_changes() {
        let backend = DummyBackend::new();
        let mut cache = cache(&backend);
        let pipeline = RenderPipeline::new(RenderPipelineDescriptor::new(SOURCE));

        let a = cache.render_program(&pipeline).unwrap();
        let b = cache.render_program(&pipeline).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.stages.len(), 2);
        assert_eq!(a.stages[0].entry_point, "vs");
        assert_eq!(a.stages[1].entry_point, "fs");
        assert_eq!(a.layout.groups[0].entries.len(), 1);

        pipeline.write().label = Some("renamed".to_string());
        let c = cache.render_program(&pipeline).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        // Same source text: the reflection itself is reused.
        assert_eq!(cache.reflection.counters(), (3, 1));
    }

    #[test]
    fn both_stages_share_one_module() {
        let mut backend = DummyBackend::new();
        let mut cache = cache(&backend);
        let pipeline = RenderPipeline::new(RenderPipelineDescriptor::new(SOURCE));
        let program = cache.render_program(&pipeline).unwrap();

        let vs = cache.shader_module(&mut backend, &program.stages[0]).unwrap();
        let fs = cache.shader_module(&mut backend, &program.stages[1]).unwrap();
        assert_eq!(vs, fs);
        assert_eq!(backend.created("shader_module"), 1);
    }
}
