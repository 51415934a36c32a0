//! Dummy GPU backend for testing and headless use.
//!
//! This backend allocates nothing on a GPU, but it keeps enough state to make
//! the layers above it observable:
//! - every created object is stored with its descriptor,
//! - buffer contents are simulated (`write_buffer`, map-on-create, copies),
//! - query resolves write scripted results (see [`DummyBackend::push_query_results`]),
//! - every submitted encoder is recorded,
//! - device loss can be simulated.
//!
//! Submission validates that every handle a command list references is still
//! alive, so tests catch stale handles the way a real device would.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use slotmap::{Key, SlotMap};

use crate::backend::{
    BindGroupId, BindGroupLayoutId, BufferId, ComputePipelineId, DeviceStatus, GpuBackend,
    GpuBindGroupDescriptor, GpuBufferDescriptor, GpuComputePipelineDescriptor, GpuHandle,
    GpuRenderBundleDescriptor, GpuRenderPipelineDescriptor, GpuTextureDescriptor, MapCallback,
    PipelineLayoutId, QuerySetId, RenderBundleId, RenderPipelineId, SamplerId, ShaderModuleId,
    TextureId, TextureViewId,
};
use crate::commands::{ComputeCommand, EncoderCommand, RecordedEncoder, RenderCommand};
use crate::errors::{Result, StratumError};
use crate::resources::sampler::SamplerKey;
use crate::resources::texture::{TextureViewDescriptor, TextureWrite};

/// Simulated buffer.
#[derive(Debug, Clone)]
pub struct DummyBuffer {
    pub label: String,
    pub usage: wgpu::BufferUsages,
    pub data: Vec<u8>,
}

/// Simulated query set.
#[derive(Debug, Clone, Copy)]
pub struct DummyQuerySet {
    pub ty: wgpu::QueryType,
    pub count: u32,
}

struct PendingMap {
    buffer: BufferId,
    offset: u64,
    size: u64,
    callback: MapCallback,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    features: wgpu::Features,
    timestamp_period: f32,

    shader_modules: SlotMap<ShaderModuleId, String>,
    buffers: SlotMap<BufferId, DummyBuffer>,
    textures: SlotMap<TextureId, GpuTextureDescriptor>,
    texture_views: SlotMap<TextureViewId, (TextureId, TextureViewDescriptor)>,
    samplers: SlotMap<SamplerId, SamplerKey>,
    bind_group_layouts: SlotMap<BindGroupLayoutId, Vec<wgpu::BindGroupLayoutEntry>>,
    pipeline_layouts: SlotMap<PipelineLayoutId, Vec<BindGroupLayoutId>>,
    bind_groups: SlotMap<BindGroupId, GpuBindGroupDescriptor>,
    render_pipelines: SlotMap<RenderPipelineId, GpuRenderPipelineDescriptor>,
    compute_pipelines: SlotMap<ComputePipelineId, GpuComputePipelineDescriptor>,
    query_sets: SlotMap<QuerySetId, DummyQuerySet>,
    render_bundles: SlotMap<RenderBundleId, Vec<RenderCommand>>,

    created: FxHashMap<&'static str, usize>,
    destroyed: FxHashMap<&'static str, usize>,
    buffer_writes: usize,
    texture_writes: usize,
    submitted: Vec<RecordedEncoder>,

    query_results: VecDeque<Vec<u64>>,
    pending_maps: Vec<PendingMap>,

    pending_loss: Option<String>,
    lost: bool,
    device_generation: u32,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("features", &self.features)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("submitted", &self.submitted.len())
            .field("lost", &self.lost)
            .finish_non_exhaustive()
    }
}

impl DummyBackend {
    /// Dummy device with timestamp query support.
    #[must_use]
    pub fn new() -> Self {
        Self::with_features(wgpu::Features::TIMESTAMP_QUERY)
    }

    #[must_use]
    pub fn with_features(features: wgpu::Features) -> Self {
        Self {
            features,
            timestamp_period: 1.0,
            shader_modules: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            texture_views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            bind_group_layouts: SlotMap::with_key(),
            pipeline_layouts: SlotMap::with_key(),
            bind_groups: SlotMap::with_key(),
            render_pipelines: SlotMap::with_key(),
            compute_pipelines: SlotMap::with_key(),
            query_sets: SlotMap::with_key(),
            render_bundles: SlotMap::with_key(),
            created: FxHashMap::default(),
            destroyed: FxHashMap::default(),
            buffer_writes: 0,
            texture_writes: 0,
            submitted: Vec::new(),
            query_results: VecDeque::new(),
            pending_maps: Vec::new(),
            pending_loss: None,
            lost: false,
            device_generation: 0,
        }
    }

    #[must_use]
    pub fn with_timestamp_period(mut self, period: f32) -> Self {
        self.timestamp_period = period;
        self
    }

    // ── Scripting ────────────────────────────────────────────────────────────

    /// Queues the values written by the next `ResolveQuerySet`.
    ///
    /// Without a scripted entry, resolves write zeros.
    pub fn push_query_results(&mut self, values: Vec<u64>) {
        self.query_results.push_back(values);
    }

    /// Reports an unrequested device loss on the next [`poll`](GpuBackend::poll).
    pub fn simulate_device_loss(&mut self, reason: &str) {
        self.pending_loss = Some(reason.to_string());
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Objects of `kind` created since construction (see [`GpuHandle::kind`]).
    #[must_use]
    pub fn created(&self, kind: &str) -> usize {
        self.created.get(kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn destroyed(&self, kind: &str) -> usize {
        self.destroyed.get(kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` currently alive on the device.
    #[must_use]
    pub fn live(&self, kind: &str) -> usize {
        match kind {
            "shader_module" => self.shader_modules.len(),
            "buffer" => self.buffers.len(),
            "texture" => self.textures.len(),
            "texture_view" => self.texture_views.len(),
            "sampler" => self.samplers.len(),
            "bind_group_layout" => self.bind_group_layouts.len(),
            "pipeline_layout" => self.pipeline_layouts.len(),
            "bind_group" => self.bind_groups.len(),
            "render_pipeline" => self.render_pipelines.len(),
            "compute_pipeline" => self.compute_pipelines.len(),
            "query_set" => self.query_sets.len(),
            "render_bundle" => self.render_bundles.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn buffer(&self, id: BufferId) -> Option<&DummyBuffer> {
        self.buffers.get(id)
    }

    #[must_use]
    pub fn texture(&self, id: TextureId) -> Option<&GpuTextureDescriptor> {
        self.textures.get(id)
    }

    /// Texture a view was created from.
    #[must_use]
    pub fn view_texture(&self, id: TextureViewId) -> Option<TextureId> {
        self.texture_views.get(id).map(|(texture, _)| *texture)
    }

    #[must_use]
    pub fn sampler(&self, id: SamplerId) -> Option<&SamplerKey> {
        self.samplers.get(id)
    }

    #[must_use]
    pub fn bind_group_layout(&self, id: BindGroupLayoutId) -> Option<&[wgpu::BindGroupLayoutEntry]> {
        self.bind_group_layouts.get(id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn bind_group(&self, id: BindGroupId) -> Option<&GpuBindGroupDescriptor> {
        self.bind_groups.get(id)
    }

    #[must_use]
    pub fn render_pipeline(&self, id: RenderPipelineId) -> Option<&GpuRenderPipelineDescriptor> {
        self.render_pipelines.get(id)
    }

    #[must_use]
    pub fn query_set(&self, id: QuerySetId) -> Option<DummyQuerySet> {
        self.query_sets.get(id).copied()
    }

    #[must_use]
    pub fn render_bundle(&self, id: RenderBundleId) -> Option<&[RenderCommand]> {
        self.render_bundles.get(id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn buffer_writes(&self) -> usize {
        self.buffer_writes
    }

    #[must_use]
    pub fn texture_writes(&self) -> usize {
        self.texture_writes
    }

    /// Every encoder submitted so far, in submission order.
    #[must_use]
    pub fn submitted(&self) -> &[RecordedEncoder] {
        &self.submitted
    }

    pub fn take_submitted(&mut self) -> Vec<RecordedEncoder> {
        std::mem::take(&mut self.submitted)
    }

    /// Number of devices acquired after the first one.
    #[must_use]
    pub fn device_generation(&self) -> u32 {
        self.device_generation
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn count_created(&mut self, kind: &'static str, label: &str) {
        *self.created.entry(kind).or_default() += 1;
        log::trace!("DummyBackend: created {kind} {label:?}");
    }

    fn clear_objects(&mut self) {
        self.shader_modules.clear();
        self.buffers.clear();
        self.textures.clear();
        self.texture_views.clear();
        self.samplers.clear();
        self.bind_group_layouts.clear();
        self.pipeline_layouts.clear();
        self.bind_groups.clear();
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
        self.query_sets.clear();
        self.render_bundles.clear();
        self.pending_maps.clear();
    }

    fn check<K: Key, V>(map: &SlotMap<K, V>, key: K, what: &str) -> Result<()> {
        if map.contains_key(key) {
            Ok(())
        } else {
            Err(StratumError::Validation(format!("submitted command references a destroyed {what}")))
        }
    }

    fn validate_render_commands(&self, commands: &[RenderCommand]) -> Result<()> {
        for command in commands {
            match command {
                RenderCommand::SetPipeline(p) => Self::check(&self.render_pipelines, *p, "render pipeline")?,
                RenderCommand::SetBindGroup { bind_group, .. } => {
                    Self::check(&self.bind_groups, *bind_group, "bind group")?;
                }
                RenderCommand::SetVertexBuffer { buffer, .. }
                | RenderCommand::SetIndexBuffer { buffer, .. }
                | RenderCommand::DrawIndirect { buffer, .. }
                | RenderCommand::DrawIndexedIndirect { buffer, .. } => {
                    Self::check(&self.buffers, *buffer, "buffer")?;
                }
                RenderCommand::ExecuteBundles(bundles) => {
                    for bundle in bundles {
                        Self::check(&self.render_bundles, *bundle, "render bundle")?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate(&self, command: &EncoderCommand) -> Result<()> {
        match command {
            EncoderCommand::RenderPass(pass) => {
                for attachment in &pass.color_attachments {
                    Self::check(&self.texture_views, attachment.view, "texture view")?;
                    if let Some(resolve) = attachment.resolve_target {
                        Self::check(&self.texture_views, resolve, "texture view")?;
                    }
                }
                if let Some(depth) = &pass.depth_stencil {
                    Self::check(&self.texture_views, depth.view, "texture view")?;
                }
                if let Some(set) = pass.occlusion_query_set {
                    Self::check(&self.query_sets, set, "query set")?;
                }
                self.validate_render_commands(&pass.commands)
            }
            EncoderCommand::ComputePass(pass) => {
                for command in &pass.commands {
                    match command {
                        ComputeCommand::SetPipeline(p) => {
                            Self::check(&self.compute_pipelines, *p, "compute pipeline")?;
                        }
                        ComputeCommand::SetBindGroup { bind_group, .. } => {
                            Self::check(&self.bind_groups, *bind_group, "bind group")?;
                        }
                        ComputeCommand::DispatchIndirect { buffer, .. } => {
                            Self::check(&self.buffers, *buffer, "buffer")?;
                        }
                        ComputeCommand::Dispatch(_) => {}
                    }
                }
                Ok(())
            }
            EncoderCommand::CopyBufferToBuffer {
                source, destination, ..
            } => {
                Self::check(&self.buffers, *source, "buffer")?;
                Self::check(&self.buffers, *destination, "buffer")
            }
            EncoderCommand::CopyTextureToTexture {
                source, destination, ..
            } => {
                Self::check(&self.textures, source.texture, "texture")?;
                Self::check(&self.textures, destination.texture, "texture")
            }
            EncoderCommand::ResolveQuerySet {
                query_set,
                destination,
                ..
            } => {
                Self::check(&self.query_sets, *query_set, "query set")?;
                Self::check(&self.buffers, *destination, "buffer")
            }
        }
    }

    fn execute(&mut self, command: &EncoderCommand) {
        match command {
            EncoderCommand::CopyBufferToBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => {
                let bytes = self.buffers.get(*source).and_then(|b| {
                    let start = *source_offset as usize;
                    b.data.get(start..start + *size as usize).map(<[u8]>::to_vec)
                });
                if let (Some(bytes), Some(dst)) = (bytes, self.buffers.get_mut(*destination)) {
                    copy_into(&mut dst.data, *destination_offset, &bytes);
                }
            }
            EncoderCommand::ResolveQuerySet {
                queries,
                destination,
                destination_offset,
                ..
            } => {
                let values = self.query_results.pop_front().unwrap_or_default();
                let mut bytes = Vec::with_capacity(queries.len() * 8);
                for i in 0..queries.len() {
                    bytes.extend_from_slice(&values.get(i).copied().unwrap_or(0).to_le_bytes());
                }
                if let Some(dst) = self.buffers.get_mut(*destination) {
                    copy_into(&mut dst.data, *destination_offset, &bytes);
                }
            }
            _ => {}
        }
    }
}

fn copy_into(target: &mut [u8], offset: u64, bytes: &[u8]) {
    let start = offset as usize;
    let end = (start + bytes.len()).min(target.len());
    if start < end {
        target[start..end].copy_from_slice(&bytes[..end - start]);
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy Backend"
    }

    fn features(&self) -> wgpu::Features {
        self.features
    }

    fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }

    fn create_shader_module(&mut self, label: &str, _source: &str) -> Result<ShaderModuleId> {
        self.count_created("shader_module", label);
        Ok(self.shader_modules.insert(label.to_string()))
    }

    fn create_buffer(&mut self, desc: &GpuBufferDescriptor) -> Result<BufferId> {
        self.count_created("buffer", &desc.label);
        let mut data = vec![0u8; desc.size as usize];
        if let Some(contents) = &desc.contents {
            copy_into(&mut data, 0, contents);
        }
        Ok(self.buffers.insert(DummyBuffer {
            label: desc.label.clone(),
            usage: desc.usage,
            data,
        }))
    }

    fn create_texture(&mut self, desc: &GpuTextureDescriptor) -> Result<TextureId> {
        self.count_created("texture", &desc.label);
        Ok(self.textures.insert(desc.clone()))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        label: &str,
        desc: &TextureViewDescriptor,
    ) -> Result<TextureViewId> {
        if !self.textures.contains_key(texture) {
            return Err(StratumError::ResourceCreationFailed(format!(
                "view `{label}` of a destroyed texture"
            )));
        }
        self.count_created("texture_view", label);
        Ok(self.texture_views.insert((texture, *desc)))
    }

    fn create_sampler(&mut self, label: &str, desc: &SamplerKey) -> Result<SamplerId> {
        self.count_created("sampler", label);
        Ok(self.samplers.insert(*desc))
    }

    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<BindGroupLayoutId> {
        self.count_created("bind_group_layout", label);
        Ok(self.bind_group_layouts.insert(entries.to_vec()))
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId> {
        self.count_created("pipeline_layout", label);
        Ok(self.pipeline_layouts.insert(bind_group_layouts.to_vec()))
    }

    fn create_bind_group(&mut self, desc: &GpuBindGroupDescriptor) -> Result<BindGroupId> {
        if !self.bind_group_layouts.contains_key(desc.layout) {
            return Err(StratumError::ResourceCreationFailed(format!(
                "bind group `{}` uses a destroyed layout",
                desc.label
            )));
        }
        self.count_created("bind_group", &desc.label);
        Ok(self.bind_groups.insert(desc.clone()))
    }

    fn create_render_pipeline(&mut self, desc: &GpuRenderPipelineDescriptor) -> Result<RenderPipelineId> {
        self.count_created("render_pipeline", &desc.label);
        Ok(self.render_pipelines.insert(desc.clone()))
    }

    fn create_compute_pipeline(&mut self, desc: &GpuComputePipelineDescriptor) -> Result<ComputePipelineId> {
        self.count_created("compute_pipeline", &desc.label);
        Ok(self.compute_pipelines.insert(desc.clone()))
    }

    fn create_query_set(&mut self, label: &str, ty: wgpu::QueryType, count: u32) -> Result<QuerySetId> {
        if matches!(ty, wgpu::QueryType::Timestamp) && !self.features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(StratumError::FeatureNotSupported("TIMESTAMP_QUERY".to_string()));
        }
        self.count_created("query_set", label);
        Ok(self.query_sets.insert(DummyQuerySet { ty, count }))
    }

    fn create_render_bundle(&mut self, desc: &GpuRenderBundleDescriptor<'_>) -> Result<RenderBundleId> {
        if let Some(command) = desc.commands.iter().find(|c| c.is_pass_only()) {
            return Err(StratumError::Validation(format!(
                "render bundle `{}` records pass-level command {}",
                desc.label,
                command.name()
            )));
        }
        self.count_created("render_bundle", &desc.label);
        Ok(self.render_bundles.insert(desc.commands.to_vec()))
    }

    fn destroy(&mut self, handle: GpuHandle) {
        let removed = match handle {
            GpuHandle::ShaderModule(id) => self.shader_modules.remove(id).is_some(),
            GpuHandle::Buffer(id) => self.buffers.remove(id).is_some(),
            GpuHandle::Texture(id) => self.textures.remove(id).is_some(),
            GpuHandle::TextureView(id) => self.texture_views.remove(id).is_some(),
            GpuHandle::Sampler(id) => self.samplers.remove(id).is_some(),
            GpuHandle::BindGroupLayout(id) => self.bind_group_layouts.remove(id).is_some(),
            GpuHandle::PipelineLayout(id) => self.pipeline_layouts.remove(id).is_some(),
            GpuHandle::BindGroup(id) => self.bind_groups.remove(id).is_some(),
            GpuHandle::RenderPipeline(id) => self.render_pipelines.remove(id).is_some(),
            GpuHandle::ComputePipeline(id) => self.compute_pipelines.remove(id).is_some(),
            GpuHandle::QuerySet(id) => self.query_sets.remove(id).is_some(),
            GpuHandle::RenderBundle(id) => self.render_bundles.remove(id).is_some(),
        };
        if removed {
            *self.destroyed.entry(handle.kind()).or_default() += 1;
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        self.buffer_writes += 1;
        match self.buffers.get_mut(buffer) {
            Some(target) => copy_into(&mut target.data, offset, data),
            None => log::warn!("DummyBackend: write to a destroyed buffer"),
        }
    }

    fn write_texture(&mut self, texture: TextureId, write: &TextureWrite) {
        self.texture_writes += 1;
        if !self.textures.contains_key(texture) {
            log::warn!("DummyBackend: upload of {} bytes to a destroyed texture", write.data.len());
        }
    }

    fn submit(&mut self, encoders: &[RecordedEncoder]) -> Result<()> {
        if self.lost {
            return Err(StratumError::DeviceLost("submit on a lost device".to_string()));
        }
        for encoder in encoders {
            for command in &encoder.commands {
                self.validate(command)?;
            }
        }
        for encoder in encoders {
            for command in &encoder.commands {
                self.execute(command);
            }
            self.submitted.push(encoder.clone());
        }
        Ok(())
    }

    fn map_read(&mut self, buffer: BufferId, offset: u64, size: u64, callback: MapCallback) {
        self.pending_maps.push(PendingMap {
            buffer,
            offset,
            size,
            callback,
        });
    }

    fn poll(&mut self) -> DeviceStatus {
        for map in std::mem::take(&mut self.pending_maps) {
            let start = map.offset as usize;
            let result = self
                .buffers
                .get(map.buffer)
                .and_then(|b| b.data.get(start..start + map.size as usize))
                .map(<[u8]>::to_vec)
                .ok_or_else(|| StratumError::MapFailed("buffer destroyed or range out of bounds".to_string()));
            (map.callback)(result);
        }

        if let Some(reason) = self.pending_loss.take() {
            self.lost = true;
            return DeviceStatus::Lost {
                reason,
                requested: false,
            };
        }
        DeviceStatus::Ok
    }

    fn destroy_device(&mut self) {
        self.lost = true;
        self.clear_objects();
    }

    fn reacquire(&mut self) -> Result<()> {
        self.clear_objects();
        self.lost = false;
        self.device_generation += 1;
        log::info!("DummyBackend: acquired device #{}", self.device_generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::RecordedEncoder;

    fn buffer(backend: &mut DummyBackend, size: u64) -> BufferId {
        backend
            .create_buffer(&GpuBufferDescriptor {
                label: "b".to_string(),
                size,
                usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                contents: None,
            })
            .unwrap()
    }

    #[test]
    fn copies_and_maps_simulate_contents() {
        let mut backend = DummyBackend::new();
        let src = buffer(&mut backend, 8);
        let dst = buffer(&mut backend, 8);
        backend.write_buffer(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        backend
            .submit(&[RecordedEncoder {
                label: None,
                commands: vec![EncoderCommand::CopyBufferToBuffer {
                    source: src,
                    source_offset: 4,
                    destination: dst,
                    destination_offset: 0,
                    size: 4,
                }],
            }])
            .unwrap();

        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let sink = seen.clone();
        backend.map_read(dst, 0, 4, Box::new(move |r: Result<Vec<u8>>| *sink.borrow_mut() = Some(r.unwrap())));
        assert!(seen.borrow().is_none());
        assert_eq!(backend.poll(), DeviceStatus::Ok);
        assert_eq!(seen.borrow().as_deref(), Some(&[5u8, 6, 7, 8][..]));
    }

    #[test]
    fn stale_handles_are_rejected_at_submit() {
        let mut backend = DummyBackend::new();
        let a = buffer(&mut backend, 4);
        let b = buffer(&mut backend, 4);
        backend.destroy(GpuHandle::Buffer(b));
        let err = backend
            .submit(&[RecordedEncoder {
                label: None,
                commands: vec![EncoderCommand::CopyBufferToBuffer {
                    source: a,
                    source_offset: 0,
                    destination: b,
                    destination_offset: 0,
                    size: 4,
                }],
            }])
            .unwrap_err();
        assert!(matches!(err, StratumError::Validation(_)));
        assert_eq!(backend.destroyed("buffer"), 1);
        assert_eq!(backend.live("buffer"), 1);
    }

    #[test]
    fn reacquire_invalidates_old_handles() {
        let mut backend = DummyBackend::new();
        let old = buffer(&mut backend, 4);
        backend.simulate_device_loss("driver reset");
        assert!(matches!(backend.poll(), DeviceStatus::Lost { requested: false, .. }));
        backend.reacquire().unwrap();
        let new = buffer(&mut backend, 4);
        assert_ne!(old, new);
        assert!(backend.buffer(old).is_none());
    }
}
