//! wgpu backend
//!
//! [`WgpuBackend`] owns the adapter, device and queue, and stores every
//! created object in a slot map so the layers above it only ever see typed
//! handles. Recorded encoders are replayed onto real `wgpu` encoders at submit
//! time.
//!
//! Creation calls run inside a validation error scope, so invalid descriptors
//! come back as [`StratumError::ResourceCreationFailed`] instead of reaching
//! the uncaptured error handler.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::{
    BindGroupId, BindGroupLayoutId, BufferId, ComputePipelineId, DeviceStatus, GpuBackend,
    GpuBindGroupDescriptor, GpuBindingResource, GpuBufferDescriptor, GpuComputePipelineDescriptor,
    GpuHandle, GpuRenderBundleDescriptor, GpuRenderPipelineDescriptor, GpuTextureDescriptor,
    MapCallback, PipelineLayoutId, QuerySetId, RenderBundleId, RenderPipelineId, SamplerId,
    ShaderModuleId, TextureId, TextureViewId,
};
use crate::commands::{
    ComputeCommand, EncoderCommand, RecordedComputePass, RecordedEncoder, RecordedRenderPass,
    RenderCommand, TimestampWrites,
};
use crate::errors::{Result, StratumError};
use crate::resources::sampler::SamplerKey;
use crate::resources::texture::{TextureViewDescriptor, TextureWrite};

/// How [`WgpuBackend`] picks its adapter and device.
#[derive(Debug, Clone)]
pub struct WgpuBackendOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    /// Features the device must have.
    pub required_features: wgpu::Features,
    /// Features enabled when the adapter supports them.
    pub optional_features: wgpu::Features,
    /// `None` requests the adapter's own limits.
    pub required_limits: Option<wgpu::Limits>,
}

impl Default for WgpuBackendOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            optional_features: wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::EXTERNAL_TEXTURE,
            required_limits: None,
        }
    }
}

/// Every live wgpu object, addressed by handle.
#[derive(Default)]
struct Objects {
    shader_modules: SlotMap<ShaderModuleId, wgpu::ShaderModule>,
    buffers: SlotMap<BufferId, wgpu::Buffer>,
    textures: SlotMap<TextureId, wgpu::Texture>,
    texture_views: SlotMap<TextureViewId, wgpu::TextureView>,
    samplers: SlotMap<SamplerId, wgpu::Sampler>,
    bind_group_layouts: SlotMap<BindGroupLayoutId, wgpu::BindGroupLayout>,
    pipeline_layouts: SlotMap<PipelineLayoutId, wgpu::PipelineLayout>,
    bind_groups: SlotMap<BindGroupId, wgpu::BindGroup>,
    render_pipelines: SlotMap<RenderPipelineId, wgpu::RenderPipeline>,
    compute_pipelines: SlotMap<ComputePipelineId, wgpu::ComputePipeline>,
    query_sets: SlotMap<QuerySetId, wgpu::QuerySet>,
    render_bundles: SlotMap<RenderBundleId, wgpu::RenderBundle>,
}

impl Objects {
    /// Drops every object. Slot versions are bumped, so old handles stay dead.
    fn clear(&mut self) {
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
    }
}

fn missing(what: &str) -> StratumError {
    StratumError::Validation(format!("command references a destroyed {what}"))
}

macro_rules! lookup {
    ($map:expr, $id:expr, $what:literal) => {
        $map.get($id).ok_or_else(|| missing($what))?
    };
}

/// Replays render commands onto a `wgpu::RenderPass` or a
/// `wgpu::RenderBundleEncoder`; both expose the same method names.
macro_rules! replay_render_commands {
    ($target:expr, $objects:expr, $commands:expr, $allow_pass_state:expr) => {{
        let target = $target;
        let objects: &Objects = $objects;
        for command in $commands {
            match command {
                RenderCommand::SetPipeline(id) => {
                    target.set_pipeline(lookup!(objects.render_pipelines, *id, "render pipeline"));
                }
                RenderCommand::SetBindGroup {
                    index,
                    bind_group,
                    offsets,
                } => {
                    let group = lookup!(objects.bind_groups, *bind_group, "bind group");
                    target.set_bind_group(*index, group, offsets);
                }
                RenderCommand::SetVertexBuffer {
                    slot,
                    buffer,
                    offset,
                    size,
                } => {
                    let buffer = lookup!(objects.buffers, *buffer, "buffer");
                    let slice = match size {
                        Some(size) => buffer.slice(*offset..*offset + *size),
                        None => buffer.slice(*offset..),
                    };
                    target.set_vertex_buffer(*slot, slice);
                }
                RenderCommand::SetIndexBuffer {
                    buffer,
                    format,
                    offset,
                    size,
                } => {
                    let buffer = lookup!(objects.buffers, *buffer, "buffer");
                    let slice = match size {
                        Some(size) => buffer.slice(*offset..*offset + *size),
                        None => buffer.slice(*offset..),
                    };
                    target.set_index_buffer(slice, *format);
                }
                RenderCommand::Draw {
                    vertices,
                    instances,
                } => target.draw(vertices.clone(), instances.clone()),
                RenderCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => target.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                RenderCommand::DrawIndirect { buffer, offset } => {
                    target.draw_indirect(lookup!(objects.buffers, *buffer, "buffer"), *offset);
                }
                RenderCommand::DrawIndexedIndirect { buffer, offset } => {
                    target.draw_indexed_indirect(lookup!(objects.buffers, *buffer, "buffer"), *offset);
                }
                other => $allow_pass_state(&mut *target, objects, other)?,
            }
        }
    }};
}

fn replay_pass_state(pass: &mut wgpu::RenderPass<'_>, objects: &Objects, command: &RenderCommand) -> Result<()> {
    match command {
        RenderCommand::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        } => pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth),
        RenderCommand::SetScissorRect { x, y, width, height } => pass.set_scissor_rect(*x, *y, *width, *height),
        RenderCommand::SetBlendConstant(color) => pass.set_blend_constant(*color),
        RenderCommand::SetStencilReference(reference) => pass.set_stencil_reference(*reference),
        RenderCommand::BeginOcclusionQuery(index) => pass.begin_occlusion_query(*index),
        RenderCommand::EndOcclusionQuery => pass.end_occlusion_query(),
        RenderCommand::ExecuteBundles(ids) => {
            let bundles = ids
                .iter()
                .map(|id| objects.render_bundles.get(*id).ok_or_else(|| missing("render bundle")))
                .collect::<Result<Vec<_>>>()?;
            pass.execute_bundles(bundles);
        }
        _ => {}
    }
    Ok(())
}

fn reject_in_bundle(
    _encoder: &mut wgpu::RenderBundleEncoder<'_>,
    _objects: &Objects,
    command: &RenderCommand,
) -> Result<()> {
    Err(StratumError::Validation(format!(
        "{} cannot be recorded into a render bundle",
        command.name()
    )))
}

/// A pending `map_async` whose completion has not been observed yet.
struct PendingMap {
    buffer: BufferId,
    offset: u64,
    size: u64,
    callback: MapCallback,
}

/// Backend driving a real `wgpu` device.
pub struct WgpuBackend {
    options: WgpuBackendOptions,
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    objects: Objects,

    lost: Arc<Mutex<Option<(String, bool)>>>,
    lost_reported: bool,

    next_map_token: u64,
    pending_maps: FxHashMap<u64, PendingMap>,
    map_sender: flume::Sender<(u64, std::result::Result<(), wgpu::BufferAsyncError>)>,
    map_receiver: flume::Receiver<(u64, std::result::Result<(), wgpu::BufferAsyncError>)>,
}

impl WgpuBackend {
    /// Requests an adapter and a device, blocking on the futures.
    pub fn new(options: WgpuBackendOptions) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let (adapter, device, queue) = pollster::block_on(Self::acquire(&instance, &options))?;
        let (map_sender, map_receiver) = flume::unbounded();

        let backend = Self {
            options,
            instance,
            adapter,
            device,
            queue,
            objects: Objects::default(),
            lost: Arc::default(),
            lost_reported: false,
            next_map_token: 0,
            pending_maps: FxHashMap::default(),
            map_sender,
            map_receiver,
        };
        backend.install_lost_callback();
        Ok(backend)
    }

    async fn acquire(
        instance: &wgpu::Instance,
        options: &WgpuBackendOptions,
    ) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .map_err(|e| StratumError::AdapterRequestFailed(e.to_string()))?;

        let available = adapter.features();
        if !available.contains(options.required_features) {
            return Err(StratumError::FeatureNotSupported(format!(
                "{:?}",
                options.required_features - available
            )));
        }
        let features = options.required_features | (options.optional_features & available);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("stratum device"),
                required_features: features,
                required_limits: options.required_limits.clone().unwrap_or_else(|| adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?}), features {:?}", info.name, info.backend, features);
        Ok((adapter, device, queue))
    }

    fn install_lost_callback(&self) {
        let lost = self.lost.clone();
        self.device.set_device_lost_callback(move |reason, message| {
            let requested = matches!(reason, wgpu::DeviceLostReason::Destroyed);
            log::warn!("Device lost ({reason:?}): {message}");
            *lost.lock() = Some((message, requested));
        });
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Native `wgpu` texture behind a handle, e.g. for presenting a target.
    #[must_use]
    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.objects.textures.get(id)
    }

    #[must_use]
    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.objects.buffers.get(id)
    }

    /// Runs `create` inside a validation error scope.
    fn scoped<T>(&self, what: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(scope.pop()) {
            Some(error) => Err(StratumError::ResourceCreationFailed(format!("{what}: {error}"))),
            None => Ok(value),
        }
    }

    fn timestamp_writes<'a>(&'a self, writes: Option<&TimestampWrites>) -> Result<Option<(&'a wgpu::QuerySet, TimestampWrites)>> {
        writes
            .map(|w| {
                self.objects
                    .query_sets
                    .get(w.query_set)
                    .map(|set| (set, *w))
                    .ok_or_else(|| missing("query set"))
            })
            .transpose()
    }

    fn encode_render_pass(&self, encoder: &mut wgpu::CommandEncoder, recorded: &RecordedRenderPass) -> Result<()> {
        let objects = &self.objects;
        let color_attachments = recorded
            .color_attachments
            .iter()
            .map(|attachment| -> Result<Option<wgpu::RenderPassColorAttachment<'_>>> {
                let view = lookup!(objects.texture_views, attachment.view, "texture view");
                let resolve_target = match attachment.resolve_target {
                    Some(id) => Some(lookup!(objects.texture_views, id, "texture view")),
                    None => None,
                };
                Ok(Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target,
                    ops: attachment.ops,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let depth_stencil_attachment = match &recorded.depth_stencil {
            Some(depth) => Some(wgpu::RenderPassDepthStencilAttachment {
                view: lookup!(objects.texture_views, depth.view, "texture view"),
                depth_ops: depth.depth_ops,
                stencil_ops: depth.stencil_ops,
            }),
            None => None,
        };
        let occlusion_query_set = match recorded.occlusion_query_set {
            Some(id) => Some(lookup!(objects.query_sets, id, "query set")),
            None => None,
        };
        let timestamps = self.timestamp_writes(recorded.timestamp_writes.as_ref())?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: recorded.label.as_deref(),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: timestamps.map(|(query_set, w)| wgpu::RenderPassTimestampWrites {
                query_set,
                beginning_of_pass_write_index: w.beginning_of_pass,
                end_of_pass_write_index: w.end_of_pass,
            }),
            occlusion_query_set,
            ..Default::default()
        });
        replay_render_commands!(&mut pass, objects, &recorded.commands, replay_pass_state);
        Ok(())
    }

    fn encode_compute_pass(&self, encoder: &mut wgpu::CommandEncoder, recorded: &RecordedComputePass) -> Result<()> {
        let objects = &self.objects;
        let timestamps = self.timestamp_writes(recorded.timestamp_writes.as_ref())?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: recorded.label.as_deref(),
            timestamp_writes: timestamps.map(|(query_set, w)| wgpu::ComputePassTimestampWrites {
                query_set,
                beginning_of_pass_write_index: w.beginning_of_pass,
                end_of_pass_write_index: w.end_of_pass,
            }),
        });
        for command in &recorded.commands {
            match command {
                ComputeCommand::SetPipeline(id) => {
                    pass.set_pipeline(lookup!(objects.compute_pipelines, *id, "compute pipeline"));
                }
                ComputeCommand::SetBindGroup {
                    index,
                    bind_group,
                    offsets,
                } => {
                    pass.set_bind_group(*index, lookup!(objects.bind_groups, *bind_group, "bind group"), offsets);
                }
                ComputeCommand::Dispatch([x, y, z]) => pass.dispatch_workgroups(*x, *y, *z),
                ComputeCommand::DispatchIndirect { buffer, offset } => {
                    pass.dispatch_workgroups_indirect(lookup!(objects.buffers, *buffer, "buffer"), *offset);
                }
            }
        }
        Ok(())
    }

    fn encode(&self, recorded: &RecordedEncoder) -> Result<wgpu::CommandBuffer> {
        let objects = &self.objects;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: recorded.label.as_deref(),
        });
        for command in &recorded.commands {
            match command {
                EncoderCommand::RenderPass(pass) => self.encode_render_pass(&mut encoder, pass)?,
                EncoderCommand::ComputePass(pass) => self.encode_compute_pass(&mut encoder, pass)?,
                EncoderCommand::CopyBufferToBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => encoder.copy_buffer_to_buffer(
                    lookup!(objects.buffers, *source, "buffer"),
                    *source_offset,
                    lookup!(objects.buffers, *destination, "buffer"),
                    *destination_offset,
                    *size,
                ),
                EncoderCommand::CopyTextureToTexture {
                    source,
                    destination,
                    size,
                } => encoder.copy_texture_to_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: lookup!(objects.textures, source.texture, "texture"),
                        mip_level: source.mip_level,
                        origin: source.origin,
                        aspect: source.aspect,
                    },
                    wgpu::TexelCopyTextureInfo {
                        texture: lookup!(objects.textures, destination.texture, "texture"),
                        mip_level: destination.mip_level,
                        origin: destination.origin,
                        aspect: destination.aspect,
                    },
                    *size,
                ),
                EncoderCommand::ResolveQuerySet {
                    query_set,
                    queries,
                    destination,
                    destination_offset,
                } => encoder.resolve_query_set(
                    lookup!(objects.query_sets, *query_set, "query set"),
                    queries.clone(),
                    lookup!(objects.buffers, *destination, "buffer"),
                    *destination_offset,
                ),
            }
        }
        Ok(encoder.finish())
    }

    fn fail_pending_maps(&mut self, reason: &str) {
        for (_, pending) in self.pending_maps.drain() {
            (pending.callback)(Err(StratumError::MapFailed(reason.to_string())));
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn features(&self) -> wgpu::Features {
        self.device.features()
    }

    fn timestamp_period(&self) -> f32 {
        self.queue.get_timestamp_period()
    }

    fn create_shader_module(&mut self, label: &str, source: &str) -> Result<ShaderModuleId> {
        let module = self.scoped(label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;
        Ok(self.objects.shader_modules.insert(module))
    }

    fn create_buffer(&mut self, desc: &GpuBufferDescriptor) -> Result<BufferId> {
        let buffer = self.scoped(&desc.label, |device| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size: desc.size,
                usage: desc.usage,
                mapped_at_creation: desc.contents.is_some(),
            });
            if let Some(contents) = &desc.contents {
                let len = contents.len().min(desc.size as usize);
                buffer.slice(..).get_mapped_range_mut().slice(..len).copy_from_slice(&contents[..len]);
                buffer.unmap();
            }
            buffer
        })?;
        Ok(self.objects.buffers.insert(buffer))
    }

    fn create_texture(&mut self, desc: &GpuTextureDescriptor) -> Result<TextureId> {
        let texture = self.scoped(&desc.label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: desc.size,
                mip_level_count: desc.mip_level_count,
                sample_count: desc.sample_count,
                dimension: desc.dimension,
                format: desc.format,
                usage: desc.usage,
                view_formats: &desc.view_formats,
            })
        })?;
        Ok(self.objects.textures.insert(texture))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        label: &str,
        desc: &TextureViewDescriptor,
    ) -> Result<TextureViewId> {
        let texture = self
            .objects
            .textures
            .get(texture)
            .ok_or_else(|| StratumError::ResourceCreationFailed(format!("view `{label}` of a destroyed texture")))?;
        let view = self.scoped(label, |_| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                format: desc.format,
                dimension: desc.dimension,
                usage: None,
                aspect: desc.aspect,
                base_mip_level: desc.base_mip_level,
                mip_level_count: desc.mip_level_count,
                base_array_layer: desc.base_array_layer,
                array_layer_count: desc.array_layer_count,
            })
        })?;
        Ok(self.objects.texture_views.insert(view))
    }

    fn create_sampler(&mut self, label: &str, key: &SamplerKey) -> Result<SamplerId> {
        let sampler = self.scoped(label, |device| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: key.address_mode_u,
                address_mode_v: key.address_mode_v,
                address_mode_w: key.address_mode_w,
                mag_filter: key.mag_filter,
                min_filter: key.min_filter,
                mipmap_filter: key.mipmap_filter,
                lod_min_clamp: key.lod_min_clamp(),
                lod_max_clamp: key.lod_max_clamp(),
                compare: key.compare,
                anisotropy_clamp: key.anisotropy_clamp,
                border_color: None,
            })
        })?;
        Ok(self.objects.samplers.insert(sampler))
    }

    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<BindGroupLayoutId> {
        let layout = self.scoped(label, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        })?;
        Ok(self.objects.bind_group_layouts.insert(layout))
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId> {
        let layouts = bind_group_layouts
            .iter()
            .map(|id| {
                self.objects
                    .bind_group_layouts
                    .get(*id)
                    .map(Some)
                    .ok_or_else(|| StratumError::ResourceCreationFailed(format!("`{label}` uses a destroyed bind group layout")))
            })
            .collect::<Result<Vec<_>>>()?;
        let layout = self.scoped(label, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                immediate_size: 0,
            })
        })?;
        Ok(self.objects.pipeline_layouts.insert(layout))
    }

    fn create_bind_group(&mut self, desc: &GpuBindGroupDescriptor) -> Result<BindGroupId> {
        let objects = &self.objects;
        let layout = objects
            .bind_group_layouts
            .get(desc.layout)
            .ok_or_else(|| StratumError::ResourceCreationFailed(format!("`{}` uses a destroyed layout", desc.label)))?;
        let entries = desc
            .entries
            .iter()
            .map(|(binding, resource)| -> Result<wgpu::BindGroupEntry<'_>> {
                let resource = match *resource {
                    GpuBindingResource::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: lookup!(objects.buffers, buffer, "buffer"),
                            offset,
                            size: size.and_then(wgpu::BufferSize::new),
                        })
                    }
                    GpuBindingResource::TextureView(view) => {
                        wgpu::BindingResource::TextureView(lookup!(objects.texture_views, view, "texture view"))
                    }
                    GpuBindingResource::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(lookup!(objects.samplers, sampler, "sampler"))
                    }
                };
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let group = self.scoped(&desc.label, |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&desc.label),
                layout,
                entries: &entries,
            })
        })?;
        Ok(self.objects.bind_groups.insert(group))
    }

    fn create_render_pipeline(&mut self, desc: &GpuRenderPipelineDescriptor) -> Result<RenderPipelineId> {
        let objects = &self.objects;
        let layout = lookup!(objects.pipeline_layouts, desc.layout, "pipeline layout");
        let vertex_module = lookup!(objects.shader_modules, desc.vertex.module, "shader module");
        let vertex_buffers: Vec<_> = desc
            .vertex_buffers
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: layout.step_mode,
                attributes: &layout.attributes,
            })
            .collect();
        let fragment = match &desc.fragment {
            Some(fragment) => Some((
                lookup!(objects.shader_modules, fragment.stage.module, "shader module"),
                fragment,
            )),
            None => None,
        };

        let pipeline = self.scoped(&desc.label, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(&desc.vertex.entry_point),
                    compilation_options: Default::default(),
                    buffers: &vertex_buffers,
                },
                primitive: desc.primitive,
                depth_stencil: desc.depth_stencil.clone(),
                multisample: desc.multisample,
                fragment: fragment.map(|(module, fragment)| wgpu::FragmentState {
                    module,
                    entry_point: Some(&fragment.stage.entry_point),
                    compilation_options: Default::default(),
                    targets: &fragment.targets,
                }),
                multiview_mask: None,
                cache: None,
            })
        })?;
        Ok(self.objects.render_pipelines.insert(pipeline))
    }

    fn create_compute_pipeline(&mut self, desc: &GpuComputePipelineDescriptor) -> Result<ComputePipelineId> {
        let objects = &self.objects;
        let layout = lookup!(objects.pipeline_layouts, desc.layout, "pipeline layout");
        let module = lookup!(objects.shader_modules, desc.stage.module, "shader module");
        let pipeline = self.scoped(&desc.label, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                module,
                entry_point: Some(&desc.stage.entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;
        Ok(self.objects.compute_pipelines.insert(pipeline))
    }

    fn create_query_set(&mut self, label: &str, ty: wgpu::QueryType, count: u32) -> Result<QuerySetId> {
        if matches!(ty, wgpu::QueryType::Timestamp) && !self.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(StratumError::FeatureNotSupported("TIMESTAMP_QUERY".to_string()));
        }
        let set = self.scoped(label, |device| {
            device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some(label),
                ty,
                count,
            })
        })?;
        Ok(self.objects.query_sets.insert(set))
    }

    fn create_render_bundle(&mut self, desc: &GpuRenderBundleDescriptor<'_>) -> Result<RenderBundleId> {
        let objects = &self.objects;
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
            label: Some(&desc.label),
            color_formats: &desc.color_formats,
            depth_stencil: desc.depth_stencil_format.map(|format| wgpu::RenderBundleDepthStencil {
                format,
                depth_read_only: false,
                stencil_read_only: false,
            }),
            sample_count: desc.sample_count,
            multiview: None,
        });
        let replayed: Result<()> = (|| {
            replay_render_commands!(&mut encoder, objects, desc.commands, reject_in_bundle);
            Ok(())
        })();
        let bundle = encoder.finish(&wgpu::RenderBundleDescriptor {
            label: Some(&desc.label),
        });
        let scoped_error = pollster::block_on(scope.pop());
        replayed?;
        if let Some(error) = scoped_error {
            return Err(StratumError::ResourceCreationFailed(format!("{}: {error}", desc.label)));
        }
        Ok(self.objects.render_bundles.insert(bundle))
    }

    fn destroy(&mut self, handle: GpuHandle) {
        let objects = &mut self.objects;
        match handle {
            GpuHandle::ShaderModule(id) => drop(objects.shader_modules.remove(id)),
            GpuHandle::Buffer(id) => {
                if let Some(buffer) = objects.buffers.remove(id) {
                    buffer.destroy();
                }
            }
            GpuHandle::Texture(id) => {
                if let Some(texture) = objects.textures.remove(id) {
                    texture.destroy();
                }
            }
            GpuHandle::TextureView(id) => drop(objects.texture_views.remove(id)),
            GpuHandle::Sampler(id) => drop(objects.samplers.remove(id)),
            GpuHandle::BindGroupLayout(id) => drop(objects.bind_group_layouts.remove(id)),
            GpuHandle::PipelineLayout(id) => drop(objects.pipeline_layouts.remove(id)),
            GpuHandle::BindGroup(id) => drop(objects.bind_groups.remove(id)),
            GpuHandle::RenderPipeline(id) => drop(objects.render_pipelines.remove(id)),
            GpuHandle::ComputePipeline(id) => drop(objects.compute_pipelines.remove(id)),
            GpuHandle::QuerySet(id) => drop(objects.query_sets.remove(id)),
            GpuHandle::RenderBundle(id) => drop(objects.render_bundles.remove(id)),
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        match self.objects.buffers.get(buffer) {
            Some(buffer) => self.queue.write_buffer(buffer, offset, data),
            None => log::warn!("Skipping write to a destroyed buffer"),
        }
    }

    fn write_texture(&mut self, texture: TextureId, write: &TextureWrite) {
        let Some(texture) = self.objects.textures.get(texture) else {
            log::warn!("Skipping upload to a destroyed texture");
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: write.mip_level,
                origin: write.origin,
                aspect: write.aspect,
            },
            &write.data,
            write.layout,
            write.size,
        );
    }

    fn submit(&mut self, encoders: &[RecordedEncoder]) -> Result<()> {
        if self.lost.lock().is_some() {
            return Err(StratumError::DeviceLost("submit on a lost device".to_string()));
        }
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffers = encoders.iter().map(|e| self.encode(e)).collect::<Result<Vec<_>>>();
        let buffers = match buffers {
            Ok(buffers) => buffers,
            Err(error) => {
                drop(pollster::block_on(scope.pop()));
                return Err(error);
            }
        };
        self.queue.submit(buffers);
        match pollster::block_on(scope.pop()) {
            Some(error) => Err(StratumError::Validation(error.to_string())),
            None => Ok(()),
        }
    }

    fn map_read(&mut self, buffer: BufferId, offset: u64, size: u64, callback: MapCallback) {
        let Some(native) = self.objects.buffers.get(buffer) else {
            callback(Err(StratumError::MapFailed("buffer destroyed".to_string())));
            return;
        };
        let token = self.next_map_token;
        self.next_map_token += 1;
        let sender = self.map_sender.clone();
        native.map_async(wgpu::MapMode::Read, offset..offset + size, move |result| {
            // The receiver lives as long as the backend.
            let _ = sender.send((token, result));
        });
        self.pending_maps.insert(
            token,
            PendingMap {
                buffer,
                offset,
                size,
                callback,
            },
        );
    }

    fn poll(&mut self) -> DeviceStatus {
        if let Err(error) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed: {error}");
        }

        while let Ok((token, result)) = self.map_receiver.try_recv() {
            let Some(pending) = self.pending_maps.remove(&token) else {
                continue;
            };
            let data = match (result, self.objects.buffers.get(pending.buffer)) {
                (Ok(()), Some(buffer)) => {
                    let range = pending.offset..pending.offset + pending.size;
                    let bytes = buffer.get_mapped_range(range).to_vec();
                    buffer.unmap();
                    Ok(bytes)
                }
                (Ok(()), None) => Err(StratumError::MapFailed("buffer destroyed while mapping".to_string())),
                (Err(error), _) => Err(StratumError::MapFailed(error.to_string())),
            };
            (pending.callback)(data);
        }

        let lost = self.lost.lock().clone();
        match lost {
            Some((reason, requested)) => {
                if !self.lost_reported {
                    self.lost_reported = true;
                    self.fail_pending_maps("device lost");
                }
                DeviceStatus::Lost { reason, requested }
            }
            None => DeviceStatus::Ok,
        }
    }

    fn destroy_device(&mut self) {
        self.objects.clear();
        self.fail_pending_maps("device destroyed");
        self.device.destroy();
        // Some backends report the loss lazily; record it now.
        let mut lost = self.lost.lock();
        if lost.is_none() {
            *lost = Some(("device destroyed".to_string(), true));
        }
    }

    fn reacquire(&mut self) -> Result<()> {
        self.objects.clear();
        self.fail_pending_maps("device replaced");
        let (adapter, device, queue) = pollster::block_on(Self::acquire(&self.instance, &self.options))?;
        self.adapter = adapter;
        self.device = device;
        self.queue = queue;
        // Fresh slot for the new device; the old callback may still fire.
        self.lost = Arc::default();
        self.lost_reported = false;
        self.install_lost_callback();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Option<WgpuBackend> {
        match WgpuBackend::new(WgpuBackendOptions::default()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                eprintln!("skipping: no adapter ({e})");
                None
            }
        }
    }

    #[test]
    fn buffer_round_trip_through_map() {
        let Some(mut backend) = backend() else {
            return;
        };
        let id = backend
            .create_buffer(&GpuBufferDescriptor {
                label: "readback".to_string(),
                size: 8,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                contents: Some(Arc::from(&[1u8, 2, 3, 4, 5, 6, 7, 8][..])),
            })
            .unwrap();

        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let sink = seen.clone();
        backend.map_read(id, 0, 8, Box::new(move |r: Result<Vec<u8>>| *sink.borrow_mut() = r.ok()));
        for _ in 0..100 {
            backend.poll();
            if seen.borrow().is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(seen.borrow().as_deref(), Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]));
    }

    #[test]
    fn invalid_shader_is_a_creation_error() {
        let Some(mut backend) = backend() else {
            return;
        };
        let err = backend.create_shader_module("broken", "fn main( {").unwrap_err();
        assert!(matches!(err, StratumError::ResourceCreationFailed(_)));
    }
}
