//! Bind group cache
//!
//! A bind group is keyed by `(bindings id, group index, bind group layout)`
//! and fingerprinted by the physical handles of everything it binds. Editing
//! a plain value rewrites its backing buffer without touching the bind group;
//! resizing a bound buffer or texture rebuilds exactly the bind groups that
//! reference it.
//!
//! Resources are matched to the reflected layout by name. When a draw
//! supplies several bindings objects, each group is served by the first one
//! that provides any of the group's names, and that object must provide all
//! of them.

use smallvec::{SmallVec, smallvec};

use crate::backend::{BindGroupId, BindGroupLayoutId, GpuBackend, GpuBindGroupDescriptor, GpuBindingResource, GpuHandle};
use crate::cache::slot::GpuObject;
use crate::cache::fingerprint::Fingerprint;
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::reflection::{BindGroupLayoutDescriptor, LayoutBinding, PipelineLayoutDescriptor, ResourceKind};
use crate::resources::binding::{BindingResource, BindingResources};
use crate::resources::tracked::{Liveness, ResourceId};

/// `(bindings id, group index, bind group layout)`.
pub type BindGroupKey = (ResourceId, u32, BindGroupLayoutId);

/// A bind group and the shared objects it was built from.
#[derive(Debug, Clone)]
pub struct CachedBindGroup {
    pub bind_group: BindGroupId,
    pub dependencies: SmallVec<[GpuHandle; 4]>,
}

impl GpuObject for CachedBindGroup {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::BindGroup(self.bind_group)]
    }

    fn dependencies(&self) -> SmallVec<[GpuHandle; 4]> {
        self.dependencies.clone()
    }
}

impl ResourceCache {
    fn binding_resource<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        bindings: &BindingResources,
        entry: &LayoutBinding,
        resource: &BindingResource,
    ) -> Result<GpuBindingResource> {
        match (&entry.kind, resource) {
            (
                ResourceKind::UniformBuffer { .. } | ResourceKind::StorageBuffer { .. },
                BindingResource::Buffer(binding),
            ) => {
                let buffer = self.prepare_buffer(backend, &binding.buffer)?;
                Ok(GpuBindingResource::Buffer {
                    buffer,
                    offset: binding.offset,
                    size: binding.size,
                })
            }
            (
                kind @ (ResourceKind::UniformBuffer { .. } | ResourceKind::StorageBuffer { .. }),
                BindingResource::Value(value),
            ) => {
                let Some(info) = &entry.layout else {
                    return Err(StratumError::InvalidBindingType {
                        name: entry.name.clone(),
                        reason: "buffer binding without a reflected layout".to_string(),
                    });
                };
                let storage = matches!(kind, ResourceKind::StorageBuffer { .. });
                let buffer = self.prepare_value_buffer(backend, bindings, &entry.name, value, info, storage)?;
                Ok(GpuBindingResource::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                })
            }
            (ResourceKind::StorageTexture { .. }, BindingResource::Texture(binding)) => {
                let (format, usage) = {
                    let desc = binding.texture.descriptor().read();
                    (desc.format, self.texture_usage(&desc))
                };
                if !usage.contains(wgpu::TextureUsages::STORAGE_BINDING) {
                    self.capabilities.report_gap(
                        &format!("storage binding of {format:?} textures"),
                        "bind groups using them are skipped",
                    );
                    return Err(StratumError::FeatureNotSupported(format!(
                        "`{}`: {format:?} as a storage texture",
                        entry.name
                    )));
                }
                let view = self.texture_view(backend, &binding.texture, &binding.view)?;
                Ok(GpuBindingResource::TextureView(view))
            }
            (ResourceKind::Texture { .. } | ResourceKind::ExternalTexture, BindingResource::Texture(binding)) => {
                let view = self.texture_view(backend, &binding.texture, &binding.view)?;
                Ok(GpuBindingResource::TextureView(view))
            }
            (ResourceKind::Sampler { .. }, BindingResource::Sampler(sampler)) => {
                Ok(GpuBindingResource::Sampler(self.sampler(backend, sampler)?))
            }
            (kind, resource) => Err(StratumError::InvalidBindingType {
                name: entry.name.clone(),
                reason: format!(
                    "shader declares a {:?} binding but a {} was supplied",
                    kind.category(),
                    resource.kind_name()
                ),
            }),
        }
    }

    /// Bind group of one group, built from one bindings object.
    pub fn bind_group<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        group_index: u32,
        layout: &BindGroupLayoutDescriptor,
        bind_group_layout: BindGroupLayoutId,
        bindings: &BindingResources,
    ) -> Result<BindGroupId> {
        let mut entries = Vec::with_capacity(layout.entries.len());
        {
            let resources = bindings.read();
            for entry in &layout.entries {
                let Some(resource) = resources.get(&entry.name) else {
                    return Err(StratumError::MissingBinding {
                        name: entry.name.clone(),
                        group: group_index,
                        binding: entry.binding,
                    });
                };
                let gpu = self.binding_resource(backend, bindings, entry, resource)?;
                entries.push((entry.binding, gpu));
            }
        }

        let fingerprint = Fingerprint::new().push(&entries).finish();
        let label = self.settings.label("BindGroup", Some(&format!("group {group_index}")));
        self.bind_groups
            .get_or_create(
                backend,
                (bindings.id(), group_index, bind_group_layout),
                fingerprint,
                bindings.liveness(),
                self.frame,
                |backend| {
                    let mut dependencies: SmallVec<[GpuHandle; 4]> =
                        smallvec![GpuHandle::BindGroupLayout(bind_group_layout)];
                    dependencies.extend(entries.iter().filter_map(|(_, resource)| match resource {
                        GpuBindingResource::Sampler(sampler) => Some(GpuHandle::Sampler(*sampler)),
                        _ => None,
                    }));
                    let bind_group = backend.create_bind_group(&GpuBindGroupDescriptor {
                        label,
                        layout: bind_group_layout,
                        entries,
                    })?;
                    Ok(CachedBindGroup {
                        bind_group,
                        dependencies,
                    })
                },
            )
            .map(|r| r.handle.bind_group)
    }

    /// Bind group of a group the shaders declare nothing in.
    ///
    /// Owned by the pipeline whose layout has the gap.
    pub fn empty_bind_group<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        owner_id: ResourceId,
        owner: Liveness,
        group_index: u32,
        bind_group_layout: BindGroupLayoutId,
    ) -> Result<BindGroupId> {
        let label = self.settings.label("BindGroup", Some("empty"));
        self.bind_groups
            .get_or_create(
                backend,
                (owner_id, group_index, bind_group_layout),
                0,
                owner,
                self.frame,
                |backend| {
                    let bind_group = backend.create_bind_group(&GpuBindGroupDescriptor {
                        label,
                        layout: bind_group_layout,
                        entries: Vec::new(),
                    })?;
                    Ok(CachedBindGroup {
                        bind_group,
                        dependencies: smallvec![GpuHandle::BindGroupLayout(bind_group_layout)],
                    })
                },
            )
            .map(|r| r.handle.bind_group)
    }

    /// Bind groups for every group of a pipeline layout, in group order.
    pub fn resolve_bind_groups<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pipeline_id: ResourceId,
        pipeline_owner: &Liveness,
        layout: &PipelineLayoutDescriptor,
        group_layouts: &[BindGroupLayoutId],
        bindings: &[BindingResources],
    ) -> Result<SmallVec<[BindGroupId; 4]>> {
        let mut groups = SmallVec::with_capacity(layout.groups.len());
        for (index, (group, &bind_group_layout)) in layout.groups.iter().zip(group_layouts).enumerate() {
            let index = index as u32;
            if group.is_empty() {
                groups.push(self.empty_bind_group(
                    backend,
                    pipeline_id,
                    pipeline_owner.clone(),
                    index,
                    bind_group_layout,
                )?);
                continue;
            }

            let provider = bindings.iter().find(|candidate| {
                let resources = candidate.read();
                group.entries.iter().any(|e| resources.get(&e.name).is_some())
            });
            let Some(provider) = provider else {
                let first = &group.entries[0];
                return Err(StratumError::MissingBinding {
                    name: first.name.clone(),
                    group: index,
                    binding: first.binding,
                });
            };
            groups.push(self.bind_group(backend, index, group, bind_group_layout, provider)?);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::cache::Capabilities;
    use crate::reflection::{merge_stages_layout, reflect};
    use crate::resources::binding::Bindings;
    use crate::resources::buffer::Buffer;
    use crate::resources::sampler::{Sampler, SamplerDescriptor};
    use crate::resources::texture::Texture;
    use crate::resources::value::UniformValue;
    use crate::settings::Settings;

    const SOURCE: &str = "
@group(0) @binding(0) var<uniform> scale: f32;
@group(0) @binding(1) var<storage, read> points: array<vec4<f32>>;
@group(1) @binding(0) var color: texture_2d<f32>;
@group(1) @binding(1) var color_sampler: sampler;
";

    fn setup() -> (DummyBackend, ResourceCache, PipelineLayoutDescriptor, SmallVec<[BindGroupLayoutId; 4]>) {
        let mut backend = DummyBackend::new();
        let mut cache = ResourceCache::new(Settings::default(), Capabilities::detect(&backend));
        let info = reflect(SOURCE).unwrap();
        let layout = merge_stages_layout(&[&info]);
        let (_, groups) = cache.pipeline_layout(&mut backend, &layout).unwrap();
        (backend, cache, layout, groups)
    }

    #[test]
    fn groups_are_served_by_the_first_provider() {
        let (mut backend, mut cache, layout, group_layouts) = setup();
        let points = Buffer::empty(Some("points"), 64, wgpu::BufferUsages::STORAGE);
        let buffers = BindingResources::new(
            Bindings::new()
                .with("scale", UniformValue::from(1.0f32))
                .with("points", points.clone()),
        );
        let texture = Texture::render_target(None, 4, 4, wgpu::TextureFormat::Rgba8Unorm);
        let textures = BindingResources::new(
            Bindings::new()
                .with("color", texture)
                .with("color_sampler", Sampler::new(SamplerDescriptor::default())),
        );

        let owner = Liveness::detached();
        let groups = cache
            .resolve_bind_groups(&mut backend, 0, &owner, &layout, &group_layouts, &[buffers.clone(), textures])
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(backend.created("bind_group"), 2);

        // A value edit rewrites the value buffer but keeps the bind group.
        if let Some(value) = buffers.write().value_mut("scale") {
            *value = UniformValue::from(2.0f32);
        }
        let again = cache.bind_group(&mut backend, 0, &layout.groups[0], group_layouts[0], &buffers).unwrap();
        assert_eq!(again, groups[0]);

        // Resizing a bound buffer rebuilds that bind group only.
        points.resize(128);
        let rebuilt = cache.bind_group(&mut backend, 0, &layout.groups[0], group_layouts[0], &buffers).unwrap();
        assert_ne!(rebuilt, groups[0]);
        assert_eq!(backend.created("bind_group"), 3);
        assert_eq!(backend.live("bind_group"), 2);
    }

    #[test]
    fn partial_provider_is_a_missing_binding() {
        let (mut backend, mut cache, layout, group_layouts) = setup();
        let partial = BindingResources::new(Bindings::new().with("scale", UniformValue::from(1.0f32)));
        let err = cache
            .bind_group(&mut backend, 0, &layout.groups[0], group_layouts[0], &partial)
            .unwrap_err();
        assert!(matches!(
            err,
            StratumError::MissingBinding {
                ref name,
                group: 0,
                binding: 1
            } if name == "points"
        ));
    }

    #[test]
    fn wrong_resource_kind_is_rejected() {
        let (mut backend, mut cache, layout, group_layouts) = setup();
        let wrong = BindingResources::new(
            Bindings::new()
                .with("color", Sampler::new(SamplerDescriptor::default()))
                .with("color_sampler", Sampler::new(SamplerDescriptor::default())),
        );
        let err = cache
            .bind_group(&mut backend, 1, &layout.groups[1], group_layouts[1], &wrong)
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidBindingType { .. }));
    }
}
