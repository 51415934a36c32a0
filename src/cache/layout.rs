//! Bind group layouts and pipeline layouts
//!
//! Both are content-keyed: a bind group layout by its fully-defaulted
//! `wgpu` entries, a pipeline layout by the ordered list of its bind group
//! layout handles. Two pipelines whose shaders declare the same resources
//! therefore share layouts, and their bind groups are interchangeable.

use smallvec::SmallVec;

use crate::backend::{BindGroupLayoutId, GpuBackend, PipelineLayoutId};
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::reflection::{BindGroupLayoutDescriptor, PipelineLayoutDescriptor};
use crate::resources::tracked::Liveness;

impl ResourceCache {
    /// Bind group layout of one group.
    ///
    /// External textures need [`wgpu::Features::EXTERNAL_TEXTURE`]; without it
    /// the layout cannot be built and a capability gap is reported.
    pub fn bind_group_layout<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        group: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayoutId> {
        let entries = group.wgpu_entries();
        if entries
            .iter()
            .any(|e| matches!(e.ty, wgpu::BindingType::ExternalTexture))
            && !self.capabilities.supports(wgpu::Features::EXTERNAL_TEXTURE)
        {
            self.capabilities
                .report_gap("external textures", "pipelines binding texture_external are skipped");
            return Err(StratumError::FeatureNotSupported("EXTERNAL_TEXTURE".to_string()));
        }

        let label = self.settings.label("BindGroupLayout", None);
        self.bind_group_layouts
            .get_or_create(backend, entries, 0, Liveness::detached(), self.frame, |backend| {
                let entries = group.wgpu_entries();
                backend.create_bind_group_layout(&label, &entries)
            })
            .map(|r| r.handle)
    }

    /// Pipeline layout plus the bind group layout of every group, in order.
    pub fn pipeline_layout<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        layout: &PipelineLayoutDescriptor,
    ) -> Result<(PipelineLayoutId, SmallVec<[BindGroupLayoutId; 4]>)> {
        let mut group_layouts: SmallVec<[BindGroupLayoutId; 4]> = SmallVec::with_capacity(layout.groups.len());
        for group in &layout.groups {
            group_layouts.push(self.bind_group_layout(backend, group)?);
        }

        let label = self.settings.label("PipelineLayout", None);
        let ensured = self.pipeline_layouts.get_or_create(
            backend,
            group_layouts.clone(),
            0,
            Liveness::detached(),
            self.frame,
            |backend| backend.create_pipeline_layout(&label, &group_layouts),
        )?;
        Ok((ensured.handle, group_layouts))
    }
}
