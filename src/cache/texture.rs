//! Texture, texture view and automatic attachment cache
//!
//! Textures are keyed by descriptor id. When a descriptor leaves `usage`
//! unset, the usage is derived from what the format guarantees on this
//! device: depth formats and multisampled textures never get storage binding,
//! and formats without guaranteed storage support lose it too.
//!
//! Views are keyed by `(texture id, view descriptor)` and fingerprinted by the
//! physical texture handle, so recreating a texture recreates its views.
//!
//! Automatic attachments (the multisampled color target of a resolving pass,
//! the default depth buffer) belong to the pass that asked for them and are
//! destroyed with it.

use smallvec::{SmallVec, smallvec};

use crate::backend::{GpuBackend, GpuHandle, GpuTextureDescriptor, TextureId, TextureViewId};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::slot::GpuObject;
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::resources::texture::{Texture, TextureDescriptor, TextureViewDescriptor};
use crate::resources::tracked::{Liveness, ResourceId};

/// Which automatic attachment of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    /// Multisampled render target resolving into color attachment `index`.
    Multisample(u32),
    Depth,
}

/// `(pass id, role)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    pub pass: ResourceId,
    pub role: AttachmentRole,
}

/// Texture and default view of an automatic attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAttachment {
    pub texture: TextureId,
    pub view: TextureViewId,
}

impl GpuObject for AutoAttachment {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::TextureView(self.view), GpuHandle::Texture(self.texture)]
    }
}

impl ResourceCache {
    /// Usage of a texture, derived from its format and sample count when the
    /// descriptor does not set one.
    pub fn texture_usage(&mut self, desc: &TextureDescriptor) -> wgpu::TextureUsages {
        if let Some(usage) = desc.usage {
            return usage;
        }
        let guaranteed = desc
            .format
            .guaranteed_format_features(self.capabilities.features)
            .allowed_usages;
        let mut usage = guaranteed
            & (wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT);

        if desc.format.is_depth_stencil_format() || desc.sample_count > 1 {
            usage.remove(wgpu::TextureUsages::STORAGE_BINDING);
        }
        if desc.sample_count > 1 {
            usage &= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        }
        usage
    }

    /// Ensures the device texture of `texture` and flushes its queued uploads.
    pub fn prepare_texture<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, texture: &Texture) -> Result<TextureId> {
        let stamp = texture.stamp();
        let desc = texture.descriptor().read().clone();
        let usage = self.texture_usage(&desc);
        let fingerprint = Fingerprint::new().push(&stamp.version).push(&usage.bits()).finish();
        let label = self.settings.label("Texture", desc.label.as_deref());

        let ensured = self.textures.get_or_create(
            backend,
            stamp.id,
            fingerprint,
            texture.liveness(),
            self.frame,
            |backend| {
                backend.create_texture(&GpuTextureDescriptor {
                    label: label.clone(),
                    size: desc.size,
                    format: desc.format,
                    mip_level_count: desc.mip_level_count,
                    sample_count: desc.sample_count,
                    dimension: desc.dimension,
                    usage,
                    view_formats: desc.view_formats.clone(),
                })
            },
        )?;

        let writes = texture.take_writes();
        if !writes.is_empty() {
            if usage.contains(wgpu::TextureUsages::COPY_DST) {
                for write in &writes {
                    backend.write_texture(ensured.handle, write);
                }
            } else {
                self.settings.soft_error(StratumError::Validation(format!(
                    "{label} has {} queued uploads but no COPY_DST usage",
                    writes.len()
                )))?;
            }
        }
        Ok(ensured.handle)
    }

    /// Uploads queued writes of an already resolved texture.
    pub(crate) fn flush_texture<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, texture: &Texture) -> Result<()> {
        if texture.pending_writes() > 0 {
            self.prepare_texture(backend, texture)?;
        }
        Ok(())
    }

    /// View of `texture`, rebuilt whenever the texture is.
    pub fn texture_view<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        texture: &Texture,
        view: &TextureViewDescriptor,
    ) -> Result<TextureViewId> {
        let physical = self.prepare_texture(backend, texture)?;
        let fingerprint = Fingerprint::new().push(&physical).finish();
        let label = self.settings.label("TextureView", texture.descriptor().read().label.as_deref());
        self.texture_views
            .get_or_create(
                backend,
                (texture.id(), *view),
                fingerprint,
                texture.liveness(),
                self.frame,
                |backend| backend.create_texture_view(physical, &label, view),
            )
            .map(|r| r.handle)
    }

    /// Automatic attachment owned by a pass.
    ///
    /// Rebuilt when size, format or sample count change.
    pub fn auto_attachment<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: AttachmentKey,
        owner: Liveness,
        size: (u32, u32),
        format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Result<AutoAttachment> {
        let fingerprint = Fingerprint::new()
            .push(&size)
            .push(&format)
            .push(&sample_count)
            .finish();
        let kind = match key.role {
            AttachmentRole::Multisample(_) => "MultisampleTarget",
            AttachmentRole::Depth => "DepthTarget",
        };
        let label = self.settings.label(kind, None);
        self.attachments
            .get_or_create(backend, key, fingerprint, owner, self.frame, |backend| {
                let texture = backend.create_texture(&GpuTextureDescriptor {
                    label: label.clone(),
                    size: wgpu::Extent3d {
                        width: size.0,
                        height: size.1,
                        depth_or_array_layers: 1,
                    },
                    format,
                    mip_level_count: 1,
                    sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: Vec::new(),
                })?;
                match backend.create_texture_view(texture, &label, &TextureViewDescriptor::default()) {
                    Ok(view) => Ok(AutoAttachment { texture, view }),
                    Err(err) => {
                        backend.destroy(GpuHandle::Texture(texture));
                        Err(err)
                    }
                }
            })
            .map(|r| r.handle)
    }
}
