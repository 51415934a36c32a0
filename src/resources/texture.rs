//! Texture and texture view descriptors
//!
//! Textures follow the same split as buffers: the tracked
//! [`TextureDescriptor`] decides when the GPU object is recreated, while
//! uploads queue as [`TextureWrite`]s without bumping the generation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::resources::tracked::{Liveness, ResourceId, Stamp, Tracked};

/// Shape of a GPU texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub size: wgpu::Extent3d,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: wgpu::TextureDimension,
    /// Explicit usage. `None` derives it from format and sample count.
    pub usage: Option<wgpu::TextureUsages>,
    pub view_formats: Vec<wgpu::TextureFormat>,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            format: wgpu::TextureFormat::Rgba8Unorm,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            usage: None,
            view_formats: Vec::new(),
        }
    }
}

/// One queued texture upload.
#[derive(Debug, Clone)]
pub struct TextureWrite {
    pub mip_level: u32,
    pub origin: wgpu::Origin3d,
    pub aspect: wgpu::TextureAspect,
    pub data: Arc<[u8]>,
    pub layout: wgpu::TexelCopyBufferLayout,
    pub size: wgpu::Extent3d,
}

/// Caller-owned texture with an upload queue.
#[derive(Debug, Clone)]
pub struct Texture {
    descriptor: Tracked<TextureDescriptor>,
    writes: Arc<Mutex<Vec<TextureWrite>>>,
}

impl Texture {
    pub fn new(descriptor: TextureDescriptor) -> Self {
        Self {
            descriptor: Tracked::new(descriptor),
            writes: Arc::default(),
        }
    }

    /// Single-sample 2D texture usable as a render target.
    pub fn render_target(label: Option<&str>, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self::new(TextureDescriptor {
            label: label.map(str::to_string),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            format,
            ..Default::default()
        })
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &Tracked<TextureDescriptor> {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.descriptor.id()
    }

    #[inline]
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        self.descriptor.stamp()
    }

    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.descriptor.liveness()
    }

    #[must_use]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.descriptor.read().format
    }

    #[must_use]
    pub fn size(&self) -> wgpu::Extent3d {
        self.descriptor.read().size
    }

    #[must_use]
    pub fn sample_count(&self) -> u32 {
        self.descriptor.read().sample_count
    }

    /// Resizes the texture; the GPU object is recreated on next use.
    pub fn resize(&self, width: u32, height: u32) {
        let mut desc = self.descriptor.write();
        desc.size.width = width;
        desc.size.height = height;
    }

    /// Queues a full-mip upload of tightly packed rows.
    pub fn write(&self, mip_level: u32, data: &[u8], bytes_per_row: u32, size: wgpu::Extent3d) {
        self.writes.lock().push(TextureWrite {
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
            data: Arc::from(data),
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size.height),
            },
            size,
        });
    }

    /// Queues an arbitrary upload record.
    pub fn write_region(&self, write: TextureWrite) {
        self.writes.lock().push(write);
    }

    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }

    pub(crate) fn take_writes(&self) -> Vec<TextureWrite> {
        std::mem::take(&mut *self.writes.lock())
    }
}

/// Hashable texture view descriptor. `None` fields inherit from the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureViewDescriptor {
    pub format: Option<wgpu::TextureFormat>,
    pub dimension: Option<wgpu::TextureViewDimension>,
    pub aspect: wgpu::TextureAspect,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

impl TextureViewDescriptor {
    /// View of a single mip level.
    #[must_use]
    pub fn mip(level: u32) -> Self {
        Self {
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        }
    }

    /// View with an explicit dimension (e.g. `Cube`, `D2Array`).
    #[must_use]
    pub fn with_dimension(dimension: wgpu::TextureViewDimension) -> Self {
        Self {
            dimension: Some(dimension),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_bumps_texture_version() {
        let tex = Texture::render_target(Some("t"), 4, 4, wgpu::TextureFormat::Rgba8Unorm);
        let v = tex.stamp().version;
        tex.write(0, &[0; 64], 16, tex.size());
        assert_eq!(tex.stamp().version, v);
        assert_eq!(tex.pending_writes(), 1);
        tex.resize(8, 8);
        assert_eq!(tex.stamp().version, v + 1);
        assert_eq!(tex.size().width, 8);
    }
}
