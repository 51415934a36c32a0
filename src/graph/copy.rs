//! Buffer and texture copies
//!
//! Copies resolve their source and destination through the cache (flushing
//! queued writes first, so a copy sees them) and record a single encoder
//! command. Range, alignment and usage problems are soft validation errors
//! that skip the copy.

use crate::backend::GpuBackend;
use crate::commands::{EncoderCommand, TextureCopyLocation};
use crate::errors::{Result, StratumError};
use crate::graph::FrameContext;
use crate::resources::buffer::{Buffer, COPY_ALIGNMENT};
use crate::resources::texture::Texture;

#[derive(Debug, Clone)]
pub struct CopyBufferToBuffer {
    pub source: Buffer,
    pub source_offset: u64,
    pub destination: Buffer,
    pub destination_offset: u64,
    /// `None` copies the rest of the source.
    pub size: Option<u64>,
}

impl CopyBufferToBuffer {
    /// Copies the whole of `source` to the start of `destination`.
    #[must_use]
    pub fn new(source: Buffer, destination: Buffer) -> Self {
        Self {
            source,
            source_offset: 0,
            destination,
            destination_offset: 0,
            size: None,
        }
    }
}

/// One side of a texture copy.
#[derive(Debug, Clone)]
pub struct TextureCopy {
    pub texture: Texture,
    pub mip_level: u32,
    pub origin: wgpu::Origin3d,
    pub aspect: wgpu::TextureAspect,
}

impl From<Texture> for TextureCopy {
    fn from(texture: Texture) -> Self {
        Self {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyTextureToTexture {
    pub source: TextureCopy,
    pub destination: TextureCopy,
    /// `None` copies the whole source mip level.
    pub size: Option<wgpu::Extent3d>,
}

impl CopyTextureToTexture {
    #[must_use]
    pub fn new(source: impl Into<TextureCopy>, destination: impl Into<TextureCopy>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            size: None,
        }
    }
}

fn mip_extent(size: wgpu::Extent3d, mip_level: u32, dimension: wgpu::TextureDimension) -> wgpu::Extent3d {
    let shrink = |value: u32| (value >> mip_level).max(1);
    wgpu::Extent3d {
        width: shrink(size.width),
        height: shrink(size.height),
        depth_or_array_layers: match dimension {
            wgpu::TextureDimension::D3 => shrink(size.depth_or_array_layers),
            _ => size.depth_or_array_layers,
        },
    }
}

fn check_buffer_copy(copy: &CopyBufferToBuffer, size: u64) -> Result<()> {
    for value in [copy.source_offset, copy.destination_offset, size] {
        if value % COPY_ALIGNMENT != 0 {
            return Err(StratumError::UnalignedWrite {
                offset: copy.destination_offset,
                size,
            });
        }
    }
    let source_size = copy.source.size();
    if copy.source_offset + size > source_size {
        return Err(StratumError::Validation(format!(
            "copy reads {size} bytes at offset {} of a {source_size}-byte buffer",
            copy.source_offset
        )));
    }
    let destination_size = copy.destination.size();
    if copy.destination_offset + size > destination_size {
        return Err(StratumError::WriteOutOfRange {
            offset: copy.destination_offset,
            size,
            capacity: destination_size,
        });
    }
    let source_usage = copy.source.descriptor().read().usage;
    if !source_usage.contains(wgpu::BufferUsages::COPY_SRC) {
        return Err(StratumError::Validation("copy source buffer lacks COPY_SRC usage".to_string()));
    }
    Ok(())
}

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    fn encode_buffer_copy(&mut self, copy: &CopyBufferToBuffer) -> Result<EncoderCommand> {
        let size = copy
            .size
            .unwrap_or_else(|| copy.source.size().saturating_sub(copy.source_offset));
        check_buffer_copy(copy, size)?;
        let source = self.cache.prepare_buffer(self.backend, &copy.source)?;
        let destination = self.cache.prepare_buffer(self.backend, &copy.destination)?;
        Ok(EncoderCommand::CopyBufferToBuffer {
            source,
            source_offset: copy.source_offset,
            destination,
            destination_offset: copy.destination_offset,
            size,
        })
    }

    pub(crate) fn record_buffer_copy(&mut self, copy: &CopyBufferToBuffer, out: &mut Vec<EncoderCommand>) -> Result<()> {
        let result = self.encode_buffer_copy(copy);
        if let Some(command) = self.soften(result)? {
            out.push(command);
        }
        Ok(())
    }

    fn encode_texture_copy(&mut self, copy: &CopyTextureToTexture) -> Result<EncoderCommand> {
        let source_desc = copy.source.texture.descriptor().read().clone();
        let destination_desc = copy.destination.texture.descriptor().read().clone();

        if !self.cache.texture_usage(&source_desc).contains(wgpu::TextureUsages::COPY_SRC) {
            return Err(StratumError::Validation("copy source texture lacks COPY_SRC usage".to_string()));
        }
        if !self
            .cache
            .texture_usage(&destination_desc)
            .contains(wgpu::TextureUsages::COPY_DST)
        {
            return Err(StratumError::Validation(
                "copy destination texture lacks COPY_DST usage".to_string(),
            ));
        }
        if copy.source.mip_level >= source_desc.mip_level_count
            || copy.destination.mip_level >= destination_desc.mip_level_count
        {
            return Err(StratumError::Validation("copy mip level out of range".to_string()));
        }

        let size = copy.size.unwrap_or_else(|| {
            mip_extent(source_desc.size, copy.source.mip_level, source_desc.dimension)
        });
        let source = self.cache.prepare_texture(self.backend, &copy.source.texture)?;
        let destination = self.cache.prepare_texture(self.backend, &copy.destination.texture)?;
        Ok(EncoderCommand::CopyTextureToTexture {
            source: TextureCopyLocation {
                texture: source,
                mip_level: copy.source.mip_level,
                origin: copy.source.origin,
                aspect: copy.source.aspect,
            },
            destination: TextureCopyLocation {
                texture: destination,
                mip_level: copy.destination.mip_level,
                origin: copy.destination.origin,
                aspect: copy.destination.aspect,
            },
            size,
        })
    }

    pub(crate) fn record_texture_copy(&mut self, copy: &CopyTextureToTexture, out: &mut Vec<EncoderCommand>) -> Result<()> {
        let result = self.encode_texture_copy(copy);
        if let Some(command) = self.soften(result)? {
            out.push(command);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_extent_halves_and_clamps() {
        let size = wgpu::Extent3d {
            width: 64,
            height: 6,
            depth_or_array_layers: 4,
        };
        let mip = mip_extent(size, 3, wgpu::TextureDimension::D2);
        assert_eq!((mip.width, mip.height, mip.depth_or_array_layers), (8, 1, 4));
        let volume = mip_extent(size, 1, wgpu::TextureDimension::D3);
        assert_eq!(volume.depth_or_array_layers, 2);
    }

    #[test]
    fn buffer_copy_checks_alignment_range_and_usage() {
        let usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::STORAGE;
        let source = Buffer::empty(None, 64, usage);
        let destination = Buffer::empty(None, 32, wgpu::BufferUsages::STORAGE);

        let mut copy = CopyBufferToBuffer::new(source.clone(), destination.clone());
        copy.size = Some(32);
        assert!(check_buffer_copy(&copy, 32).is_ok());

        assert!(matches!(check_buffer_copy(&copy, 64), Err(StratumError::WriteOutOfRange { .. })));
        assert!(matches!(check_buffer_copy(&copy, 6), Err(StratumError::UnalignedWrite { .. })));

        let backwards = CopyBufferToBuffer::new(destination, source);
        assert!(matches!(check_buffer_copy(&backwards, 32), Err(StratumError::Validation(_))));
    }
}
