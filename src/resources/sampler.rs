//! Sampler descriptors and the default table used to key them

use crate::resources::tracked::Tracked;

/// Caller-facing sampler descriptor. Every optional field is normalised
/// through [`SamplerDescriptor::normalized`] before it is used as a key, so
/// two descriptors that only differ in spelled-out defaults share one sampler.
///
/// | Field | Default |
/// |-------|---------|
/// | `address_mode_*` | `ClampToEdge` |
/// | `mag_filter`, `min_filter` | `Nearest` |
/// | `mipmap_filter` | `Nearest` |
/// | `lod_min_clamp` | `0.0` |
/// | `lod_max_clamp` | `32.0` |
/// | `compare` | `None` |
/// | `anisotropy_clamp` | `1` |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplerDescriptor {
    pub address_mode_u: Option<wgpu::AddressMode>,
    pub address_mode_v: Option<wgpu::AddressMode>,
    pub address_mode_w: Option<wgpu::AddressMode>,
    pub mag_filter: Option<wgpu::FilterMode>,
    pub min_filter: Option<wgpu::FilterMode>,
    pub mipmap_filter: Option<wgpu::MipmapFilterMode>,
    pub lod_min_clamp: Option<f32>,
    pub lod_max_clamp: Option<f32>,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: Option<u16>,
}

impl SamplerDescriptor {
    /// Linear filtering on all axes with the given address mode.
    #[must_use]
    pub fn linear(address_mode: wgpu::AddressMode) -> Self {
        Self {
            address_mode_u: Some(address_mode),
            address_mode_v: Some(address_mode),
            address_mode_w: Some(address_mode),
            mag_filter: Some(wgpu::FilterMode::Linear),
            min_filter: Some(wgpu::FilterMode::Linear),
            mipmap_filter: Some(wgpu::MipmapFilterMode::Linear),
            ..Default::default()
        }
    }

    /// Fills every default; the result is the cache key.
    #[must_use]
    pub fn normalized(&self) -> SamplerKey {
        SamplerKey {
            address_mode_u: self.address_mode_u.unwrap_or(wgpu::AddressMode::ClampToEdge),
            address_mode_v: self.address_mode_v.unwrap_or(wgpu::AddressMode::ClampToEdge),
            address_mode_w: self.address_mode_w.unwrap_or(wgpu::AddressMode::ClampToEdge),
            mag_filter: self.mag_filter.unwrap_or(wgpu::FilterMode::Nearest),
            min_filter: self.min_filter.unwrap_or(wgpu::FilterMode::Nearest),
            mipmap_filter: self.mipmap_filter.unwrap_or(wgpu::MipmapFilterMode::Nearest),
            lod_min_clamp_bits: self.lod_min_clamp.unwrap_or(0.0).to_bits(),
            lod_max_clamp_bits: self.lod_max_clamp.unwrap_or(32.0).to_bits(),
            compare: self.compare,
            anisotropy_clamp: self.anisotropy_clamp.unwrap_or(1).max(1),
        }
    }
}

/// Fully-specified, hashable sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::MipmapFilterMode,
    pub lod_min_clamp_bits: u32,
    pub lod_max_clamp_bits: u32,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
}

impl SamplerKey {
    #[must_use]
    pub fn lod_min_clamp(&self) -> f32 {
        f32::from_bits(self.lod_min_clamp_bits)
    }

    #[must_use]
    pub fn lod_max_clamp(&self) -> f32 {
        f32::from_bits(self.lod_max_clamp_bits)
    }
}

/// Caller-owned sampler.
pub type Sampler = Tracked<SamplerDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_defaults_normalize_to_same_key() {
        let implicit = SamplerDescriptor::default();
        let explicit = SamplerDescriptor {
            address_mode_u: Some(wgpu::AddressMode::ClampToEdge),
            mag_filter: Some(wgpu::FilterMode::Nearest),
            lod_max_clamp: Some(32.0),
            anisotropy_clamp: Some(1),
            ..Default::default()
        };
        assert_eq!(implicit.normalized(), explicit.normalized());
    }

    #[test]
    fn zero_anisotropy_clamps_to_one() {
        let desc = SamplerDescriptor {
            anisotropy_clamp: Some(0),
            ..Default::default()
        };
        assert_eq!(desc.normalized().anisotropy_clamp, 1);
    }
}
