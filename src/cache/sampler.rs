//! Sampler cache
//!
//! Samplers are keyed by their normalised [`SamplerKey`], not by descriptor
//! identity: two sampler descriptors that only differ in spelled-out defaults
//! resolve to the same object.

use crate::backend::{GpuBackend, SamplerId};
use crate::cache::ResourceCache;
use crate::errors::Result;
use crate::resources::sampler::Sampler;
use crate::resources::tracked::Liveness;

impl ResourceCache {
    pub fn sampler<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, sampler: &Sampler) -> Result<SamplerId> {
        let key = sampler.read().normalized();
        let label = self.settings.label("Sampler", None);
        self.samplers
            .get_or_create(backend, key, 0, Liveness::detached(), self.frame, |backend| {
                backend.create_sampler(&label, &key)
            })
            .map(|r| r.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::cache::Capabilities;
    use crate::resources::sampler::SamplerDescriptor;
    use crate::settings::Settings;

    #[test]
    fn equivalent_descriptors_share_a_sampler() {
        let mut backend = DummyBackend::new();
        let mut cache = ResourceCache::new(Settings::default(), Capabilities::detect(&backend));

        let implicit = Sampler::new(SamplerDescriptor::default());
        let explicit = Sampler::new(SamplerDescriptor {
            mag_filter: Some(wgpu::FilterMode::Nearest),
            lod_max_clamp: Some(32.0),
            ..Default::default()
        });
        let linear = Sampler::new(SamplerDescriptor::linear(wgpu::AddressMode::Repeat));

        let a = cache.sampler(&mut backend, &implicit).unwrap();
        let b = cache.sampler(&mut backend, &explicit).unwrap();
        let c = cache.sampler(&mut backend, &linear).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.created("sampler"), 2);
    }
}
