//! Binding resources
//!
//! [`Bindings`] maps shader resource names to the caller's resources. It is
//! matched against the reflected layout by name, so the same bindings object
//! can feed a pipeline whose groups are split differently across stages.

use rustc_hash::FxHashMap;

use crate::resources::buffer::Buffer;
use crate::resources::sampler::Sampler;
use crate::resources::texture::{Texture, TextureViewDescriptor};
use crate::resources::tracked::Tracked;
use crate::resources::value::UniformValue;

/// A buffer range bound to a uniform or storage variable.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    pub buffer: Buffer,
    pub offset: u64,
    /// `None` binds the rest of the buffer.
    pub size: Option<u64>,
}

/// A texture view bound to a sampled, storage or external texture variable.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub texture: Texture,
    pub view: TextureViewDescriptor,
}

/// One named binding.
#[derive(Debug, Clone)]
pub enum BindingResource {
    /// An explicit buffer.
    Buffer(BufferBinding),
    /// A plain value; a backing buffer is created and kept in sync.
    Value(UniformValue),
    Texture(TextureBinding),
    Sampler(Sampler),
}

impl BindingResource {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Value(_) => "value",
            Self::Texture(_) => "texture",
            Self::Sampler(_) => "sampler",
        }
    }
}

impl From<Buffer> for BindingResource {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(BufferBinding {
            buffer,
            offset: 0,
            size: None,
        })
    }
}

impl From<Texture> for BindingResource {
    fn from(texture: Texture) -> Self {
        Self::Texture(TextureBinding {
            texture,
            view: TextureViewDescriptor::default(),
        })
    }
}

impl From<Sampler> for BindingResource {
    fn from(sampler: Sampler) -> Self {
        Self::Sampler(sampler)
    }
}

impl From<UniformValue> for BindingResource {
    fn from(value: UniformValue) -> Self {
        Self::Value(value)
    }
}

/// Name → resource map consumed by bind group resolution.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: FxHashMap<String, BindingResource>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: &str, resource: impl Into<BindingResource>) -> Self {
        self.insert(name, resource);
        self
    }

    pub fn insert(&mut self, name: &str, resource: impl Into<BindingResource>) {
        self.entries.insert(name.to_string(), resource.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<BindingResource> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BindingResource> {
        self.entries.get(name)
    }

    /// Mutable access to a plain value binding.
    pub fn value_mut(&mut self, name: &str) -> Option<&mut UniformValue> {
        match self.entries.get_mut(name) {
            Some(BindingResource::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingResource)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caller-owned, versioned bindings object.
pub type BindingResources = Tracked<Bindings>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_edit_bumps_bindings_version() {
        let bindings = BindingResources::new(Bindings::new().with("scale", UniformValue::from(1.0f32)));
        let v = bindings.version();
        if let Some(value) = bindings.write().value_mut("scale") {
            *value = UniformValue::from(2.0f32);
        }
        assert_eq!(bindings.version(), v + 1);
        assert!(matches!(
            bindings.read().get("scale"),
            Some(BindingResource::Value(UniformValue::Number(n))) if *n == 2.0
        ));
    }
}
