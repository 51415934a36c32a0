//! Buffer layout derivation
//!
//! Walks a WGSL type tree and flattens it into a table of leaves:
//!
//! - struct members are visited at their declared offsets,
//! - fixed-size arrays repeat their element at `offset + i * stride`,
//! - scalars, vectors, matrices and atomics become [`LayoutEntry`] leaves.
//!
//! A trailing runtime-sized array is recorded separately as a
//! [`RuntimeArray`], whose element layout is relative to each element.

use std::sync::Arc;

use naga::{ArraySize, Handle, Module, Type, TypeInner};

use crate::errors::{Result, StratumError};
use crate::reflection::types::WgslKind;
use crate::resources::value::FieldPath;

/// One leaf of a buffer layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub path: FieldPath,
    /// Byte offset from the start of the binding.
    pub offset: u64,
    /// Bytes occupied by the leaf (excluding trailing padding).
    pub size: u64,
    pub kind: WgslKind,
}

/// Trailing `array<T>` of a storage buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArray {
    pub path: FieldPath,
    pub offset: u64,
    pub stride: u64,
    /// Layout of one element, relative to the element start.
    pub element: Arc<BufferBindingInfo>,
}

/// Flattened byte layout of a uniform or storage binding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferBindingInfo {
    /// Size of the type as declared; a runtime array counts one element.
    pub size: u64,
    pub entries: Vec<LayoutEntry>,
    pub runtime_array: Option<RuntimeArray>,
}

impl BufferBindingInfo {
    /// Smallest buffer size the binding accepts.
    #[inline]
    #[must_use]
    pub fn min_binding_size(&self) -> u64 {
        self.size
    }

    /// Bytes needed to hold `runtime_len` runtime-array elements.
    #[must_use]
    pub fn size_with_runtime_len(&self, runtime_len: usize) -> u64 {
        match &self.runtime_array {
            Some(tail) => self.size.max(tail.offset + tail.stride * runtime_len as u64),
            None => self.size,
        }
    }

    /// Looks up a leaf by its displayed path, e.g. `"lights[1].color"`.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&LayoutEntry> {
        self.entries.iter().find(|e| e.path.to_string() == path)
    }
}

/// Derives the layout table of `ty` as declared in `module`.
pub fn derive_buffer_layout(module: &Module, ty: Handle<Type>) -> Result<BufferBindingInfo> {
    let mut info = BufferBindingInfo {
        size: u64::from(module.types[ty].inner.size(module.to_ctx())),
        ..Default::default()
    };
    let mut walker = Walker {
        module,
        entries: &mut info.entries,
        runtime_array: &mut info.runtime_array,
    };
    walker.visit(ty, FieldPath::root(), 0)?;
    Ok(info)
}

struct Walker<'a> {
    module: &'a Module,
    entries: &'a mut Vec<LayoutEntry>,
    runtime_array: &'a mut Option<RuntimeArray>,
}

impl Walker<'_> {
    fn visit(&mut self, ty: Handle<Type>, path: FieldPath, offset: u64) -> Result<()> {
        let module = self.module;
        match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => {
                for (index, member) in members.iter().enumerate() {
                    let child = match &member.name {
                        Some(name) => path.field(name),
                        None => path.index(index),
                    };
                    self.visit(member.ty, child, offset + u64::from(member.offset))?;
                }
                Ok(())
            }
            TypeInner::Array { base, size, stride } => {
                let stride = u64::from(*stride);
                match size {
                    ArraySize::Constant(count) => {
                        for i in 0..count.get() as usize {
                            self.visit(*base, path.index(i), offset + stride * i as u64)?;
                        }
                        Ok(())
                    }
                    ArraySize::Dynamic => {
                        let element = derive_buffer_layout(module, *base)?;
                        *self.runtime_array = Some(RuntimeArray {
                            path,
                            offset,
                            stride,
                            element: Arc::new(element),
                        });
                        Ok(())
                    }
                    ArraySize::Pending(_) => Err(StratumError::UnsupportedType {
                        name: type_name(module, ty),
                        excerpt: "override-sized arrays have no fixed host layout".to_string(),
                    }),
                }
            }
            inner => {
                let kind = WgslKind::from_naga(inner).ok_or_else(|| StratumError::UnsupportedType {
                    name: type_name(module, ty),
                    excerpt: format!("at `{path}`"),
                })?;
                self.entries.push(LayoutEntry {
                    path,
                    offset,
                    size: kind.size(),
                    kind,
                });
                Ok(())
            }
        }
    }
}

/// Display name of a type for diagnostics.
pub(crate) fn type_name(module: &Module, ty: Handle<Type>) -> String {
    let ty = &module.types[ty];
    if let Some(name) = &ty.name {
        return name.clone();
    }
    match WgslKind::from_naga(&ty.inner) {
        Some(kind) => kind.to_string(),
        None => format!("{:?}", ty.inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_of(source: &str, var: &str) -> BufferBindingInfo {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let (_, global) = module
            .global_variables
            .iter()
            .find(|(_, g)| g.name.as_deref() == Some(var))
            .unwrap();
        derive_buffer_layout(&module, global.ty).unwrap()
    }

    #[test]
    fn vec3_followed_by_scalar_packs_into_sixteen_bytes() {
        let info = layout_of(
            "struct U { a: vec3<f32>, b: f32 }\n@group(0) @binding(0) var<uniform> u: U;",
            "u",
        );
        assert_eq!(info.size, 16);
        assert_eq!(info.entry("a").map(|e| (e.offset, e.size)), Some((0, 12)));
        assert_eq!(info.entry("b").map(|e| (e.offset, e.size)), Some((12, 4)));
    }

    #[test]
    fn fixed_arrays_repeat_by_stride() {
        let info = layout_of(
            "struct L { color: vec3<f32>, intensity: f32 }\n\
             struct U { count: u32, lights: array<L, 2> }\n\
             @group(0) @binding(0) var<uniform> u: U;",
            "u",
        );
        assert_eq!(info.entry("count").map(|e| e.offset), Some(0));
        assert_eq!(info.entry("lights[0].color").map(|e| e.offset), Some(16));
        assert_eq!(info.entry("lights[1].intensity").map(|e| e.offset), Some(16 + 16 + 12));
        assert_eq!(info.size, 48);
    }

    #[test]
    fn runtime_array_is_recorded_as_tail() {
        let info = layout_of(
            "struct P { pos: vec4<f32> }\n\
             struct S { count: u32, items: array<P> }\n\
             @group(0) @binding(0) var<storage, read> s: S;",
            "s",
        );
        let tail = info.runtime_array.as_ref().unwrap();
        assert_eq!(tail.offset, 16);
        assert_eq!(tail.stride, 16);
        assert_eq!(tail.element.entries.len(), 1);
        assert_eq!(info.size_with_runtime_len(4), 16 + 64);
    }

    #[test]
    fn matrix_is_a_single_leaf() {
        let info = layout_of(
            "struct U { m: mat3x3<f32>, s: f32 }\n@group(0) @binding(0) var<uniform> u: U;",
            "u",
        );
        let m = info.entry("m").unwrap();
        assert_eq!(m.size, 48);
        assert_eq!(info.entry("s").map(|e| e.offset), Some(48));
    }
}
