//! Plain value trees for uniform and storage bindings
//!
//! A [`UniformValue`] is the host-side shape of a WGSL buffer binding:
//! numbers for scalars, lists for vectors, matrices (column-major) and arrays,
//! and string-keyed maps for structs. Values are translated into byte writes
//! by [`encode_value`](crate::reflection::encode_value) using the layout table
//! derived from the shader.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Path from a binding root to a leaf, e.g. `lights[2].color`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(pub SmallVec<[PathSegment; 4]>);

impl FieldPath {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.0.push(PathSegment::Field(name.to_string()));
        next
    }

    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(PathSegment::Index(index));
        next
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Host-side value of a buffer binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    Bool(bool),
    Number(f64),
    List(Vec<UniformValue>),
    Struct(BTreeMap<String, UniformValue>),
}

impl UniformValue {
    /// Empty struct value, to be filled with [`with_field`](Self::with_field).
    #[must_use]
    pub fn structure() -> Self {
        Self::Struct(BTreeMap::new())
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        if let Self::Struct(fields) = &mut self {
            fields.insert(name.to_string(), value.into());
        }
        self
    }

    /// Looks up the value at `path`.
    #[must_use]
    pub fn get(&self, path: &FieldPath) -> Option<&UniformValue> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Field(name), Self::Struct(fields)) => fields.get(name)?,
                (PathSegment::Index(index), Self::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Number of items of a list value.
    #[must_use]
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Self::List(items) => Some(items.len()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Flattens a scalar, a flat list of numbers or a list of lists (matrix
    /// columns) into `out`. Returns `false` if a non-numeric leaf is found.
    pub fn flatten_numbers(&self, out: &mut SmallVec<[f64; 16]>) -> bool {
        match self {
            Self::List(items) => items.iter().all(|item| item.flatten_numbers(out)),
            Self::Struct(_) => false,
            scalar => match scalar.as_f64() {
                Some(n) => {
                    out.push(n);
                    true
                }
                None => false,
            },
        }
    }
}

impl Default for UniformValue {
    fn default() -> Self {
        Self::structure()
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for UniformValue {
            fn from(v: $ty) -> Self {
                Self::Number(f64::from(v))
            }
        })*
    };
}

impl_from_scalar!(f32, f64, i32, u32, u16, i16, u8);

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<half::f16> for UniformValue {
    fn from(v: half::f16) -> Self {
        Self::Number(f64::from(v.to_f32()))
    }
}

impl<T: Into<UniformValue>> From<Vec<T>> for UniformValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<UniformValue>, const N: usize> From<[T; N]> for UniformValue {
    fn from(items: [T; N]) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(v: glam::Vec2) -> Self {
        v.to_array().into()
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(v: glam::Vec3) -> Self {
        v.to_array().into()
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(v: glam::Vec4) -> Self {
        v.to_array().into()
    }
}

impl From<glam::UVec4> for UniformValue {
    fn from(v: glam::UVec4) -> Self {
        v.to_array().into()
    }
}

impl From<glam::IVec4> for UniformValue {
    fn from(v: glam::IVec4) -> Self {
        v.to_array().into()
    }
}

impl From<glam::Mat3> for UniformValue {
    fn from(m: glam::Mat3) -> Self {
        [m.x_axis, m.y_axis, m.z_axis].map(UniformValue::from).into()
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        m.to_cols_array_2d().into()
    }
}

impl<T: Into<UniformValue>> FromIterator<(String, T)> for UniformValue {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self::Struct(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
