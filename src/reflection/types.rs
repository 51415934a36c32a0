//! Closed table of host-shareable WGSL types
//!
//! Every leaf of a buffer layout is one of [`WgslKind`]'s variants. The
//! mapping from naga's type tree is explicit, and anything outside the table
//! (booleans, pointers, handles inside structs) is rejected while reflecting,
//! never while encoding.

use std::fmt;

/// Scalar element types that may appear in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    F16,
    I32,
    U32,
}

impl ScalarType {
    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::F16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
        }
    }

    #[must_use]
    pub const fn wgsl_name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::I32 => "i32",
            Self::U32 => "u32",
        }
    }

    /// Numeric class used when matching against vertex formats.
    #[must_use]
    pub const fn numeric_class(self) -> NumericClass {
        match self {
            Self::F32 | Self::F16 => NumericClass::Float,
            Self::I32 => NumericClass::Sint,
            Self::U32 => NumericClass::Uint,
        }
    }

    /// Maps a naga scalar. Booleans and abstract types have no host layout.
    #[must_use]
    pub fn from_naga(scalar: naga::Scalar) -> Option<Self> {
        match (scalar.kind, scalar.width) {
            (naga::ScalarKind::Float, 4) => Some(Self::F32),
            (naga::ScalarKind::Float, 2) => Some(Self::F16),
            (naga::ScalarKind::Sint, 4) => Some(Self::I32),
            (naga::ScalarKind::Uint, 4) => Some(Self::U32),
            _ => None,
        }
    }

    /// Coerces `value` and appends its little-endian bytes.
    pub fn write(self, value: f64, out: &mut [u8]) {
        match self {
            Self::F32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
            Self::F16 => out.copy_from_slice(&half::f16::from_f64(value).to_le_bytes()),
            Self::I32 => out.copy_from_slice(&(value as i32).to_le_bytes()),
            Self::U32 => out.copy_from_slice(&(value as u32).to_le_bytes()),
        }
    }
}

/// Float / signed / unsigned, ignoring width and normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericClass {
    Float,
    Sint,
    Uint,
}

/// A host-shareable leaf type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WgslKind {
    Scalar(ScalarType),
    Vector { scalar: ScalarType, size: u8 },
    /// Column-major, `columns` vectors of `rows` components.
    Matrix { scalar: ScalarType, columns: u8, rows: u8 },
    Atomic(ScalarType),
}

impl WgslKind {
    /// Maps a naga leaf type. Returns `None` for aggregates and non-shareable
    /// types.
    #[must_use]
    pub fn from_naga(inner: &naga::TypeInner) -> Option<Self> {
        match *inner {
            naga::TypeInner::Scalar(scalar) => ScalarType::from_naga(scalar).map(Self::Scalar),
            naga::TypeInner::Vector { size, scalar } => Some(Self::Vector {
                scalar: ScalarType::from_naga(scalar)?,
                size: size as u8,
            }),
            naga::TypeInner::Matrix { columns, rows, scalar } => Some(Self::Matrix {
                scalar: ScalarType::from_naga(scalar)?,
                columns: columns as u8,
                rows: rows as u8,
            }),
            naga::TypeInner::Atomic(scalar) => ScalarType::from_naga(scalar).map(Self::Atomic),
            _ => None,
        }
    }

    #[must_use]
    pub const fn scalar(&self) -> ScalarType {
        match *self {
            Self::Scalar(s) | Self::Atomic(s) => s,
            Self::Vector { scalar, .. } | Self::Matrix { scalar, .. } => scalar,
        }
    }

    /// Number of numeric components (`columns * rows` for matrices).
    #[must_use]
    pub const fn component_count(&self) -> u32 {
        match *self {
            Self::Scalar(_) | Self::Atomic(_) => 1,
            Self::Vector { size, .. } => size as u32,
            Self::Matrix { columns, rows, .. } => columns as u32 * rows as u32,
        }
    }

    /// Byte distance between matrix columns (a column is `vecR` aligned).
    #[must_use]
    pub const fn column_stride(&self) -> u64 {
        match *self {
            Self::Matrix { scalar, rows, .. } => vector_align(scalar, rows),
            _ => self.size(),
        }
    }

    /// Size in bytes per the WGSL memory layout rules. `vec3` is 12 bytes;
    /// its 16-byte alignment shows up in the offset of whatever follows it.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match *self {
            Self::Scalar(s) | Self::Atomic(s) => s.size(),
            Self::Vector { scalar, size } => scalar.size() * size as u64,
            Self::Matrix { scalar, columns, rows } => columns as u64 * vector_align(scalar, rows),
        }
    }

    /// Alignment in bytes per the WGSL memory layout rules.
    #[must_use]
    pub const fn align(&self) -> u64 {
        match *self {
            Self::Scalar(s) | Self::Atomic(s) => s.size(),
            Self::Vector { scalar, size } => vector_align(scalar, size),
            Self::Matrix { scalar, rows, .. } => vector_align(scalar, rows),
        }
    }
}

const fn vector_align(scalar: ScalarType, size: u8) -> u64 {
    let n = if size == 3 { 4 } else { size as u64 };
    scalar.size() * n
}

impl fmt::Display for WgslKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Scalar(s) => f.write_str(s.wgsl_name()),
            Self::Atomic(s) => write!(f, "atomic<{}>", s.wgsl_name()),
            Self::Vector { scalar, size } => write!(f, "vec{size}<{}>", scalar.wgsl_name()),
            Self::Matrix { scalar, columns, rows } => {
                write!(f, "mat{columns}x{rows}<{}>", scalar.wgsl_name())
            }
        }
    }
}

/// Numeric class and component count of a vertex format.
///
/// Returns `None` for formats this table does not know, which skips
/// validation for that attribute.
#[must_use]
#[allow(unreachable_patterns)]
pub fn vertex_format_shape(format: wgpu::VertexFormat) -> Option<(NumericClass, u32)> {
    use NumericClass::{Float, Sint, Uint};
    use wgpu::VertexFormat as F;

    let shape = match format {
        F::Uint8 | F::Uint16 | F::Uint32 => (Uint, 1),
        F::Uint8x2 | F::Uint16x2 | F::Uint32x2 => (Uint, 2),
        F::Uint32x3 => (Uint, 3),
        F::Uint8x4 | F::Uint16x4 | F::Uint32x4 => (Uint, 4),
        F::Sint8 | F::Sint16 | F::Sint32 => (Sint, 1),
        F::Sint8x2 | F::Sint16x2 | F::Sint32x2 => (Sint, 2),
        F::Sint32x3 => (Sint, 3),
        F::Sint8x4 | F::Sint16x4 | F::Sint32x4 => (Sint, 4),
        F::Unorm8 | F::Snorm8 | F::Unorm16 | F::Snorm16 | F::Float16 | F::Float32 | F::Float64 => {
            (Float, 1)
        }
        F::Unorm8x2
        | F::Snorm8x2
        | F::Unorm16x2
        | F::Snorm16x2
        | F::Float16x2
        | F::Float32x2
        | F::Float64x2 => (Float, 2),
        F::Float32x3 | F::Float64x3 => (Float, 3),
        F::Unorm8x4
        | F::Snorm8x4
        | F::Unorm16x4
        | F::Snorm16x4
        | F::Float16x4
        | F::Float32x4
        | F::Float64x4
        | F::Unorm10_10_10_2
        | F::Unorm8x4Bgra => (Float, 4),
        _ => return None,
    };
    Some(shape)
}

/// Maps a naga storage texel format to the matching `wgpu` format.
#[must_use]
pub fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    use naga::StorageFormat as S;
    use wgpu::TextureFormat as T;

    Some(match format {
        S::R8Unorm => T::R8Unorm,
        S::R8Snorm => T::R8Snorm,
        S::R8Uint => T::R8Uint,
        S::R8Sint => T::R8Sint,
        S::R16Uint => T::R16Uint,
        S::R16Sint => T::R16Sint,
        S::R16Float => T::R16Float,
        S::Rg8Unorm => T::Rg8Unorm,
        S::Rg8Snorm => T::Rg8Snorm,
        S::Rg8Uint => T::Rg8Uint,
        S::Rg8Sint => T::Rg8Sint,
        S::R32Uint => T::R32Uint,
        S::R32Sint => T::R32Sint,
        S::R32Float => T::R32Float,
        S::Rg16Uint => T::Rg16Uint,
        S::Rg16Sint => T::Rg16Sint,
        S::Rg16Float => T::Rg16Float,
        S::Rgba8Unorm => T::Rgba8Unorm,
        S::Rgba8Snorm => T::Rgba8Snorm,
        S::Rgba8Uint => T::Rgba8Uint,
        S::Rgba8Sint => T::Rgba8Sint,
        S::Bgra8Unorm => T::Bgra8Unorm,
        S::Rgb10a2Uint => T::Rgb10a2Uint,
        S::Rgb10a2Unorm => T::Rgb10a2Unorm,
        S::Rg11b10Ufloat => T::Rg11b10Ufloat,
        S::R64Uint => T::R64Uint,
        S::Rg32Uint => T::Rg32Uint,
        S::Rg32Sint => T::Rg32Sint,
        S::Rg32Float => T::Rg32Float,
        S::Rgba16Uint => T::Rgba16Uint,
        S::Rgba16Sint => T::Rgba16Sint,
        S::Rgba16Float => T::Rgba16Float,
        S::Rgba32Uint => T::Rgba32Uint,
        S::Rgba32Sint => T::Rgba32Sint,
        S::Rgba32Float => T::Rgba32Float,
        S::R16Unorm => T::R16Unorm,
        S::R16Snorm => T::R16Snorm,
        S::Rg16Unorm => T::Rg16Unorm,
        S::Rg16Snorm => T::Rg16Snorm,
        S::Rgba16Unorm => T::Rgba16Unorm,
        S::Rgba16Snorm => T::Rgba16Snorm,
    })
}
