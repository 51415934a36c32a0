//! Plain value → byte writes
//!
//! Every leaf of a [`BufferBindingInfo`] reads the value at its path, coerces
//! it to the leaf's element type and writes exactly `size` bytes at its
//! offset. Missing or mis-shaped values are reported, not fatal; the bytes of
//! that leaf are left untouched on the device.
//!
//! Writes are widened to copy alignment, so a write may span bytes of a
//! neighbouring leaf that was not supplied. Those bytes are taken from the
//! `previous` image given to [`encode_value_over`], which keeps the device
//! contents of the neighbour intact.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::reflection::layout::{BufferBindingInfo, LayoutEntry};
use crate::reflection::types::WgslKind;
use crate::resources::buffer::{BufferWrite, COPY_ALIGNMENT, align_to_copy};
use crate::resources::value::UniformValue;

/// Result of encoding one value against one layout.
#[derive(Debug, Clone, Default)]
pub struct EncodedValue {
    /// Bytes the buffer must hold (fixed part plus runtime elements).
    pub required_size: u64,
    /// Coalesced, 4-byte aligned writes relative to the binding start.
    pub writes: Vec<BufferWrite>,
    pub diagnostics: Vec<String>,
    /// Full binding image the writes were cut from.
    pub image: Arc<[u8]>,
}

/// Encodes `value` into writes following `info`.
///
/// Bytes outside the supplied leaves are assumed to be zero.
#[must_use]
pub fn encode_value(info: &BufferBindingInfo, value: &UniformValue) -> EncodedValue {
    encode_value_over(info, value, &[])
}

/// Encodes `value` on top of `previous`, the bytes currently on the device.
#[must_use]
pub fn encode_value_over(info: &BufferBindingInfo, value: &UniformValue, previous: &[u8]) -> EncodedValue {
    let runtime_items = info
        .runtime_array
        .as_ref()
        .and_then(|tail| match value.get(&tail.path) {
            Some(UniformValue::List(items)) => Some(items.as_slice()),
            _ => None,
        })
        .unwrap_or_default();

    let required_size = align_to_copy(info.size_with_runtime_len(runtime_items.len()));
    let mut image = vec![0u8; required_size as usize];
    let kept = previous.len().min(image.len());
    image[..kept].copy_from_slice(&previous[..kept]);
    let mut ranges: Vec<(u64, u64)> = Vec::new();
    let mut diagnostics = Vec::new();

    encode_entries(&info.entries, 0, value, &mut image, &mut ranges, &mut diagnostics);

    if let Some(tail) = &info.runtime_array {
        if value.get(&tail.path).is_some_and(|v| v.list_len().is_none()) {
            diagnostics.push(format!("`{}`: expected a list for the runtime-sized array", tail.path));
        }
        for (i, item) in runtime_items.iter().enumerate() {
            let base = tail.offset + tail.stride * i as u64;
            encode_entries(&tail.element.entries, base, item, &mut image, &mut ranges, &mut diagnostics);
        }
    }

    let data: Arc<[u8]> = Arc::from(image);
    let writes = coalesce(ranges, required_size)
        .into_iter()
        .map(|(start, end)| BufferWrite {
            offset: start,
            data: Arc::clone(&data),
            data_offset: start,
            size: end - start,
        })
        .collect();

    EncodedValue {
        required_size,
        writes,
        diagnostics,
        image: data,
    }
}

fn encode_entries(
    entries: &[LayoutEntry],
    base: u64,
    value: &UniformValue,
    image: &mut [u8],
    ranges: &mut Vec<(u64, u64)>,
    diagnostics: &mut Vec<String>,
) {
    for entry in entries {
        let Some(leaf) = value.get(&entry.path) else {
            diagnostics.push(format!("`{}`: no value provided", entry.path));
            continue;
        };
        let start = base + entry.offset;
        let slot = &mut image[start as usize..(start + entry.size) as usize];
        match encode_leaf(entry.kind, leaf, slot) {
            Ok(()) => ranges.push((start, start + entry.size)),
            Err(reason) => diagnostics.push(format!("`{}`: {reason}", entry.path)),
        }
    }
}

fn encode_leaf(kind: WgslKind, value: &UniformValue, out: &mut [u8]) -> Result<(), String> {
    let mut numbers: SmallVec<[f64; 16]> = SmallVec::new();
    if !value.flatten_numbers(&mut numbers) {
        return Err(format!("expected numeric data for {kind}"));
    }
    let expected = kind.component_count() as usize;
    if numbers.len() != expected {
        return Err(format!("{kind} needs {expected} components, got {}", numbers.len()));
    }

    let scalar = kind.scalar();
    let width = scalar.size() as usize;
    match kind {
        WgslKind::Matrix { rows, .. } => {
            let rows = rows as usize;
            let stride = kind.column_stride() as usize;
            for (i, n) in numbers.iter().enumerate() {
                let at = (i / rows) * stride + (i % rows) * width;
                scalar.write(*n, &mut out[at..at + width]);
            }
        }
        _ => {
            for (i, n) in numbers.iter().enumerate() {
                scalar.write(*n, &mut out[i * width..(i + 1) * width]);
            }
        }
    }
    Ok(())
}

/// Sorts, widens to copy alignment and merges touching ranges.
fn coalesce(mut ranges: Vec<(u64, u64)>, limit: u64) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        let start = start / COPY_ALIGNMENT * COPY_ALIGNMENT;
        let end = align_to_copy(end).min(limit);
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::layout::derive_buffer_layout;
    use crate::reflection::types::ScalarType;
    use crate::resources::value::FieldPath;

    fn layout(source: &str) -> BufferBindingInfo {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let (_, global) = module.global_variables.iter().next().unwrap();
        derive_buffer_layout(&module, global.ty).unwrap()
    }

    fn f32_at(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn struct_value_becomes_one_contiguous_write() {
        let info = layout("struct U { a: vec3<f32>, b: f32 }\n@group(0) @binding(0) var<uniform> u: U;");
        let value: UniformValue = serde_json::from_value(serde_json::json!({ "a": [1, 2, 3], "b": 4 })).unwrap();
        let encoded = encode_value(&info, &value);
        assert!(encoded.diagnostics.is_empty());
        assert_eq!(encoded.required_size, 16);
        assert_eq!(encoded.writes.len(), 1);
        let bytes = encoded.writes[0].bytes();
        assert_eq!(f32_at(bytes, 8), 3.0);
        assert_eq!(f32_at(bytes, 12), 4.0);
    }

    #[test]
    fn missing_field_is_reported_and_skipped() {
        let info = layout(
            "struct U { a: vec4<f32>, b: vec4<f32>, c: vec4<f32> }\n@group(0) @binding(0) var<uniform> u: U;",
        );
        let value = UniformValue::structure()
            .with_field("a", glam::Vec4::ONE)
            .with_field("c", glam::Vec4::ZERO);
        let encoded = encode_value(&info, &value);
        assert_eq!(encoded.diagnostics.len(), 1);
        assert!(encoded.diagnostics[0].contains("`b`"));
        let spans: Vec<_> = encoded.writes.iter().map(|w| (w.offset, w.size)).collect();
        assert_eq!(spans, vec![(0, 16), (32, 16)]);
    }

    #[test]
    fn wrong_component_count_is_reported() {
        let info = layout("@group(0) @binding(0) var<uniform> v: vec2<f32>;");
        let encoded = encode_value(&info, &UniformValue::from([1.0f32, 2.0, 3.0]));
        assert_eq!(encoded.writes.len(), 0);
        assert!(encoded.diagnostics[0].contains("needs 2 components"));
    }

    #[test]
    fn mat3_columns_land_on_sixteen_byte_stride() {
        let info = layout("@group(0) @binding(0) var<uniform> m: mat3x3<f32>;");
        let value = UniformValue::from(glam::Mat3::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0,
        ]));
        let encoded = encode_value(&info, &value);
        let bytes = encoded.writes[0].bytes();
        assert_eq!(f32_at(bytes, 16), 4.0);
        assert_eq!(f32_at(bytes, 32), 7.0);
        assert_eq!(f32_at(bytes, 40), 9.0);
    }

    #[test]
    fn runtime_array_grows_required_size() {
        let info = layout("@group(0) @binding(0) var<storage, read> items: array<vec4<f32>>;");
        let value = UniformValue::from(vec![glam::Vec4::ONE, glam::Vec4::X, glam::Vec4::Y]);
        let encoded = encode_value(&info, &value);
        assert!(encoded.diagnostics.is_empty());
        assert_eq!(encoded.required_size, 48);
        assert_eq!(encoded.writes.len(), 1);
        assert_eq!(f32_at(encoded.writes[0].bytes(), 32 + 4), 1.0);
    }

    fn half_pair() -> BufferBindingInfo {
        let leaf = |name: &str, offset| LayoutEntry {
            path: FieldPath::root().field(name),
            offset,
            size: 2,
            kind: WgslKind::Scalar(ScalarType::F16),
        };
        BufferBindingInfo {
            size: 4,
            entries: vec![leaf("a", 0), leaf("b", 2)],
            runtime_array: None,
        }
    }

    #[test]
    fn widened_write_keeps_unsupplied_neighbour_bytes() {
        let info = half_pair();
        let both = UniformValue::structure()
            .with_field("a", half::f16::ONE)
            .with_field("b", half::f16::from_f32(2.0));
        let on_device = encode_value(&info, &both).image;

        let only_a = UniformValue::structure().with_field("a", half::f16::from_f32(3.0));
        let encoded = encode_value_over(&info, &only_a, &on_device);
        assert_eq!(encoded.diagnostics.len(), 1);
        assert_eq!(encoded.writes.len(), 1);
        let bytes = encoded.writes[0].bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0..2], half::f16::from_f32(3.0).to_le_bytes());
        assert_eq!(bytes[2..4], half::f16::from_f32(2.0).to_le_bytes());
    }

    #[test]
    fn first_encode_zeroes_unsupplied_neighbour() {
        let only_b = UniformValue::structure().with_field("b", half::f16::ONE);
        let encoded = encode_value(&half_pair(), &only_b);
        assert_eq!(encoded.writes[0].bytes(), [0, 0, 0x00, 0x3c]);
    }

    #[test]
    fn integer_leaves_coerce() {
        let info = layout("struct U { count: u32, offset: i32 }\n@group(0) @binding(0) var<uniform> u: U;");
        let value = UniformValue::structure().with_field("count", 7u32).with_field("offset", -3i32);
        let bytes = encode_value(&info, &value).writes[0].bytes().to_vec();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), -3);
    }
}
