//! Buffer cache
//!
//! Caller buffers are keyed by descriptor id and rebuilt when the shape
//! (size, usage, initial data) generation changes. Queued writes are flushed
//! to the queue every time the buffer is prepared, then dropped.
//!
//! Value bindings (plain [`UniformValue`] trees bound by name) get a backing
//! buffer per `(bindings, name)`. It is re-encoded only when the bindings
//! generation moves, and reallocated only when the encoded size changes.
//! The cache keeps a copy of the bytes on the device so a partial value is
//! encoded over them.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::backend::{BufferId, GpuBackend, GpuBufferDescriptor, GpuHandle};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::slot::GpuObject;
use crate::cache::ResourceCache;
use crate::errors::{Result, StratumError};
use crate::reflection::{BufferBindingInfo, EncodedValue, encode_value_over};
use crate::resources::binding::BindingResources;
use crate::resources::buffer::{Buffer, COPY_ALIGNMENT, align_to_copy};
use crate::resources::tracked::ResourceId;
use crate::resources::value::UniformValue;

/// `(bindings id, binding name)`.
pub type ValueBufferKey = (ResourceId, String);

/// Backing buffer of a value binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueBuffer {
    pub buffer: BufferId,
    pub size: u64,
    /// Bindings generation whose value is currently on the device.
    pub written_version: Option<u64>,
    /// Bytes currently on the device.
    pub contents: Arc<[u8]>,
}

impl GpuObject for ValueBuffer {
    fn handles(&self) -> SmallVec<[GpuHandle; 2]> {
        smallvec![GpuHandle::Buffer(self.buffer)]
    }
}

/// Device usage of a caller buffer.
///
/// `COPY_DST` is added so queued writes can be flushed, unless the buffer is
/// `MAP_WRITE`, which only combines with `COPY_SRC`.
#[must_use]
pub fn buffer_usage(declared: wgpu::BufferUsages) -> wgpu::BufferUsages {
    if declared.contains(wgpu::BufferUsages::MAP_WRITE) {
        declared
    } else {
        declared | wgpu::BufferUsages::COPY_DST
    }
}

impl ResourceCache {
    /// Ensures the device buffer of `buffer` and flushes its queued writes.
    pub fn prepare_buffer<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, buffer: &Buffer) -> Result<BufferId> {
        let stamp = buffer.stamp();
        let (label, size, usage, contents) = {
            let desc = buffer.descriptor().read();
            (
                self.settings.label("Buffer", desc.label.as_deref()),
                desc.aligned_size(),
                buffer_usage(desc.usage),
                desc.initial_data.clone(),
            )
        };

        let ensured = self.buffers.get_or_create(
            backend,
            stamp.id,
            stamp.version,
            buffer.liveness(),
            self.frame,
            |backend| {
                backend.create_buffer(&GpuBufferDescriptor {
                    label: label.clone(),
                    size,
                    usage,
                    contents,
                })
            },
        )?;

        let writes = buffer.take_writes();
        if writes.is_empty() {
            return Ok(ensured.handle);
        }
        if !usage.contains(wgpu::BufferUsages::COPY_DST) {
            self.settings.soft_error(StratumError::Validation(format!(
                "{label} has {} queued writes but is not writable from the queue",
                writes.len()
            )))?;
            return Ok(ensured.handle);
        }
        for write in writes {
            match write.validate(size) {
                Ok(()) => backend.write_buffer(ensured.handle, write.offset, write.bytes()),
                Err(err) => self.settings.soft_error(err)?,
            }
        }
        Ok(ensured.handle)
    }

    /// Flushes queued writes of a buffer that is already resolved.
    ///
    /// Used when a cached command list is replayed: the list stays valid,
    /// but the contents still have to reach the device.
    pub(crate) fn flush_buffer<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, buffer: &Buffer) -> Result<()> {
        if buffer.pending_writes() > 0 {
            self.prepare_buffer(backend, buffer)?;
        }
        Ok(())
    }

    fn encode_binding_value(
        &self,
        name: &str,
        info: &BufferBindingInfo,
        value: &UniformValue,
        previous: &[u8],
    ) -> Result<EncodedValue> {
        let encoded = encode_value_over(info, value, previous);
        for diagnostic in &encoded.diagnostics {
            self.settings
                .soft_error(StratumError::Validation(format!("value binding `{name}`: {diagnostic}")))?;
        }
        Ok(encoded)
    }

    /// Ensures the backing buffer of a value binding holds the current value.
    pub fn prepare_value_buffer<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        bindings: &BindingResources,
        name: &str,
        value: &UniformValue,
        info: &BufferBindingInfo,
        storage: bool,
    ) -> Result<BufferId> {
        let key: ValueBufferKey = (bindings.id(), name.to_string());
        let version = bindings.version();

        let cached = self
            .value_buffers
            .get_mut(&key)
            .map(|vb| (vb.size, vb.written_version == Some(version), Arc::clone(&vb.contents)));
        let mut encoded = match &cached {
            Some((_, true, _)) => None,
            Some((_, false, contents)) => Some(self.encode_binding_value(name, info, value, contents)?),
            None => Some(self.encode_binding_value(name, info, value, &[])?),
        };

        let size = match &encoded {
            Some(encoded) => align_to_copy(encoded.required_size.max(COPY_ALIGNMENT)),
            None => cached.as_ref().map_or(COPY_ALIGNMENT, |(size, ..)| *size),
        };
        let usage = if storage {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
        } else {
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
        };
        let fingerprint = Fingerprint::new().push(&size).push(&usage.bits()).finish();
        let label = self.settings.label("ValueBuffer", Some(name));

        let ensured = self.value_buffers.get_or_create(
            backend,
            key.clone(),
            fingerprint,
            bindings.liveness(),
            self.frame,
            |backend| {
                let buffer = backend.create_buffer(&GpuBufferDescriptor {
                    label,
                    size,
                    usage,
                    contents: None,
                })?;
                Ok(ValueBuffer {
                    buffer,
                    size,
                    written_version: None,
                    contents: Arc::from(vec![0u8; size as usize]),
                })
            },
        )?;
        let buffer = ensured.handle.buffer;

        if ensured.was_recreated && encoded.is_none() {
            encoded = Some(self.encode_binding_value(name, info, value, &[])?);
        }
        if let Some(encoded) = encoded {
            let mut contents = if ensured.was_recreated {
                vec![0u8; size as usize]
            } else {
                ensured.handle.contents.to_vec()
            };
            for write in &encoded.writes {
                backend.write_buffer(buffer, write.offset, write.bytes());
                let start = write.offset as usize;
                contents[start..start + write.size as usize].copy_from_slice(write.bytes());
            }
            if let Some(slot) = self.value_buffers.get_mut(&key) {
                slot.written_version = Some(version);
                slot.contents = Arc::from(contents);
            }
            log::trace!("Value binding `{name}`: {} writes", encoded.writes.len());
        }
        Ok(buffer)
    }
}
