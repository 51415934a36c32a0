//! Buffer descriptors and queued writes
//!
//! A [`Buffer`] pairs a tracked [`BufferDescriptor`] (shape: size and usage)
//! with a queue of partial [`BufferWrite`]s. Writes do not bump the
//! descriptor generation, so filling a buffer never recreates the GPU object
//! or any bind group that references it; only a shape change does.

use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::errors::{Result, StratumError};
use crate::resources::tracked::{Liveness, ResourceId, Stamp, Tracked};

/// Minimum alignment of buffer sizes, write offsets and write sizes.
pub const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Rounds `size` up to [`COPY_ALIGNMENT`].
#[inline]
#[must_use]
pub fn align_to_copy(size: u64) -> u64 {
    size.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

/// Shape of a GPU buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    /// Declared size in bytes. Rounded up to 4 when the GPU object is created.
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    /// Contents supplied through map-on-create. `None` starts zeroed.
    pub initial_data: Option<Arc<[u8]>>,
}

impl BufferDescriptor {
    /// Size actually allocated on the device.
    #[inline]
    #[must_use]
    pub fn aligned_size(&self) -> u64 {
        align_to_copy(self.size.max(COPY_ALIGNMENT))
    }
}

/// One queued partial write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferWrite {
    /// Destination byte offset inside the buffer.
    pub offset: u64,
    pub data: Arc<[u8]>,
    /// Start of the written range inside `data`.
    pub data_offset: u64,
    /// Number of bytes written.
    pub size: u64,
}

impl BufferWrite {
    /// The bytes this record writes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        let start = self.data_offset as usize;
        &self.data[start..start + self.size as usize]
    }

    /// Checks offset/size alignment and that the write fits `capacity`.
    pub fn validate(&self, capacity: u64) -> Result<()> {
        if self.offset % COPY_ALIGNMENT != 0 || self.size % COPY_ALIGNMENT != 0 {
            return Err(StratumError::UnalignedWrite {
                offset: self.offset,
                size: self.size,
            });
        }
        if self.data_offset + self.size > self.data.len() as u64
            || self.offset + self.size > capacity
        {
            return Err(StratumError::WriteOutOfRange {
                offset: self.offset,
                size: self.size,
                capacity,
            });
        }
        Ok(())
    }
}

/// Caller-owned buffer with a write queue.
#[derive(Debug, Clone)]
pub struct Buffer {
    descriptor: Tracked<BufferDescriptor>,
    writes: Arc<Mutex<Vec<BufferWrite>>>,
}

impl Buffer {
    pub fn new(descriptor: BufferDescriptor) -> Self {
        Self {
            descriptor: Tracked::new(descriptor),
            writes: Arc::default(),
        }
    }

    /// Empty buffer of `size` bytes.
    pub fn empty(label: Option<&str>, size: u64, usage: wgpu::BufferUsages) -> Self {
        Self::new(BufferDescriptor {
            label: label.map(str::to_string),
            size,
            usage,
            initial_data: None,
        })
    }

    /// Buffer created with `data` mapped at creation.
    pub fn with_data<T: Pod>(label: Option<&str>, data: &[T], usage: wgpu::BufferUsages) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        Self::new(BufferDescriptor {
            label: label.map(str::to_string),
            size: bytes.len() as u64,
            usage,
            initial_data: Some(pad_to_alignment(bytes)),
        })
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &Tracked<BufferDescriptor> {
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
    pub fn size(&self) -> u64 {
        self.descriptor.read().size
    }

    /// Changes the declared size. The GPU buffer is recreated on next use and
    /// pending writes are kept.
    pub fn resize(&self, size: u64) {
        let mut desc = self.descriptor.write();
        desc.size = size;
        desc.initial_data = None;
    }

    /// Queues a write of `data` at `offset`.
    ///
    /// The offset must be 4-byte aligned; a size that is not a multiple of 4
    /// is zero-padded.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset % COPY_ALIGNMENT != 0 {
            return Err(StratumError::UnalignedWrite {
                offset,
                size: data.len() as u64,
            });
        }
        let data = pad_to_alignment(data);
        let size = data.len() as u64;
        self.writes.lock().push(BufferWrite {
            offset,
            data,
            data_offset: 0,
            size,
        });
        Ok(())
    }

    /// Queues a write of `size` bytes of `data`, starting at `data_offset`.
    pub fn write_range(&self, offset: u64, data: Arc<[u8]>, data_offset: u64, size: u64) -> Result<()> {
        let write = BufferWrite {
            offset,
            data,
            data_offset,
            size,
        };
        if offset % COPY_ALIGNMENT != 0 || size % COPY_ALIGNMENT != 0 {
            return Err(StratumError::UnalignedWrite { offset, size });
        }
        if data_offset + size > write.data.len() as u64 {
            return Err(StratumError::WriteOutOfRange {
                offset: data_offset,
                size,
                capacity: write.data.len() as u64,
            });
        }
        self.writes.lock().push(write);
        Ok(())
    }

    /// Convenience wrapper over [`write`](Self::write) for `Pod` slices.
    pub fn write_pod<T: Pod>(&self, offset: u64, data: &[T]) -> Result<()> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Drains the write queue.
    pub(crate) fn take_writes(&self) -> Vec<BufferWrite> {
        std::mem::take(&mut *self.writes.lock())
    }
}

fn pad_to_alignment(bytes: &[u8]) -> Arc<[u8]> {
    let padded = align_to_copy(bytes.len() as u64) as usize;
    if padded == bytes.len() {
        return Arc::from(bytes);
    }
    let mut data = Vec::with_capacity(padded);
    data.extend_from_slice(bytes);
    data.resize(padded, 0);
    Arc::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_rounds_up() {
        let b = Buffer::empty(None, 6, wgpu::BufferUsages::VERTEX);
        assert_eq!(b.descriptor().read().aligned_size(), 8);
        let b = Buffer::empty(None, 0, wgpu::BufferUsages::VERTEX);
        assert_eq!(b.descriptor().read().aligned_size(), 4);
    }

    #[test]
    fn unaligned_offset_is_rejected() {
        let b = Buffer::empty(None, 16, wgpu::BufferUsages::COPY_DST);
        assert!(matches!(
            b.write(2, &[0; 4]),
            Err(StratumError::UnalignedWrite { offset: 2, .. })
        ));
        assert_eq!(b.pending_writes(), 0);
    }

    #[test]
    fn odd_sized_writes_are_padded() {
        let b = Buffer::empty(None, 16, wgpu::BufferUsages::COPY_DST);
        b.write(4, &[1, 2, 3]).unwrap();
        let writes = b.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].size, 4);
        assert_eq!(writes[0].bytes(), &[1, 2, 3, 0]);
        assert_eq!(b.pending_writes(), 0);
    }

    #[test]
    fn writes_do_not_bump_version() {
        let b = Buffer::empty(None, 16, wgpu::BufferUsages::COPY_DST);
        let v = b.stamp().version;
        b.write_pod(0, &[1.0f32, 2.0]).unwrap();
        assert_eq!(b.stamp().version, v);
        b.resize(32);
        assert_eq!(b.stamp().version, v + 1);
    }

    #[test]
    fn validate_catches_overflow() {
        let w = BufferWrite {
            offset: 12,
            data: Arc::from(vec![0u8; 8]),
            data_offset: 0,
            size: 8,
        };
        assert!(matches!(
            w.validate(16),
            Err(StratumError::WriteOutOfRange { capacity: 16, .. })
        ));
        assert!(w.validate(20).is_ok());
    }
}
