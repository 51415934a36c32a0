//! Occlusion and timestamp queries
//!
//! Query results travel in three steps:
//!
//! 1. while a pass is recorded, its query set is resolved into the resolve
//!    buffer and copied into the read-back buffer ([`FrameContext::resolve_queries`]);
//! 2. after the submit, the read-back buffer is mapped ([`start_readbacks`]);
//! 3. a later poll completes the map and the parsed values are delivered.
//!
//! A read-back buffer is never mapped twice at once: while a map is in flight
//! the pass records no resolve for that query kind.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::backend::{GpuBackend, QuerySetId};
use crate::cache::query::{QUERY_SIZE, QueryBuffers, QueryKey, QueryKind};
use crate::commands::{EncoderCommand, TimestampWrites};
use crate::errors::Result;
use crate::graph::render_object::RenderObject;
use crate::graph::{Callback, FrameContext};
use crate::resources::tracked::{Liveness, ResourceId};

/// Render objects whose passing samples are counted together.
#[derive(Debug, Clone, Default)]
pub struct OcclusionQuery {
    pub objects: Vec<RenderObject>,
    /// Receives the sample count once the frame has completed.
    pub on_result: Option<Callback<u64>>,
}

impl OcclusionQuery {
    #[must_use]
    pub fn new(objects: Vec<RenderObject>) -> Self {
        Self {
            objects,
            on_result: None,
        }
    }

    #[must_use]
    pub fn on_result(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Callback::new(f));
        self
    }
}

/// Results to deliver once the submitted frame has completed.
pub type Delivery = Box<dyn FnOnce(Vec<u64>)>;

/// A resolved query set waiting for its read-back buffer to be mapped.
pub struct PendingReadback {
    pub buffers: QueryBuffers,
    pub count: u32,
    pub deliver: Delivery,
}

impl fmt::Debug for PendingReadback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReadback")
            .field("buffers", &self.buffers)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

/// Little-endian `u64` query values.
#[must_use]
pub fn parse_query_values(bytes: &[u8], count: usize) -> Vec<u64> {
    bytes
        .chunks_exact(QUERY_SIZE as usize)
        .take(count)
        .map(|chunk| {
            let mut value = [0u8; 8];
            value.copy_from_slice(chunk);
            u64::from_le_bytes(value)
        })
        .collect()
}

/// Delivery of a `[begin, end]` timestamp pair as elapsed nanoseconds.
///
/// A pair whose end precedes its begin is discarded.
pub(crate) fn timestamp_delivery(callback: Callback<f64>, period: f32) -> Delivery {
    Box::new(move |values: Vec<u64>| {
        let &[begin, end, ..] = values.as_slice() else {
            return;
        };
        if end < begin {
            log::debug!("Discarding timestamp pair with negative duration ({begin} > {end})");
            return;
        }
        callback.call((end - begin) as f64 * f64::from(period));
    })
}

/// Maps the read-back buffers of every resolved query set.
///
/// Must be called after the encoders that resolve them have been submitted.
pub fn start_readbacks<B: GpuBackend + ?Sized>(backend: &mut B, readbacks: Vec<PendingReadback>) {
    for PendingReadback {
        buffers,
        count,
        deliver,
    } in readbacks
    {
        if buffers.in_flight.swap(true, Ordering::AcqRel) {
            log::trace!("Query read-back already in flight; dropping duplicate");
            continue;
        }
        let in_flight = Arc::clone(&buffers.in_flight);
        let size = u64::from(count) * QUERY_SIZE;
        backend.map_read(
            buffers.readback,
            0,
            size,
            Box::new(move |result: Result<Vec<u8>>| {
                in_flight.store(false, Ordering::Release);
                match result {
                    Ok(bytes) => deliver(parse_query_values(&bytes, count as usize)),
                    Err(err) => log::warn!("Query read-back failed: {err}"),
                }
            }),
        );
    }
}

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    /// Begin/end timestamp writes for a pass.
    ///
    /// `None` when timestamps are disabled in the settings or unsupported by
    /// the device; the gap is logged once per device.
    pub(crate) fn timestamp_writes(&mut self, pass: ResourceId, owner: Liveness) -> Result<Option<TimestampWrites>> {
        if !self.cache.settings.timestamp_queries {
            return Ok(None);
        }
        if !self.cache.capabilities.supports(wgpu::Features::TIMESTAMP_QUERY) {
            self.cache
                .capabilities
                .report_gap("timestamp queries", "pass timings will not be reported");
            return Ok(None);
        }
        let key = QueryKey {
            pass,
            kind: QueryKind::Timestamp,
        };
        let query_set = self.cache.query_set(self.backend, key, owner, 2)?;
        Ok(Some(TimestampWrites {
            query_set,
            beginning_of_pass: Some(0),
            end_of_pass: Some(1),
        }))
    }

    /// Records the resolve of `count` queries and schedules their read-back.
    pub(crate) fn resolve_queries(
        &mut self,
        key: QueryKey,
        owner: Liveness,
        query_set: QuerySetId,
        count: u32,
        out: &mut Vec<EncoderCommand>,
        deliver: Delivery,
    ) -> Result<()> {
        let buffers = self.cache.query_buffers(self.backend, key, owner, count)?;
        if buffers.in_flight.load(Ordering::Acquire) {
            log::trace!("{:?} queries of pass {} still mapping; skipping resolve", key.kind, key.pass);
            return Ok(());
        }
        out.push(EncoderCommand::ResolveQuerySet {
            query_set,
            queries: 0..count,
            destination: buffers.resolve,
            destination_offset: 0,
        });
        out.push(EncoderCommand::CopyBufferToBuffer {
            source: buffers.resolve,
            source_offset: 0,
            destination: buffers.readback,
            destination_offset: 0,
            size: buffers.size,
        });
        self.readbacks.push(PendingReadback {
            buffers,
            count,
            deliver,
        });
        Ok(())
    }

    /// Resolves the timestamps of a pass into `callback`.
    pub(crate) fn resolve_timestamps(
        &mut self,
        pass: ResourceId,
        owner: Liveness,
        writes: TimestampWrites,
        callback: Callback<f64>,
        out: &mut Vec<EncoderCommand>,
    ) -> Result<()> {
        let key = QueryKey {
            pass,
            kind: QueryKind::Timestamp,
        };
        let deliver = timestamp_delivery(callback, self.cache.capabilities.timestamp_period);
        self.resolve_queries(key, owner, writes.query_set, 2, out, deliver)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64};

    use super::*;
    use crate::backend::{BufferId, DummyBackend, GpuBufferDescriptor};

    #[test]
    fn query_values_are_little_endian_u64() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        bytes.extend_from_slice(&[0xff; 8]);
        assert_eq!(parse_query_values(&bytes, 2), vec![7, 1 << 40]);
        assert_eq!(parse_query_values(&bytes[..12], 4), vec![7]);
    }

    #[test]
    fn negative_timestamp_delta_is_discarded() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let callback = Callback::new(move |ns: f64| sink.store(ns as u64, Ordering::SeqCst));

        timestamp_delivery(callback.clone(), 2.0)(vec![100, 50]);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        timestamp_delivery(callback, 2.0)(vec![100, 150]);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    fn readback(backend: &mut DummyBackend, delivered: &Arc<AtomicBool>) -> PendingReadback {
        let readback: BufferId = backend
            .create_buffer(&GpuBufferDescriptor {
                label: "readback".to_string(),
                size: 8,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                contents: Some(Arc::from(42u64.to_le_bytes().as_slice())),
            })
            .unwrap();
        let flag = Arc::clone(delivered);
        PendingReadback {
            buffers: QueryBuffers {
                resolve: readback,
                readback,
                size: 8,
                in_flight: Arc::new(AtomicBool::new(false)),
            },
            count: 1,
            deliver: Box::new(move |values| {
                assert_eq!(values, vec![42]);
                flag.store(true, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn readback_maps_once_until_completed() {
        let mut backend = DummyBackend::new();
        let delivered = Arc::new(AtomicBool::new(false));
        let first = readback(&mut backend, &delivered);
        let in_flight = Arc::clone(&first.buffers.in_flight);
        let duplicate = PendingReadback {
            buffers: first.buffers.clone(),
            count: 1,
            deliver: Box::new(|_| panic!("duplicate read-back delivered")),
        };

        start_readbacks(&mut backend, vec![first, duplicate]);
        assert!(in_flight.load(Ordering::SeqCst));
        assert!(!delivered.load(Ordering::SeqCst));

        backend.poll();
        assert!(delivered.load(Ordering::SeqCst));
        assert!(!in_flight.load(Ordering::SeqCst));
    }
}
