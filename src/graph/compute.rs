//! Compute passes
//!
//! Each compute object resolves its pipeline and bind groups through the
//! cache and is dispatched through one [`ComputeStateTracker`] per pass, so
//! consecutive objects sharing a pipeline or bind group do not rebind it.

use crate::backend::GpuBackend;
use crate::commands::{ComputeStateTracker, EncoderCommand, RecordedComputePass};
use crate::errors::Result;
use crate::graph::{Callback, FrameContext};
use crate::resources::binding::BindingResources;
use crate::resources::buffer::Buffer;
use crate::resources::pipeline::ComputePipeline;
use crate::resources::tracked::Tracked;

/// Workgroup counts of a dispatch.
#[derive(Debug, Clone)]
pub enum Workgroups {
    Count([u32; 3]),
    /// Counts read from `buffer` at `offset`.
    Indirect { buffer: Buffer, offset: u64 },
}

impl Workgroups {
    /// Enough workgroups of `workgroup_size` to cover `invocations`.
    #[must_use]
    pub fn covering(invocations: [u32; 3], workgroup_size: [u32; 3]) -> Self {
        Self::Count(std::array::from_fn(|axis| {
            invocations[axis].div_ceil(workgroup_size[axis].max(1))
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ComputeObjectDescriptor {
    pub label: Option<String>,
    pub pipeline: ComputePipeline,
    pub bindings: Vec<BindingResources>,
    pub workgroups: Workgroups,
}

impl ComputeObjectDescriptor {
    #[must_use]
    pub fn new(pipeline: ComputePipeline, workgroups: Workgroups) -> Self {
        Self {
            label: None,
            pipeline,
            bindings: Vec::new(),
            workgroups,
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: BindingResources) -> Self {
        self.bindings.push(bindings);
        self
    }
}

pub type ComputeObject = Tracked<ComputeObjectDescriptor>;

#[derive(Debug, Clone, Default)]
pub struct ComputePassDescriptor {
    pub label: Option<String>,
    pub objects: Vec<ComputeObject>,
    /// Receives the GPU duration of the pass in nanoseconds.
    pub on_timestamp: Option<Callback<f64>>,
}

impl ComputePassDescriptor {
    #[must_use]
    pub fn new(objects: Vec<ComputeObject>) -> Self {
        Self {
            objects,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn on_timestamp(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_timestamp = Some(Callback::new(f));
        self
    }
}

/// Caller-owned compute pass.
pub type ComputePass = Tracked<ComputePassDescriptor>;

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    fn dispatch_compute_object(&mut self, object: &ComputeObject, tracker: &mut ComputeStateTracker) -> Result<()> {
        let desc = object.read().clone();
        let pipeline = self.cache.compute_pipeline(self.backend, &desc.pipeline)?;
        let groups = self.cache.resolve_bind_groups(
            self.backend,
            desc.pipeline.id(),
            &desc.pipeline.liveness(),
            &pipeline.layout,
            &pipeline.group_layouts,
            &desc.bindings,
        )?;
        let indirect = match &desc.workgroups {
            Workgroups::Indirect { buffer, offset } => Some((self.cache.prepare_buffer(self.backend, buffer)?, *offset)),
            Workgroups::Count(_) => None,
        };

        tracker.set_pipeline(pipeline.pipeline);
        for (index, group) in groups.iter().enumerate() {
            tracker.set_bind_group(index as u32, *group, &[]);
        }
        match (indirect, &desc.workgroups) {
            (Some((buffer, offset)), _) => tracker.dispatch_workgroups_indirect(buffer, offset),
            (None, Workgroups::Count([x, y, z])) => tracker.dispatch_workgroups(*x, *y, *z),
            (None, Workgroups::Indirect { .. }) => {}
        }
        Ok(())
    }

    /// Records a compute pass and the resolve of its timestamps.
    pub(crate) fn record_compute_pass(&mut self, pass: &ComputePass, out: &mut Vec<EncoderCommand>) -> Result<()> {
        let desc = pass.read().clone();
        let timestamp_writes = match desc.on_timestamp {
            Some(_) => {
                let result = self.timestamp_writes(pass.id(), pass.liveness());
                self.soften(result)?.flatten()
            }
            None => None,
        };

        let mut tracker = ComputeStateTracker::new();
        for object in &desc.objects {
            let result = self.dispatch_compute_object(object, &mut tracker);
            self.soften(result)?;
        }

        out.push(EncoderCommand::ComputePass(RecordedComputePass {
            label: desc.label.clone(),
            timestamp_writes,
            commands: tracker.finish(),
        }));

        if let (Some(writes), Some(callback)) = (timestamp_writes, desc.on_timestamp) {
            let result = self.resolve_timestamps(pass.id(), pass.liveness(), writes, callback, out);
            self.soften(result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covering_rounds_up_per_axis() {
        let Workgroups::Count(counts) = Workgroups::covering([100, 64, 1], [64, 8, 0]) else {
            panic!("expected direct counts");
        };
        assert_eq!(counts, [2, 8, 1]);
    }
}
