//! Render Graph Execution
//!
//! A frame is described as plain data:
//!
//! ```text
//! Submit
//!  └─ CommandEncoder*
//!      └─ Pass* ── Render ── RenderPassObject* (object | bundle | occlusion query)
//!                ├ Compute ── ComputeObject*
//!                ├ CopyBufferToBuffer
//!                └ CopyTextureToTexture
//! ```
//!
//! [`FrameContext`] walks that tree, resolves every object it meets through
//! the [`ResourceCache`], and records one [`RecordedEncoder`] per encoder.
//! Each pass kind lives in its own module:
//!
//! - [`render_pass`]: attachments, automatic depth and multisample targets
//! - [`render_object`]: per-object command lists and their cache
//! - [`bundle`]: render bundles
//! - [`queries`]: occlusion and timestamp queries and their read-back
//! - [`compute`]: compute passes
//! - [`copy`]: buffer and texture copies
//!
//! Soft failures inside a pass (a missing binding, a pass without a size)
//! skip the object or pass they concern and leave the rest of the frame
//! intact, unless strict validation is on.

pub mod bundle;
pub mod compute;
pub mod copy;
pub mod queries;
pub mod render_object;
pub mod render_pass;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::GpuBackend;
use crate::cache::ResourceCache;
use crate::commands::{EncoderCommand, RecordedEncoder};
use crate::errors::Result;

pub use bundle::{RenderBundle, RenderBundleDescriptor};
pub use compute::{ComputeObject, ComputeObjectDescriptor, ComputePass, ComputePassDescriptor, Workgroups};
pub use copy::{CopyBufferToBuffer, CopyTextureToTexture, TextureCopy};
pub use queries::{OcclusionQuery, PendingReadback};
pub use render_object::{
    DrawCall, IndexBufferBinding, RenderObject, RenderObjectDescriptor, ScissorRect, Viewport,
};
pub use render_pass::{
    ColorAttachment, DepthStencilAttachment, RenderPass, RenderPassDescriptor, RenderPassObject,
};

// ─── Callbacks ────────────────────────────────────────────────────────────────

/// Shared result callback (query results).
pub struct Callback<T>(Arc<dyn Fn(T) + Send + Sync>);

impl<T> Callback<T> {
    pub fn new(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn call(&self, value: T) {
        (self.0)(value);
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

// ─── Frame Description ────────────────────────────────────────────────────────

/// Everything submitted to the queue at once.
#[derive(Debug, Clone, Default)]
pub struct Submit {
    pub label: Option<String>,
    pub encoders: Vec<CommandEncoder>,
}

/// One command encoder: passes recorded in order.
#[derive(Debug, Clone, Default)]
pub struct CommandEncoder {
    pub label: Option<String>,
    pub passes: Vec<Pass>,
}

#[derive(Debug, Clone)]
pub enum Pass {
    Render(RenderPass),
    Compute(ComputePass),
    CopyTextureToTexture(CopyTextureToTexture),
    CopyBufferToBuffer(CopyBufferToBuffer),
}

impl From<RenderPass> for Pass {
    fn from(pass: RenderPass) -> Self {
        Self::Render(pass)
    }
}

impl From<ComputePass> for Pass {
    fn from(pass: ComputePass) -> Self {
        Self::Compute(pass)
    }
}

impl From<CopyTextureToTexture> for Pass {
    fn from(copy: CopyTextureToTexture) -> Self {
        Self::CopyTextureToTexture(copy)
    }
}

impl From<CopyBufferToBuffer> for Pass {
    fn from(copy: CopyBufferToBuffer) -> Self {
        Self::CopyBufferToBuffer(copy)
    }
}

// ─── Render Pass Format ───────────────────────────────────────────────────────

/// Attachment formats, size and sample count of a render pass.
///
/// Pipelines depend on everything but the size; bundles depend on all of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassFormat {
    pub width: u32,
    pub height: u32,
    pub color_formats: SmallVec<[Option<wgpu::TextureFormat>; 4]>,
    pub depth_stencil_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
}

impl RenderPassFormat {
    /// Same formats with the size cleared, as used in pipeline keys.
    #[must_use]
    pub fn without_size(&self) -> Self {
        Self {
            width: 0,
            height: 0,
            ..self.clone()
        }
    }
}

// ─── Frame Context ────────────────────────────────────────────────────────────

/// Mutable state threaded through the recording of one [`Submit`].
///
/// The graph modules add their recording methods to this type.
pub struct FrameContext<'a, B: GpuBackend + ?Sized> {
    pub backend: &'a mut B,
    pub cache: &'a mut ResourceCache,
    /// Query read-backs to start once the frame has been submitted.
    pub readbacks: &'a mut Vec<PendingReadback>,
}

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    /// Records every encoder of `submit`.
    pub fn record_submit(&mut self, submit: &Submit) -> Result<Vec<RecordedEncoder>> {
        let mut encoders = Vec::with_capacity(submit.encoders.len());
        for encoder in &submit.encoders {
            encoders.push(self.record_encoder(encoder)?);
        }
        Ok(encoders)
    }

    /// Records the passes of one encoder, in order.
    pub fn record_encoder(&mut self, encoder: &CommandEncoder) -> Result<RecordedEncoder> {
        let mut commands: Vec<EncoderCommand> = Vec::with_capacity(encoder.passes.len());
        for pass in &encoder.passes {
            match pass {
                Pass::Render(pass) => self.record_render_pass(pass, &mut commands)?,
                Pass::Compute(pass) => self.record_compute_pass(pass, &mut commands)?,
                Pass::CopyBufferToBuffer(copy) => self.record_buffer_copy(copy, &mut commands)?,
                Pass::CopyTextureToTexture(copy) => self.record_texture_copy(copy, &mut commands)?,
            }
        }
        Ok(RecordedEncoder {
            label: encoder.label.clone(),
            commands,
        })
    }

    /// Routes a failure through the soft validation policy.
    ///
    /// `Ok(None)` means the failing item is skipped.
    pub(crate) fn soften<T>(&self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.cache.settings.soft_error(err)?;
                Ok(None)
            }
        }
    }
}
