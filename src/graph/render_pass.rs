//! Render passes
//!
//! Recording a pass resolves, in order:
//!
//! 1. the [`RenderPassFormat`]: attachment formats, the size (explicit, or
//!    taken from the first attachment that has one) and the sample count;
//! 2. the attachments. A single-sample color attachment in a multisampled
//!    pass is drawn through an automatic multisampled target that resolves
//!    into it. When no depth attachment is given but a pipeline in the pass
//!    tests depth, a depth target in the default depth format is created;
//! 3. the pass objects through one [`RenderStateTracker`]. Consecutive bundles
//!    are executed with a single `execute_bundles`, and each occlusion query
//!    gets the next index of the pass query set;
//! 4. the query resolves, which follow the pass in the encoder.
//!
//! Automatic targets and query sets belong to the pass and are destroyed
//! once the caller drops it.

use smallvec::SmallVec;

use crate::backend::{GpuBackend, RenderBundleId};
use crate::cache::query::{QueryKey, QueryKind};
use crate::cache::texture::{AttachmentKey, AttachmentRole};
use crate::commands::{self, EncoderCommand, RecordedRenderPass, RenderStateTracker};
use crate::errors::{Result, StratumError};
use crate::graph::bundle::RenderBundle;
use crate::graph::queries::{Delivery, OcclusionQuery};
use crate::graph::render_object::RenderObject;
use crate::graph::{Callback, FrameContext, RenderPassFormat};
use crate::resources::texture::{Texture, TextureViewDescriptor};
use crate::resources::tracked::Tracked;

// ─── Descriptors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub texture: Texture,
    pub view: TextureViewDescriptor,
    pub ops: wgpu::Operations<wgpu::Color>,
}

impl ColorAttachment {
    /// Attachment cleared to `color` and stored.
    #[must_use]
    pub fn clear(texture: Texture, color: wgpu::Color) -> Self {
        Self {
            texture,
            view: TextureViewDescriptor::default(),
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        }
    }

    /// Attachment whose previous contents are kept.
    #[must_use]
    pub fn load(texture: Texture) -> Self {
        Self {
            texture,
            view: TextureViewDescriptor::default(),
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        }
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.view.format.unwrap_or_else(|| self.texture.format())
    }
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub texture: Texture,
    pub view: TextureViewDescriptor,
    pub depth_ops: Option<wgpu::Operations<f32>>,
    /// Ignored for formats without a stencil aspect.
    pub stencil_ops: Option<wgpu::Operations<u32>>,
}

impl DepthStencilAttachment {
    /// Depth cleared to `depth` and stored.
    #[must_use]
    pub fn clear(texture: Texture, depth: f32) -> Self {
        Self {
            texture,
            view: TextureViewDescriptor::default(),
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(depth),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.view.format.unwrap_or_else(|| self.texture.format())
    }
}

/// One entry of a render pass, drawn in order.
#[derive(Debug, Clone)]
pub enum RenderPassObject {
    Object(RenderObject),
    Bundle(RenderBundle),
    OcclusionQuery(OcclusionQuery),
}

impl From<RenderObject> for RenderPassObject {
    fn from(object: RenderObject) -> Self {
        Self::Object(object)
    }
}

impl From<RenderBundle> for RenderPassObject {
    fn from(bundle: RenderBundle) -> Self {
        Self::Bundle(bundle)
    }
}

impl From<OcclusionQuery> for RenderPassObject {
    fn from(query: OcclusionQuery) -> Self {
        Self::OcclusionQuery(query)
    }
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
    /// Attachment size. `None` takes the size of the first attachment.
    pub size: Option<(u32, u32)>,
    /// Raised to the sample count of the first color texture when lower.
    pub sample_count: u32,
    pub objects: Vec<RenderPassObject>,
    /// Receives every occlusion query result of the pass, in query order.
    pub on_occlusion: Option<Callback<Vec<u64>>>,
    /// Receives the GPU duration of the pass in nanoseconds.
    pub on_timestamp: Option<Callback<f64>>,
}

impl Default for RenderPassDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            color_attachments: Vec::new(),
            depth_stencil: None,
            size: None,
            sample_count: 1,
            objects: Vec::new(),
            on_occlusion: None,
            on_timestamp: None,
        }
    }
}

impl RenderPassDescriptor {
    #[must_use]
    pub fn new(color_attachments: Vec<ColorAttachment>) -> Self {
        Self {
            color_attachments,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn with_depth_stencil(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil = Some(attachment);
        self
    }

    #[must_use]
    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    #[must_use]
    pub fn with_object(mut self, object: impl Into<RenderPassObject>) -> Self {
        self.objects.push(object.into());
        self
    }

    #[must_use]
    pub fn on_occlusion(mut self, f: impl Fn(Vec<u64>) + Send + Sync + 'static) -> Self {
        self.on_occlusion = Some(Callback::new(f));
        self
    }

    #[must_use]
    pub fn on_timestamp(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_timestamp = Some(Callback::new(f));
        self
    }

    /// Whether any pipeline drawn in the pass tests depth.
    fn needs_depth(&self) -> bool {
        let tests_depth = |object: &RenderObject| object.read().pipeline.read().depth.is_some();
        self.objects.iter().any(|entry| match entry {
            RenderPassObject::Object(object) => tests_depth(object),
            RenderPassObject::Bundle(bundle) => bundle.read().objects.iter().any(tests_depth),
            RenderPassObject::OcclusionQuery(query) => query.objects.iter().any(tests_depth),
        })
    }

    fn occlusion_query_count(&self) -> u32 {
        self.objects
            .iter()
            .filter(|entry| matches!(entry, RenderPassObject::OcclusionQuery(_)))
            .count() as u32
    }

    /// Formats, size and sample count of the pass.
    ///
    /// # Errors
    ///
    /// [`StratumError::MissingAttachmentSize`] when neither the descriptor nor
    /// any attachment provides a size.
    pub fn format(&self, default_depth_format: wgpu::TextureFormat) -> Result<RenderPassFormat> {
        let attachment_size = self
            .color_attachments
            .first()
            .map(|a| a.texture.size())
            .or_else(|| self.depth_stencil.as_ref().map(|d| d.texture.size()))
            .map(|size| (size.width, size.height));
        let (width, height) = self
            .size
            .or(attachment_size)
            .ok_or(StratumError::MissingAttachmentSize)?;

        let sample_count = self
            .color_attachments
            .first()
            .map_or(self.sample_count, |a| a.texture.sample_count().max(self.sample_count));

        let depth_stencil_format = match &self.depth_stencil {
            Some(attachment) => Some(attachment.format()),
            None if self.needs_depth() => Some(default_depth_format),
            None => None,
        };

        Ok(RenderPassFormat {
            width,
            height,
            color_formats: self.color_attachments.iter().map(|a| Some(a.format())).collect(),
            depth_stencil_format,
            sample_count,
        })
    }
}

/// Caller-owned render pass.
pub type RenderPass = Tracked<RenderPassDescriptor>;

// ─── Recording ────────────────────────────────────────────────────────────────

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    /// Records a render pass and the resolves of its queries.
    ///
    /// A soft failure of the pass itself (no size, attachment creation)
    /// skips the whole pass.
    pub(crate) fn record_render_pass(&mut self, pass: &RenderPass, out: &mut Vec<EncoderCommand>) -> Result<()> {
        let result = self.encode_render_pass(pass, out);
        self.soften(result).map(|_| ())
    }

    fn color_attachments(
        &mut self,
        pass: &RenderPass,
        desc: &RenderPassDescriptor,
        format: &RenderPassFormat,
    ) -> Result<Vec<commands::ColorAttachment>> {
        let mut attachments = Vec::with_capacity(desc.color_attachments.len());
        for (index, attachment) in desc.color_attachments.iter().enumerate() {
            let view = self.cache.texture_view(self.backend, &attachment.texture, &attachment.view)?;
            if format.sample_count > 1 && attachment.texture.sample_count() == 1 {
                let key = AttachmentKey {
                    pass: pass.id(),
                    role: AttachmentRole::Multisample(index as u32),
                };
                let target = self.cache.auto_attachment(
                    self.backend,
                    key,
                    pass.liveness(),
                    (format.width, format.height),
                    attachment.format(),
                    format.sample_count,
                )?;
                attachments.push(commands::ColorAttachment {
                    view: target.view,
                    resolve_target: Some(view),
                    ops: attachment.ops,
                });
            } else {
                attachments.push(commands::ColorAttachment {
                    view,
                    resolve_target: None,
                    ops: attachment.ops,
                });
            }
        }
        Ok(attachments)
    }

    fn depth_attachment(
        &mut self,
        pass: &RenderPass,
        desc: &RenderPassDescriptor,
        format: &RenderPassFormat,
    ) -> Result<Option<commands::DepthAttachment>> {
        let Some(depth_format) = format.depth_stencil_format else {
            return Ok(None);
        };
        let has_stencil = depth_format.has_stencil_aspect();

        if let Some(attachment) = &desc.depth_stencil {
            let view = self.cache.texture_view(self.backend, &attachment.texture, &attachment.view)?;
            return Ok(Some(commands::DepthAttachment {
                view,
                depth_ops: attachment.depth_ops,
                stencil_ops: attachment.stencil_ops.filter(|_| has_stencil),
            }));
        }

        let key = AttachmentKey {
            pass: pass.id(),
            role: AttachmentRole::Depth,
        };
        let target = self.cache.auto_attachment(
            self.backend,
            key,
            pass.liveness(),
            (format.width, format.height),
            depth_format,
            format.sample_count,
        )?;
        Ok(Some(commands::DepthAttachment {
            view: target.view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Discard,
            }),
            stencil_ops: has_stencil.then_some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(0),
                store: wgpu::StoreOp::Discard,
            }),
        }))
    }

    fn encode_render_pass(&mut self, pass: &RenderPass, out: &mut Vec<EncoderCommand>) -> Result<()> {
        let desc = pass.read().clone();
        let format = desc.format(self.cache.settings.default_depth_format)?;

        let color_attachments = self.color_attachments(pass, &desc, &format)?;
        let depth_stencil = self.depth_attachment(pass, &desc, &format)?;

        let query_count = desc.occlusion_query_count();
        let occlusion_key = QueryKey {
            pass: pass.id(),
            kind: QueryKind::Occlusion,
        };
        let occlusion_query_set = if query_count > 0 {
            Some(self.cache.query_set(self.backend, occlusion_key, pass.liveness(), query_count)?)
        } else {
            None
        };
        let timestamp_writes = match desc.on_timestamp {
            Some(_) => self.timestamp_writes(pass.id(), pass.liveness())?,
            None => None,
        };

        let mut tracker = RenderStateTracker::for_pass();
        let mut bundles: SmallVec<[RenderBundleId; 4]> = SmallVec::new();
        let mut query_index = 0u32;
        let mut query_callbacks: Vec<Option<Callback<u64>>> = Vec::with_capacity(query_count as usize);

        for entry in &desc.objects {
            if !matches!(entry, RenderPassObject::Bundle(_)) && !bundles.is_empty() {
                tracker.execute_bundles(&bundles);
                bundles.clear();
            }
            match entry {
                RenderPassObject::Object(object) => {
                    self.draw_render_object(object, &format, &mut tracker)?;
                }
                RenderPassObject::Bundle(bundle) => {
                    let result = self.render_bundle(bundle, &format);
                    if let Some(id) = self.soften(result)? {
                        bundles.push(id);
                    }
                }
                RenderPassObject::OcclusionQuery(query) => {
                    tracker.begin_occlusion_query(query_index);
                    for object in &query.objects {
                        self.draw_render_object(object, &format, &mut tracker)?;
                    }
                    tracker.end_occlusion_query();
                    query_callbacks.push(query.on_result.clone());
                    query_index += 1;
                }
            }
        }
        tracker.execute_bundles(&bundles);

        out.push(EncoderCommand::RenderPass(RecordedRenderPass {
            label: desc.label.clone(),
            color_attachments,
            depth_stencil,
            occlusion_query_set,
            timestamp_writes,
            commands: tracker.finish(),
        }));

        if let Some(query_set) = occlusion_query_set {
            let deliver = occlusion_delivery(query_callbacks, desc.on_occlusion.clone());
            self.resolve_queries(occlusion_key, pass.liveness(), query_set, query_count, out, deliver)?;
        }
        if let (Some(writes), Some(callback)) = (timestamp_writes, desc.on_timestamp) {
            self.resolve_timestamps(pass.id(), pass.liveness(), writes, callback, out)?;
        }
        Ok(())
    }
}

fn occlusion_delivery(per_query: Vec<Option<Callback<u64>>>, aggregate: Option<Callback<Vec<u64>>>) -> Delivery {
    Box::new(move |values: Vec<u64>| {
        for (callback, &value) in per_query.iter().zip(&values) {
            if let Some(callback) = callback {
                callback.call(value);
            }
        }
        if let Some(aggregate) = aggregate {
            aggregate.call(values);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::render_object::{DrawCall, RenderObjectDescriptor};
    use crate::resources::pipeline::{DepthState, RenderPipeline, RenderPipelineDescriptor};

    const SHADER: &str = r"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(i), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
";

    fn object(depth: bool) -> RenderObject {
        let mut pipeline = RenderPipelineDescriptor::new(SHADER);
        if depth {
            pipeline = pipeline.with_depth(DepthState::default());
        }
        RenderObject::new(RenderObjectDescriptor::new(
            RenderPipeline::new(pipeline),
            DrawCall::vertices(3),
        ))
    }

    #[test]
    fn size_comes_from_the_first_attachment() {
        let color = Texture::render_target(None, 320, 240, wgpu::TextureFormat::Bgra8Unorm);
        let desc = RenderPassDescriptor::new(vec![ColorAttachment::load(color)]).with_sample_count(4);
        let format = desc.format(wgpu::TextureFormat::Depth24Plus).unwrap();
        assert_eq!((format.width, format.height), (320, 240));
        assert_eq!(format.sample_count, 4);
        assert_eq!(format.color_formats.as_slice(), &[Some(wgpu::TextureFormat::Bgra8Unorm)]);
        assert_eq!(format.depth_stencil_format, None);
    }

    #[test]
    fn depth_testing_object_adds_default_depth_format() {
        let color = Texture::render_target(None, 8, 8, wgpu::TextureFormat::Rgba8Unorm);
        let desc = RenderPassDescriptor::new(vec![ColorAttachment::load(color)]).with_object(object(true));
        let format = desc.format(wgpu::TextureFormat::Depth32Float).unwrap();
        assert_eq!(format.depth_stencil_format, Some(wgpu::TextureFormat::Depth32Float));

        let color = Texture::render_target(None, 8, 8, wgpu::TextureFormat::Rgba8Unorm);
        let desc = RenderPassDescriptor::new(vec![ColorAttachment::load(color)]).with_object(object(false));
        assert_eq!(desc.format(wgpu::TextureFormat::Depth32Float).unwrap().depth_stencil_format, None);
    }

    #[test]
    fn pass_without_attachments_has_no_size() {
        let desc = RenderPassDescriptor::default();
        assert!(matches!(
            desc.format(wgpu::TextureFormat::Depth24Plus),
            Err(StratumError::MissingAttachmentSize)
        ));
    }

    #[test]
    fn occlusion_delivery_reaches_each_query_and_the_pass() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        let first = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(0));
        let first_sink = Arc::clone(&first);
        let total_sink = Arc::clone(&total);

        let deliver = occlusion_delivery(
            vec![Some(Callback::new(move |v| first_sink.store(v, Ordering::SeqCst))), None],
            Some(Callback::new(move |values: Vec<u64>| {
                total_sink.store(values.iter().sum(), Ordering::SeqCst);
            })),
        );
        deliver(vec![12, 30]);
        assert_eq!(first.load(Ordering::SeqCst), 12);
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }
}
