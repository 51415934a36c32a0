//! Render bundles
//!
//! A bundle is a list of render objects compiled once into a backend render
//! bundle and replayed with `execute_bundles`. It is cached per
//! `(bundle, pass format)` including the attachment size, and rebuilt when
//! any of its objects' command lists changes.
//!
//! Bundles are recorded through a bundle-flavoured tracker, so pass-level
//! state (viewport, scissor, blend constant, stencil reference) that an
//! object carries is left out of the bundle.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuRenderBundleDescriptor, RenderBundleId};
use crate::cache::Fingerprint;
use crate::commands::{RenderCommand, RenderStateTracker};
use crate::errors::Result;
use crate::graph::render_object::RenderObject;
use crate::graph::{FrameContext, RenderPassFormat};
use crate::resources::tracked::Tracked;

#[derive(Debug, Clone, Default)]
pub struct RenderBundleDescriptor {
    pub label: Option<String>,
    pub objects: Vec<RenderObject>,
}

impl RenderBundleDescriptor {
    #[must_use]
    pub fn new(objects: Vec<RenderObject>) -> Self {
        Self { label: None, objects }
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

/// Caller-owned render bundle.
pub type RenderBundle = Tracked<RenderBundleDescriptor>;

impl<B: GpuBackend + ?Sized> FrameContext<'_, B> {
    /// Backend bundle of `bundle` for one pass format.
    pub fn render_bundle(&mut self, bundle: &RenderBundle, format: &RenderPassFormat) -> Result<RenderBundleId> {
        let desc = bundle.read().clone();

        let mut fp = Fingerprint::new();
        fp.push_stamp(bundle.stamp()).push(format);
        let mut lists: Vec<Arc<[RenderCommand]>> = Vec::with_capacity(desc.objects.len());
        for object in &desc.objects {
            let result = self.render_object_commands(object, format);
            match self.soften(result)? {
                Some((fingerprint, commands)) => {
                    fp.push(&fingerprint);
                    lists.push(commands);
                }
                // A skipped object is retried next frame.
                None => {
                    fp.push(&object.id()).push(&self.cache.frame);
                }
            }
        }

        let label = self.cache.settings.label("RenderBundle", desc.label.as_deref());
        let frame = self.cache.frame;
        self.cache
            .render_bundles
            .get_or_create(
                self.backend,
                (bundle.id(), format.clone()),
                fp.finish(),
                bundle.liveness(),
                frame,
                |backend| {
                    let mut tracker = RenderStateTracker::for_bundle();
                    for commands in &lists {
                        tracker.replay(commands);
                    }
                    if tracker.suppressed() > 0 {
                        log::debug!("{label}: left {} pass-level commands out of the bundle", tracker.suppressed());
                    }
                    let commands = tracker.finish();
                    backend.create_render_bundle(&GpuRenderBundleDescriptor {
                        label: label.clone(),
                        color_formats: format.color_formats.to_vec(),
                        depth_stencil_format: format.depth_stencil_format,
                        sample_count: format.sample_count,
                        commands: &commands,
                    })
                },
            )
            .map(|r| r.handle)
    }
}
