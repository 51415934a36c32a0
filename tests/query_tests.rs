//! Query Tests
//!
//! Tests for:
//! - Occlusion queries: per-query and per-pass callbacks, query indices
//! - Timestamp queries: duration scaling, discarded negative pairs
//! - Devices without timestamp support: passes still render, no callback
//! - Read-back buffers that are still mapping skip the next resolve

use std::sync::Arc;

use parking_lot::Mutex;

use stratum::commands::EncoderCommand;
use stratum::{
    ColorAttachment, CommandEncoder, ComputePass, ComputePassDescriptor, DeviceContext, DrawCall,
    DummyBackend, OcclusionQuery, Pass, RenderCommand, RenderObject, RenderObjectDescriptor,
    RenderPass, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, Settings, Submit,
    Texture,
};

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

fn object() -> RenderObject {
    RenderObject::new(RenderObjectDescriptor::new(
        RenderPipeline::new(RenderPipelineDescriptor::new(SHADER)),
        DrawCall::vertices(3),
    ))
}

fn color_pass() -> RenderPassDescriptor {
    let color = Texture::render_target(Some("color"), 32, 32, wgpu::TextureFormat::Rgba8Unorm);
    RenderPassDescriptor::new(vec![ColorAttachment::clear(color, wgpu::Color::BLACK)])
}

fn frame(pass: impl Into<Pass>) -> Submit {
    Submit {
        label: None,
        encoders: vec![CommandEncoder {
            label: None,
            passes: vec![pass.into()],
        }],
    }
}

fn sink<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&seen);
    (seen, move |value| writer.lock().push(value))
}

fn resolves(ctx: &DeviceContext<DummyBackend>) -> usize {
    let encoder = ctx.backend().submitted().last().expect("an encoder was submitted");
    encoder
        .commands
        .iter()
        .filter(|command| matches!(command, EncoderCommand::ResolveQuerySet { .. }))
        .count()
}

// ============================================================================
// Occlusion Query Tests
// ============================================================================

#[test]
fn occlusion_results_reach_each_query_and_the_pass() {
    let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
    let (first, on_first) = sink::<u64>();
    let (second, on_second) = sink::<u64>();
    let (all, on_all) = sink::<Vec<u64>>();

    let pass = RenderPass::new(
        color_pass()
            .with_object(OcclusionQuery::new(vec![object()]).on_result(on_first))
            .with_object(object())
            .with_object(OcclusionQuery::new(vec![object()]).on_result(on_second))
            .on_occlusion(on_all),
    );
    ctx.backend_mut().push_query_results(vec![128, 0]);
    ctx.submit(&frame(pass)).unwrap();

    let begins: Vec<u32> = ctx.backend().submitted()[0]
        .render_passes()
        .next()
        .unwrap()
        .commands
        .iter()
        .filter_map(|command| match command {
            RenderCommand::BeginOcclusionQuery(index) => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(begins, vec![0, 1]);
    assert!(first.lock().is_empty());

    ctx.maintain().unwrap();
    assert_eq!(*first.lock(), vec![128]);
    assert_eq!(*second.lock(), vec![0]);
    assert_eq!(*all.lock(), vec![vec![128, 0]]);
}

#[test]
fn query_set_is_sized_to_the_pass_and_reused() {
    let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
    let pass = RenderPass::new(
        color_pass()
            .with_object(OcclusionQuery::new(vec![object()]))
            .with_object(OcclusionQuery::new(vec![object()]))
            .with_object(OcclusionQuery::new(vec![object()])),
    );
    let submit = frame(pass);
    ctx.submit(&submit).unwrap();
    ctx.maintain().unwrap();
    ctx.submit(&submit).unwrap();

    let backend = ctx.backend();
    let set = backend.submitted()[1].render_passes().next().unwrap().occlusion_query_set.unwrap();
    assert_eq!(backend.query_set(set).unwrap().count, 3);
    assert_eq!(backend.created("query_set"), 1);
}

#[test]
fn resolve_is_skipped_while_the_readback_is_mapping() {
    let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
    let (seen, on_all) = sink::<Vec<u64>>();
    let pass = RenderPass::new(
        color_pass()
            .with_object(OcclusionQuery::new(vec![object()]))
            .on_occlusion(on_all),
    );
    let submit = frame(pass);

    ctx.backend_mut().push_query_results(vec![5]);
    ctx.submit(&submit).unwrap();
    assert_eq!(resolves(&ctx), 1);

    ctx.submit(&submit).unwrap();
    assert_eq!(resolves(&ctx), 0);

    ctx.maintain().unwrap();
    assert_eq!(*seen.lock(), vec![vec![5]]);

    ctx.backend_mut().push_query_results(vec![9]);
    ctx.submit(&submit).unwrap();
    assert_eq!(resolves(&ctx), 1);
    ctx.maintain().unwrap();
    assert_eq!(*seen.lock(), vec![vec![5], vec![9]]);
}

// ============================================================================
// Timestamp Query Tests
// ============================================================================

#[test]
fn render_pass_duration_is_scaled_by_the_period() {
    let backend = DummyBackend::new().with_timestamp_period(2.0);
    let mut ctx = DeviceContext::new(backend, Settings::default());
    let (seen, on_timestamp) = sink::<f64>();
    let pass = RenderPass::new(color_pass().with_object(object()).on_timestamp(on_timestamp));

    ctx.backend_mut().push_query_results(vec![100, 400]);
    ctx.submit(&frame(pass)).unwrap();

    let recorded = ctx.backend().submitted()[0].render_passes().next().unwrap().clone();
    let writes = recorded.timestamp_writes.expect("timestamps are written");
    assert_eq!((writes.beginning_of_pass, writes.end_of_pass), (Some(0), Some(1)));

    ctx.maintain().unwrap();
    assert_eq!(*seen.lock(), vec![600.0]);
}

#[test]
fn negative_duration_is_not_reported() {
    let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
    let (seen, on_timestamp) = sink::<f64>();
    let pass = ComputePass::new(ComputePassDescriptor::default().on_timestamp(on_timestamp));

    ctx.backend_mut().push_query_results(vec![900, 300]);
    ctx.submit(&frame(pass)).unwrap();
    ctx.maintain().unwrap();
    assert!(seen.lock().is_empty());
}

#[test]
fn occlusion_and_timestamps_resolve_in_pass_order() {
    let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
    let (occlusion, on_all) = sink::<Vec<u64>>();
    let (timing, on_timestamp) = sink::<f64>();
    let pass = RenderPass::new(
        color_pass()
            .with_object(OcclusionQuery::new(vec![object()]))
            .on_occlusion(on_all)
            .on_timestamp(on_timestamp),
    );

    ctx.backend_mut().push_query_results(vec![77]);
    ctx.backend_mut().push_query_results(vec![10, 35]);
    ctx.submit(&frame(pass)).unwrap();
    assert_eq!(resolves(&ctx), 2);

    ctx.maintain().unwrap();
    assert_eq!(*occlusion.lock(), vec![vec![77]]);
    assert_eq!(*timing.lock(), vec![25.0]);
}

// ============================================================================
// Capability Degradation Tests
// ============================================================================

#[test]
fn timestamps_without_device_support_are_silently_dropped() {
    let backend = DummyBackend::with_features(wgpu::Features::empty());
    let mut ctx = DeviceContext::new(backend, Settings::default().with_strict_validation(true));
    let (seen, on_timestamp) = sink::<f64>();
    let pass = RenderPass::new(color_pass().with_object(object()).on_timestamp(on_timestamp));
    let submit = frame(pass);

    ctx.submit(&submit).unwrap();
    ctx.submit(&submit).unwrap();
    ctx.maintain().unwrap();

    let backend = ctx.backend();
    assert_eq!(backend.created("query_set"), 0);
    assert_eq!(resolves(&ctx), 0);
    let recorded = backend.submitted()[1].render_passes().next().unwrap();
    assert!(recorded.timestamp_writes.is_none());
    assert!(recorded.commands.iter().any(RenderCommand::is_draw));
    assert!(seen.lock().is_empty());
}

#[test]
fn timestamps_disabled_in_settings_create_no_queries() {
    let settings = Settings::default().with_timestamp_queries(false);
    let mut ctx = DeviceContext::new(DummyBackend::new(), settings);
    let (seen, on_timestamp) = sink::<f64>();
    let pass = ComputePass::new(ComputePassDescriptor::default().on_timestamp(on_timestamp));

    ctx.submit(&frame(pass)).unwrap();
    ctx.maintain().unwrap();
    assert_eq!(ctx.backend().created("query_set"), 0);
    assert!(seen.lock().is_empty());
}
