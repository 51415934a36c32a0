//! Frame Compilation Tests
//!
//! End-to-end tests of `DeviceContext::submit` against the dummy backend:
//! - Cache identity: unchanged frames create nothing, edits rebuild only
//!   what depends on them
//! - Command diffing across render objects and compute objects
//! - Render bundles: reuse, grouping, pass-only state stripped
//! - Automatic depth and multisample targets
//! - Soft vs strict validation of missing bindings and bad copies
//! - Sweeping of objects whose descriptors were dropped

use stratum::backend::GpuBindingResource;
use stratum::commands::{ComputeCommand, EncoderCommand};
use stratum::resources::{DepthState, VertexBufferLayout};
use stratum::{
    BindingResources, Bindings, Buffer, ColorAttachment, CommandEncoder, ComputeObject,
    ComputeObjectDescriptor, ComputePass, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, CopyBufferToBuffer, CopyTextureToTexture, DeviceContext, DrawCall,
    DummyBackend, Pass, RenderBundle, RenderBundleDescriptor, RenderCommand, RenderObject,
    RenderObjectDescriptor, RenderPass, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, Sampler, SamplerDescriptor, Settings, StratumError, Submit, Texture,
    UniformValue, Viewport, Workgroups,
};

const TRIANGLE: &str = r"
struct Params {
    tint: vec4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.tint;
}
";

const FILL: &str = r"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = id.x;
}
";

const TEXTURED: &str = r"
@group(0) @binding(0) var color: texture_2d<f32>;
@group(0) @binding(1) var color_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return textureSample(color, color_sampler, vec2<f32>(0.5, 0.5));
}
";

/// Longer than the default idle limit of content-keyed cache entries.
const LONG_RUN: usize = 130;

fn context() -> DeviceContext<DummyBackend> {
    DeviceContext::new(DummyBackend::new(), Settings::default())
}

fn strict_context() -> DeviceContext<DummyBackend> {
    DeviceContext::new(DummyBackend::new(), Settings::default().with_strict_validation(true))
}

fn triangle_pipeline() -> RenderPipeline {
    RenderPipeline::new(
        RenderPipelineDescriptor::new(TRIANGLE)
            .with_label("triangle")
            .with_vertex_buffers(vec![VertexBufferLayout::packed(&[(0, wgpu::VertexFormat::Float32x3)])]),
    )
}

fn tint(color: glam::Vec4) -> BindingResources {
    BindingResources::new(Bindings::new().with("params", UniformValue::structure().with_field("tint", color)))
}

fn vertices() -> Buffer {
    Buffer::with_data(Some("triangle"), &[0.0f32; 9], wgpu::BufferUsages::VERTEX)
}

fn triangle(pipeline: &RenderPipeline, bindings: &BindingResources, vertices: &Buffer) -> RenderObject {
    RenderObject::new(
        RenderObjectDescriptor::new(pipeline.clone(), DrawCall::vertices(3))
            .with_bindings(bindings.clone())
            .with_vertex_buffer(vertices.clone()),
    )
}

fn target() -> Texture {
    Texture::render_target(Some("color"), 64, 64, wgpu::TextureFormat::Rgba8Unorm)
}

fn render_pass(color: &Texture, objects: Vec<RenderObject>) -> RenderPass {
    let mut desc = RenderPassDescriptor::new(vec![ColorAttachment::clear(color.clone(), wgpu::Color::BLACK)]);
    for object in objects {
        desc = desc.with_object(object);
    }
    RenderPass::new(desc)
}

fn frame(passes: Vec<Pass>) -> Submit {
    Submit {
        label: Some("test frame".to_string()),
        encoders: vec![CommandEncoder { label: None, passes }],
    }
}

fn last_render_commands(ctx: &DeviceContext<DummyBackend>) -> Vec<RenderCommand> {
    let encoder = ctx.backend().submitted().last().expect("an encoder was submitted");
    encoder.render_passes().next().expect("a render pass was recorded").commands.clone()
}

fn words<T>(bytes: &[u8], decode: fn([u8; 4]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(4)
        .map(|chunk| decode(chunk.try_into().unwrap()))
        .collect()
}

fn last_compute_commands(ctx: &DeviceContext<DummyBackend>) -> Vec<ComputeCommand> {
    let encoder = ctx.backend().submitted().last().expect("an encoder was submitted");
    encoder.compute_passes().next().expect("a compute pass was recorded").commands.clone()
}

fn created_counts(ctx: &DeviceContext<DummyBackend>, kinds: &[&str]) -> Vec<usize> {
    kinds.iter().map(|kind| ctx.backend().created(kind)).collect()
}

fn names(commands: &[RenderCommand]) -> Vec<&'static str> {
    commands.iter().map(RenderCommand::name).collect()
}

// ============================================================================
// Cache Identity Tests
// ============================================================================

#[test]
fn unchanged_frame_creates_nothing_new() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let color = target();
    let pass = render_pass(&color, vec![triangle(&pipeline, &bindings, &vertices())]);
    let submit = frame(vec![pass.into()]);

    ctx.submit(&submit).unwrap();
    let kinds = ["render_pipeline", "bind_group", "buffer", "texture", "texture_view", "shader_module"];
    let created: Vec<usize> = kinds.iter().map(|k| ctx.backend().created(k)).collect();
    let writes = ctx.backend().buffer_writes();

    ctx.submit(&submit).unwrap();
    ctx.submit(&submit).unwrap();

    let after: Vec<usize> = kinds.iter().map(|k| ctx.backend().created(k)).collect();
    assert_eq!(created, after);
    assert_eq!(ctx.backend().created("render_pipeline"), 1);
    assert_eq!(ctx.backend().buffer_writes(), writes);
    assert_eq!(ctx.stats().render_objects.hits, 2);
    assert_eq!(ctx.stats().render_objects.recreations, 0);
}

#[test]
fn pipeline_edit_recreates_only_the_pipeline() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![triangle(&pipeline, &bindings, &vertices())]).into()]);
    ctx.submit(&submit).unwrap();

    pipeline.write().primitive.cull_mode = Some(wgpu::Face::Back);
    ctx.submit(&submit).unwrap();

    let stats = ctx.stats();
    assert_eq!(stats.render_pipelines.recreations, 1);
    assert_eq!(stats.bind_groups.recreations, 0);
    assert_eq!(ctx.backend().created("render_pipeline"), 2);
    assert_eq!(ctx.backend().live("render_pipeline"), 1);
    assert_eq!(ctx.backend().created("buffer"), 2);
}

#[test]
fn value_edit_rewrites_the_backing_buffer_in_place() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![triangle(&pipeline, &bindings, &vertices())]).into()]);
    ctx.submit(&submit).unwrap();
    let writes = ctx.backend().buffer_writes();

    let red = UniformValue::structure().with_field("tint", glam::Vec4::new(1.0, 0.0, 0.0, 1.0));
    bindings.write().insert("params", red);
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.backend().created("bind_group"), 1);
    assert_eq!(ctx.backend().created("buffer"), 2);
    assert_eq!(ctx.backend().buffer_writes(), writes + 1);

    let bind_group = last_render_commands(&ctx)
        .iter()
        .find_map(|command| match command {
            RenderCommand::SetBindGroup { bind_group, .. } => Some(*bind_group),
            _ => None,
        })
        .unwrap();
    let GpuBindingResource::Buffer { buffer, .. } = ctx.backend().bind_group(bind_group).unwrap().entries[0].1 else {
        panic!("params is a buffer binding");
    };
    let data = &ctx.backend().buffer(buffer).unwrap().data;
    let tint: Vec<f32> = words(&data[..16], f32::from_le_bytes);
    assert_eq!(tint, [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn resized_vertex_buffer_is_rebound() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let geometry = vertices();
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![triangle(&pipeline, &bindings, &geometry)]).into()]);
    ctx.submit(&submit).unwrap();

    geometry.resize(72);
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.stats().buffers.recreations, 1);
    assert_eq!(ctx.backend().created("render_pipeline"), 1);
    assert_eq!(ctx.backend().created("bind_group"), 1);
    let rebound = last_render_commands(&ctx).iter().find_map(|command| match command {
        RenderCommand::SetVertexBuffer { buffer, .. } => Some(*buffer),
        _ => None,
    });
    assert_eq!(ctx.backend().buffer(rebound.unwrap()).unwrap().data.len(), 72);
}

#[test]
fn queued_writes_reach_the_device_on_cached_frames() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let geometry = vertices();
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![triangle(&pipeline, &bindings, &geometry)]).into()]);
    ctx.submit(&submit).unwrap();

    geometry.write_pod(12, &[1.0f32, 2.0, 3.0]).unwrap();
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.stats().render_objects.hits, 1);
    let buffer = last_render_commands(&ctx)
        .iter()
        .find_map(|command| match command {
            RenderCommand::SetVertexBuffer { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .unwrap();
    let data = &ctx.backend().buffer(buffer).unwrap().data;
    let floats: Vec<f32> = words(&data[12..24], f32::from_le_bytes);
    assert_eq!(floats, [1.0, 2.0, 3.0]);
}

// ============================================================================
// Command Diffing Tests
// ============================================================================

#[test]
fn shared_pipeline_and_bindings_are_set_once() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let color = target();
    let objects = vec![
        triangle(&pipeline, &bindings, &vertices()),
        triangle(&pipeline, &bindings, &vertices()),
    ];
    ctx.submit(&frame(vec![render_pass(&color, objects).into()])).unwrap();

    assert_eq!(
        names(&last_render_commands(&ctx)),
        vec!["set_pipeline", "set_bind_group", "set_vertex_buffer", "draw", "set_vertex_buffer", "draw"]
    );
}

#[test]
fn different_bindings_rebind_only_the_group() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let geometry = vertices();
    let color = target();
    let objects = vec![
        triangle(&pipeline, &tint(glam::Vec4::ONE), &geometry),
        triangle(&pipeline, &tint(glam::Vec4::ZERO), &geometry),
    ];
    ctx.submit(&frame(vec![render_pass(&color, objects).into()])).unwrap();

    assert_eq!(
        names(&last_render_commands(&ctx)),
        vec!["set_pipeline", "set_bind_group", "set_vertex_buffer", "draw", "set_bind_group", "draw"]
    );
}

#[test]
fn dynamic_state_is_recorded_only_when_set() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let geometry = vertices();
    let color = target();

    let plain = triangle(&pipeline, &bindings, &geometry);
    let with_viewport = RenderObject::new(
        RenderObjectDescriptor::new(pipeline.clone(), DrawCall::vertices(3))
            .with_bindings(bindings.clone())
            .with_vertex_buffer(geometry.clone())
            .with_viewport(Viewport::new(0.0, 0.0, 32.0, 32.0)),
    );
    ctx.submit(&frame(vec![render_pass(&color, vec![plain, with_viewport]).into()]))
        .unwrap();

    let commands = names(&last_render_commands(&ctx));
    assert_eq!(commands.iter().filter(|name| **name == "set_viewport").count(), 1);
    assert_eq!(commands.last(), Some(&"draw"));
    assert_eq!(commands[commands.len() - 2], "set_viewport");
}

#[test]
fn compute_objects_share_pipeline_and_bind_group() {
    let mut ctx = context();
    let pipeline = ComputePipeline::new(ComputePipelineDescriptor::new(FILL).with_label("fill"));
    let data = Buffer::empty(Some("data"), 512, wgpu::BufferUsages::STORAGE);
    let bindings = BindingResources::new(Bindings::new().with("data", data));
    let object = || {
        ComputeObject::new(
            ComputeObjectDescriptor::new(pipeline.clone(), Workgroups::covering([128, 1, 1], [64, 1, 1]))
                .with_bindings(bindings.clone()),
        )
    };
    let pass = ComputePass::new(ComputePassDescriptor::new(vec![object(), object()]).with_label("fill"));
    ctx.submit(&frame(vec![pass.into()])).unwrap();

    let encoder = ctx.backend().submitted().last().unwrap();
    let commands = &encoder.compute_passes().next().unwrap().commands;
    assert_eq!(commands.len(), 4);
    assert!(matches!(commands[2], stratum::commands::ComputeCommand::Dispatch([2, 1, 1])));
    assert!(matches!(commands[3], stratum::commands::ComputeCommand::Dispatch([2, 1, 1])));
}

#[test]
fn resized_storage_buffer_rebuilds_one_bind_group() {
    let mut ctx = context();
    let pipeline = ComputePipeline::new(ComputePipelineDescriptor::new(FILL));
    let data = Buffer::empty(Some("data"), 256, wgpu::BufferUsages::STORAGE);
    let bindings = BindingResources::new(Bindings::new().with("data", data.clone()));
    let object = ComputeObject::new(
        ComputeObjectDescriptor::new(pipeline, Workgroups::Count([1, 1, 1])).with_bindings(bindings),
    );
    let submit = frame(vec![ComputePass::new(ComputePassDescriptor::new(vec![object])).into()]);
    ctx.submit(&submit).unwrap();

    data.resize(1024);
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.backend().created("compute_pipeline"), 1);
    assert_eq!(ctx.stats().bind_groups.recreations, 1);
    assert_eq!(ctx.backend().live("bind_group"), 1);
    assert_eq!(ctx.backend().live("buffer"), 1);
}

// ============================================================================
// Render Bundle Tests
// ============================================================================

#[test]
fn consecutive_bundles_execute_together_and_are_reused() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let geometry = vertices();
    let color = target();

    let viewported = RenderObject::new(
        RenderObjectDescriptor::new(pipeline.clone(), DrawCall::vertices(3))
            .with_bindings(bindings.clone())
            .with_vertex_buffer(geometry.clone())
            .with_viewport(Viewport::new(0.0, 0.0, 16.0, 16.0)),
    );
    let first = RenderBundle::new(RenderBundleDescriptor::new(vec![viewported]).with_label("first"));
    let second = RenderBundle::new(RenderBundleDescriptor::new(vec![triangle(&pipeline, &bindings, &geometry)]));
    let pass = RenderPass::new(
        RenderPassDescriptor::new(vec![ColorAttachment::clear(color.clone(), wgpu::Color::BLACK)])
            .with_object(first)
            .with_object(second)
            .with_object(triangle(&pipeline, &bindings, &geometry)),
    );
    let submit = frame(vec![pass.into()]);

    ctx.submit(&submit).unwrap();
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.backend().created("render_bundle"), 2);
    let commands = last_render_commands(&ctx);
    let RenderCommand::ExecuteBundles(bundles) = &commands[0] else {
        panic!("pass starts with the bundles, got {:?}", commands[0]);
    };
    assert_eq!(bundles.len(), 2);
    let recorded = ctx.backend().render_bundle(bundles[0]).unwrap();
    assert!(recorded.iter().all(|command| !command.is_pass_only()));
    assert!(recorded.iter().any(RenderCommand::is_draw));
    // Bundles reset pass state, so the trailing object binds everything again.
    assert_eq!(names(&commands[1..]), vec!["set_pipeline", "set_bind_group", "set_vertex_buffer", "draw"]);
}

// ============================================================================
// Automatic Attachment Tests
// ============================================================================

#[test]
fn multisampled_pass_renders_through_a_resolving_target() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let color = target();
    let pass = RenderPass::new(
        RenderPassDescriptor::new(vec![ColorAttachment::clear(color.clone(), wgpu::Color::BLACK)])
            .with_sample_count(4)
            .with_object(triangle(&pipeline, &bindings, &vertices())),
    );
    let submit = frame(vec![pass.into()]);
    ctx.submit(&submit).unwrap();
    ctx.submit(&submit).unwrap();

    let encoder = ctx.backend().submitted().last().unwrap();
    let recorded = encoder.render_passes().next().unwrap();
    let attachment = &recorded.color_attachments[0];
    let resolve = attachment.resolve_target.expect("single-sample target is resolved into");

    let backend = ctx.backend();
    let drawn = backend.texture(backend.view_texture(attachment.view).unwrap()).unwrap();
    let resolved = backend.texture(backend.view_texture(resolve).unwrap()).unwrap();
    assert_eq!(drawn.sample_count, 4);
    assert_eq!(resolved.sample_count, 1);
    assert_eq!(drawn.size, resolved.size);

    let RenderCommand::SetPipeline(id) = recorded.commands[0] else {
        panic!("first command sets the pipeline");
    };
    assert_eq!(backend.render_pipeline(id).unwrap().multisample.count, 4);
    assert_eq!(backend.created("texture"), 2);
}

#[test]
fn depth_testing_pipeline_gets_an_automatic_depth_target() {
    let mut ctx = context();
    let pipeline = RenderPipeline::new(
        RenderPipelineDescriptor::new(TRIANGLE)
            .with_vertex_buffers(vec![VertexBufferLayout::packed(&[(0, wgpu::VertexFormat::Float32x3)])])
            .with_depth(DepthState::default()),
    );
    let color = target();
    let pass = render_pass(&color, vec![triangle(&pipeline, &tint(glam::Vec4::ONE), &vertices())]);
    ctx.submit(&frame(vec![pass.into()])).unwrap();

    let backend = ctx.backend();
    let recorded = backend.submitted()[0].render_passes().next().unwrap();
    let depth = recorded.depth_stencil.as_ref().expect("depth attachment");
    let texture = backend.texture(backend.view_texture(depth.view).unwrap()).unwrap();
    assert_eq!(texture.format, wgpu::TextureFormat::Depth24Plus);
    assert_eq!((texture.size.width, texture.size.height), (64, 64));
    assert!(matches!(
        depth.depth_ops,
        Some(wgpu::Operations { load: wgpu::LoadOp::Clear(value), .. }) if (value - 1.0).abs() < f32::EPSILON
    ));
    assert!(depth.stencil_ops.is_none());

    let RenderCommand::SetPipeline(id) = recorded.commands[0] else {
        panic!("first command sets the pipeline");
    };
    let state = backend.render_pipeline(id).unwrap().depth_stencil.clone().unwrap();
    assert_eq!(state.format, wgpu::TextureFormat::Depth24Plus);
}

#[test]
fn resized_target_resizes_automatic_attachments() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let color = target();
    let pass = RenderPass::new(
        RenderPassDescriptor::new(vec![ColorAttachment::clear(color.clone(), wgpu::Color::BLACK)])
            .with_sample_count(4)
            .with_object(triangle(&pipeline, &tint(glam::Vec4::ONE), &vertices())),
    );
    let submit = frame(vec![pass.into()]);
    ctx.submit(&submit).unwrap();

    color.resize(128, 96);
    ctx.submit(&submit).unwrap();

    let backend = ctx.backend();
    let recorded = backend.submitted().last().unwrap().render_passes().next().unwrap();
    let drawn = backend
        .texture(backend.view_texture(recorded.color_attachments[0].view).unwrap())
        .unwrap();
    assert_eq!((drawn.size.width, drawn.size.height), (128, 96));
    assert_eq!(backend.live("texture"), 2);
    assert_eq!(backend.created("render_pipeline"), 1);
}

// ============================================================================
// Validation Policy Tests
// ============================================================================

#[test]
fn missing_binding_skips_the_object() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let color = target();
    let unbound = RenderObject::new(
        RenderObjectDescriptor::new(pipeline.clone(), DrawCall::vertices(3)).with_vertex_buffer(vertices()),
    );
    let bound = triangle(&pipeline, &tint(glam::Vec4::ONE), &vertices());
    ctx.submit(&frame(vec![render_pass(&color, vec![unbound, bound]).into()]))
        .unwrap();

    let commands = last_render_commands(&ctx);
    assert_eq!(commands.iter().filter(|command| command.is_draw()).count(), 1);
}

#[test]
fn missing_binding_fails_the_submit_under_strict_validation() {
    let mut ctx = strict_context();
    let color = target();
    let unbound = RenderObject::new(
        RenderObjectDescriptor::new(triangle_pipeline(), DrawCall::vertices(3)).with_vertex_buffer(vertices()),
    );
    let err = ctx
        .submit(&frame(vec![render_pass(&color, vec![unbound]).into()]))
        .unwrap_err();
    assert!(matches!(err, StratumError::MissingBinding { ref name, group: 0, binding: 0 } if name == "params"));
    assert!(ctx.backend().submitted().is_empty());
}

#[test]
fn shader_parse_error_is_fatal_even_when_soft() {
    let mut ctx = context();
    let broken = RenderPipeline::new(RenderPipelineDescriptor::new("@vertex fn vs( {"));
    let color = target();
    let object = RenderObject::new(RenderObjectDescriptor::new(broken, DrawCall::vertices(3)));
    let err = ctx
        .submit(&frame(vec![render_pass(&color, vec![object]).into()]))
        .unwrap_err();
    assert!(matches!(err, StratumError::ShaderParse { .. }));
}

#[test]
fn pass_without_size_is_skipped() {
    let mut ctx = context();
    let pass = RenderPass::new(RenderPassDescriptor::default());
    ctx.submit(&frame(vec![pass.into()])).unwrap();
    assert!(ctx.backend().submitted()[0].commands.is_empty());
}

// ============================================================================
// Copy Tests
// ============================================================================

#[test]
fn buffer_copy_moves_contents() {
    let mut ctx = context();
    let source = Buffer::with_data(Some("src"), &[1u32, 2, 3, 4], wgpu::BufferUsages::COPY_SRC);
    let destination = Buffer::empty(Some("dst"), 16, wgpu::BufferUsages::STORAGE);
    ctx.submit(&frame(vec![CopyBufferToBuffer::new(source, destination).into()]))
        .unwrap();

    let Some(EncoderCommand::CopyBufferToBuffer { destination, size, .. }) =
        ctx.backend().submitted()[0].commands.first().cloned()
    else {
        panic!("copy was recorded");
    };
    assert_eq!(size, 16);
    let data = &ctx.backend().buffer(destination).unwrap().data;
    let values: Vec<u32> = words(data, u32::from_le_bytes);
    assert_eq!(values, [1, 2, 3, 4]);
}

#[test]
fn copy_from_unreadable_buffer_is_soft_or_strict() {
    let source = Buffer::empty(None, 16, wgpu::BufferUsages::VERTEX);
    let destination = Buffer::empty(None, 16, wgpu::BufferUsages::VERTEX);
    let submit = frame(vec![CopyBufferToBuffer::new(source, destination).into()]);

    let mut soft = context();
    soft.submit(&submit).unwrap();
    assert!(soft.backend().submitted()[0].commands.is_empty());

    let mut strict = strict_context();
    assert!(matches!(strict.submit(&submit), Err(StratumError::Validation(_))));
}

#[test]
fn texture_copy_covers_the_source_mip() {
    let mut ctx = context();
    let source = Texture::render_target(Some("src"), 32, 16, wgpu::TextureFormat::Rgba8Unorm);
    let destination = Texture::render_target(Some("dst"), 32, 16, wgpu::TextureFormat::Rgba8Unorm);
    ctx.submit(&frame(vec![CopyTextureToTexture::new(source, destination).into()]))
        .unwrap();

    let Some(EncoderCommand::CopyTextureToTexture { size, .. }) = ctx.backend().submitted()[0].commands.first()
    else {
        panic!("copy was recorded");
    };
    assert_eq!((size.width, size.height, size.depth_or_array_layers), (32, 16, 1));
    assert_eq!(ctx.backend().created("texture"), 2);
}

// ============================================================================
// Lifetime Tests
// ============================================================================

#[test]
fn dropped_descriptors_release_their_objects() {
    let mut ctx = context();
    {
        let pipeline = triangle_pipeline();
        let color = target();
        let pass = RenderPass::new(
            RenderPassDescriptor::new(vec![ColorAttachment::clear(color.clone(), wgpu::Color::BLACK)])
                .with_sample_count(4)
                .with_object(triangle(&pipeline, &tint(glam::Vec4::ONE), &vertices())),
        );
        ctx.submit(&frame(vec![pass.into()])).unwrap();
        assert!(ctx.backend().live("render_pipeline") > 0);
    }
    ctx.submit(&Submit::default()).unwrap();

    let backend = ctx.backend();
    for kind in ["render_pipeline", "bind_group", "buffer", "texture", "texture_view"] {
        assert_eq!(backend.live(kind), 0, "{kind} left alive");
    }
}

#[test]
fn objects_shared_between_passes_are_built_once() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let object = triangle(&pipeline, &tint(glam::Vec4::ONE), &vertices());
    let first = target();
    let second = target();
    let submit = frame(vec![
        render_pass(&first, vec![object.clone()]).into(),
        render_pass(&second, vec![object]).into(),
    ]);
    ctx.submit(&submit).unwrap();

    assert_eq!(ctx.backend().created("render_pipeline"), 1);
    assert_eq!(ctx.stats().render_objects.misses, 1);
    assert_eq!(ctx.stats().render_objects.hits, 1);
    let passes: Vec<_> = ctx.backend().submitted()[0].render_passes().collect();
    assert_eq!(passes.len(), 2);
    assert_eq!(passes[0].commands, passes[1].commands);
}

#[test]
fn edit_after_a_long_run_reuses_shared_objects() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let bindings = tint(glam::Vec4::ONE);
    let geometry = vertices();
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![triangle(&pipeline, &bindings, &geometry)]).into()]);
    for _ in 0..LONG_RUN {
        ctx.submit(&submit).unwrap();
        ctx.backend_mut().take_submitted();
    }

    geometry.resize(72);
    ctx.submit(&submit).unwrap();

    let backend = ctx.backend();
    assert_eq!(backend.created("render_pipeline"), 1);
    assert_eq!(backend.created("bind_group"), 1);
    assert_eq!(backend.created("shader_module"), 1);
    assert_eq!(backend.created("pipeline_layout"), 1);
    assert_eq!(backend.created("bind_group_layout"), 1);
    assert_eq!(backend.live("bind_group"), 1);
}

#[test]
fn objects_in_use_survive_idle_eviction() {
    let kinds = [
        "render_pipeline",
        "bind_group",
        "render_bundle",
        "shader_module",
        "pipeline_layout",
        "bind_group_layout",
        "sampler",
    ];
    let mut ctx = context();
    {
        let pipeline = triangle_pipeline();
        let bindings = tint(glam::Vec4::ONE);
        let geometry = vertices();
        let textured = RenderPipeline::new(
            RenderPipelineDescriptor::new(TEXTURED)
                .with_vertex_buffers(vec![VertexBufferLayout::packed(&[(0, wgpu::VertexFormat::Float32x3)])]),
        );
        let sampled = BindingResources::new(
            Bindings::new()
                .with("color", Texture::render_target(Some("source"), 8, 8, wgpu::TextureFormat::Rgba8Unorm))
                .with("color_sampler", Sampler::new(SamplerDescriptor::default())),
        );
        let bundle = RenderBundle::new(RenderBundleDescriptor::new(vec![triangle(&pipeline, &bindings, &geometry)]));
        let pass = RenderPass::new(
            RenderPassDescriptor::new(vec![ColorAttachment::clear(target(), wgpu::Color::BLACK)])
                .with_object(bundle)
                .with_object(triangle(&textured, &sampled, &geometry)),
        );
        let submit = frame(vec![pass.into()]);

        ctx.submit(&submit).unwrap();
        let first = created_counts(&ctx, &kinds);
        assert!(first.iter().all(|&count| count > 0), "{first:?}");
        for _ in 0..LONG_RUN {
            ctx.submit(&submit).unwrap();
            ctx.backend_mut().take_submitted();
        }

        assert_eq!(created_counts(&ctx, &kinds), first);
        let stats = ctx.stats();
        assert_eq!(stats.shader_modules.evictions, 0);
        assert_eq!(stats.bind_group_layouts.evictions, 0);
        assert_eq!(stats.samplers.evictions, 0);
    }

    // Once nothing uses them, shared objects go after the idle limit.
    for _ in 0..LONG_RUN {
        ctx.submit(&Submit::default()).unwrap();
    }
    let backend = ctx.backend();
    for kind in kinds {
        assert_eq!(backend.live(kind), 0, "{kind} left alive");
    }
}

// ============================================================================
// Indirect Tests
// ============================================================================

#[test]
fn indirect_draw_follows_its_argument_buffer() {
    let mut ctx = context();
    let pipeline = triangle_pipeline();
    let args = Buffer::with_data(Some("draw args"), &[3u32, 1, 0, 0], wgpu::BufferUsages::INDIRECT);
    let object = RenderObject::new(
        RenderObjectDescriptor::new(
            pipeline,
            DrawCall::Indirect {
                buffer: args.clone(),
                offset: 0,
            },
        )
        .with_bindings(tint(glam::Vec4::ONE))
        .with_vertex_buffer(vertices()),
    );
    let color = target();
    let submit = frame(vec![render_pass(&color, vec![object]).into()]);

    let indirect = |ctx: &DeviceContext<DummyBackend>| match last_render_commands(ctx).last() {
        Some(RenderCommand::DrawIndirect { buffer, offset: 0 }) => *buffer,
        other => panic!("expected an indirect draw, got {other:?}"),
    };

    ctx.submit(&submit).unwrap();
    let first = indirect(&ctx);
    let data = &ctx.backend().buffer(first).unwrap().data;
    assert_eq!(words(data, u32::from_le_bytes)[..4], [3, 1, 0, 0]);

    args.resize(32);
    ctx.submit(&submit).unwrap();
    let second = indirect(&ctx);
    assert_ne!(first, second);
    assert_eq!(ctx.backend().buffer(second).unwrap().data.len(), 32);
    assert!(ctx.backend().buffer(first).is_none());
    assert_eq!(ctx.backend().created("render_pipeline"), 1);
    assert_eq!(ctx.backend().created("bind_group"), 1);
}

#[test]
fn indirect_dispatch_follows_its_argument_buffer() {
    let mut ctx = context();
    let args = Buffer::with_data(Some("dispatch args"), &[2u32, 1, 1], wgpu::BufferUsages::INDIRECT);
    let data = Buffer::empty(Some("data"), 256, wgpu::BufferUsages::STORAGE);
    let object = ComputeObject::new(
        ComputeObjectDescriptor::new(
            ComputePipeline::new(ComputePipelineDescriptor::new(FILL)),
            Workgroups::Indirect {
                buffer: args.clone(),
                offset: 0,
            },
        )
        .with_bindings(BindingResources::new(Bindings::new().with("data", data))),
    );
    let submit = frame(vec![ComputePass::new(ComputePassDescriptor::new(vec![object])).into()]);

    let indirect = |ctx: &DeviceContext<DummyBackend>| match last_compute_commands(ctx).last() {
        Some(ComputeCommand::DispatchIndirect { buffer, offset: 0 }) => *buffer,
        other => panic!("expected an indirect dispatch, got {other:?}"),
    };

    ctx.submit(&submit).unwrap();
    let first = indirect(&ctx);
    let contents = &ctx.backend().buffer(first).unwrap().data;
    assert_eq!(words(contents, u32::from_le_bytes)[..3], [2, 1, 1]);

    args.resize(16);
    ctx.submit(&submit).unwrap();
    let second = indirect(&ctx);
    assert_ne!(first, second);
    assert_eq!(ctx.backend().buffer(second).unwrap().data.len(), 16);
    assert_eq!(ctx.backend().created("compute_pipeline"), 1);
    assert_eq!(ctx.backend().created("bind_group"), 1);
}
