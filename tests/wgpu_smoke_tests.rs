//! Real Device Smoke Tests
//!
//! Runs a small frame through `WgpuBackend`. Skipped when the machine has no
//! usable adapter.

use stratum::{
    BindingResources, Bindings, Buffer, ColorAttachment, CommandEncoder, ComputeObject,
    ComputeObjectDescriptor, ComputePass, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, DeviceContext, DrawCall, RenderObject, RenderObjectDescriptor,
    RenderPass, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, Settings,
    StratumError, Submit, Texture, WgpuBackend, WgpuBackendOptions, Workgroups,
};

const TRIANGLE: &str = r"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(i) - 1);
    let y = f32(i32(i & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
}
";

const FILL: &str = r"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = id.x;
}
";

fn device() -> Option<DeviceContext<WgpuBackend>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = WgpuBackendOptions {
        power_preference: wgpu::PowerPreference::LowPower,
        ..Default::default()
    };
    match WgpuBackend::new(options) {
        Ok(backend) => Some(DeviceContext::new(backend, Settings::default())),
        Err(StratumError::AdapterRequestFailed(reason)) => {
            eprintln!("skipping: no adapter ({reason})");
            None
        }
        Err(err) => {
            eprintln!("skipping: device unavailable ({err})");
            None
        }
    }
}

#[test]
fn frame_runs_on_a_real_device() {
    let Some(mut ctx) = device() else {
        return;
    };

    let data = Buffer::empty(Some("data"), 256 * 4, wgpu::BufferUsages::STORAGE);
    let fill = ComputeObject::new(
        ComputeObjectDescriptor::new(
            ComputePipeline::new(ComputePipelineDescriptor::new(FILL)),
            Workgroups::Count([4, 1, 1]),
        )
        .with_bindings(BindingResources::new(Bindings::new().with("data", data))),
    );

    let color = Texture::render_target(Some("color"), 64, 64, wgpu::TextureFormat::Rgba8Unorm);
    let triangle = RenderObject::new(RenderObjectDescriptor::new(
        RenderPipeline::new(RenderPipelineDescriptor::new(TRIANGLE)),
        DrawCall::vertices(3),
    ));

    let submit = Submit {
        label: Some("smoke".to_string()),
        encoders: vec![CommandEncoder {
            label: None,
            passes: vec![
                ComputePass::new(ComputePassDescriptor::new(vec![fill])).into(),
                RenderPass::new(
                    RenderPassDescriptor::new(vec![ColorAttachment::clear(color, wgpu::Color::BLACK)])
                        .with_object(triangle),
                )
                .into(),
            ],
        }],
    };

    for _ in 0..3 {
        ctx.submit(&submit).unwrap();
        ctx.maintain().unwrap();
    }
    assert_eq!(ctx.stats().frames, 3);
    assert_eq!(ctx.stats().render_objects.misses, 1);
}
