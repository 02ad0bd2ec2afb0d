//! Headless frame-driver demo.
//!
//! Grounded in `bin/editor/src/editor.rs`'s `ModalEditor::redraw_request`
//! loop (request a tick, draw, repeat), stripped of the windowing layer:
//! this drives a `VirtualFrameTickSource` directly instead of waiting on
//! window events, since the engine itself never owns an event loop.
use std::collections::HashMap;
use std::time::Duration;

use seqgfx::{
    create_app, FilterKind, FilterSettings, PassSettings, PresentationFormat, Settings, TextureSettings, TextureSize, TextureUsageFlags,
    VirtualFrameTickSource,
};

/// A minimal passthrough shader: samples the sole input texture at its
/// screen-space UV and writes it straight to the output.
const IDENTITY_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@group(0) @binding(0) var input_sampler: sampler;
@group(0) @binding(1) var input_texture: texture_2d<f32>;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(input_texture, input_sampler, in.uv);
}
"#;

fn build_settings() -> Settings {
    let mut textures = HashMap::new();
    textures.insert(
        "source".to_string(),
        TextureSettings {
            label: "source".to_string(),
            size: Some(TextureSize { width: 256, height: 256, depth: 1 }),
            format: Some(wgpu::TextureFormat::Rgba8Unorm),
            usage: TextureUsageFlags::TEXTURE_BINDING | TextureUsageFlags::COPY_DST,
            sample_count: 1,
        },
    );

    let mut filters = HashMap::new();
    filters.insert(
        "identity".to_string(),
        FilterSettings {
            kind: FilterKind::Render,
            active: true,
            passes: vec![PassSettings {
                input_textures: vec!["source".to_string()],
                shader_ref: "identity.wgsl".to_string(),
                shader_source: IDENTITY_WGSL.to_string(),
                output: None,
            }],
            buffer_attachment: None,
            threshold_filter: None,
        },
    );

    Settings {
        presentation_format: PresentationFormat::Rgba8Unorm,
        textures,
        filters,
    }
}

async fn run() {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .expect("no GPU adapter available; this demo requires a local GPU or software Vulkan/D3D12 driver");
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("seqgfx-headless-demo"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        )
        .await
        .expect("device request failed");

    let settings = build_settings();
    let frame_source = VirtualFrameTickSource::new(Duration::from_millis(16));
    let mut app = create_app(device, queue, settings, frame_source).expect("settings validated at construction");

    for _ in 0..3 {
        let report = app.tick().expect("tick");
        log::info!("tick {}: {} filter(s) executed", report.tick, report.filters_executed);
    }

    let stats = app.engine().snapshot_cache_stats();
    log::info!(
        "pipeline cache: {} hits / {} misses, {} creations",
        stats.pipelines.hits,
        stats.pipelines.misses,
        stats.pipelines.creations
    );
}

fn main() {
    env_logger::init();
    pollster::block_on(run());
}
