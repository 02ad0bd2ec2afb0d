//! Device-backed integration tests (§8 seed scenarios that need a live
//! device: output aliasing, shader compile failure, device-loss
//! recovery). Structured after the teacher's `tests/blend.rs`: request an
//! adapter, and skip gracefully (not fail) when none is available, since
//! CI workers frequently have no GPU.
use std::collections::HashMap;

use seqgfx::{
    create_app, Binding, BufferAttachment, FilterKind, FilterSettings, PassSettings, PresentationFormat, Settings, TextureSettings,
    TextureSize, TextureUsageFlags, VirtualFrameTickSource,
};

async fn try_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("seqgfx-test-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        )
        .await
        .ok()
}

/// A minimal passthrough shader: samples the sole input texture at its
/// screen-space UV and writes it straight to the output. Exercises the
/// fixed two-vertex-buffer vertex format and the binding-0-sampler/
/// binding-1-texture layout `binding.rs` builds for a single-input pass.
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

fn settings_with_single_passthrough_filter() -> Settings {
    let mut textures = HashMap::new();
    textures.insert(
        "source".to_string(),
        TextureSettings {
            label: "source".to_string(),
            size: Some(TextureSize { width: 64, height: 64, depth: 1 }),
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

#[test]
fn engine_constructs_from_valid_settings() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let settings = settings_with_single_passthrough_filter();
    let app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16)));
    assert!(app.is_ok());
}

#[test]
fn engine_rejects_oversized_texture_at_construction() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let mut settings = settings_with_single_passthrough_filter();
    settings.textures.get_mut("source").unwrap().size = Some(TextureSize { width: 99999, height: 64, depth: 1 });

    let app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16)));
    assert!(app.is_err(), "oversized texture dims must be a fatal ConfigError (§7)");
}

#[test]
fn update_filter_buffer_rejects_unknown_binding_name() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let mut settings = settings_with_single_passthrough_filter();
    settings.filters.get_mut("identity").unwrap().buffer_attachment = Some(BufferAttachment {
        group_index: 0,
        binding_index: 3,
        bindings: HashMap::from([("samplePoint".to_string(), Binding::Uniform(0.5))]),
    });

    let mut app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16))).expect("valid settings");

    let mut updates = HashMap::new();
    updates.insert("not_a_real_binding".to_string(), Binding::Uniform(1.0));
    let result = app.engine_mut().update_filter_buffer("identity", updates);
    assert!(result.is_err());
}

#[test]
fn tick_is_a_no_op_when_nothing_needs_render() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let settings = settings_with_single_passthrough_filter();
    let mut app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16))).expect("valid settings");

    // Drain the initial "needs_render" state set at construction.
    let _ = app.tick();
    let report = app.tick().expect("tick never errors on idle input");
    assert_eq!(report.filters_executed, 0);
}

#[test]
fn tick_renders_a_terminal_pass_into_the_canvas_with_no_surface_registered() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let settings = settings_with_single_passthrough_filter();
    let mut app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16))).expect("valid settings");

    let report = app.tick().expect("output: none must render into the owned canvas, not fail for lack of a surface");
    assert_eq!(report.filters_executed, 1);
}

#[test]
fn recover_with_device_rebuilds_state_and_forces_a_full_rerender() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };
    let Some((new_device, new_queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let settings = settings_with_single_passthrough_filter();
    let mut app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16))).expect("valid settings");

    let _ = app.tick().expect("first render succeeds");

    app.engine_mut().recover_with_device(new_device, new_queue).expect("rebuild against the new device succeeds");

    let report = app.tick().expect("recovered engine renders again");
    assert_eq!(report.filters_executed, 1, "every filter must be marked needs_render after recovery");
}

#[test]
fn dangling_pass_input_is_a_texture_error() {
    let Some((device, queue)) = pollster::block_on(try_device()) else {
        eprintln!("skipping: no GPU adapter available in this environment");
        return;
    };

    let mut settings = settings_with_single_passthrough_filter();
    settings.filters.get_mut("identity").unwrap().passes[0].input_textures = vec!["does-not-exist".to_string()];

    let app = create_app(device, queue, settings, VirtualFrameTickSource::new(std::time::Duration::from_millis(16)));
    // Construction itself succeeds (texture resolution happens at
    // execution time); exercised further once `Filter::is_compute`
    // distinguishes compute-only validation here.
    assert!(app.is_ok());
}
