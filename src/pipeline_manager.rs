//! C5: Pipeline Manager — builds pipelines for a filter, driving C3
//! (Pipeline Cache) and C4 (Binding Manager) (§4.5).
//!
//! Grounded in `program.rs::Encoder::simple_render_pipeline`
//! (building a `RenderPipelineDescriptor` from a vertex/fragment module
//! pair and a memoized pipeline layout) and `shader()`/`fragment_shader()`
//! /`vertex_shader()`'s per-ref shader memoization.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::binding::{BindingManager, BindingShape, BufferKind, FilterKind};
use crate::buffer_manager::FilterBuffer;
use crate::cache::{PipelineCache, PipelineHandle, ShaderHandle};
use crate::error::{EngineError, ShaderCompileError};
use crate::executor::TextureTable;
use crate::filter::{Filter, Pass};
use crate::hash::{ContentHash, KeyBuilder};

/// A loaded shader source, keyed by `shader_ref` so repeated passes
/// referencing the same ref don't re-fetch (§4.5 step 1: "fetched once
/// per URL/ref; results cached by ref").
#[derive(Default)]
pub struct ShaderSourceCache {
    by_ref: HashMap<String, Arc<str>>,
}

impl ShaderSourceCache {
    pub fn get_or_fetch(&mut self, shader_ref: &str, fetch: impl FnOnce() -> String) -> Arc<str> {
        if let Some(existing) = self.by_ref.get(shader_ref) {
            return existing.clone();
        }
        let source: Arc<str> = Arc::from(fetch());
        self.by_ref.insert(shader_ref.to_string(), source.clone());
        source
    }
}

/// Fixed vertex format shared by every render pipeline (§4.5 step 5):
/// two `vec2` attributes, `stepMode = vertex`, `arrayStride = 8`.
pub fn vertex_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: 8,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        }],
    }
}

pub struct PipelineBuildInputs<'a> {
    pub surface_format: wgpu::TextureFormat,
    pub filter_kind: FilterKind,
    pub shader_ref: &'a str,
    pub input_count: usize,
    pub buffer: Option<(BufferKind, u32)>,
}

impl PipelineBuildInputs<'_> {
    /// *Pipeline key* = hash({kind, shader_ref, surface_format,
    /// sample_count, layout_entries[], vertex/fragment/compute_spec?,
    /// multisample_spec?}) with keys serialised in sorted order (§4.3).
    fn pipeline_key(&self, shader_hash: ContentHash, sample_count: u32) -> ContentHash {
        KeyBuilder::new()
            .field("kind", format!("{:?}", self.filter_kind))
            .field("shader_ref", self.shader_ref)
            .field("shader_hash", format!("{shader_hash:?}"))
            .field("surface_format", format!("{:?}", self.surface_format))
            .field("sample_count", sample_count)
            .field("input_count", self.input_count)
            .finish()
    }
}

/// Acquire or create a shader module from source, surfacing compile
/// diagnostics via `wgpu`'s validation error scope (§4.3 "Missing shader
/// modules are created synchronously; compilation diagnostics are
/// surfaced").
pub async fn acquire_shader_module(
    device: &wgpu::Device,
    cache: &mut PipelineCache,
    shader_ref: &str,
    source: &str,
) -> Result<ShaderHandle, ShaderCompileError> {
    let key = ContentHash::of_str(source);
    if let Some(handle) = cache.shaders.get(key) {
        cache.shaders.record_reuse();
        return Ok(handle.clone());
    }

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let start = Instant::now();
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(shader_ref),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let elapsed = start.elapsed();

    if let Some(error) = device.pop_error_scope().await {
        return Err(ShaderCompileError {
            messages: vec![error.to_string()],
        });
    }

    let handle = ShaderHandle(Arc::new(module));
    cache.shaders.insert(key, handle.clone(), None);
    cache.shaders.record_compile_time(elapsed);
    Ok(handle)
}

/// Builds the pipeline (and its group-0 bind group) for one pass,
/// following the §4.5 numbered sequence:
/// 1. load shader source, 2. acquire module, 3. acquire bind-group
/// layout, 4. construct pipeline-layout, 5. build/reuse the pipeline,
/// 6. await device idle, 7. build the initial bind group.
pub async fn build_pass_pipeline(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    cache: &mut PipelineCache,
    source_cache: &mut ShaderSourceCache,
    pass: &mut Pass,
    filter_kind: FilterKind,
    buffer_shape: Option<(BufferKind, u32)>,
    surface_format: wgpu::TextureFormat,
    textures: &TextureTable<'_>,
    filter_buffer: Option<&FilterBuffer>,
    filter_name: &str,
    fetch_source: impl FnOnce() -> String,
) -> Result<(), EngineError> {
    let source = source_cache.get_or_fetch(&pass.shader_ref, fetch_source);
    let module = acquire_shader_module(device, cache, &pass.shader_ref, &source).await?;

    let shape = BindingShape {
        kind: filter_kind,
        input_count: pass.inputs.len(),
        buffer: buffer_shape,
    };
    let layout = BindingManager::acquire_layout(device, cache, &shape);

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: &[&layout.0],
        push_constant_ranges: &[],
    });

    let sample_count = match filter_kind {
        FilterKind::Render => 4,
        FilterKind::Compute => 1,
    };

    let inputs = PipelineBuildInputs {
        surface_format,
        filter_kind,
        shader_ref: &pass.shader_ref,
        input_count: pass.inputs.len(),
        buffer: buffer_shape,
    };
    let pipeline_key = inputs.pipeline_key(ContentHash::of_str(&source), sample_count);

    let pipeline_handle = if let Some(handle) = cache.pipelines.get(pipeline_key) {
        cache.pipelines.record_reuse();
        handle.clone()
    } else {
        let handle = match filter_kind {
            FilterKind::Render => {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(pass.label.as_str()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module.0,
                        entry_point: "vs_main",
                        compilation_options: Default::default(),
                        buffers: &[vertex_buffer_layout(), vertex_buffer_layout()],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module.0,
                        entry_point: "fs_main",
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: surface_format,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState {
                        count: sample_count,
                        ..Default::default()
                    },
                    multiview: None,
                    cache: None,
                });
                PipelineHandle::Render(Arc::new(pipeline))
            }
            FilterKind::Compute => {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(pass.label.as_str()),
                    layout: Some(&pipeline_layout),
                    module: &module.0,
                    entry_point: "cs_main",
                    compilation_options: Default::default(),
                    cache: None,
                });
                PipelineHandle::Compute(Arc::new(pipeline))
            }
        };
        cache.pipelines.insert(pipeline_key, handle.clone(), None);
        handle
    };

    // §4.5 step 6: await a single GPU-queue quiescence point per pass.
    queue.submit(std::iter::empty());
    let _ = device.poll(wgpu::Maintain::Wait);

    pass.pipeline = Some(pipeline_handle);
    if pass.bind_groups.is_empty() {
        pass.bind_groups = vec![None];
    }

    // §4.5 step 7: build the pass's initial bind group via C4 and record
    // it, unless a prior input-texture update already supplied one.
    if pass.bind_groups[0].is_none() {
        let group = build_initial_bind_group(device, &layout.0, filter_name, pass, buffer_shape, textures, filter_buffer)?;
        pass.bind_groups[0] = Some(group);
    }

    maintain_cache_capacity(cache);
    Ok(())
}

/// §4.4/§4.5 step 7: resolve `pass.inputs` to live views and construct the
/// pass's group-0 bind group (sampler, input textures, optional buffer).
fn build_initial_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    filter_name: &str,
    pass: &Pass,
    buffer_shape: Option<(BufferKind, u32)>,
    textures: &TextureTable<'_>,
    filter_buffer: Option<&FilterBuffer>,
) -> Result<wgpu::BindGroup, EngineError> {
    let input_views = textures.resolve_input_views(&pass.inputs)?;
    let sampler = BindingManager::make_sampler(device);

    let buffer_entry = match (buffer_shape, filter_buffer) {
        (Some((kind, binding_index)), Some(buffer)) => {
            let storage_name = match kind {
                BufferKind::Uniform => "",
                BufferKind::Storage => buffer.canonical_storage_name().unwrap_or(""),
            };
            Some((buffer, binding_index, kind, storage_name))
        }
        _ => None,
    };

    BindingManager::build_bind_group(device, filter_name, layout, &sampler, &input_views, buffer_entry).map_err(EngineError::from)
}

/// §4.5 "Cache maintenance runs at the end": if the pipeline cache
/// exceeds its limit, evict oldest by `last_used` down to capacity.
/// `LruCache::insert` already does this per-insert, so this is a no-op
/// safety net kept for symmetry with the spec's explicit step.
fn maintain_cache_capacity(cache: &mut PipelineCache) {
    let _ = cache;
}

/// Build pipelines for every pass of `filter`, in declared order, along
/// with each pass's initial bind group (§4.5 step 7) against the current
/// texture table and the filter's backing parameter buffer, if any.
pub async fn build_filter_pipelines(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    cache: &mut PipelineCache,
    source_cache: &mut ShaderSourceCache,
    filter: &mut Filter,
    filter_name: &str,
    surface_format: wgpu::TextureFormat,
    textures: &TextureTable<'_>,
    filter_buffer: Option<&FilterBuffer>,
    mut fetch_source: impl FnMut(&str) -> String,
) -> Result<(), EngineError> {
    let kind = if filter.is_compute() { FilterKind::Compute } else { FilterKind::Render };
    let buffer_shape = filter.attachment().map(|attachment| {
        let buffer_kind = if filter.is_compute() { BufferKind::Storage } else { BufferKind::Uniform };
        (buffer_kind, attachment.binding_index)
    });

    for pass in filter.passes_mut().iter_mut() {
        let shader_ref = pass.shader_ref.clone();
        build_pass_pipeline(
            device,
            queue,
            cache,
            source_cache,
            pass,
            kind,
            buffer_shape,
            surface_format,
            textures,
            filter_buffer,
            filter_name,
            || fetch_source(&shader_ref),
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_source_cache_fetches_once_per_ref() {
        let mut cache = ShaderSourceCache::default();
        let mut fetch_count = 0;
        {
            let mut fetch = || {
                fetch_count += 1;
                "source".to_string()
            };
            let _ = cache.get_or_fetch("a", &mut fetch);
            let _ = cache.get_or_fetch("a", &mut fetch);
        }
        assert_eq!(fetch_count, 1);
    }

    #[test]
    fn vertex_layout_matches_spec_stride() {
        let layout = vertex_buffer_layout();
        assert_eq!(layout.array_stride, 8);
    }
}
