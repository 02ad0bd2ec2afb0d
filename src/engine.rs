//! Top-level engine owner (§2 SUPPLEMENTAL "`Engine` top-level owner";
//! §6 "External interfaces").
//!
//! Grounded in `bin/editor/src/editor.rs`'s `Editor` struct (the
//! teacher's single owner of pool + program + surface state behind a
//! `ModalEditor` trait), generalized into a capabilities struct owning
//! C1–C10 plus the injected `Observer` and `FrameTickSource`.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::buffer_manager::{BufferManager, FilterBuffer};
use crate::cache::PipelineCache;
use crate::command_queue::CommandQueue;
use crate::error::EngineError;
use crate::executor::{FilterExecutor, FullscreenGeometry, TextureTable};
use crate::filter::{Binding, Filter, TextureName, MSAA_TEXTURE, SCRATCH_TEXTURE};
use crate::frame_source::{FrameTick, FrameTickSource};
use crate::histogram::{apply_auto_threshold, read_histogram_bins, HistogramStats};
use crate::observer::{NoopObserver, Observer};
use crate::pipeline_manager::{build_filter_pipelines, ShaderSourceCache};
use crate::recovery::RecoveryCoordinator;
use crate::scheduler::{Priority, Scheduler};
use crate::settings::Settings;
use crate::texture_pool::{TexturePool, TextureSignature};

/// §6 "wait_for_render_complete" timeout.
pub const RENDER_COMPLETE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheCountersSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub creations: u64,
    pub reuses: u64,
    pub peak_size: usize,
    pub average_compile_time: Option<Duration>,
}

/// `App::snapshot_cache_stats()`'s return type (§6 SUPPLEMENTAL): a
/// plain struct, one entry per cache kind, rather than an opaque blob.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStatsSnapshot {
    pub shaders: CacheCountersSnapshot,
    pub layouts: CacheCountersSnapshot,
    pub pipelines: CacheCountersSnapshot,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CompletionReport {
    pub filters_executed: usize,
    pub timed_out: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameReport {
    pub tick: u64,
    pub filters_executed: usize,
}

type TextureEntry = (wgpu::Texture, wgpu::TextureView);

/// Owns C1–C10 for one GPU device/surface pair.
pub struct Engine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    texture_pool: TexturePool,
    pipeline_cache: PipelineCache,
    command_queue: CommandQueue,
    scheduler: Scheduler,
    source_cache: ShaderSourceCache,
    observer: Box<dyn Observer>,

    settings: Settings,
    surface_format: wgpu::TextureFormat,
    dims: (u32, u32),

    filters: HashMap<String, Filter>,
    filter_buffers: HashMap<String, FilterBuffer>,
    /// `shader_ref -> WGSL source`, collected from `settings` at
    /// construction (§4.5 step 1: the engine fetches-once-per-ref and
    /// compiles what the embedding application supplies; it never
    /// authors shader text itself).
    shader_sources: HashMap<String, String>,
    /// Histogram-producing filter name -> the render filter whose
    /// `samplePoint`/`range` uniforms its stats feed (§4.9), collected
    /// from `settings` at construction.
    threshold_filters: HashMap<String, String>,
    textures: HashMap<TextureName, TextureEntry>,
    scratch: TextureEntry,
    msaa: TextureEntry,
    canvas: TextureEntry,
    geometry: FullscreenGeometry,

    on_histogram_update: Option<Box<dyn FnMut(&str, &HistogramStats) + Send>>,
    on_threshold_update: Option<Box<dyn FnMut(&str, &HashMap<String, Binding>) + Send>>,
}

/// Open Question resolution (§7 REDESIGN FLAGS "the source sometimes
/// treats the `output === undefined` pass as terminal-and-flush and
/// sometimes as copy-to-swap-chain"): `output = none` always means
/// terminal (flush + await), and always targets this engine-owned
/// canvas texture rather than requiring a live `wgpu::Surface`. A real
/// windowed host copies `Engine::canvas_view()`'s contents to its
/// current surface texture as a separate, external present step; the
/// engine itself never blocks on acquiring a swapchain frame, which
/// would be incompatible with the headless/off-screen uses this crate
/// is built for (see DESIGN.md).
fn create_canvas_texture(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) -> TextureEntry {
    let signature = TextureSignature {
        format,
        width,
        height,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        sample_count: 1,
        depth_layers: 1,
    };
    let texture = device.create_texture(&signature.to_wgpu_descriptor(Some("seqgfx-canvas")));
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_scratch_textures(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) -> (TextureEntry, TextureEntry) {
    let scratch_signature = TextureSignature {
        format,
        width,
        height,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
        sample_count: 1,
        depth_layers: 1,
    };
    let scratch_texture = device.create_texture(&scratch_signature.to_wgpu_descriptor(Some(SCRATCH_TEXTURE)));
    let scratch_view = scratch_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let msaa_signature = TextureSignature {
        format,
        width,
        height,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        sample_count: 4,
        depth_layers: 1,
    };
    let msaa_texture = device.create_texture(&msaa_signature.to_wgpu_descriptor(Some(MSAA_TEXTURE)));
    let msaa_view = msaa_texture.create_view(&wgpu::TextureViewDescriptor::default());

    ((scratch_texture, scratch_view), (msaa_texture, msaa_view))
}

/// Allocate every texture `settings` declares, keyed by name (§4.1, used
/// by both `Engine::new` and device-loss recovery's rebuild step).
fn build_declared_textures(device: &wgpu::Device, settings: &Settings, surface_format: wgpu::TextureFormat) -> (TexturePool, HashMap<TextureName, TextureEntry>) {
    let mut texture_pool = TexturePool::new();
    let mut textures = HashMap::new();
    for (name, declared) in &settings.textures {
        let size = declared.size.unwrap_or_default();
        let signature = TextureSignature {
            format: declared.format.unwrap_or(surface_format),
            width: size.width.max(1),
            height: size.height.max(1),
            usage: declared.usage.to_wgpu(),
            sample_count: declared.sample_count.max(1),
            depth_layers: size.depth.max(1),
        };
        let handle = texture_pool.acquire(device, signature, Some(declared.label.as_str()));
        let texture = texture_pool.get(handle).expect("just acquired").clone();
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        textures.insert(TextureName(name.clone()), (texture, view));
    }
    (texture_pool, textures)
}

/// Build each filter's backing parameter buffer from its declared
/// default bindings (§4.2): a filter is usable for its first render even
/// if `update_filter_buffer` is never called.
fn build_filter_buffers(device: &wgpu::Device, filters: &HashMap<String, Filter>) -> Result<HashMap<String, FilterBuffer>, EngineError> {
    let mut filter_buffers = HashMap::new();
    for (name, filter) in filters {
        if let Some(attachment) = filter.attachment() {
            let built = if filter.is_compute() {
                BufferManager::build_storage_buffers(device, name, attachment)?
            } else {
                BufferManager::build_uniform_buffer(device, name, attachment)?
            };
            filter_buffers.insert(name.clone(), built);
        }
    }
    Ok(filter_buffers)
}

/// Collect `shader_ref -> source` from every declared pass (§4.5 step 1).
/// Later passes silently win if two passes reuse the same `shader_ref`
/// with different text; that mismatch is a configuration mistake the
/// engine has no way to detect since `shader_ref` is the only identity
/// `ShaderSourceCache` keys on.
fn collect_shader_sources(settings: &Settings) -> HashMap<String, String> {
    let mut sources = HashMap::new();
    for filter in settings.filters.values() {
        for pass in &filter.passes {
            sources.insert(pass.shader_ref.clone(), pass.shader_source.clone());
        }
    }
    sources
}

/// Collect `histogram filter name -> threshold filter name` from every
/// declared filter (§4.9). `Settings::validate` already guarantees each
/// referenced threshold filter exists and differs from its histogram
/// filter.
fn collect_threshold_filters(settings: &Settings) -> HashMap<String, String> {
    let mut threshold_filters = HashMap::new();
    for (name, declared) in &settings.filters {
        if let Some(threshold_filter) = &declared.threshold_filter {
            threshold_filters.insert(name.clone(), threshold_filter.clone());
        }
    }
    threshold_filters
}

impl Engine {
    /// `create_app` (§6): validates `settings`, allocates declared
    /// textures, and returns a ready-to-drive engine. `ConfigError`
    /// during this step is fatal (§7).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;

        let surface_format = settings.presentation_format.to_wgpu();
        let (width, height) = settings
            .textures
            .values()
            .find_map(|t| t.size)
            .map(|size| (size.width.max(1), size.height.max(1)))
            .unwrap_or((1, 1));

        let (texture_pool, textures) = build_declared_textures(&device, &settings, surface_format);

        let (scratch, msaa) = create_scratch_textures(&device, surface_format, width, height);
        let canvas = create_canvas_texture(&device, surface_format, width, height);
        let geometry = FullscreenGeometry::new(&device);

        let mut filters = HashMap::new();
        for (name, declared) in &settings.filters {
            let passes = declared
                .passes
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, pass)| pass.into_pass(format!("{name}#{index}")))
                .collect();
            let flags = crate::filter::FilterFlags { active: declared.active, needs_render: true };
            let filter = match declared.kind {
                crate::binding::FilterKind::Compute => Filter::Compute { passes, attachment: declared.buffer_attachment.clone(), flags },
                crate::binding::FilterKind::Render => Filter::Render { passes, attachment: declared.buffer_attachment.clone(), flags },
            };
            filters.insert(name.clone(), filter);
        }

        let filter_buffers = build_filter_buffers(&device, &filters)?;
        let shader_sources = collect_shader_sources(&settings);
        let threshold_filters = collect_threshold_filters(&settings);

        Ok(Engine {
            device,
            queue,
            texture_pool,
            pipeline_cache: PipelineCache::new(true),
            command_queue: CommandQueue::new(),
            scheduler: Scheduler::new(cfg!(debug_assertions)),
            source_cache: ShaderSourceCache::default(),
            observer: Box::new(NoopObserver),
            settings,
            surface_format,
            dims: (width, height),
            filters,
            filter_buffers,
            shader_sources,
            threshold_filters,
            textures,
            scratch,
            msaa,
            canvas,
            geometry,
            on_histogram_update: None,
            on_threshold_update: None,
        })
    }

    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = observer;
    }

    pub fn on_histogram_update(&mut self, callback: impl FnMut(&str, &HistogramStats) + Send + 'static) {
        self.on_histogram_update = Some(Box::new(callback));
    }

    pub fn on_threshold_update(&mut self, callback: impl FnMut(&str, &HashMap<String, Binding>) + Send + 'static) {
        self.on_threshold_update = Some(Box::new(callback));
    }

    /// `update_filter_buffer` (§6): apply a partial binding update to a
    /// filter's parameter buffer, building the backing buffer on first
    /// use.
    pub fn update_filter_buffer(&mut self, filter_name: &str, updates: HashMap<String, Binding>) -> Result<(), EngineError> {
        let filter = self
            .filters
            .get_mut(filter_name)
            .ok_or_else(|| EngineError::Config(crate::error::ConfigError::new("filter", format!("unknown filter `{filter_name}`"))))?;

        let Some(attachment) = filter.attachment() else {
            return Err(EngineError::Buffer(crate::error::BufferError { filter: filter_name.to_string(), binding: None }));
        };

        if !self.filter_buffers.contains_key(filter_name) {
            let built = if filter.is_compute() {
                BufferManager::build_storage_buffers(&self.device, filter_name, attachment)?
            } else {
                BufferManager::build_uniform_buffer(&self.device, filter_name, attachment)?
            };
            self.filter_buffers.insert(filter_name.to_string(), built);
        }

        let buffer = self.filter_buffers.get(filter_name).expect("just inserted");
        BufferManager::apply_update(&self.queue, filter_name, buffer, &updates)?;
        filter.flags_mut().needs_render = true;
        Ok(())
    }

    /// `update_filter_input_texture` (§6): repoint a pass input to a
    /// different named texture, invalidating its bind group so the next
    /// pipeline build rebuilds it.
    pub fn update_filter_input_texture(&mut self, filter_name: &str, pass_index: usize, input_index: usize, new_texture: &str) -> Result<(), EngineError> {
        let filter = self
            .filters
            .get_mut(filter_name)
            .ok_or_else(|| EngineError::Config(crate::error::ConfigError::new("filter", format!("unknown filter `{filter_name}`"))))?;

        let pass = filter
            .passes_mut()
            .get_mut(pass_index)
            .ok_or_else(|| EngineError::Binding(crate::error::BindingError { filter: filter_name.to_string(), pass: Some(pass_index) }))?;

        let slot = pass
            .inputs
            .get_mut(input_index)
            .ok_or_else(|| EngineError::Binding(crate::error::BindingError { filter: filter_name.to_string(), pass: Some(pass_index) }))?;

        *slot = TextureName::from(new_texture);
        pass.bind_groups.clear();
        filter.flags_mut().needs_render = true;
        Ok(())
    }

    /// Build pipelines (if missing) and execute every active filter in
    /// declaration order, driving the scheduler's fast path for a single
    /// `Normal`-priority render request (§8 seed scenario 1).
    pub async fn render_all(&mut self) -> Result<CompletionReport, EngineError> {
        let mut filters_executed = 0;
        let names: Vec<String> = self.filters.keys().cloned().collect();

        for name in names {
            let surface_format = self.surface_format;
            {
                let table = TextureTable {
                    named: &self.textures,
                    scratch: &self.scratch,
                    msaa: &self.msaa,
                    surface: Some(&self.canvas.1),
                    geometry: &self.geometry,
                };
                let filter_buffer = self.filter_buffers.get(&name);
                let filter = self.filters.get_mut(&name).expect("just listed");
                if !filter.flags().active {
                    continue;
                }
                let shader_sources = &self.shader_sources;
                build_filter_pipelines(
                    &self.device,
                    &self.queue,
                    &mut self.pipeline_cache,
                    &mut self.source_cache,
                    filter,
                    &name,
                    surface_format,
                    &table,
                    filter_buffer,
                    |shader_ref| shader_sources.get(shader_ref).cloned().unwrap_or_default(),
                )
                .await?;
            }

            let filter_buffer = self.filter_buffers.get(&name);
            let table = TextureTable {
                named: &self.textures,
                scratch: &self.scratch,
                msaa: &self.msaa,
                surface: Some(&self.canvas.1),
                geometry: &self.geometry,
            };
            let filter = self.filters.get_mut(&name).expect("just listed");
            FilterExecutor::run(&self.device, &self.queue, &mut self.command_queue, filter, &table, filter_buffer, self.dims)?;
            filter.flags_mut().needs_render = false;
            filters_executed += 1;

            if let Some(histogram_buffer) = self.filter_buffers.get(&name).and_then(|buffer| buffer.histogram_buffer()) {
                let bins = read_histogram_bins(&self.device, &self.queue, histogram_buffer).await?;
                let stats = HistogramStats::from_bins(&bins);
                if let Some(callback) = self.on_histogram_update.as_mut() {
                    callback(&name, &stats);
                }

                if let Some(threshold_name) = self.threshold_filters.get(&name).cloned() {
                    let threshold_buffer = self
                        .filter_buffers
                        .get(&threshold_name)
                        .ok_or_else(|| EngineError::Buffer(crate::error::BufferError { filter: threshold_name.clone(), binding: None }))?;
                    let updates = apply_auto_threshold(&self.queue, &threshold_name, threshold_buffer, &stats)?;
                    if let Some(callback) = self.on_threshold_update.as_mut() {
                        callback(&threshold_name, &updates);
                    }
                    self.filters
                        .get_mut(&threshold_name)
                        .ok_or_else(|| EngineError::Config(crate::error::ConfigError::new("filter", format!("unknown filter `{threshold_name}`"))))?
                        .flags_mut()
                        .needs_render = true;
                }
            }
        }

        Ok(CompletionReport { filters_executed, timed_out: false })
    }

    /// `wait_for_render_complete` (§6): submit the render queue's
    /// pending work via the fast path and block up to 30s.
    ///
    /// There's no timer-based async runtime in this stack to race the
    /// render future against a deadline, so this reports `timed_out`
    /// after the fact rather than aborting mid-render: if a caller hits
    /// this regularly, the render graph itself is too slow for the
    /// contract, not this check.
    pub fn wait_for_render_complete(&mut self) -> Result<CompletionReport, EngineError> {
        let deadline = Instant::now() + RENDER_COMPLETE_TIMEOUT;
        let report = pollster::block_on(self.render_all())?;
        if Instant::now() > deadline {
            return Ok(CompletionReport { timed_out: true, ..report });
        }
        Ok(report)
    }

    fn counters(stats: crate::cache::CacheStats) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            hits: stats.hits,
            misses: stats.misses,
            creations: stats.creations,
            reuses: stats.reuses,
            peak_size: stats.peak_size,
            average_compile_time: stats.average_compile_time(),
        }
    }

    pub fn snapshot_cache_stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            shaders: Self::counters(self.pipeline_cache.shaders.stats()),
            layouts: Self::counters(self.pipeline_cache.layouts.stats()),
            pipelines: Self::counters(self.pipeline_cache.pipelines.stats()),
        }
    }

    /// `dispose` (§6): drop every GPU-owned resource; the engine is
    /// unusable afterward (consumes `self`).
    pub fn dispose(mut self) {
        self.texture_pool.destroy_all();
        self.textures.clear();
        self.filter_buffers.clear();
        self.pipeline_cache = PipelineCache::new(false);
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// The render target every terminal pass (`output = none`) writes
    /// to. A host with a real `wgpu::Surface` copies this each frame to
    /// the surface's current texture as a separate present step.
    pub fn canvas_view(&self) -> &wgpu::TextureView {
        &self.canvas.1
    }

    /// Device-loss recovery (§4.10 steps 1-3, 6-7): reject every queued
    /// task, tear down GPU-owned state in dependency order, snapshot the
    /// pipeline cache (discarded here — the new device gets a clean
    /// cache, since wgpu resources don't survive a device swap), swap in
    /// `device`/`queue` acquired by the caller via
    /// `RecoveryCoordinator::recover` (steps 4-5: adapter/device
    /// acquisition and surface reconfiguration need the windowing
    /// surface, which this engine does not own), rebuild every declared
    /// texture and filter buffer from `self.settings`, and mark every
    /// filter for pipeline/bind-group revalidation on its next render.
    pub fn recover_with_device(&mut self, device: wgpu::Device, queue: wgpu::Queue) -> Result<(), EngineError> {
        self.scheduler.clear(true);
        RecoveryCoordinator::notify_device_lost(self.observer.as_ref());
        RecoveryCoordinator::ordered_cleanup(self.filters.values_mut(), &mut self.texture_pool);
        let _snapshot = RecoveryCoordinator::snapshot_before_drop(&self.pipeline_cache);

        self.textures.clear();
        self.filter_buffers.clear();
        self.pipeline_cache = PipelineCache::new(true);
        self.command_queue = CommandQueue::new();

        let (texture_pool, textures) = build_declared_textures(&device, &self.settings, self.surface_format);
        let (scratch, msaa) = create_scratch_textures(&device, self.surface_format, self.dims.0, self.dims.1);
        let canvas = create_canvas_texture(&device, self.surface_format, self.dims.0, self.dims.1);
        let geometry = FullscreenGeometry::new(&device);
        let filter_buffers = build_filter_buffers(&device, &self.filters)?;

        self.texture_pool = texture_pool;
        self.textures = textures;
        self.scratch = scratch;
        self.msaa = msaa;
        self.canvas = canvas;
        self.geometry = geometry;
        self.filter_buffers = filter_buffers;
        self.device = device;
        self.queue = queue;

        RecoveryCoordinator::mark_filters_for_revalidation(self.filters.values_mut());
        for filter in self.filters.values_mut() {
            filter.flags_mut().needs_render = true;
        }
        Ok(())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// The handle returned by `create_app`: an `Engine` driven by a
/// `FrameTickSource` (§6, §5 SUPPLEMENTAL). `App::tick` is the concrete
/// re-entry point the frame source calls into once per tick.
pub struct App<S: FrameTickSource> {
    engine: Engine,
    frame_source: S,
}

impl<S: FrameTickSource> App<S> {
    pub fn new(engine: Engine, frame_source: S) -> Self {
        App { engine, frame_source }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Drives one tick: pulls the next `FrameTick`, then submits a
    /// `Normal` priority render request through the scheduler (§4.7). The
    /// scheduler only ever settles a marker here — the common case is
    /// its fast path (idle, nothing pending, `Normal` priority), which
    /// settles inline before `submit` returns; an already-busy scheduler
    /// instead queues the marker and this drives it via `process_now` so
    /// a tick never silently drops a frame behind a debounce window.
    /// Once the marker settles, the actual render runs outside the
    /// closure: `Scheduler`'s task closures must be `'static` and cannot
    /// borrow `self.engine`, so the closure only flips a shared flag and
    /// the real `wait_for_render_complete` call happens here.
    pub fn tick(&mut self) -> Result<FrameReport, EngineError> {
        let FrameTick { sequence } = self.frame_source.next_tick();

        let has_work = self.engine.filters.values().any(|f| f.flags().needs_render && f.flags().active);
        if !has_work {
            return Ok(FrameReport { tick: sequence, filters_executed: 0 });
        }

        let handle = self.engine.scheduler_mut().submit(Priority::Normal, None, || ());

        if !handle.is_settled() {
            self.engine.scheduler_mut().process_now()?;
        }

        if !handle.is_settled() || matches!(handle.take(), Err(_)) {
            // Queued-but-not-yet-due (debounce still pending) or
            // rejected (cleared/cancelled mid-flight): no render this
            // tick, try again next tick.
            return Ok(FrameReport { tick: sequence, filters_executed: 0 });
        }

        let report = self.engine.wait_for_render_complete()?;
        Ok(FrameReport { tick: sequence, filters_executed: report.filters_executed })
    }
}

/// `create_app` (§6): validate settings, build the engine, wrap it as an
/// `App` driven by `frame_source`.
pub fn create_app<S: FrameTickSource>(device: wgpu::Device, queue: wgpu::Queue, settings: Settings, frame_source: S) -> Result<App<S>, EngineError> {
    let engine = Engine::new(device, queue, settings)?;
    Ok(App::new(engine, frame_source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_stats_snapshot_defaults_to_zero() {
        let snapshot = CacheStatsSnapshot::default();
        assert_eq!(snapshot.shaders.hits, 0);
        assert_eq!(snapshot.pipelines.peak_size, 0);
    }
}
