//! C10: Recovery Coordinator — rebuilds engine state after device loss
//! (§4.10).
//!
//! Grounded in `pool.rs::Pool`'s free-set teardown/rebuild shape and
//! `program.rs::block_on`'s device-future polling, generalized to the
//! spec's full ordered cleanup → new device → manager rebuild → filter
//! re-validation sequence, which the teacher does not implement end to
//! end (its `Pool` assumes a stable device).
use std::time::Duration;

use crate::cache::{CacheSnapshot, PipelineCache};
use crate::error::EngineError;
use crate::filter::Filter;
use crate::observer::Observer;
use crate::texture_pool::TexturePool;

pub const MAX_RETRIES: u32 = 5;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Everything the coordinator hands back once recovery succeeds: a new
/// device/queue pair and the restored pipeline cache (textures/buffers
/// are rebuilt by the caller from `Settings`, since their GPU contents
/// cannot survive a device loss).
pub struct RecoveredDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub cache: PipelineCache,
}

/// Drives the ordered device-loss recovery sequence (§4.10):
/// 1. freeze/reject pending tasks with `DeviceLost`
/// 2. ordered cleanup: bind groups -> pipelines -> textures -> buffers
/// 3. snapshot the pipeline cache, then drop all GPU-owned state
/// 4. request a new high-performance adapter/device
/// 5. reconfigure the surface (alpha-premultiplied blend)
/// 6. rebuild the managers and re-validate every filter
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    /// Step 2: tear down GPU-owned state in dependency order so nothing
    /// is dropped while still referenced (bind groups hold pipeline +
    /// texture refs, pipelines hold layout refs).
    pub fn ordered_cleanup<'f>(filters: impl IntoIterator<Item = &'f mut Filter>, textures: &mut TexturePool) {
        for filter in filters {
            for pass in filter.passes_mut() {
                pass.bind_groups.clear();
                pass.pipeline = None;
            }
        }
        textures.destroy_all();
    }

    /// Step 3: snapshot the pipeline cache before it is dropped, so
    /// shader/layout/pipeline handles that can be cheaply rebuilt don't
    /// need full recompilation if the new device accepts the same
    /// descriptors (§4.3 "snapshot/restore for resize/context-loss").
    pub fn snapshot_before_drop(cache: &PipelineCache) -> CacheSnapshot {
        cache.snapshot()
    }

    /// Step 4: request a fresh adapter/device, preferring high
    /// performance, matching the original surface's requirements.
    pub async fn request_new_device(instance: &wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), EngineError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(EngineError::DeviceLost)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("seqgfx-recovered-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|_| EngineError::DeviceLost)?;

        Ok((adapter, device, queue))
    }

    /// Step 5: reconfigure the surface with alpha-premultiplied
    /// compositing, matching the presentation contract (§4.10).
    pub fn reconfigure_surface(surface: &wgpu::Surface, device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) {
        surface.configure(
            device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format,
                width,
                height,
                present_mode: wgpu::PresentMode::Fifo,
                alpha_mode: wgpu::CompositeAlphaMode::PreMultiplied,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            },
        );
    }

    /// Step 6: invalidate every pass's pipeline/bind-group so the next
    /// pipeline-manager pass rebuilds them against the new device
    /// (§4.10 "filter re-validation with temporary group-0 bind groups").
    /// Unconditional: every attempt re-validates every filter (Open
    /// Question resolution, see DESIGN.md).
    pub fn mark_filters_for_revalidation<'f>(filters: impl IntoIterator<Item = &'f mut Filter>) {
        for filter in filters {
            for pass in filter.passes_mut() {
                pass.pipeline = None;
                pass.bind_groups.clear();
            }
        }
    }

    pub fn notify_device_lost(observer: &dyn Observer) {
        observer.on_device_lost();
    }

    pub fn notify_attempt(observer: &dyn Observer, attempt: u32) {
        observer.on_recovery_attempt(attempt);
    }

    /// Drives steps 1 and 4 end to end: announce the loss, then retry
    /// adapter/device acquisition up to `MAX_RETRIES` times with
    /// `RETRY_BACKOFF` between attempts (§4.10 "retry with backoff").
    /// `sleep` is injected so this doesn't force a particular async
    /// runtime on the caller.
    pub async fn recover<F, Fut>(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
        observer: &dyn Observer,
        mut sleep: F,
    ) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), EngineError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        Self::notify_device_lost(observer);
        let mut last_err = EngineError::DeviceLost;
        for attempt in 1..=MAX_RETRIES {
            Self::notify_attempt(observer, attempt);
            match Self::request_new_device(instance, surface).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    last_err = err;
                    if attempt < MAX_RETRIES {
                        sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterFlags, Pass};

    #[test]
    fn ordered_cleanup_clears_pipelines_and_bind_groups() {
        let mut pass = Pass::new("p", vec![], None, "shader");
        pass.bind_groups = vec![None];
        let mut filter = Filter::Render { passes: vec![pass], attachment: None, flags: FilterFlags::default() };
        let mut textures = TexturePool::new();

        RecoveryCoordinator::ordered_cleanup(std::slice::from_mut(&mut filter), &mut textures);

        assert!(filter.passes()[0].pipeline.is_none());
        assert!(filter.passes()[0].bind_groups.is_empty());
    }

    #[test]
    fn revalidation_is_unconditional_every_attempt() {
        let mut filter = Filter::Render {
            passes: vec![Pass::new("p", vec![], None, "shader")],
            attachment: None,
            flags: FilterFlags::default(),
        };
        RecoveryCoordinator::mark_filters_for_revalidation(std::slice::from_mut(&mut filter));
        assert!(filter.passes()[0].pipeline.is_none());
    }
}
