//! C4: Binding Manager — resolves textures and buffers to bind-group
//! entries; invalidates per pass (§4.4).
//!
//! Grounded in `program.rs::Encoder::make_paint_group`/`make_paint_layout`
//! (building a bind-group layout + pipeline layout on demand, memoizing
//! the result), generalized from the teacher's single fixed "paint"
//! layout to one layout per filter shape (input count, buffer kind).
use crate::buffer_manager::FilterBuffer;
use crate::cache::{LayoutHandle, PipelineCache};
use crate::error::BindingError;
use crate::hash::{ContentHash, KeyBuilder};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Render,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Uniform,
    Storage,
}

/// Everything the Binding Manager needs to know about a pass's bind
/// group shape, independent of which textures are currently bound.
#[derive(Clone, Debug)]
pub struct BindingShape {
    pub kind: FilterKind,
    pub input_count: usize,
    pub buffer: Option<(BufferKind, u32)>,
}

impl BindingShape {
    /// *Layout key* = hash({kind, input_count, has_buffer, buffer_kind,
    /// buffer_binding_index}) (§4.3).
    pub fn layout_key(&self) -> ContentHash {
        let (has_buffer, buffer_kind, buffer_binding_index) = match self.buffer {
            Some((kind, index)) => (true, format!("{kind:?}"), index),
            None => (false, String::new(), 0),
        };
        KeyBuilder::new()
            .field("kind", format!("{:?}", self.kind))
            .field("input_count", self.input_count)
            .field("has_buffer", has_buffer)
            .field("buffer_kind", buffer_kind)
            .field("buffer_binding_index", buffer_binding_index)
            .finish()
    }

    fn stage(&self) -> wgpu::ShaderStages {
        match self.kind {
            FilterKind::Render => wgpu::ShaderStages::FRAGMENT,
            FilterKind::Compute => wgpu::ShaderStages::COMPUTE,
        }
    }

    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        let stage = self.stage();
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: stage,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        }];

        for i in 0..self.input_count {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + i as u32,
                visibility: stage,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        if let Some((buffer_kind, binding_index)) = self.buffer {
            let ty = match buffer_kind {
                BufferKind::Uniform => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BufferKind::Storage => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding_index,
                visibility: stage,
                ty,
                count: None,
            });
        }

        entries
    }
}

pub struct BindingManager;

impl BindingManager {
    /// Acquire (or build+insert) the bind-group layout for `shape`
    /// (§4.4 "re-keys the layout via the layout cache; if the cached
    /// layout is missing/destroyed, it builds a new one and inserts
    /// it").
    pub fn acquire_layout(device: &wgpu::Device, cache: &mut PipelineCache, shape: &BindingShape) -> LayoutHandle {
        let key = shape.layout_key();
        if let Some(handle) = cache.layouts.get(key) {
            cache.layouts.record_reuse();
            return handle.clone();
        }

        let entries = shape.layout_entries();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
            entries: &entries,
        });
        let handle = LayoutHandle(std::sync::Arc::new(layout));
        cache.layouts.insert(key, handle.clone(), None);
        handle
    }

    /// Reconstruct the bind group for a pass: always creates a fresh
    /// sampler view (§4.4), binds each input texture view, and the
    /// buffer entry if present. Synchronous; never touches the pipeline
    /// cache.
    pub fn build_bind_group(
        device: &wgpu::Device,
        filter: &str,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        input_views: &[&wgpu::TextureView],
        buffer: Option<(&FilterBuffer, u32, BufferKind, &str)>,
    ) -> Result<wgpu::BindGroup, BindingError> {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(sampler),
        }];

        for (i, view) in input_views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        if let Some((filter_buffer, binding_index, kind, storage_name)) = buffer {
            let resource = match kind {
                BufferKind::Uniform => filter_buffer.uniform_buffer(),
                BufferKind::Storage => filter_buffer.storage_buffer(storage_name),
            }
            .ok_or_else(|| BindingError {
                filter: filter.to_string(),
                pass: None,
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding_index,
                resource: resource.as_entire_binding(),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        }))
    }

    /// A filtering sampler for the pass, visible to fragment or compute
    /// per filter kind (§4.4 "binding 0").
    pub fn make_sampler(device: &wgpu::Device) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_key_distinguishes_input_count() {
        let a = BindingShape { kind: FilterKind::Render, input_count: 1, buffer: None };
        let b = BindingShape { kind: FilterKind::Render, input_count: 2, buffer: None };
        assert_ne!(a.layout_key(), b.layout_key());
    }

    #[test]
    fn layout_key_stable_for_same_shape() {
        let a = BindingShape { kind: FilterKind::Compute, input_count: 1, buffer: Some((BufferKind::Storage, 3)) };
        let b = BindingShape { kind: FilterKind::Compute, input_count: 1, buffer: Some((BufferKind::Storage, 3)) };
        assert_eq!(a.layout_key(), b.layout_key());
    }

    #[test]
    fn layout_entries_reserve_binding_zero_for_sampler() {
        let shape = BindingShape { kind: FilterKind::Render, input_count: 2, buffer: None };
        let entries = shape.layout_entries();
        assert_eq!(entries[0].binding, 0);
        assert!(matches!(entries[0].ty, wgpu::BindingType::Sampler(_)));
        assert_eq!(entries.len(), 3);
    }
}
