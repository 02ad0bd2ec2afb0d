//! C2: Buffer Manager — sizes, aligns, initialises and updates the
//! uniform/storage buffers backing a filter's parameter attachment.
//!
//! The byte-layout discipline here generalizes the teacher's image
//! byte-layout type (`buffer.rs::BufferLayout`) from "bytes per texel
//! row" to "bytes per binding"; the actual encoding uses `bytemuck`
//! exactly as `pool.rs::copy_host_to_buffer` does for image rows.
use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::error::BufferError;
use crate::filter::{Binding, BufferAttachment};

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

/// Byte offset and length recorded for a single binding inside the
/// backing buffer, so partial updates (`apply_update`) can be applied
/// without re-walking the whole attachment.
#[derive(Clone, Debug)]
struct Layout {
    offset: u64,
    len: u64,
}

/// The device buffer(s) backing one filter's parameter attachment.
pub enum FilterBuffer {
    /// Render filter: a single uniform buffer (§4.2).
    Uniform {
        buffer: wgpu::Buffer,
        offsets: HashMap<String, Layout>,
    },
    /// Compute filter: one storage buffer per readable binding (§4.2).
    Storage {
        buffers: HashMap<String, wgpu::Buffer>,
    },
}

impl FilterBuffer {
    /// The buffer backing the binding named `"histogram"`, if any — the
    /// canonical compute output (§4.2).
    pub fn histogram_buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            FilterBuffer::Storage { buffers } => buffers.get("histogram"),
            FilterBuffer::Uniform { .. } => None,
        }
    }

    /// The single storage buffer exposed in a compute filter's bind group:
    /// the binding named `"histogram"` if present (§4.2 "the canonical
    /// output"), else the lexicographically first readable binding.
    pub fn canonical_storage_name(&self) -> Option<&str> {
        match self {
            FilterBuffer::Storage { buffers } => {
                if buffers.contains_key("histogram") {
                    Some("histogram")
                } else {
                    buffers.keys().map(String::as_str).min()
                }
            }
            FilterBuffer::Uniform { .. } => None,
        }
    }

    /// The canonical compute output buffer (histogram, or the first
    /// readable storage binding if none is named `"histogram"`).
    pub fn canonical_storage_buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            FilterBuffer::Storage { buffers } => self.canonical_storage_name().and_then(|name| buffers.get(name)),
            FilterBuffer::Uniform { .. } => None,
        }
    }

    pub fn uniform_buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            FilterBuffer::Uniform { buffer, .. } => Some(buffer),
            FilterBuffer::Storage { .. } => None,
        }
    }

    pub fn storage_buffer(&self, name: &str) -> Option<&wgpu::Buffer> {
        match self {
            FilterBuffer::Storage { buffers } => buffers.get(name),
            FilterBuffer::Uniform { .. } => None,
        }
    }
}

/// Builds and updates the device buffer(s) for a filter's attachment.
pub struct BufferManager;

impl BufferManager {
    /// Render filter layout: uniforms first (4 bytes each, little-endian),
    /// aligned to 16 bytes, then floats (4 bytes scalar, `len*4` array),
    /// final size aligned to 16 bytes, minimum 16 bytes (§4.2).
    pub fn build_uniform_buffer(device: &wgpu::Device, label: &str, attachment: &BufferAttachment) -> Result<FilterBuffer, BufferError> {
        let mut bytes = Vec::new();
        let mut offsets = HashMap::new();

        for (name, binding) in attachment.ordered_bindings() {
            if binding.is_uniform_kind() {
                offsets.insert(name.clone(), Layout { offset: bytes.len() as u64, len: 4 });
                bytes.extend_from_slice(&binding.encode());
            }
        }

        let after_uniforms = align_up(bytes.len() as u64, 16);
        bytes.resize(after_uniforms as usize, 0);

        for (name, binding) in attachment.ordered_bindings() {
            if binding.is_float_kind() {
                let encoded = binding.encode();
                offsets.insert(
                    name.clone(),
                    Layout { offset: bytes.len() as u64, len: encoded.len() as u64 },
                );
                bytes.extend_from_slice(&encoded);
            }
        }

        let final_size = align_up(bytes.len() as u64, 16).max(16);
        bytes.resize(final_size as usize, 0);

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(FilterBuffer::Uniform { buffer, offsets })
    }

    /// Compute filter layout: one storage buffer per readable binding,
    /// each `calculate_size` padded to 16 (§4.2).
    pub fn build_storage_buffers(device: &wgpu::Device, label: &str, attachment: &BufferAttachment) -> Result<FilterBuffer, BufferError> {
        let mut buffers = HashMap::new();

        for (name, binding) in attachment.ordered_bindings() {
            use crate::filter::BindingUsage;
            let readable = match binding {
                Binding::Storage { usage, .. } => matches!(usage, BindingUsage::Read | BindingUsage::ReadWrite),
                _ => true,
            };
            if !readable {
                continue;
            }

            let size = align_up(binding.calculate_size(), 16).max(16);
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(format!("{label}:{name}").as_str()),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            buffers.insert(name.clone(), buffer);
        }

        Ok(FilterBuffer::Storage { buffers })
    }

    /// Apply a partial update `map<name, value>`, writing each value to
    /// its recorded byte offset using the binding's typed encoding
    /// (§4.2 "Update contract"). Errors: unknown binding name or length
    /// mismatch both map to `ConfigError`-flavoured `BufferError`.
    pub fn apply_update(
        queue: &wgpu::Queue,
        filter: &str,
        target: &FilterBuffer,
        updates: &HashMap<String, Binding>,
    ) -> Result<(), BufferError> {
        match target {
            FilterBuffer::Uniform { buffer, offsets } => {
                for (name, value) in updates {
                    let layout = offsets.get(name).ok_or_else(|| BufferError {
                        filter: filter.to_string(),
                        binding: Some(name.clone()),
                    })?;
                    let encoded = value.encode();
                    if encoded.len() as u64 != layout.len {
                        return Err(BufferError {
                            filter: filter.to_string(),
                            binding: Some(name.clone()),
                        });
                    }
                    queue.write_buffer(buffer, layout.offset, &encoded);
                }
                Ok(())
            }
            FilterBuffer::Storage { buffers } => {
                for (name, value) in updates {
                    let buffer = buffers.get(name).ok_or_else(|| BufferError {
                        filter: filter.to_string(),
                        binding: Some(name.clone()),
                    })?;
                    queue.write_buffer(buffer, 0, &value.encode());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BindingUsage;

    fn attachment(bindings: Vec<(&str, Binding)>) -> BufferAttachment {
        BufferAttachment {
            group_index: 0,
            binding_index: 3,
            bindings: bindings.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn calculate_size_padding() {
        let binding = Binding::Storage {
            size: Some(10),
            init: vec![],
            usage: BindingUsage::Read,
        };
        assert_eq!(binding.calculate_size(), 10);
    }

    #[test]
    fn uniform_byte_layout_is_deterministic() {
        // Purely check the construction logic compiles against the type
        // surface; the actual device-backed `build_uniform_buffer` path
        // is covered by `tests/engine.rs`.
        let attachment = attachment(vec![("samplePoint", Binding::Uniform(0.5)), ("range", Binding::Uniform(0.2))]);
        let ordered = attachment.ordered_bindings();
        assert_eq!(ordered[0].0, "range");
        assert_eq!(ordered[1].0, "samplePoint");
    }
}
