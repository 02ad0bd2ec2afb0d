//! C1: Texture Pool — pools device textures by descriptor signature.
//!
//! Grounded in `pool.rs::Pool`/`Cache`'s signature-keyed `SlotMap` free
//! sets (`texture_sets: HashMap<TextureDescriptor, Vec<PoolKey>>`,
//! `Cache::extract_texture`), generalized from the teacher's
//! upload-oriented image pool to the spec's plain acquire/release
//! texture pool (§4.1).
use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a texture owned by the caller until released.
    pub struct TextureHandle;
}

/// `(format, width, height, usage_bits, sample_count, depth_layers)`
/// (§4.1 "Descriptor signature").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureSignature {
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub usage: wgpu::TextureUsages,
    pub sample_count: u32,
    pub depth_layers: u32,
}

impl TextureSignature {
    pub fn to_wgpu_descriptor<'a>(&self, label: Option<&'a str>) -> wgpu::TextureDescriptor<'a> {
        wgpu::TextureDescriptor {
            label,
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: self.depth_layers.max(1),
            },
            mip_level_count: 1,
            sample_count: self.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: self.usage,
            view_formats: &[],
        }
    }
}

struct Entry {
    signature: TextureSignature,
    /// `generation` bumps on every reacquire so stale views can be
    /// detected (§3 "Texture entry").
    generation: u64,
    texture: wgpu::Texture,
}

/// Pools device textures by descriptor signature (C1).
///
/// Contract: acquired textures are owned by the caller until released;
/// releasing a destroyed or foreign handle is a programmer error (§4.1).
#[derive(Default)]
pub struct TexturePool {
    live: SlotMap<TextureHandle, Entry>,
    idle: HashMap<TextureSignature, Vec<TextureHandle>>,
    acquire_count: u64,
    release_count: u64,
}

impl TexturePool {
    pub fn new() -> Self {
        TexturePool::default()
    }

    /// Return any idle texture with the exact signature; otherwise
    /// allocate a new one (§4.1 "Acquire").
    pub fn acquire(&mut self, device: &wgpu::Device, signature: TextureSignature, label: Option<&str>) -> TextureHandle {
        self.acquire_count += 1;

        if let Some(bucket) = self.idle.get_mut(&signature) {
            if let Some(handle) = bucket.pop() {
                if let Some(entry) = self.live.get_mut(handle) {
                    entry.generation += 1;
                }
                return handle;
            }
        }

        let texture = device.create_texture(&signature.to_wgpu_descriptor(label));
        self.live.insert(Entry {
            signature,
            generation: 0,
            texture,
        })
    }

    /// Push the texture back onto the idle list under its signature
    /// (§4.1 "Release"). Panics if `handle` is not live in this pool —
    /// releasing a foreign or already-destroyed handle is a programmer
    /// error per the contract.
    pub fn release(&mut self, handle: TextureHandle) {
        let signature = self
            .live
            .get(handle)
            .unwrap_or_else(|| panic!("released a handle not owned by this pool"))
            .signature;
        self.release_count += 1;
        self.idle.entry(signature).or_default().push(handle);
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.live.get(handle).map(|entry| &entry.texture)
    }

    pub fn generation(&self, handle: TextureHandle) -> Option<u64> {
        self.live.get(handle).map(|entry| entry.generation)
    }

    /// Drop all pooled textures (§4.1 "Destroy").
    pub fn destroy_all(&mut self) {
        self.live.clear();
        self.idle.clear();
    }

    /// §8 invariant 5: live-texture count equals `acquire_count -
    /// release_count`.
    pub fn live_count(&self) -> u64 {
        self.acquire_count - self.release_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> TextureSignature {
        TextureSignature {
            format: wgpu::TextureFormat::Rgba8Unorm,
            width: 64,
            height: 64,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            sample_count: 1,
            depth_layers: 1,
        }
    }

    #[test]
    fn live_count_tracks_acquire_release_without_device() {
        // Exercise only the counters; a real `acquire` needs a device.
        let mut pool = TexturePool::new();
        pool.acquire_count = 3;
        pool.release_count = 1;
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn signature_equality_is_structural() {
        assert_eq!(signature(), signature());
    }
}
