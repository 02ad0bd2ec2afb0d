//! C3: Pipeline Cache — content-addressed shader/layout/pipeline cache
//! with strict LRU eviction (§4.3).
//!
//! Re-architected per the DESIGN NOTES "LRU via `last_used` scan →
//! intrusive doubly-linked list hashmap": each of the three caches
//! (shader, layout, pipeline) is an independent `LruCache<T>` instance
//! backed by a `SlotMap` of nodes linked into a doubly-linked list, so
//! touch/evict are O(1) instead of an O(n) `last_used` scan. Grounded in
//! `pool.rs::Pool`'s `SlotMap`-per-kind storage
//! (`shaders`/`pipelines: SlotMap<DefaultKey, (...)>`) and
//! `Cache::extract_shader`/`extract_pipeline`, generalized from
//! "extract-or-recreate" free sets into a proper cache with eviction.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use slotmap::{new_key_type, SlotMap};

use crate::hash::ContentHash;

new_key_type! {
    struct NodeKey;
}

/// Default per-cache capacity (§4.3): applied independently to the
/// shader, layout, and pipeline caches (Open Question resolution, see
/// `DESIGN.md`).
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug)]
pub struct EntryMetadata {
    pub created: Instant,
    pub last_used: Instant,
    pub dims: Option<(u32, u32)>,
}

struct Node<T> {
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
    hash: ContentHash,
    value: T,
    meta: EntryMetadata,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub creations: u64,
    pub reuses: u64,
    pub peak_size: usize,
    total_compile_nanos: u128,
    compile_samples: u64,
}

impl CacheStats {
    pub fn average_compile_time(&self) -> Option<std::time::Duration> {
        if self.compile_samples == 0 {
            None
        } else {
            Some(std::time::Duration::from_nanos((self.total_compile_nanos / self.compile_samples as u128) as u64))
        }
    }

    fn record_compile(&mut self, elapsed: std::time::Duration) {
        self.total_compile_nanos += elapsed.as_nanos();
        self.compile_samples += 1;
    }
}

/// A strict-LRU, content-addressed cache of one resource kind.
pub struct LruCache<T> {
    capacity: usize,
    nodes: SlotMap<NodeKey, Node<T>>,
    by_hash: HashMap<ContentHash, NodeKey>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
    stats: CacheStats,
    observability: bool,
}

impl<T> LruCache<T> {
    pub fn new(capacity: usize, observability: bool) -> Self {
        LruCache {
            capacity,
            nodes: SlotMap::with_key(),
            by_hash: HashMap::new(),
            head: None,
            tail: None,
            stats: CacheStats::default(),
            observability,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn unlink(&mut self, key: NodeKey) {
        let (prev, next) = {
            let node = &self.nodes[key];
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, key: NodeKey) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[key];
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.nodes[old_head].prev = Some(key);
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn touch(&mut self, key: NodeKey) {
        if self.head == Some(key) {
            self.nodes[key].meta.last_used = Instant::now();
            return;
        }
        self.unlink(key);
        self.nodes[key].meta.last_used = Instant::now();
        self.push_front(key);
    }

    /// Hit: returns the cached value and bumps `last_used` to now
    /// (§4.3 "Every hit updates `last_used` to now"). `spec.md`'s
    /// invariant 1 (§8): `cache.get(k, t1) == cache.get(k, t2)` unless an
    /// eviction occurred between `t1` and `t2`.
    pub fn get(&mut self, hash: ContentHash) -> Option<&T>
    where
        T: Clone,
    {
        let key = *self.by_hash.get(&hash)?;
        self.touch(key);
        if self.observability {
            self.stats.hits += 1;
        }
        Some(&self.nodes[key].value)
    }

    /// Insert a newly created entry, evicting the least-recently-used
    /// entry if capacity is exceeded (§4.3).
    pub fn insert(&mut self, hash: ContentHash, value: T, dims: Option<(u32, u32)>) {
        if self.observability {
            self.stats.misses += 1;
            self.stats.creations += 1;
        }

        let now = Instant::now();
        let key = self.nodes.insert(Node {
            prev: None,
            next: None,
            hash,
            value,
            meta: EntryMetadata { created: now, last_used: now, dims },
        });
        self.push_front(key);
        self.by_hash.insert(hash, key);

        if self.observability {
            self.stats.peak_size = self.stats.peak_size.max(self.nodes.len());
        }

        self.evict_to_capacity();
    }

    pub fn record_compile_time(&mut self, elapsed: std::time::Duration) {
        if self.observability {
            self.stats.record_compile(elapsed);
        }
    }

    pub fn record_reuse(&mut self) {
        if self.observability {
            self.stats.reuses += 1;
        }
    }

    /// Evict entries with the oldest `last_used` until at or under
    /// capacity (§4.3 strict LRU). O(1) per eviction: the tail of the
    /// list is, by construction, the least-recently-used entry.
    fn evict_to_capacity(&mut self) {
        while self.nodes.len() > self.capacity {
            let Some(tail) = self.tail else { break };
            self.unlink(tail);
            if let Some(node) = self.nodes.remove(tail) {
                self.by_hash.remove(&node.hash);
            }
        }
    }

    /// A copyable view of all entries, for `snapshot()` (§4.3).
    pub fn snapshot(&self) -> Vec<(ContentHash, T, EntryMetadata)>
    where
        T: Clone,
    {
        self.nodes.values().map(|node| (node.hash, node.value.clone(), node.meta)).collect()
    }

    /// Re-insert entries from a snapshot whose dims are compatible with
    /// `new_dims` (§4.3 "Resize / context loss"): `entry.dims.w <=
    /// new.w && entry.dims.h <= new.h`. Incompatible entries are
    /// dropped. Returns the count restored.
    pub fn restore(&mut self, previous: Vec<(ContentHash, T, EntryMetadata)>, new_dims: (u32, u32)) -> usize {
        let mut restored = 0;
        for (hash, value, meta) in previous {
            let compatible = match meta.dims {
                Some((w, h)) => w <= new_dims.0 && h <= new_dims.1,
                None => true,
            };
            if !compatible {
                continue;
            }
            let key = self.nodes.insert(Node {
                prev: None,
                next: None,
                hash,
                value,
                meta,
            });
            self.push_front(key);
            self.by_hash.insert(hash, key);
            restored += 1;
        }
        self.evict_to_capacity();
        restored
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.by_hash.clear();
        self.head = None;
        self.tail = None;
    }
}

/// A cached, reference-counted pipeline — `Arc`-wrapped so `snapshot()`
/// can hand out cheap clones the way `pool.rs` hands out `Arc<Buffer>`
/// for shared `ImageData::GpuBuffer` access.
#[derive(Clone)]
pub enum PipelineHandle {
    Render(Arc<wgpu::RenderPipeline>),
    Compute(Arc<wgpu::ComputePipeline>),
}

#[derive(Clone)]
pub struct ShaderHandle(pub Arc<wgpu::ShaderModule>);

#[derive(Clone)]
pub struct LayoutHandle(pub Arc<wgpu::BindGroupLayout>);

/// Owns the three independent LRU caches (§4.3).
pub struct PipelineCache {
    pub shaders: LruCache<ShaderHandle>,
    pub layouts: LruCache<LayoutHandle>,
    pub pipelines: LruCache<PipelineHandle>,
}

impl PipelineCache {
    pub fn new(observability: bool) -> Self {
        PipelineCache {
            shaders: LruCache::new(DEFAULT_CAPACITY, observability),
            layouts: LruCache::new(DEFAULT_CAPACITY, observability),
            pipelines: LruCache::new(DEFAULT_CAPACITY, observability),
        }
    }

    /// A copyable view of all three caches (§4.3 `snapshot()`).
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            shaders: self.shaders.snapshot(),
            layouts: self.layouts.snapshot(),
            pipelines: self.pipelines.snapshot(),
        }
    }

    pub fn restore(&mut self, snapshot: CacheSnapshot, new_dims: (u32, u32)) -> RestoreReport {
        RestoreReport {
            shaders: self.shaders.restore(snapshot.shaders, new_dims),
            layouts: self.layouts.restore(snapshot.layouts, new_dims),
            pipelines: self.pipelines.restore(snapshot.pipelines, new_dims),
        }
    }
}

pub struct CacheSnapshot {
    shaders: Vec<(ContentHash, ShaderHandle, EntryMetadata)>,
    layouts: Vec<(ContentHash, LayoutHandle, EntryMetadata)>,
    pipelines: Vec<(ContentHash, PipelineHandle, EntryMetadata)>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RestoreReport {
    pub shaders: usize,
    pub layouts: usize,
    pub pipelines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_removes_least_recently_used() {
        let mut cache: LruCache<u32> = LruCache::new(2, false);
        let a = ContentHash::of_str("a");
        let b = ContentHash::of_str("b");
        let c = ContentHash::of_str("c");

        cache.insert(a, 1, None);
        cache.insert(b, 2, None);
        // touch `a` so `b` becomes least-recently-used
        assert_eq!(cache.get(a), Some(&1));
        cache.insert(c, 3, None);

        assert_eq!(cache.get(b), None, "b should have been evicted");
        assert_eq!(cache.get(a), Some(&1));
        assert_eq!(cache.get(c), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn hit_survives_across_non_evicting_inserts() {
        let mut cache: LruCache<u32> = LruCache::new(100, false);
        let a = ContentHash::of_str("a");
        cache.insert(a, 42, None);
        let before = cache.get(a).copied();
        cache.insert(ContentHash::of_str("z"), 0, None);
        let after = cache.get(a).copied();
        assert_eq!(before, after);
    }

    #[test]
    fn snapshot_restore_round_trip_for_compatible_dims() {
        let mut cache: LruCache<u32> = LruCache::new(100, false);
        let small = ContentHash::of_str("small");
        let big = ContentHash::of_str("big");
        cache.insert(small, 1, Some((100, 100)));
        cache.insert(big, 2, Some((5000, 5000)));

        let snapshot = cache.snapshot();
        let mut restored: LruCache<u32> = LruCache::new(100, false);
        let count = restored.restore(snapshot, (200, 200));

        assert_eq!(count, 1, "only the small entry fits the new dims");
        assert_eq!(restored.get(small), Some(&1));
        assert_eq!(restored.get(big), None);
    }

    #[test]
    fn capacity_one_always_keeps_most_recent() {
        let mut cache: LruCache<u32> = LruCache::new(1, false);
        let a = ContentHash::of_str("a");
        let b = ContentHash::of_str("b");
        cache.insert(a, 1, None);
        cache.insert(b, 2, None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(b), Some(&2));
        assert_eq!(cache.get(a), None);
    }
}
