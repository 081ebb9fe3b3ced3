use std::collections::HashMap;

use crate::foundation::error::{FlattenError, FlattenResult};

/// Source of off-screen pixel buffers for the rasterizer.
///
/// `acquire` must return a fully transparent buffer of the requested size. Buffers are handed back
/// through `release` once the rasterizer is done with them, at op granularity.
pub trait SurfaceFactory {
    /// Get a transparent `width x height` buffer.
    fn acquire(&mut self, width: u16, height: u16) -> vello_cpu::Pixmap;

    /// Return a buffer obtained from `acquire`.
    fn release(&mut self, pixmap: vello_cpu::Pixmap) {
        drop(pixmap);
    }
}

/// Pool configuration for cached surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SurfacePoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained surfaces per `(width, height)` bucket.
    pub max_surfaces_per_bucket: usize,
}

impl Default for SurfacePoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_surfaces_per_bucket: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SurfaceKey {
    w: u16,
    h: u16,
}

impl SurfaceKey {
    fn byte_len(self) -> usize {
        (self.w as usize)
            .saturating_mul(self.h as usize)
            .saturating_mul(4)
    }
}

/// Pool counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SurfacePoolStats {
    /// Buffers currently retained.
    pub retained_surfaces: usize,
    /// Bytes currently retained.
    pub retained_bytes: usize,
    /// Buffers allocated because no retained one fit.
    pub alloc_surfaces: u64,
    /// Buffers dropped on release because a cap was reached.
    pub dropped_on_release: u64,
}

/// Bounded pooled allocator for CPU pixmaps, keyed by `(width, height)`.
pub struct SurfacePool {
    opts: SurfacePoolOpts,
    stats: SurfacePoolStats,
    buckets: HashMap<SurfaceKey, Vec<vello_cpu::Pixmap>>,
}

impl SurfacePool {
    /// Empty pool.
    pub fn new(opts: SurfacePoolOpts) -> Self {
        Self {
            opts,
            stats: SurfacePoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> SurfacePoolStats {
        self.stats.clone()
    }
}

impl std::fmt::Debug for SurfacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfacePool")
            .field("opts", &self.opts)
            .field("stats", &self.stats)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl Default for SurfacePool {
    fn default() -> Self {
        Self::new(SurfacePoolOpts::default())
    }
}

impl SurfaceFactory for SurfacePool {
    fn acquire(&mut self, width: u16, height: u16) -> vello_cpu::Pixmap {
        let key = SurfaceKey {
            w: width,
            h: height,
        };
        if let Some(mut p) = self.buckets.get_mut(&key).and_then(|b| b.pop()) {
            self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
            p.data_as_u8_slice_mut().fill(0);
            return p;
        }
        self.stats.alloc_surfaces = self.stats.alloc_surfaces.saturating_add(1);
        vello_cpu::Pixmap::new(width, height)
    }

    fn release(&mut self, pixmap: vello_cpu::Pixmap) {
        if self.opts.max_pool_bytes == 0 || self.opts.max_surfaces_per_bucket == 0 {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        let key = SurfaceKey {
            w: pixmap.width(),
            h: pixmap.height(),
        };
        let bytes = key.byte_len();
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        let bucket = self.buckets.entry(key).or_default();
        if bucket.len() >= self.opts.max_surfaces_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        bucket.push(pixmap);
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }
}

/// Convert a pixel size to the rasterizer's `u16` limits.
pub(crate) fn surface_size(width: u32, height: u32) -> FlattenResult<(u16, u16)> {
    let w: u16 = width
        .try_into()
        .map_err(|_| FlattenError::render(format!("surface width {width} exceeds u16")))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| FlattenError::render(format!("surface height {height} exceeds u16")))?;
    Ok((w, h))
}

#[cfg(test)]
#[path = "../../tests/unit/render/surface_pool.rs"]
mod tests;
