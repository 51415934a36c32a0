//! Cache statistics

use std::ops::{Add, AddAssign};

use serde::Serialize;

/// Counters of one cache table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Fingerprint changes: the old object was destroyed and rebuilt.
    pub recreations: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Objects built, whether first-time or rebuilt.
    #[must_use]
    pub fn creations(&self) -> u64 {
        self.misses + self.recreations
    }
}

impl Add for CacheStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            hits: self.hits + rhs.hits,
            misses: self.misses + rhs.misses,
            recreations: self.recreations + rhs.recreations,
            evictions: self.evictions + rhs.evictions,
        }
    }
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Per-table statistics of a device context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub reflections: CacheStats,
    pub shader_modules: CacheStats,
    pub bind_group_layouts: CacheStats,
    pub pipeline_layouts: CacheStats,
    pub bind_groups: CacheStats,
    pub render_pipelines: CacheStats,
    pub compute_pipelines: CacheStats,
    pub buffers: CacheStats,
    pub value_buffers: CacheStats,
    pub textures: CacheStats,
    pub texture_views: CacheStats,
    pub attachments: CacheStats,
    pub samplers: CacheStats,
    pub query_sets: CacheStats,
    pub render_bundles: CacheStats,
    /// Recorded render-object command lists.
    pub render_objects: CacheStats,
    /// Frames completed by `submit`.
    pub frames: u64,
    /// Devices acquired after a loss.
    pub device_recoveries: u64,
}

impl DeviceStats {
    /// Sum over every table that owns GPU objects.
    #[must_use]
    pub fn gpu_objects(&self) -> CacheStats {
        self.shader_modules
            + self.bind_group_layouts
            + self.pipeline_layouts
            + self.bind_groups
            + self.render_pipelines
            + self.compute_pipelines
            + self.buffers
            + self.value_buffers
            + self.textures
            + self.texture_views
            + self.attachments
            + self.samplers
            + self.query_sets
            + self.render_bundles
    }
}
