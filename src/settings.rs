//! Device Context Settings
//!
//! Configuration knobs for a [`DeviceContext`](crate::DeviceContext).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use stratum::Settings;
//!
//! // Defaults: soft validation, 120-frame idle eviction, Depth24Plus targets
//! let settings = Settings::default();
//!
//! // Harden every soft validation failure into an error
//! let settings = Settings::default()
//!     .with_strict_validation(true)
//!     .with_max_idle_frames(None);
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StratumError};

/// Settings for a device context and the caches it owns.
///
/// The scalar knobs are serde-serializable so they can live in an
/// application's config file. The depth format is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Format used for automatically created depth targets.
    #[serde(skip, default = "default_depth_format")]
    pub default_depth_format: wgpu::TextureFormat,

    /// Content-keyed cache entries (shader modules, bind group layouts,
    /// pipeline layouts, samplers) unused for this many frames are evicted.
    ///
    /// `None` keeps them for the lifetime of the context.
    pub max_idle_frames: Option<u64>,

    /// Promote soft validation failures (vertex format mismatch, missing
    /// attributes, out-of-range writes) to hard errors.
    pub strict_validation: bool,

    /// Allow passes to request timestamp queries. When the device lacks the
    /// feature, requests are skipped regardless of this flag.
    pub timestamp_queries: bool,

    /// Prefix used when labelling GPU objects.
    pub label_prefix: String,

    /// Re-acquire a device automatically after a loss that was not requested.
    pub recover_lost_device: bool,
}

fn default_depth_format() -> wgpu::TextureFormat {
    wgpu::TextureFormat::Depth24Plus
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_depth_format: default_depth_format(),
            max_idle_frames: Some(120),
            strict_validation: false,
            timestamp_queries: true,
            label_prefix: "stratum".to_string(),
            recover_lost_device: true,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn with_default_depth_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.default_depth_format = format;
        self
    }

    #[must_use]
    pub fn with_max_idle_frames(mut self, frames: Option<u64>) -> Self {
        self.max_idle_frames = frames;
        self
    }

    #[must_use]
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    #[must_use]
    pub fn with_timestamp_queries(mut self, enabled: bool) -> Self {
        self.timestamp_queries = enabled;
        self
    }

    #[must_use]
    pub fn with_recover_lost_device(mut self, recover: bool) -> Self {
        self.recover_lost_device = recover;
        self
    }

    /// Builds a GPU object label from the configured prefix.
    #[must_use]
    pub fn label(&self, kind: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{} {kind} `{name}`", self.label_prefix),
            None => format!("{} {kind}", self.label_prefix),
        }
    }

    /// Routes a recoverable failure.
    ///
    /// Fatal errors and, under `strict_validation`, every error are returned;
    /// anything else is logged and the caller skips the affected work.
    pub(crate) fn soft_error(&self, err: StratumError) -> Result<()> {
        if self.strict_validation || err.is_fatal() {
            return Err(err);
        }
        log::warn!("{err}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let s = Settings::default()
            .with_strict_validation(true)
            .with_max_idle_frames(None)
            .with_default_depth_format(wgpu::TextureFormat::Depth32Float);
        assert!(s.strict_validation);
        assert_eq!(s.max_idle_frames, None);
        assert_eq!(s.default_depth_format, wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn label_uses_prefix() {
        let s = Settings::default();
        assert_eq!(s.label("Buffer", Some("verts")), "stratum Buffer `verts`");
        assert_eq!(s.label("Sampler", None), "stratum Sampler");
    }

    #[test]
    fn soft_errors_are_hardened_only_when_strict() {
        let lenient = Settings::default();
        assert!(lenient.soft_error(StratumError::Validation("x".into())).is_ok());
        assert!(
            lenient
                .soft_error(StratumError::ShaderParse {
                    message: "m".into(),
                    excerpt: String::new(),
                })
                .is_err()
        );
        let strict = Settings::default().with_strict_validation(true);
        assert!(strict.soft_error(StratumError::Validation("x".into())).is_err());
    }
}
