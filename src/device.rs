//! Device Context
//!
//! [`DeviceContext`] is the entry point of the crate. It owns one GPU backend
//! together with every cache table derived from it, and compiles declarative
//! [`Submit`] descriptions into backend submissions:
//!
//! ```text
//! submit()
//!   ├─ record   Submit → RecordedEncoder*   (caches resolve on demand)
//!   ├─ backend.submit
//!   ├─ map query read-backs
//!   ├─ sweep    destroy objects of dropped descriptors, idle entries
//!   └─ frame += 1
//!
//! maintain()
//!   └─ poll: deliver read-backs, detect device loss, re-acquire
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use stratum::{DeviceContext, DummyBackend, Settings, Submit};
//!
//! let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
//! ctx.submit(&frame)?;
//! ctx.maintain()?;
//! ```

use crate::backend::{DeviceStatus, GpuBackend};
use crate::cache::{Capabilities, DeviceStats, ResourceCache};
use crate::errors::{Result, StratumError};
use crate::graph::queries::start_readbacks;
use crate::graph::{FrameContext, Submit};
use crate::settings::Settings;

/// Backend plus every cache derived from it.
pub struct DeviceContext<B: GpuBackend> {
    backend: B,
    cache: ResourceCache,
    /// Set once the device is gone for good (destroyed on request, or lost
    /// without recovery).
    lost: Option<String>,
}

impl<B: GpuBackend> DeviceContext<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        let capabilities = Capabilities::detect(&backend);
        Self {
            backend,
            cache: ResourceCache::new(settings, capabilities),
            lost: None,
        }
    }

    /// Compiles and submits one frame.
    ///
    /// Query results are delivered from a later [`maintain`](Self::maintain).
    ///
    /// # Errors
    ///
    /// Fatal errors (shader parse, unsupported binding types), every
    /// validation error under strict validation, backend submission errors
    /// and [`StratumError::DeviceLost`] once the device is gone.
    pub fn submit(&mut self, submit: &Submit) -> Result<()> {
        if let Some(reason) = &self.lost {
            return Err(StratumError::DeviceLost(reason.clone()));
        }

        let mut readbacks = Vec::new();
        let mut frame = FrameContext {
            backend: &mut self.backend,
            cache: &mut self.cache,
            readbacks: &mut readbacks,
        };
        let encoders = frame.record_submit(submit)?;

        self.backend.submit(&encoders)?;
        start_readbacks(&mut self.backend, readbacks);

        self.cache.sweep(&mut self.backend);
        log::trace!(
            "Frame {} submitted: {} encoders{}",
            self.cache.frame,
            encoders.len(),
            submit.label.as_deref().map(|l| format!(" ({l})")).unwrap_or_default()
        );
        self.cache.frame += 1;
        Ok(())
    }

    /// Polls the device: completes read-backs and handles device loss.
    ///
    /// An unrequested loss re-acquires a device (when
    /// [`Settings::recover_lost_device`] is set) and forgets every cached
    /// object; the next submit rebuilds what it needs.
    ///
    /// # Errors
    ///
    /// [`StratumError::DeviceLost`] when the device is lost and cannot or may
    /// not be recovered.
    pub fn maintain(&mut self) -> Result<()> {
        let DeviceStatus::Lost { reason, requested } = self.backend.poll() else {
            return Ok(());
        };
        if requested || self.lost.is_some() {
            log::info!("Device destroyed: {reason}");
            if self.lost.is_none() {
                self.lost = Some(reason);
            }
            return Ok(());
        }

        log::error!("GPU device lost: {reason}");
        if !self.cache.settings.recover_lost_device {
            self.cache.forget_device_objects();
            self.lost = Some(reason.clone());
            return Err(StratumError::DeviceLost(reason));
        }

        if let Err(err) = self.backend.reacquire() {
            self.cache.forget_device_objects();
            self.lost = Some(reason);
            return Err(err);
        }
        self.cache.forget_device_objects();
        self.cache.capabilities = Capabilities::detect(&self.backend);
        self.cache.device_recoveries += 1;
        log::info!("Device re-acquired after loss ({} recoveries)", self.cache.device_recoveries);
        Ok(())
    }

    /// Destroys the device. The context is unusable afterwards.
    pub fn destroy_device(&mut self) {
        self.backend.destroy_device();
        self.cache.forget_device_objects();
        self.lost = Some("destroyed on request".to_string());
    }

    /// Whether [`submit`](Self::submit) can still be called.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    /// Routes a recoverable failure through the validation policy: logged and
    /// dropped, or returned under strict validation.
    ///
    /// # Errors
    ///
    /// `err` itself when it is fatal or validation is strict.
    pub fn soft_error(&self, err: StratumError) -> Result<()> {
        self.cache.settings.soft_error(err)
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.cache.stats()
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.cache.settings
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.cache.capabilities
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Index of the next frame to be submitted.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.cache.frame
    }

    /// The cache tables, for inspection.
    #[must_use]
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }
}

impl<B: GpuBackend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        if self.lost.is_none() {
            self.cache.destroy_all(&mut self.backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn empty_submit_advances_the_frame() {
        let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
        ctx.submit(&Submit::default()).unwrap();
        ctx.submit(&Submit::default()).unwrap();
        assert_eq!(ctx.frame_index(), 2);
        assert_eq!(ctx.stats().frames, 2);
        assert_eq!(ctx.backend().submitted().len(), 0);
    }

    #[test]
    fn unrequested_loss_is_recovered() {
        let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
        ctx.backend_mut().simulate_device_loss("driver reset");
        ctx.maintain().unwrap();
        assert_eq!(ctx.stats().device_recoveries, 1);
        assert_eq!(ctx.backend().device_generation(), 1);
        assert!(!ctx.is_lost());
        ctx.submit(&Submit::default()).unwrap();
    }

    #[test]
    fn loss_without_recovery_is_reported() {
        let settings = Settings::default().with_recover_lost_device(false);
        let mut ctx = DeviceContext::new(DummyBackend::new(), settings);
        ctx.backend_mut().simulate_device_loss("driver reset");
        assert!(matches!(ctx.maintain(), Err(StratumError::DeviceLost(_))));
        assert!(matches!(ctx.submit(&Submit::default()), Err(StratumError::DeviceLost(_))));
    }

    #[test]
    fn destroyed_device_is_not_recovered() {
        let mut ctx = DeviceContext::new(DummyBackend::new(), Settings::default());
        ctx.destroy_device();
        ctx.maintain().unwrap();
        assert_eq!(ctx.stats().device_recoveries, 0);
        assert!(ctx.is_lost());
        assert!(ctx.submit(&Submit::default()).is_err());
    }
}
