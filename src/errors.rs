//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`StratumError`] covers three families of failure:
//! - **Fatal** errors: malformed shader source, struct types that cannot be
//!   laid out for a binding. These are always returned, never degraded,
//!   because downstream byte-offset math depends on them.
//! - **Soft validation** errors: vertex format mismatches, missing attributes,
//!   out-of-range writes. These are logged and skipped unless
//!   [`Settings::strict_validation`](crate::Settings::strict_validation) is set.
//! - **Device** errors: adapter/device acquisition and device loss.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, StratumError>`.

use thiserror::Error;

/// The main error type for the crate.
#[derive(Error, Debug)]
pub enum StratumError {
    // ========================================================================
    // Shader Reflection Errors (always fatal)
    // ========================================================================
    /// The WGSL source failed to parse.
    #[error("Shader parse error: {message}\n{excerpt}")]
    ShaderParse {
        /// Parser message
        message: String,
        /// Source lines around the failing span
        excerpt: String,
    },

    /// A WGSL type that has no host-side byte layout.
    #[error("Unsupported WGSL type `{name}` in binding layout\n{excerpt}")]
    UnsupportedType {
        /// Name of the offending type (or a description of it)
        name: String,
        /// Source lines around the declaration, if known
        excerpt: String,
    },

    /// A binding whose declared type does not fit its address space.
    #[error("Invalid type for binding `{name}`: {reason}")]
    InvalidBindingType {
        /// Resource name as declared in the shader
        name: String,
        /// What is wrong with it
        reason: String,
    },

    // ========================================================================
    // Binding & Write Validation
    // ========================================================================
    /// A resource required by the shader was not supplied.
    #[error("Missing binding resource `{name}` (group {group}, binding {binding})")]
    MissingBinding {
        /// Resource name as declared in the shader
        name: String,
        /// Bind group index
        group: u32,
        /// Binding index within the group
        binding: u32,
    },

    /// A buffer write whose offset or size is not 4-byte aligned.
    #[error("Unaligned buffer write: offset {offset}, size {size} (must be multiples of 4)")]
    UnalignedWrite {
        /// Byte offset of the write
        offset: u64,
        /// Byte size of the write
        size: u64,
    },

    /// A buffer write that does not fit the declared buffer size.
    #[error("Buffer write out of range: offset {offset} + size {size} exceeds capacity {capacity}")]
    WriteOutOfRange {
        /// Byte offset of the write
        offset: u64,
        /// Byte size of the write
        size: u64,
        /// Declared buffer size
        capacity: u64,
    },

    /// Vertex layout does not match the vertex shader inputs.
    #[error("Vertex layout error: {0}")]
    VertexLayout(String),

    /// Generic soft validation failure.
    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // Capability & Graph Errors
    // ========================================================================
    /// Feature not supported by the current device.
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),

    /// A render pass whose attachment size cannot be inferred.
    #[error("Render pass has no attachment that provides a size")]
    MissingAttachmentSize,

    /// The backend failed to create a resource.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The GPU device was lost.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Mapping a buffer for read-back failed.
    #[error("Buffer map failed: {0}")]
    MapFailed(String),
}

impl StratumError {
    /// Returns `true` for errors that must never be downgraded to a log line.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ShaderParse { .. }
                | Self::UnsupportedType { .. }
                | Self::InvalidBindingType { .. }
                | Self::AdapterRequestFailed(_)
                | Self::DeviceCreateFailed(_)
        )
    }
}

/// Alias for `Result<T, StratumError>`.
pub type Result<T> = std::result::Result<T, StratumError>;
