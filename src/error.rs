//! Error types for MotionForge.

use thiserror::Error;

/// Main error type for MotionForge operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionForgeError {
    /// Kernel blob does not match the expected build (unknown id, zero size, truncated header).
    #[error("Kernel configuration error: {0}")]
    KernelConfiguration(String),

    /// Session or per-call configuration violates a fixed hardware limit.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A pyramid level was dispatched that is not enabled for this session.
    #[error("Pyramid level not enabled: {0}")]
    LevelNotEnabled(String),

    /// Feature not available on the selected hardware generation.
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Invalid input (dimensions, list lengths, out-of-range fields, etc.).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Device memory allocation failed.
    #[error("Out of device memory: {0}")]
    OutOfMemory(String),

    /// A working buffer was requested before it was ever allocated.
    #[error("Working buffer not found: {0}")]
    BufferNotFound(String),

    /// Command stream has no room for the next block.
    #[error("Command stream exhausted: needed {needed} dwords, {available} available")]
    CommandStreamExhausted { needed: usize, available: usize },

    /// Command stream misuse (append after close, submit failure).
    #[error("Command stream error: {0}")]
    CommandStream(String),

    /// Pyramid levels dispatched out of coarsest-to-finest order.
    #[error("Dispatch order violation: {0}")]
    DispatchOrder(String),

    /// The device was reset; cached device state has been discarded.
    #[error("Device reset: {0}")]
    DeviceReset(String),
}

impl MotionForgeError {
    /// Returns true for errors caused by running out of a device resource.
    ///
    /// These are fatal to the current frame only; the session may continue.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory(_) | Self::CommandStreamExhausted { .. }
        )
    }

    /// Returns true for configuration errors, which will fail again on every retry.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::KernelConfiguration(_)
                | Self::InvalidConfiguration(_)
                | Self::LevelNotEnabled(_)
                | Self::Unsupported(_)
        )
    }
}

/// Result type for MotionForge operations.
pub type Result<T> = std::result::Result<T, MotionForgeError>;
