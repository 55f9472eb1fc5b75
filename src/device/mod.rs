//! Device/driver collaborator interface.
//!
//! The motion-estimation core never talks to a GPU directly. Everything it needs
//! from the driver layer goes through the [`Device`] trait: buffer allocation,
//! command-stream acquisition, submission and reset detection.
//!
//! [`HostDevice`] is an in-memory implementation used by tests and demos.

mod host;

pub use host::{HostDevice, HostDeviceBuilder, SubmittedStream};

use crate::error::{MotionForgeError, Result};

/// `MI_BATCH_BUFFER_END`, terminates a command stream.
pub const MI_BATCH_BUFFER_END: u32 = 0x0500_0000;

/// Opaque handle to a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    /// Raw id as written into binding descriptors.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Driver layer consumed by the motion-estimation core.
pub trait Device {
    /// Allocate a 2-D GPU-visible buffer. `pitch` is the row size in bytes.
    fn allocate_2d(&mut self, name: &str, pitch: u32, height: u32) -> Result<BufferHandle>;

    /// Allocate a linear GPU-visible buffer of `size` bytes.
    fn allocate_linear(&mut self, name: &str, size: u32) -> Result<BufferHandle>;

    /// Zero the full contents of a buffer.
    fn fill_zero(&mut self, buffer: BufferHandle) -> Result<()>;

    /// Release an allocation. Unknown handles are ignored.
    fn free(&mut self, buffer: BufferHandle);

    /// Acquire a command stream with at least `min_capacity` free dwords.
    fn acquire_command_stream(&mut self, min_capacity: usize) -> Result<CommandStream>;

    /// Submit a closed stream. `final_in_phase` marks the last unit of a batched phase.
    fn submit(&mut self, stream: CommandStream, final_in_phase: bool) -> Result<()>;

    /// Whether the device was reset since the last call.
    fn was_reset(&mut self) -> bool;
}

/// Capacity-bounded command stream of 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStream {
    dwords: Vec<u32>,
    capacity: usize,
    closed: bool,
}

impl CommandStream {
    /// Create an empty stream holding at most `capacity` dwords.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dwords: Vec::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    /// Total capacity in dwords.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free dwords remaining.
    pub fn remaining(&self) -> usize {
        self.capacity - self.dwords.len()
    }

    /// Check whether `dwords` more words fit.
    pub fn has_space(&self, dwords: usize) -> bool {
        dwords <= self.remaining()
    }

    /// Whether the batch-buffer-end has been written.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of dwords written so far.
    pub fn len(&self) -> usize {
        self.dwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dwords.is_empty()
    }

    /// Contents written so far.
    pub fn as_dwords(&self) -> &[u32] {
        &self.dwords
    }

    /// Append a fixed-size command block.
    ///
    /// The block is written whole or not at all.
    pub fn append(&mut self, block: &[u32]) -> Result<()> {
        if self.closed {
            return Err(MotionForgeError::CommandStream(
                "append after batch buffer end".to_string(),
            ));
        }
        if !self.has_space(block.len()) {
            return Err(MotionForgeError::CommandStreamExhausted {
                needed: block.len(),
                available: self.remaining(),
            });
        }
        self.dwords.extend_from_slice(block);
        Ok(())
    }

    /// Drop everything written after the first `len` dwords.
    ///
    /// A closed stream is left untouched.
    pub fn rewind(&mut self, len: usize) {
        if !self.closed {
            self.dwords.truncate(len);
        }
    }

    /// Terminate the stream with `MI_BATCH_BUFFER_END`.
    pub fn close(&mut self) -> Result<()> {
        self.append(&[MI_BATCH_BUFFER_END])?;
        self.closed = true;
        Ok(())
    }
}
