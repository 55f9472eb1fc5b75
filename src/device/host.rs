//! In-memory device backed by host allocations.

use std::collections::BTreeMap;

use tracing::debug;

use super::{BufferHandle, CommandStream, Device};
use crate::error::{MotionForgeError, Result};

/// Default allocation budget (64 MiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 64 << 20;

/// Default command-stream capacity in dwords.
pub const DEFAULT_STREAM_CAPACITY: usize = 4096;

/// Byte pattern fresh allocations are filled with, standing in for stale device memory.
const STALE_FILL: u8 = 0xCD;

/// Builder for creating a HostDevice.
#[must_use]
pub struct HostDeviceBuilder {
    memory_budget: usize,
    stream_capacity: usize,
}

impl Default for HostDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDeviceBuilder {
    /// Create a new HostDeviceBuilder with default settings.
    pub fn new() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Set the total number of bytes that may be live at once.
    pub fn memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Set the capacity, in dwords, of every command stream handed out.
    pub fn stream_capacity(mut self, dwords: usize) -> Self {
        self.stream_capacity = dwords;
        self
    }

    /// Build the HostDevice.
    pub fn build(self) -> HostDevice {
        HostDevice {
            next_id: 1,
            buffers: BTreeMap::new(),
            memory_budget: self.memory_budget,
            bytes_in_use: 0,
            stream_capacity: self.stream_capacity,
            submissions: Vec::new(),
            reset_pending: false,
            allocation_count: 0,
        }
    }
}

struct HostBuffer {
    name: String,
    data: Vec<u8>,
}

/// A stream that was handed to [`Device::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedStream {
    pub dwords: Vec<u32>,
    pub final_in_phase: bool,
}

/// Device implementation that keeps every allocation in host memory.
pub struct HostDevice {
    next_id: u32,
    buffers: BTreeMap<BufferHandle, HostBuffer>,
    memory_budget: usize,
    bytes_in_use: usize,
    stream_capacity: usize,
    submissions: Vec<SubmittedStream>,
    reset_pending: bool,
    allocation_count: usize,
}

impl Default for HostDevice {
    fn default() -> Self {
        HostDeviceBuilder::new().build()
    }
}

impl HostDevice {
    /// Create a device with default budget and stream capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a device reset; the next `was_reset` call reports it.
    pub fn trigger_reset(&mut self) {
        self.reset_pending = true;
    }

    /// Streams submitted so far, oldest first.
    pub fn submissions(&self) -> &[SubmittedStream] {
        &self.submissions
    }

    /// Number of successful allocations over the device lifetime.
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Number of allocations currently live.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Bytes currently allocated.
    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    /// Contents of a live buffer.
    pub fn contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// Debug name a buffer was allocated with.
    pub fn name_of(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffers.get(&buffer).map(|b| b.name.as_str())
    }

    fn allocate(&mut self, name: &str, size: usize) -> Result<BufferHandle> {
        if size == 0 {
            return Err(MotionForgeError::InvalidInput(format!(
                "zero-sized allocation for {name}"
            )));
        }
        if self.bytes_in_use + size > self.memory_budget {
            return Err(MotionForgeError::OutOfMemory(format!(
                "{name}: requested {size} bytes, {} of {} in use",
                self.bytes_in_use, self.memory_budget
            )));
        }

        let handle = BufferHandle(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            handle,
            HostBuffer {
                name: name.to_string(),
                data: vec![STALE_FILL; size],
            },
        );
        self.bytes_in_use += size;
        self.allocation_count += 1;
        debug!("Allocated {} ({} bytes) as {:?}", name, size, handle);
        Ok(handle)
    }
}

impl Device for HostDevice {
    fn allocate_2d(&mut self, name: &str, pitch: u32, height: u32) -> Result<BufferHandle> {
        self.allocate(name, pitch as usize * height as usize)
    }

    fn allocate_linear(&mut self, name: &str, size: u32) -> Result<BufferHandle> {
        self.allocate(name, size as usize)
    }

    fn fill_zero(&mut self, buffer: BufferHandle) -> Result<()> {
        let entry = self.buffers.get_mut(&buffer).ok_or_else(|| {
            MotionForgeError::BufferNotFound(format!("{buffer:?} is not a live allocation"))
        })?;
        entry.data.fill(0);
        Ok(())
    }

    fn free(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            self.bytes_in_use -= entry.data.len();
            debug!("Freed {} ({:?})", entry.name, buffer);
        }
    }

    fn acquire_command_stream(&mut self, min_capacity: usize) -> Result<CommandStream> {
        if min_capacity > self.stream_capacity {
            return Err(MotionForgeError::CommandStreamExhausted {
                needed: min_capacity,
                available: self.stream_capacity,
            });
        }
        Ok(CommandStream::with_capacity(self.stream_capacity))
    }

    fn submit(&mut self, stream: CommandStream, final_in_phase: bool) -> Result<()> {
        if !stream.is_closed() {
            return Err(MotionForgeError::CommandStream(
                "submitted stream is missing its batch buffer end".to_string(),
            ));
        }
        debug!(
            "Submitted command stream: dwords={}, final_in_phase={}",
            stream.len(),
            final_in_phase
        );
        self.submissions.push(SubmittedStream {
            dwords: stream.as_dwords().to_vec(),
            final_in_phase,
        });
        Ok(())
    }

    fn was_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_stale_until_zeroed() {
        let mut device = HostDevice::new();
        let handle = device.allocate_2d("mv", 64, 4).unwrap();
        assert!(device.contents(handle).unwrap().iter().all(|&b| b == STALE_FILL));

        device.fill_zero(handle).unwrap();
        assert!(device.contents(handle).unwrap().iter().all(|&b| b == 0));
        assert_eq!(device.name_of(handle), Some("mv"));
    }

    #[test]
    fn test_budget_exceeded_is_out_of_memory() {
        let mut device = HostDeviceBuilder::new().memory_budget(100).build();
        device.allocate_linear("a", 60).unwrap();
        let err = device.allocate_linear("b", 60).unwrap_err();
        assert!(matches!(err, MotionForgeError::OutOfMemory(_)));
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn test_free_returns_budget() {
        let mut device = HostDeviceBuilder::new().memory_budget(100).build();
        let a = device.allocate_linear("a", 60).unwrap();
        device.free(a);
        assert_eq!(device.bytes_in_use(), 0);
        device.allocate_linear("b", 60).unwrap();
        assert_eq!(device.allocation_count(), 2);
    }

    #[test]
    fn test_stream_capacity_limit() {
        let mut device = HostDeviceBuilder::new().stream_capacity(16).build();
        assert!(device.acquire_command_stream(16).is_ok());
        assert!(device
            .acquire_command_stream(17)
            .unwrap_err()
            .is_resource_exhaustion());
    }

    #[test]
    fn test_submit_requires_closed_stream() {
        let mut device = HostDevice::new();
        let stream = device.acquire_command_stream(1).unwrap();
        assert!(device.submit(stream, true).is_err());

        let mut stream = device.acquire_command_stream(1).unwrap();
        stream.close().unwrap();
        device.submit(stream, true).unwrap();
        assert_eq!(device.submissions().len(), 1);
        assert!(device.submissions()[0].final_in_phase);
    }

    #[test]
    fn test_reset_reported_once() {
        let mut device = HostDevice::new();
        assert!(!device.was_reset());
        device.trigger_reset();
        assert!(device.was_reset());
        assert!(!device.was_reset());
    }
}
