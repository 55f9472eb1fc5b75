//! Working-buffer pool for HME outputs.
//!
//! Owns the per-level MV buffers and the distortion buffers. Buffers are
//! allocated on first use, zero-filled, reused for every later frame, and
//! reallocated only when the downscaled dimensions change.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use super::{align_up, FrameGeometry, PictureStructure, PyramidLevel, ME_DATA_SIZE_MULTIPLIER};
use crate::device::{BufferHandle, Device};
use crate::error::{MotionForgeError, Result};

/// Row alignment of every working buffer, in bytes.
pub const ROW_ALIGNMENT: u32 = 64;

/// Bytes of MV record per downscaled macroblock per row.
const MV_BYTES_PER_MB: u32 = 32;

/// Bytes of distortion record per 4x macroblock per row.
const DISTORTION_BYTES_PER_MB: u32 = 8;

/// Logical working-buffer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkingBufferId {
    /// MV output of a pyramid level.
    MvData(PyramidLevel),
    /// ME distortion at the finest level.
    Distortion,
    /// Rate-control distortion at the finest level.
    BrcDistortion,
}

impl fmt::Display for WorkingBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MvData(level) => write!(f, "{level} ME MV data"),
            Self::Distortion => write!(f, "ME distortion"),
            Self::BrcDistortion => write!(f, "BRC distortion"),
        }
    }
}

/// Requested dimensions for a working buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    /// Row width in bytes; rounded up to [`ROW_ALIGNMENT`] by `ensure`.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Rows bound for one field of a field picture.
    pub field_height: u32,
    /// Byte offset of the bottom field's data.
    pub bottom_field_offset: u32,
}

impl BufferSpec {
    /// MV output buffer for `level`.
    pub fn mv_data(geometry: &FrameGeometry, level: PyramidLevel) -> Self {
        let width = align_up(geometry.scaled_width_in_mb(level) * MV_BYTES_PER_MB, ROW_ALIGNMENT);
        let field_mb = geometry.scaled_field_height_in_mb(level);
        let field_height = field_mb * 4 * ME_DATA_SIZE_MULTIPLIER;
        // The bottom field starts `field_mb * 4` rows in and needs its full
        // field height behind it.
        let frame_height = geometry.scaled_height_in_mb(level) * 4 * ME_DATA_SIZE_MULTIPLIER;
        Self {
            width,
            height: frame_height.max(field_mb * 4 + field_height),
            field_height,
            bottom_field_offset: width * field_mb * 4,
        }
    }

    /// Distortion buffer (ME or rate-control) at 4x.
    pub fn distortion(geometry: &FrameGeometry) -> Self {
        let level = PyramidLevel::X4;
        let width = align_up(
            geometry.scaled_width_in_mb(level) * DISTORTION_BYTES_PER_MB,
            ROW_ALIGNMENT,
        );
        let field_rows = align_up(
            geometry.scaled_field_height_in_mb(level) * 4 * ME_DATA_SIZE_MULTIPLIER,
            8,
        );
        Self {
            width,
            height: 2 * field_rows,
            field_height: field_rows,
            bottom_field_offset: width * field_rows,
        }
    }

    /// Dimensions for `id`.
    pub fn for_id(id: WorkingBufferId, geometry: &FrameGeometry) -> Self {
        match id {
            WorkingBufferId::MvData(level) => Self::mv_data(geometry, level),
            WorkingBufferId::Distortion | WorkingBufferId::BrcDistortion => {
                Self::distortion(geometry)
            }
        }
    }
}

/// A live working buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingBuffer {
    pub id: WorkingBufferId,
    pub handle: BufferHandle,
    pub width: u32,
    pub height: u32,
    pub field_height: u32,
    pub pitch: u32,
    pub bottom_field_offset: u32,
}

impl WorkingBuffer {
    fn matches(&self, spec: &BufferSpec) -> bool {
        self.width == spec.width
            && self.height == spec.height
            && self.field_height == spec.field_height
            && self.bottom_field_offset == spec.bottom_field_offset
    }

    /// Rows bound for a picture of `structure`.
    pub fn bound_height(&self, structure: PictureStructure) -> u32 {
        if structure.is_field() {
            self.field_height
        } else {
            self.height
        }
    }

    /// One past the last byte a binding of `structure` can reach.
    pub fn bound_end(&self, structure: PictureStructure) -> u64 {
        let offset = if structure.is_bottom_field() {
            self.bottom_field_offset
        } else {
            0
        };
        u64::from(offset) + u64::from(self.bound_height(structure)) * u64::from(self.pitch)
    }
}

/// Pool of working buffers keyed by logical id.
#[derive(Debug, Default)]
pub struct WorkingBufferPool {
    buffers: BTreeMap<WorkingBufferId, WorkingBuffer>,
}

impl WorkingBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for `id`, if it was ever allocated.
    pub fn get(&self, id: WorkingBufferId) -> Result<&WorkingBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| MotionForgeError::BufferNotFound(id.to_string()))
    }

    /// Allocate `id` on first use, or return the existing buffer.
    ///
    /// A buffer whose dimensions no longer match `spec` is freed and replaced.
    /// Fresh allocations are zero-filled before they are returned.
    pub fn ensure<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        id: WorkingBufferId,
        spec: BufferSpec,
    ) -> Result<&WorkingBuffer> {
        if spec.width == 0 || spec.height == 0 || spec.field_height == 0 {
            return Err(MotionForgeError::InvalidInput(format!(
                "{id}: zero-sized buffer {}x{}",
                spec.width, spec.height
            )));
        }
        let spec = BufferSpec {
            width: align_up(spec.width, ROW_ALIGNMENT),
            ..spec
        };

        if let Some(existing) = self.buffers.get(&id) {
            if existing.matches(&spec) {
                return self.get(id);
            }
            debug!(
                "Resizing {}: {}x{} -> {}x{}",
                id, existing.width, existing.height, spec.width, spec.height
            );
            device.free(existing.handle);
            self.buffers.remove(&id);
        }

        let name = id.to_string();
        let handle = device.allocate_2d(&name, spec.width, spec.height)?;
        if let Err(e) = device.fill_zero(handle) {
            device.free(handle);
            return Err(e);
        }

        debug!(
            "Allocated {}: width={}, height={}, bottom_field_offset={}",
            id, spec.width, spec.height, spec.bottom_field_offset
        );
        self.buffers.insert(
            id,
            WorkingBuffer {
                id,
                handle,
                width: spec.width,
                height: spec.height,
                field_height: spec.field_height,
                pitch: spec.width,
                bottom_field_offset: spec.bottom_field_offset,
            },
        );
        self.get(id)
    }

    /// Free every buffer. The pool is empty afterwards.
    pub fn release_all<D: Device + ?Sized>(&mut self, device: &mut D) {
        if self.buffers.is_empty() {
            return;
        }
        info!("Releasing {} HME working buffers", self.buffers.len());
        for buffer in self.buffers.values() {
            device.free(buffer.handle);
        }
        self.buffers.clear();
    }

    /// Number of live buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
