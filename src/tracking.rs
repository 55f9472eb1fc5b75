//! Downscale/reference-tracking collaborator.
//!
//! The downscale stage produces 4x/16x/32x copies of every reconstructed picture
//! and parks them in internal scaling slots. The binder only needs two lookups:
//! external picture index to scaling slot, and scaling slot plus level to surface.

use std::collections::BTreeMap;

use crate::device::BufferHandle;
use crate::hme::PyramidLevel;

/// Number of scaling slots tracked by [`ScalingTable`].
pub const MAX_SCALING_SLOTS: usize = 16;

/// A downscaled picture owned by the downscale stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledSurface {
    /// Backing allocation.
    pub buffer: BufferHandle,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels (full frame).
    pub height: u32,
    /// Row pitch in bytes.
    pub pitch: u32,
    /// Byte offset of the bottom field when field scaling is interleaved.
    pub bottom_field_offset: u32,
}

/// Resolves reference pictures to their downscaled surfaces.
pub trait ReferenceTracker {
    /// Map an external picture index to its scaling slot, or `None` if the
    /// picture is not a valid reference.
    fn scaling_slot(&self, frame_idx: u8) -> Option<u8>;

    /// Surface for `slot` at `level`, or `None` if it was never produced or has
    /// been invalidated.
    fn scaled_surface(&self, slot: u8, level: PyramidLevel) -> Option<ScaledSurface>;
}

/// Fixed-size table of scaling slots with per-level surfaces.
#[derive(Debug, Clone)]
pub struct ScalingTable {
    pictures: BTreeMap<u8, u8>,
    slots: [[Option<ScaledSurface>; 3]; MAX_SCALING_SLOTS],
}

impl Default for ScalingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pictures: BTreeMap::new(),
            slots: [[None; 3]; MAX_SCALING_SLOTS],
        }
    }

    /// Mark `frame_idx` as a valid reference living in `slot`.
    ///
    /// Returns false if `slot` is out of range.
    pub fn register_picture(&mut self, frame_idx: u8, slot: u8) -> bool {
        if slot as usize >= MAX_SCALING_SLOTS {
            return false;
        }
        self.pictures.insert(frame_idx, slot);
        true
    }

    /// Forget a picture. Its slot's surfaces are left in place.
    pub fn remove_picture(&mut self, frame_idx: u8) {
        self.pictures.remove(&frame_idx);
    }

    /// Record the surface produced for `slot` at `level`.
    ///
    /// Returns false if `slot` is out of range.
    pub fn set_surface(&mut self, slot: u8, level: PyramidLevel, surface: ScaledSurface) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(levels) => {
                levels[level.index()] = Some(surface);
                true
            }
            None => false,
        }
    }

    /// Drop every surface held by `slot`.
    pub fn invalidate_slot(&mut self, slot: u8) {
        if let Some(levels) = self.slots.get_mut(slot as usize) {
            *levels = [None; 3];
        }
    }
}

impl ReferenceTracker for ScalingTable {
    fn scaling_slot(&self, frame_idx: u8) -> Option<u8> {
        self.pictures.get(&frame_idx).copied()
    }

    fn scaled_surface(&self, slot: u8, level: PyramidLevel) -> Option<ScaledSurface> {
        self.slots
            .get(slot as usize)
            .and_then(|levels| levels[level.index()])
    }
}
