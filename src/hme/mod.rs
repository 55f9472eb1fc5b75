//! Hierarchical motion estimation: types, configuration, and shared geometry.
//!
//! This module provides:
//! - Pyramid level and picture classification types.
//! - Per-dispatch parameter records (`CurbeParameters`, `SurfaceParameters`).
//! - Session configuration (`HmeConfig`).
//! - The working-buffer pool, kernel-state cache, curbe builder, binder and
//!   dispatch driver in their own submodules.

pub mod binding;
pub mod commands;
pub mod curbe;
pub mod dispatch;
mod dwords;
pub mod generation;
pub mod kernel;
pub mod pool;
pub mod tables;

use std::fmt;

use crate::device::BufferHandle;
use crate::error::{MotionForgeError, Result};
use crate::tracking::ScaledSurface;

pub use generation::Generation;

/// Maximum forward (L0) references the kernel accepts.
pub const MAX_FORWARD_REFS: usize = 8;

/// Maximum backward (L1) references the kernel accepts.
pub const MAX_BACKWARD_REFS: usize = 2;

/// Macroblock edge in pixels.
pub const MACROBLOCK_SIZE: u32 = 16;

/// Per-row record multiplier of the ME output format (8 forward + 2 backward).
pub const ME_DATA_SIZE_MULTIPLIER: u32 = 10;

/// Largest frame width or height accepted by a session. The 4x level of an
/// 8192-pixel edge is 128 macroblocks, inside the curbe's 8-bit size fields.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Highest QP accepted by the curbe.
pub const MAX_QP: u8 = 51;

/// Highest target-usage tier.
pub const MAX_TARGET_USAGE: u8 = 7;

// Default session configuration constants.

/// Default for the 16x level.
pub const DEFAULT_ENABLE_16X: bool = true;

/// Default for the 32x level.
pub const DEFAULT_ENABLE_32X: bool = false;

/// Default single-phase batching policy.
pub const DEFAULT_SINGLE_TASK_PHASE: bool = false;

/// Default kernel id inside the kernel blob.
pub const DEFAULT_KERNEL_ID: u32 = 0;

/// Default search-path thoroughness index.
pub const DEFAULT_SEARCH_THOROUGHNESS: u8 = 0;

/// Number of macroblocks covering `pixels`.
pub(crate) fn mb_count(pixels: u32) -> u32 {
    pixels.div_ceil(MACROBLOCK_SIZE)
}

/// Round `value` up to a multiple of `alignment` (a power of two).
/// Values within `alignment` of `u32::MAX` round down instead.
pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    value.saturating_add(alignment - 1) & !(alignment - 1)
}

/// One resolution stage of the motion search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PyramidLevel {
    /// 1/32 scale, coarsest.
    X32,
    /// 1/16 scale.
    X16,
    /// 1/4 scale, finest.
    X4,
}

impl PyramidLevel {
    /// All levels, coarsest first.
    pub const ALL: [PyramidLevel; 3] = [PyramidLevel::X32, PyramidLevel::X16, PyramidLevel::X4];

    /// Downscale factor.
    pub fn scale_factor(self) -> u32 {
        match self {
            Self::X32 => 32,
            Self::X16 => 16,
            Self::X4 => 4,
        }
    }

    /// Shift applied to the coarser MVs before refinement.
    pub fn mv_shift_factor(self) -> u8 {
        match self {
            Self::X32 => 1,
            Self::X16 | Self::X4 => 2,
        }
    }

    /// Read position of the previous level's MV record.
    pub fn prev_mv_read_position(self) -> u8 {
        match self {
            Self::X16 => 1,
            Self::X32 | Self::X4 => 0,
        }
    }

    /// Position in [`Self::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::X32 => 0,
            Self::X16 => 1,
            Self::X4 => 2,
        }
    }

    /// Next coarser level, if any.
    pub fn coarser(self) -> Option<Self> {
        match self {
            Self::X32 => None,
            Self::X16 => Some(Self::X32),
            Self::X4 => Some(Self::X16),
        }
    }
}

impl fmt::Display for PyramidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.scale_factor())
    }
}

/// Picture coding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureCodingType {
    /// Intra picture, no references.
    #[default]
    I,
    /// Predicted picture (L0 only).
    P,
    /// Bi-predicted picture (L0 and L1).
    B,
}

impl PictureCodingType {
    /// Kernel bucket for this coding type. Intra pictures run no motion search.
    pub fn bucket(self) -> Option<KernelBucket> {
        match self {
            Self::I => None,
            Self::P => Some(KernelBucket::Predicted),
            Self::B => Some(KernelBucket::BiPredicted),
        }
    }

    /// Returns true if this picture uses the forward list.
    pub fn uses_forward_refs(self) -> bool {
        matches!(self, Self::P | Self::B)
    }

    /// Returns true if this picture uses the backward list.
    pub fn uses_backward_refs(self) -> bool {
        matches!(self, Self::B)
    }
}

/// Kernel variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelBucket {
    /// Motion search for P pictures.
    Predicted,
    /// Motion search for B pictures.
    BiPredicted,
}

impl KernelBucket {
    /// Both buckets in kernel-header order.
    pub const ALL: [KernelBucket; 2] = [KernelBucket::Predicted, KernelBucket::BiPredicted];

    /// Index into the kernel header and the search-path table.
    pub fn index(self) -> usize {
        match self {
            Self::Predicted => 0,
            Self::BiPredicted => 1,
        }
    }
}

/// Frame or field structure of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureStructure {
    /// Progressive frame.
    #[default]
    Frame,
    /// Top field.
    TopField,
    /// Bottom field.
    BottomField,
}

impl PictureStructure {
    pub fn is_field(self) -> bool {
        !matches!(self, Self::Frame)
    }

    pub fn is_bottom_field(self) -> bool {
        matches!(self, Self::BottomField)
    }
}

/// A reference picture as named by the encode driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePicture {
    /// External picture index resolved through the reference tracker.
    pub frame_idx: u8,
    /// Frame or field parity of the reference.
    pub structure: PictureStructure,
}

impl ReferencePicture {
    /// A frame reference.
    pub fn frame(frame_idx: u8) -> Self {
        Self {
            frame_idx,
            structure: PictureStructure::Frame,
        }
    }

    /// A field reference of the given parity.
    pub fn field(frame_idx: u8, bottom: bool) -> Self {
        Self {
            frame_idx,
            structure: if bottom {
                PictureStructure::BottomField
            } else {
                PictureStructure::TopField
            },
        }
    }
}

/// Per-dispatch constant-buffer inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurbeParameters {
    /// Slice QP (`pic_init_qp + slice_qp_delta`).
    pub qp: u8,
    /// Picture coding type.
    pub coding_type: PictureCodingType,
    /// Frame/field structure of the current picture.
    pub structure: PictureStructure,
    /// Active forward references minus one.
    pub num_ref_idx_l0_minus1: u8,
    /// Active backward references minus one.
    pub num_ref_idx_l1_minus1: u8,
    /// Bottom-field parity of each forward reference (field pictures only).
    pub l0_bottom_field: [bool; MAX_FORWARD_REFS],
    /// Bottom-field parity of each backward reference (field pictures only).
    pub l1_bottom_field: [bool; MAX_BACKWARD_REFS],
    /// Maximum motion-vector length for the stream's level.
    pub max_mv_len: u32,
    /// Quality tier, 0..=7.
    pub target_usage: u8,
    /// Also produce rate-control distortion output at the finest level.
    pub rate_control_assist: bool,
}

impl CurbeParameters {
    /// Parameters for a frame picture with one reference per used list.
    pub fn new(coding_type: PictureCodingType, qp: u8, max_mv_len: u32) -> Self {
        Self {
            qp,
            coding_type,
            structure: PictureStructure::Frame,
            num_ref_idx_l0_minus1: 0,
            num_ref_idx_l1_minus1: 0,
            l0_bottom_field: [false; MAX_FORWARD_REFS],
            l1_bottom_field: [false; MAX_BACKWARD_REFS],
            max_mv_len,
            target_usage: 4,
            rate_control_assist: false,
        }
    }

    /// Set the current picture structure.
    pub fn with_structure(mut self, structure: PictureStructure) -> Self {
        self.structure = structure;
        self
    }

    /// Set the active reference counts (as minus-one values).
    pub fn with_ref_counts(mut self, l0_minus1: u8, l1_minus1: u8) -> Self {
        self.num_ref_idx_l0_minus1 = l0_minus1;
        self.num_ref_idx_l1_minus1 = l1_minus1;
        self
    }

    /// Set the target-usage tier.
    pub fn with_target_usage(mut self, target_usage: u8) -> Self {
        self.target_usage = target_usage;
        self
    }

    /// Enable rate-control distortion output.
    pub fn with_rate_control_assist(mut self, enable: bool) -> Self {
        self.rate_control_assist = enable;
        self
    }

    /// Derive counts and parity flags from the reference lists.
    ///
    /// Lists longer than the hardware maxima are left for `validate` to reject.
    pub fn with_references(
        mut self,
        forward: &[ReferencePicture],
        backward: &[ReferencePicture],
    ) -> Self {
        self.num_ref_idx_l0_minus1 = forward.len().saturating_sub(1).min(u8::MAX as usize) as u8;
        self.num_ref_idx_l1_minus1 = backward.len().saturating_sub(1).min(u8::MAX as usize) as u8;
        for (flag, r) in self.l0_bottom_field.iter_mut().zip(forward) {
            *flag = r.structure.is_bottom_field();
        }
        for (flag, r) in self.l1_bottom_field.iter_mut().zip(backward) {
            *flag = r.structure.is_bottom_field();
        }
        self
    }

    /// Active forward references.
    pub fn forward_count(&self) -> usize {
        if self.coding_type.uses_forward_refs() {
            self.num_ref_idx_l0_minus1 as usize + 1
        } else {
            0
        }
    }

    /// Active backward references.
    pub fn backward_count(&self) -> usize {
        if self.coding_type.uses_backward_refs() {
            self.num_ref_idx_l1_minus1 as usize + 1
        } else {
            0
        }
    }

    /// Check hardware limits.
    pub fn validate(&self) -> Result<()> {
        if self.coding_type.uses_forward_refs()
            && self.num_ref_idx_l0_minus1 as usize >= MAX_FORWARD_REFS
        {
            return Err(MotionForgeError::InvalidConfiguration(format!(
                "{} forward references exceed the limit of {}",
                self.num_ref_idx_l0_minus1 as usize + 1,
                MAX_FORWARD_REFS
            )));
        }
        if self.coding_type.uses_backward_refs()
            && self.num_ref_idx_l1_minus1 as usize >= MAX_BACKWARD_REFS
        {
            return Err(MotionForgeError::InvalidConfiguration(format!(
                "{} backward references exceed the limit of {}",
                self.num_ref_idx_l1_minus1 as usize + 1,
                MAX_BACKWARD_REFS
            )));
        }
        if self.qp > MAX_QP {
            return Err(MotionForgeError::InvalidInput(format!(
                "qp {} out of range 0..={}",
                self.qp, MAX_QP
            )));
        }
        if self.target_usage > MAX_TARGET_USAGE {
            return Err(MotionForgeError::InvalidInput(format!(
                "target usage {} out of range 0..={}",
                self.target_usage, MAX_TARGET_USAGE
            )));
        }
        Ok(())
    }
}

/// Externally supplied stream-in buffer for the finest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamIn {
    pub buffer: BufferHandle,
    /// Size in bytes.
    pub size: u32,
}

/// Per-dispatch surface inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceParameters {
    /// Current picture downscaled to the dispatched level.
    pub current: ScaledSurface,
    /// Forward references, list order.
    pub forward_refs: Vec<ReferencePicture>,
    /// Backward references, list order.
    pub backward_refs: Vec<ReferencePicture>,
    /// Stream-in target (finest level only).
    pub stream_in: Option<StreamIn>,
}

impl SurfaceParameters {
    /// Surfaces for an intra picture.
    pub fn new(current: ScaledSurface) -> Self {
        Self {
            current,
            forward_refs: Vec::new(),
            backward_refs: Vec::new(),
            stream_in: None,
        }
    }

    /// Set the reference lists.
    pub fn with_references(
        mut self,
        forward: Vec<ReferencePicture>,
        backward: Vec<ReferencePicture>,
    ) -> Self {
        self.forward_refs = forward;
        self.backward_refs = backward;
        self
    }

    /// Attach a stream-in buffer.
    pub fn with_stream_in(mut self, stream_in: StreamIn) -> Self {
        self.stream_in = Some(stream_in);
        self
    }

    /// Check that list lengths agree with the curbe counts.
    pub fn validate_against(&self, curbe: &CurbeParameters) -> Result<()> {
        if self.forward_refs.len() != curbe.forward_count() {
            return Err(MotionForgeError::InvalidInput(format!(
                "forward list has {} entries, curbe expects {}",
                self.forward_refs.len(),
                curbe.forward_count()
            )));
        }
        if self.backward_refs.len() != curbe.backward_count() {
            return Err(MotionForgeError::InvalidInput(format!(
                "backward list has {} entries, curbe expects {}",
                self.backward_refs.len(),
                curbe.backward_count()
            )));
        }
        Ok(())
    }
}

/// Macroblock-aligned frame dimensions and their per-level derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Width in pixels, multiple of 16.
    pub frame_width: u32,
    /// Height in pixels, multiple of 16.
    pub frame_height: u32,
}

impl FrameGeometry {
    /// Round `width`/`height` up to whole macroblocks.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame_width: align_up(width, MACROBLOCK_SIZE),
            frame_height: align_up(height, MACROBLOCK_SIZE),
        }
    }

    pub fn width_in_mb(&self) -> u32 {
        self.frame_width / MACROBLOCK_SIZE
    }

    /// Frame height, or field height for field pictures.
    pub fn frame_field_height(&self, structure: PictureStructure) -> u32 {
        if structure.is_field() {
            (self.frame_height + 1) >> 1
        } else {
            self.frame_height
        }
    }

    pub fn frame_field_height_in_mb(&self, structure: PictureStructure) -> u32 {
        mb_count(self.frame_field_height(structure))
    }

    /// Downscaled width in macroblocks.
    pub fn scaled_width_in_mb(&self, level: PyramidLevel) -> u32 {
        mb_count(self.frame_width / level.scale_factor())
    }

    /// Downscaled full-frame height in macroblocks.
    pub fn scaled_height_in_mb(&self, level: PyramidLevel) -> u32 {
        mb_count(self.frame_height / level.scale_factor())
    }

    /// Downscaled height of one field in macroblocks, as used for bottom-field offsets.
    pub fn scaled_field_height_in_mb(&self, level: PyramidLevel) -> u32 {
        (self.scaled_height_in_mb(level) + 1) >> 1
    }

    /// Downscaled picture height in macroblocks for the given structure.
    pub fn scaled_picture_height_in_mb(
        &self,
        level: PyramidLevel,
        structure: PictureStructure,
    ) -> u32 {
        mb_count(self.frame_field_height(structure) / level.scale_factor())
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct HmeConfig {
    /// Hardware generation; fixed for the session.
    pub generation: Generation,
    /// Input frame width in pixels.
    pub width: u32,
    /// Input frame height in pixels.
    pub height: u32,
    /// 4x level (the base of the pyramid).
    pub hme_enabled: bool,
    /// 16x level.
    pub enable_16x: bool,
    /// 32x level.
    pub enable_32x: bool,
    /// Batch several stages into one submission per phase.
    pub single_task_phase: bool,
    /// Downscaled fields are interleaved in one surface.
    pub field_scaling_output_interleaved: bool,
    /// Kernel id inside the kernel blob.
    pub kernel_id: u32,
    /// Search-path thoroughness index, 0..=7.
    pub search_thoroughness: u8,
}

impl HmeConfig {
    /// Create a configuration with default settings.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            generation: Generation::default(),
            width,
            height,
            hme_enabled: true,
            enable_16x: DEFAULT_ENABLE_16X,
            enable_32x: DEFAULT_ENABLE_32X,
            single_task_phase: DEFAULT_SINGLE_TASK_PHASE,
            field_scaling_output_interleaved: false,
            kernel_id: DEFAULT_KERNEL_ID,
            search_thoroughness: DEFAULT_SEARCH_THOROUGHNESS,
        }
    }

    /// Set the hardware generation.
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Enable or disable the whole pyramid.
    pub fn with_hme(mut self, enable: bool) -> Self {
        self.hme_enabled = enable;
        self
    }

    /// Enable or disable the 16x level.
    pub fn with_16x(mut self, enable: bool) -> Self {
        self.enable_16x = enable;
        self
    }

    /// Enable or disable the 32x level.
    pub fn with_32x(mut self, enable: bool) -> Self {
        self.enable_32x = enable;
        self
    }

    /// Set the single-phase batching policy.
    pub fn with_single_task_phase(mut self, enable: bool) -> Self {
        self.single_task_phase = enable;
        self
    }

    /// Set whether downscaled fields are interleaved.
    pub fn with_field_scaling_interleaved(mut self, enable: bool) -> Self {
        self.field_scaling_output_interleaved = enable;
        self
    }

    /// Set the kernel id.
    pub fn with_kernel_id(mut self, kernel_id: u32) -> Self {
        self.kernel_id = kernel_id;
        self
    }

    /// Set the search-path thoroughness index.
    pub fn with_search_thoroughness(mut self, index: u8) -> Self {
        self.search_thoroughness = index;
        self
    }

    /// Pick the search-path thoroughness the way the quality tier would.
    pub fn with_search_thoroughness_for_target_usage(mut self, target_usage: u8) -> Self {
        self.search_thoroughness = tables::me_method_for_target_usage(target_usage);
        self
    }

    /// Whether `level` runs in this session.
    pub fn is_enabled(&self, level: PyramidLevel) -> bool {
        match level {
            PyramidLevel::X4 => self.hme_enabled,
            PyramidLevel::X16 => self.hme_enabled && self.enable_16x,
            PyramidLevel::X32 => self.hme_enabled && self.enable_16x && self.enable_32x,
        }
    }

    /// Enabled levels, coarsest first.
    pub fn enabled_levels(&self) -> Vec<PyramidLevel> {
        PyramidLevel::ALL
            .into_iter()
            .filter(|&level| self.is_enabled(level))
            .collect()
    }

    /// Coarsest enabled level.
    pub fn coarsest_level(&self) -> Option<PyramidLevel> {
        PyramidLevel::ALL.into_iter().find(|&l| self.is_enabled(l))
    }

    /// Finest enabled level.
    pub fn finest_level(&self) -> Option<PyramidLevel> {
        PyramidLevel::ALL.into_iter().rev().find(|&l| self.is_enabled(l))
    }

    /// Whether `level` consumes the output of a coarser enabled level.
    pub fn uses_coarser_mv(&self, level: PyramidLevel) -> bool {
        self.is_enabled(level) && self.coarsest_level() != Some(level)
    }

    /// Frame geometry derived from the configured dimensions.
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MotionForgeError::InvalidConfiguration(format!(
                "frame dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_FRAME_DIMENSION || self.height > MAX_FRAME_DIMENSION {
            return Err(MotionForgeError::InvalidConfiguration(format!(
                "frame dimensions {}x{} exceed {MAX_FRAME_DIMENSION}",
                self.width, self.height
            )));
        }
        if self.enable_32x && !self.enable_16x {
            return Err(MotionForgeError::InvalidConfiguration(
                "32x requires 16x to be enabled".to_string(),
            ));
        }
        if self.search_thoroughness as usize >= tables::SEARCH_PATH_METHODS {
            return Err(MotionForgeError::InvalidConfiguration(format!(
                "search thoroughness {} out of range 0..{}",
                self.search_thoroughness,
                tables::SEARCH_PATH_METHODS
            )));
        }

        // Every enabled level must cover at least one macroblock per field.
        let geometry = self.geometry();
        for level in self.enabled_levels() {
            let scale = level.scale_factor();
            let field_height = geometry.frame_field_height(PictureStructure::TopField);
            if geometry.frame_width < scale || field_height < scale {
                return Err(MotionForgeError::InvalidConfiguration(format!(
                    "{}x{} is too small for the {} level",
                    self.width, self.height, level
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod level_tests {
        use super::*;

        #[test]
        fn test_scale_factors() {
            assert_eq!(PyramidLevel::X32.scale_factor(), 32);
            assert_eq!(PyramidLevel::X16.scale_factor(), 16);
            assert_eq!(PyramidLevel::X4.scale_factor(), 4);
        }

        #[test]
        fn test_order_is_coarsest_first() {
            assert!(PyramidLevel::X32 < PyramidLevel::X16);
            assert!(PyramidLevel::X16 < PyramidLevel::X4);
            assert_eq!(PyramidLevel::X4.coarser(), Some(PyramidLevel::X16));
            assert_eq!(PyramidLevel::X32.coarser(), None);
        }

        #[test]
        fn test_display() {
            assert_eq!(PyramidLevel::X16.to_string(), "16x");
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_default_levels() {
            let config = HmeConfig::new(1920, 1080);
            assert_eq!(
                config.enabled_levels(),
                vec![PyramidLevel::X16, PyramidLevel::X4]
            );
            assert_eq!(config.coarsest_level(), Some(PyramidLevel::X16));
            assert_eq!(config.finest_level(), Some(PyramidLevel::X4));
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_coarser_mv_usage() {
            let config = HmeConfig::new(1920, 1080).with_32x(true);
            assert!(!config.uses_coarser_mv(PyramidLevel::X32));
            assert!(config.uses_coarser_mv(PyramidLevel::X16));
            assert!(config.uses_coarser_mv(PyramidLevel::X4));

            let only_4x = HmeConfig::new(1920, 1080).with_16x(false);
            assert!(!only_4x.uses_coarser_mv(PyramidLevel::X4));
        }

        #[test]
        fn test_32x_requires_16x() {
            let config = HmeConfig::new(1920, 1080).with_16x(false).with_32x(true);
            assert!(!config.is_enabled(PyramidLevel::X32));
            assert!(config.validate().unwrap_err().is_configuration());
        }

        #[test]
        fn test_hme_disabled_has_no_levels() {
            let config = HmeConfig::new(1920, 1080).with_hme(false);
            assert!(config.enabled_levels().is_empty());
            assert_eq!(config.finest_level(), None);
        }

        #[test]
        fn test_too_small_for_32x() {
            let config = HmeConfig::new(48, 48).with_32x(true);
            assert!(config.validate().is_err());
            assert!(HmeConfig::new(48, 48).with_16x(false).validate().is_ok());
        }

        #[test]
        fn test_oversized_dimensions_rejected() {
            for (width, height) in [(u32::MAX, 1080), (1920, u32::MAX - 3), (8193, 64)] {
                let err = HmeConfig::new(width, height).validate().unwrap_err();
                assert!(err.is_configuration());
            }
            assert!(HmeConfig::new(MAX_FRAME_DIMENSION, MAX_FRAME_DIMENSION)
                .with_32x(true)
                .validate()
                .is_ok());
        }

        #[test]
        fn test_thoroughness_range() {
            assert!(HmeConfig::new(64, 64)
                .with_16x(false)
                .with_search_thoroughness(8)
                .validate()
                .is_err());
            let config = HmeConfig::new(64, 64).with_search_thoroughness_for_target_usage(7);
            assert_eq!(config.search_thoroughness, 4);
        }
    }

    mod geometry_tests {
        use super::*;

        #[test]
        fn test_macroblock_rounding() {
            let geometry = FrameGeometry::new(1920, 1080);
            assert_eq!(geometry.frame_width, 1920);
            assert_eq!(geometry.frame_height, 1088);
            assert_eq!(geometry.width_in_mb(), 120);
        }

        #[test]
        fn test_extreme_width_does_not_overflow() {
            let geometry = FrameGeometry::new(u32::MAX, 16);
            assert_eq!(geometry.frame_width % MACROBLOCK_SIZE, 0);
            assert_eq!(align_up(u32::MAX - 2, 64) % 64, 0);
        }

        #[test]
        fn test_scaled_dimensions() {
            let geometry = FrameGeometry::new(1920, 1080);
            assert_eq!(geometry.scaled_width_in_mb(PyramidLevel::X4), 30);
            assert_eq!(geometry.scaled_height_in_mb(PyramidLevel::X4), 17);
            assert_eq!(geometry.scaled_width_in_mb(PyramidLevel::X16), 8);
            assert_eq!(geometry.scaled_height_in_mb(PyramidLevel::X16), 5);
            assert_eq!(geometry.scaled_field_height_in_mb(PyramidLevel::X4), 9);
        }

        #[test]
        fn test_field_height() {
            let geometry = FrameGeometry::new(1920, 1080);
            assert_eq!(geometry.frame_field_height(PictureStructure::Frame), 1088);
            assert_eq!(geometry.frame_field_height(PictureStructure::TopField), 544);
            let height = geometry
                .scaled_picture_height_in_mb(PyramidLevel::X4, PictureStructure::BottomField);
            assert_eq!(height, 9);
        }
    }

    mod parameter_tests {
        use super::*;

        #[test]
        fn test_reference_limits() {
            let p = CurbeParameters::new(PictureCodingType::P, 26, 127).with_ref_counts(8, 0);
            assert!(p.validate().unwrap_err().is_configuration());

            let b = CurbeParameters::new(PictureCodingType::B, 26, 127).with_ref_counts(0, 2);
            assert!(b.validate().unwrap_err().is_configuration());

            // Counts on unused lists are ignored.
            let i = CurbeParameters::new(PictureCodingType::I, 26, 127).with_ref_counts(9, 9);
            assert!(i.validate().is_ok());
            assert_eq!(i.forward_count(), 0);
        }

        #[test]
        fn test_with_references_sets_parity() {
            let forward = [ReferencePicture::field(1, true), ReferencePicture::field(2, false)];
            let backward = [ReferencePicture::field(3, true)];
            let curbe = CurbeParameters::new(PictureCodingType::B, 30, 255)
                .with_structure(PictureStructure::TopField)
                .with_references(&forward, &backward);
            assert_eq!(curbe.num_ref_idx_l0_minus1, 1);
            assert_eq!(curbe.num_ref_idx_l1_minus1, 0);
            assert!(curbe.l0_bottom_field[0]);
            assert!(!curbe.l0_bottom_field[1]);
            assert!(curbe.l1_bottom_field[0]);
        }

        #[test]
        fn test_list_length_mismatch() {
            let surface = ScaledSurface {
                buffer: BufferHandle(1),
                width: 64,
                height: 64,
                pitch: 64,
                bottom_field_offset: 0,
            };
            let curbe = CurbeParameters::new(PictureCodingType::P, 26, 127).with_ref_counts(1, 0);
            let surfaces = SurfaceParameters::new(surface)
                .with_references(vec![ReferencePicture::frame(0)], Vec::new());
            assert!(matches!(
                surfaces.validate_against(&curbe),
                Err(MotionForgeError::InvalidInput(_))
            ));
        }

        #[test]
        fn test_qp_range() {
            let curbe = CurbeParameters::new(PictureCodingType::P, 52, 127);
            assert!(matches!(
                curbe.validate(),
                Err(MotionForgeError::InvalidInput(_))
            ));
        }
    }
}
