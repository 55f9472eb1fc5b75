//! Hardware-generation strategy.
//!
//! A session picks one generation at setup. Each generation exposes the four
//! per-level steps the dispatch driver sequences: kernel-state selection,
//! curbe construction, surface binding and grid computation.

use std::fmt;

use super::binding::{BindingTable, LevelBuffers, SurfaceBinder};
use super::curbe::{CurbeBuilder, MeCurbe};
use super::dispatch::DispatchGrid;
use super::kernel::{KernelStateCache, KernelStateEntry};
use super::{
    binding, CurbeParameters, FrameGeometry, HmeConfig, PictureCodingType, PictureStructure,
    PyramidLevel, SurfaceParameters,
};
use crate::device::CommandStream;
use crate::error::{MotionForgeError, Result};
use crate::tracking::ReferenceTracker;

/// Supported hardware generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Generation {
    /// Broadwell-class media engine.
    Gen8,
    /// Skylake-class media engine with stream-in support.
    #[default]
    Gen9,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gen8 => write!(f, "Gen8"),
            Self::Gen9 => write!(f, "Gen9"),
        }
    }
}

impl Generation {
    /// Whether the finest level can write encoder stream-in hints.
    pub fn supports_stream_in(self) -> bool {
        matches!(self, Self::Gen9)
    }

    /// Whether the curbe carries the full-resolution MB dimensions.
    pub fn writes_actual_mb_size(self) -> bool {
        matches!(self, Self::Gen9)
    }

    /// Value of the stream-in binding-index dword.
    pub fn stream_in_surface_index(self) -> u32 {
        match self {
            Self::Gen8 => 0,
            Self::Gen9 => binding::slots::STREAM_IN,
        }
    }

    /// Kernel state for the picture's coding-type bucket.
    pub fn select_kernel_state(
        self,
        cache: &mut KernelStateCache,
        coding_type: PictureCodingType,
    ) -> Result<KernelStateEntry> {
        let bucket = coding_type.bucket().ok_or_else(|| {
            MotionForgeError::InvalidInput("intra pictures have no ME kernel".to_string())
        })?;
        cache.get_or_create(bucket)
    }

    /// Curbe for `level` under the session configuration.
    pub fn build_curbe(
        self,
        config: &HmeConfig,
        level: PyramidLevel,
        curbe: &CurbeParameters,
    ) -> Result<MeCurbe> {
        let builder = CurbeBuilder {
            generation: self,
            geometry: config.geometry(),
            hme_16x_supported: config.is_enabled(PyramidLevel::X16),
            field_scaling_output_interleaved: config.field_scaling_output_interleaved,
            search_thoroughness: config.search_thoroughness,
        };
        builder.build(
            level,
            curbe,
            config.uses_coarser_mv(level),
            config.finest_level() == Some(level),
        )
    }

    /// Bind every surface of `level`.
    ///
    /// Stream-in is accepted only at the finest level of a generation that
    /// supports it.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_surfaces(
        self,
        level: PyramidLevel,
        is_finest: bool,
        structure: PictureStructure,
        surfaces: &SurfaceParameters,
        buffers: &LevelBuffers<'_>,
        stream: &mut CommandStream,
        kernel: &KernelStateEntry,
        tracker: &dyn ReferenceTracker,
    ) -> Result<BindingTable> {
        if surfaces.stream_in.is_some() {
            if !self.supports_stream_in() {
                return Err(MotionForgeError::Unsupported(format!(
                    "{self} has no ME stream-in"
                )));
            }
            if !is_finest {
                return Err(MotionForgeError::InvalidInput(format!(
                    "stream-in supplied at {level}, only the finest level writes it"
                )));
            }
        }
        SurfaceBinder::new(level, structure).bind(surfaces, buffers, stream, kernel, tracker)
    }

    /// Thread grid covering the downscaled picture, one thread per macroblock.
    pub fn dispatch_grid(
        self,
        geometry: &FrameGeometry,
        level: PyramidLevel,
        structure: PictureStructure,
    ) -> DispatchGrid {
        DispatchGrid {
            width: geometry.scaled_width_in_mb(level),
            height: geometry.scaled_picture_height_in_mb(level, structure),
        }
    }
}
