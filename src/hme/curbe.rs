//! ME constant buffer (curbe) builder.
//!
//! The kernel reads a fixed 39-dword block. Every field is packed with an
//! explicit shift/mask through [`DwordBlock`]; nothing relies on native
//! bit-field layout.

use tracing::trace;

use super::binding::slots;
use super::dwords::DwordBlock;
use super::generation::Generation;
use super::tables::{self, SEARCH_PATH_COPIED};
use super::{CurbeParameters, FrameGeometry, PictureCodingType, PyramidLevel};
use crate::error::{MotionForgeError, Result};

/// Curbe size in dwords.
pub const CURBE_DWORDS: usize = 39;

/// Curbe size in bytes.
pub const CURBE_BYTES: usize = CURBE_DWORDS * 4;

/// Hardware default block the builder starts from.
pub const CURBE_INIT: [u32; CURBE_DWORDS] = [
    0x00000000, 0x00200010, 0x00003939, 0x77a43000, 0x00000000, 0x28300000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0xffffffff, 0xffffffff, 0xffffffff, 0xffffffff, 0xffffffff, 0xffffffff, 0xffffffff,
];

/// Bidirectional weight for B pictures. The kernel does not run bi-directional
/// search, but the field must hold the neutral value.
const BI_WEIGHT: u32 = 32;

const SUB_PEL_MODE_QUARTER: u32 = 3;

/// Cost applied to stream-in candidates.
const REF_STREAM_IN_COST: u32 = 5;

/// First dword of the search-path deltas.
const SEARCH_PATH_DW: usize = 16;

/// HME step selector: 0 for the first step, 1 when refining a coarser result.
const HME_FIRST_STEP: u32 = 0;
const HME_FOLLOWING_STEP: u32 = 1;

/// A built ME curbe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeCurbe {
    block: DwordBlock<CURBE_DWORDS>,
}

impl MeCurbe {
    pub fn dwords(&self) -> &[u32; CURBE_DWORDS] {
        self.block.dwords()
    }

    /// Little-endian byte image, as loaded by the hardware.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.block.to_le_bytes()
    }

    pub fn bi_weight(&self) -> u32 {
        self.block.get_bits(1, 16, 6)
    }

    pub fn picture_height_minus1(&self) -> u32 {
        self.block.get_bits(4, 8, 8)
    }

    pub fn picture_width(&self) -> u32 {
        self.block.get_bits(4, 16, 8)
    }

    pub fn qp_prime_y(&self) -> u32 {
        self.block.get_bits(5, 8, 8)
    }

    pub fn write_distortions(&self) -> bool {
        self.block.get_bits(6, 3, 1) == 1
    }

    pub fn use_mv_from_prev_step(&self) -> bool {
        self.block.get_bits(6, 4, 1) == 1
    }

    pub fn super_combine_dist(&self) -> u32 {
        self.block.get_bits(6, 8, 8)
    }

    pub fn max_vmv_r(&self) -> u32 {
        self.block.get_bits(6, 16, 16)
    }

    pub fn num_ref_idx_l0_minus1(&self) -> u32 {
        self.block.get_bits(13, 0, 8)
    }

    pub fn num_ref_idx_l1_minus1(&self) -> u32 {
        self.block.get_bits(13, 8, 8)
    }

    /// Packed L0 (bits 0..8) and L1 (bits 8..10) field parity.
    pub fn field_parity_bits(&self) -> u32 {
        self.block.get_bits(14, 0, 10)
    }

    pub fn mv_shift_factor(&self) -> u32 {
        self.block.get_bits(15, 8, 8)
    }

    pub fn prev_mv_read_pos_factor(&self) -> u32 {
        self.block.get_bits(15, 0, 8)
    }
}

/// Session-fixed inputs to the curbe builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurbeBuilder {
    pub generation: Generation,
    pub geometry: FrameGeometry,
    /// 16x runs in this session; gates the actual-MB-size dword on Gen9.
    pub hme_16x_supported: bool,
    pub field_scaling_output_interleaved: bool,
    pub search_thoroughness: u8,
}

impl CurbeBuilder {
    /// Build the curbe for one level.
    ///
    /// `use_coarser_mv` must be true exactly when `level` is not the coarsest
    /// enabled level; `write_distortion` exactly when it is the finest.
    pub fn build(
        &self,
        level: PyramidLevel,
        curbe: &CurbeParameters,
        use_coarser_mv: bool,
        write_distortion: bool,
    ) -> Result<MeCurbe> {
        curbe.validate()?;
        let bucket = curbe.coding_type.bucket().ok_or_else(|| {
            MotionForgeError::InvalidInput("intra pictures have no motion search".to_string())
        })?;

        let mut cmd = DwordBlock::new(CURBE_INIT);
        let structure = curbe.structure;
        let scale_height = self.geometry.scaled_picture_height_in_mb(level, structure);
        let scale_width = self.geometry.scaled_width_in_mb(level);

        cmd.set_bits(3, 12, 2, SUB_PEL_MODE_QUARTER)?;
        if self.field_scaling_output_interleaved {
            cmd.set_flag(3, 6, structure.is_field())?;
            cmd.set_flag(3, 7, structure.is_field())?;
            cmd.set_flag(7, 19, structure.is_bottom_field())?;
        }

        cmd.set_bits(4, 8, 8, scale_height.saturating_sub(1))?;
        cmd.set_bits(4, 16, 8, scale_width)?;
        cmd.set_bits(5, 8, 8, curbe.qp as u32)?;
        cmd.set_flag(6, 3, write_distortion)?;
        cmd.set_bits(
            6,
            4,
            1,
            if use_coarser_mv {
                HME_FOLLOWING_STEP
            } else {
                HME_FIRST_STEP
            },
        )?;
        cmd.set_bits(6, 8, 8, tables::super_combine_dist(curbe.target_usage) as u32)?;

        let max_vmv_r = if structure.is_field() {
            (curbe.max_mv_len >> 1).saturating_mul(4)
        } else {
            curbe.max_mv_len.saturating_mul(4)
        };
        cmd.set_bits(6, 16, 16, max_vmv_r)?;

        if curbe.coding_type == PictureCodingType::B {
            cmd.set_bits(1, 16, 6, BI_WEIGHT)?;
            cmd.set_bits(13, 8, 8, curbe.num_ref_idx_l1_minus1 as u32)?;
        }
        if curbe.coding_type.uses_forward_refs() {
            if self.generation.writes_actual_mb_size() && self.hme_16x_supported {
                cmd.set_bits(30, 0, 16, self.geometry.width_in_mb())?;
                cmd.set_bits(30, 16, 16, self.geometry.frame_field_height_in_mb(structure))?;
            }
            cmd.set_bits(13, 0, 8, curbe.num_ref_idx_l0_minus1 as u32)?;
        }
        if self.generation.supports_stream_in() {
            cmd.set_bits(13, 16, 8, REF_STREAM_IN_COST)?;
            // ROI source type, not an enable.
            cmd.set_bits(13, 24, 3, 0)?;
        }

        if structure.is_field() {
            if curbe.coding_type.uses_forward_refs() {
                for (i, &bottom) in curbe.l0_bottom_field.iter().enumerate() {
                    cmd.set_flag(14, i as u32, bottom)?;
                }
            }
            if curbe.coding_type.uses_backward_refs() {
                for (i, &bottom) in curbe.l1_bottom_field.iter().enumerate() {
                    cmd.set_flag(14, 8 + i as u32, bottom)?;
                }
            }
        }

        cmd.set_bits(15, 8, 8, level.mv_shift_factor() as u32)?;
        cmd.set_bits(15, 0, 8, level.prev_mv_read_position() as u32)?;

        let path = tables::search_path(bucket, self.search_thoroughness);
        cmd.copy_from(SEARCH_PATH_DW, &path[..SEARCH_PATH_COPIED])?;

        cmd.set_bits(32, 0, 32, slots::MV_DATA)?;
        cmd.set_bits(
            33,
            0,
            32,
            if level == PyramidLevel::X32 {
                slots::MV_DATA_32X
            } else {
                slots::MV_DATA_16X
            },
        )?;
        cmd.set_bits(34, 0, 32, slots::DISTORTION)?;
        cmd.set_bits(35, 0, 32, slots::BRC_DISTORTION)?;
        cmd.set_bits(36, 0, 32, slots::CURR_FOR_FWD_REF)?;
        cmd.set_bits(37, 0, 32, slots::CURR_FOR_BWD_REF)?;
        cmd.set_bits(38, 0, 32, self.generation.stream_in_surface_index())?;

        trace!(
            "Built ME curbe: level={}, bucket={:?}, width_mb={}, height_mb={}, max_vmv_r={}",
            level,
            bucket,
            scale_width,
            scale_height,
            max_vmv_r
        );
        Ok(MeCurbe { block: cmd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hme::{KernelBucket, PictureStructure, ReferencePicture};

    fn builder(generation: Generation) -> CurbeBuilder {
        CurbeBuilder {
            generation,
            geometry: FrameGeometry::new(1920, 1080),
            hme_16x_supported: true,
            field_scaling_output_interleaved: false,
            search_thoroughness: 0,
        }
    }

    #[test]
    fn test_4x_p_frame_scenario() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 32).with_ref_counts(0, 0);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();

        assert_eq!(curbe.max_vmv_r(), 128);
        assert!(curbe.write_distortions());
        assert!(!curbe.use_mv_from_prev_step());
        assert_eq!(curbe.num_ref_idx_l0_minus1(), 0);
    }

    #[test]
    fn test_field_max_vmv_r_halves_length() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 511)
            .with_structure(PictureStructure::TopField);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();
        assert_eq!(curbe.max_vmv_r(), 255 * 4);
    }

    #[test]
    fn test_distortion_flag_follows_caller() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 127);
        let b = builder(Generation::Gen9);
        for level in PyramidLevel::ALL {
            let finest = level == PyramidLevel::X4;
            let curbe = b.build(level, &params, !finest, finest).unwrap();
            assert_eq!(curbe.write_distortions(), finest, "level {level}");
        }
    }

    #[test]
    fn test_reference_counts() {
        let p = CurbeParameters::new(PictureCodingType::P, 26, 127).with_ref_counts(3, 1);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X16, &p, false, false)
            .unwrap();
        assert_eq!(curbe.num_ref_idx_l0_minus1(), 3);
        // Backward count is only written for B pictures.
        assert_eq!(curbe.num_ref_idx_l1_minus1(), 0);
        assert_eq!(curbe.bi_weight(), 32);

        let b = CurbeParameters::new(PictureCodingType::B, 26, 127).with_ref_counts(5, 1);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X16, &b, false, false)
            .unwrap();
        assert_eq!(curbe.num_ref_idx_l0_minus1(), 5);
        assert_eq!(curbe.num_ref_idx_l1_minus1(), 1);
        assert_eq!(curbe.bi_weight(), 32);
    }

    #[test]
    fn test_level_constants() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 127);
        let b = builder(Generation::Gen9);

        let c32 = b.build(PyramidLevel::X32, &params, false, false).unwrap();
        assert_eq!(c32.mv_shift_factor(), 1);
        assert_eq!(c32.prev_mv_read_pos_factor(), 0);

        let c16 = b.build(PyramidLevel::X16, &params, true, false).unwrap();
        assert_eq!(c16.mv_shift_factor(), 2);
        assert_eq!(c16.prev_mv_read_pos_factor(), 1);
        assert!(c16.use_mv_from_prev_step());
    }

    #[test]
    fn test_picture_size_in_scaled_macroblocks() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 127);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();
        // 1920x1088 at 1/4 is 480x272, i.e. 30x17 macroblocks.
        assert_eq!(curbe.picture_width(), 30);
        assert_eq!(curbe.picture_height_minus1(), 16);
        assert_eq!(curbe.dwords()[30], (68 << 16) | 120);
    }

    #[test]
    fn test_field_parity_only_for_fields() {
        let forward = [ReferencePicture::field(0, true), ReferencePicture::field(1, false)];
        let backward = [ReferencePicture::field(2, true)];
        let field = CurbeParameters::new(PictureCodingType::B, 26, 127)
            .with_structure(PictureStructure::BottomField)
            .with_references(&forward, &backward);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &field, false, true)
            .unwrap();
        assert_eq!(curbe.field_parity_bits(), 0b01_0000_0001);

        let frame = field.clone().with_structure(PictureStructure::Frame);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &frame, false, true)
            .unwrap();
        assert_eq!(curbe.field_parity_bits(), 0);

        // P pictures never carry L1 parity.
        let mut p = field.clone();
        p.coding_type = PictureCodingType::P;
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &p, false, true)
            .unwrap();
        assert_eq!(curbe.field_parity_bits(), 0b0000_0001);
    }

    #[test]
    fn test_search_path_copied() {
        let params = CurbeParameters::new(PictureCodingType::B, 26, 127);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();
        let path = tables::search_path(KernelBucket::BiPredicted, 0);
        assert_eq!(&curbe.dwords()[16..30], &path[..14]);
    }

    #[test]
    fn test_exact_dwords_gen9_p_frame() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 32).with_target_usage(4);
        let curbe = builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();
        let dw = curbe.dwords();
        assert_eq!(dw[0], 0x0000_0000);
        assert_eq!(dw[1], 0x0020_0010);
        assert_eq!(dw[3], 0x77a4_3000);
        assert_eq!(dw[4], (30 << 16) | (16 << 8));
        assert_eq!(dw[5], 0x2830_1a00);
        assert_eq!(dw[6], (128 << 16) | (5 << 8) | (1 << 3));
        assert_eq!(dw[13], 5 << 16);
        assert_eq!(dw[15], 2 << 8);
        assert_eq!(&dw[32..], &[0, 1, 2, 3, 5, 22, 26]);

        let bytes = curbe.to_bytes();
        assert_eq!(bytes.len(), CURBE_BYTES);
        assert_eq!(&bytes[24..28], &[0x08, 0x05, 0x80, 0x00]);
    }

    #[test]
    fn test_gen8_differences() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 127);
        let curbe = builder(Generation::Gen8)
            .build(PyramidLevel::X4, &params, false, true)
            .unwrap();
        assert_eq!(curbe.dwords()[38], 0);
        assert_eq!(curbe.dwords()[30], 0);
        assert_eq!(curbe.dwords()[13] >> 16, 0);
    }

    #[test]
    fn test_interleaved_field_access_bits() {
        let mut b = builder(Generation::Gen9);
        b.field_scaling_output_interleaved = true;
        let params = CurbeParameters::new(PictureCodingType::P, 26, 127)
            .with_structure(PictureStructure::BottomField);
        let curbe = b.build(PyramidLevel::X4, &params, false, true).unwrap();
        assert_eq!(curbe.dwords()[3] & 0xC0, 0xC0);
        assert_eq!(curbe.dwords()[7] & (1 << 19), 1 << 19);
    }

    #[test]
    fn test_intra_rejected() {
        let params = CurbeParameters::new(PictureCodingType::I, 26, 127);
        assert!(builder(Generation::Gen9)
            .build(PyramidLevel::X4, &params, false, true)
            .is_err());
    }

    #[test]
    fn test_oversized_mv_len_rejected() {
        let params = CurbeParameters::new(PictureCodingType::P, 26, 1 << 14);
        assert!(matches!(
            builder(Generation::Gen9).build(PyramidLevel::X4, &params, false, true),
            Err(MotionForgeError::InvalidInput(_))
        ));

        for structure in [PictureStructure::TopField, PictureStructure::BottomField] {
            for max_mv_len in [1 << 15, u32::MAX] {
                let params = CurbeParameters::new(PictureCodingType::P, 26, max_mv_len)
                    .with_structure(structure);
                assert!(matches!(
                    builder(Generation::Gen9).build(PyramidLevel::X4, &params, false, true),
                    Err(MotionForgeError::InvalidInput(_))
                ));
            }
        }
    }
}
