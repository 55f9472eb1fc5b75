//! Read-only lookup tables for the ME constant buffer.

use super::KernelBucket;

/// Search-path rows per bucket.
pub const SEARCH_PATH_METHODS: usize = 8;

/// Dwords per search-path row.
pub const SEARCH_PATH_LEN: usize = 16;

/// Leading dwords of a row that the curbe carries.
pub const SEARCH_PATH_COPIED: usize = 14;

type SearchPath = [u32; SEARCH_PATH_LEN];

const PATH_DIAMOND: SearchPath = [
    0x120FF10F, 0x1E22E20D, 0x20E2FF10, 0x2EDD06FC, 0x11D33FF1, 0xEB1FF33D, 0x4EF1F1F1, 0xF1F21211,
    0x0DFFFFE0, 0x11201F1F, 0x1105F1CF, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
];

const PATH_NONE: SearchPath = [0; SEARCH_PATH_LEN];

const PATH_RASTER: SearchPath = [
    0x01010101, 0x11010101, 0x01010101, 0x11010101, 0x01010101, 0x11010101, 0x01010101, 0x11010101,
    0x01010101, 0x11010101, 0x01010101, 0x00010101, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
];

const PATH_SPIRAL: SearchPath = [
    0x0101F00F, 0x0F0F1010, 0xF0F0F00F, 0x01010101, 0x10101010, 0x0F0F0F0F, 0xF0F0F00F, 0x0101F0F0,
    0x01010101, 0x10101010, 0x0F0F1010, 0x0F0F0F0F, 0xF0F0F00F, 0xF0F0F0F0, 0x00000000, 0x00000000,
];

const PATH_WIDE: SearchPath = [
    0x1F11F10F, 0x2E22E2FE, 0x20E220DF, 0x2EDD06FC, 0x11D33FF1, 0xEB1FF33D, 0x02F1F1F1, 0x1F201111,
    0xF1EFFF0C, 0xF01104F1, 0x10FF0A50, 0x000FF1C0, 0x00000000, 0x00000000, 0x00000000, 0x00000000,
];

/// Search paths indexed by `[bucket][thoroughness]`.
pub const SEARCH_PATHS: [[SearchPath; SEARCH_PATH_METHODS]; 2] = [
    // P
    [
        PATH_DIAMOND,
        PATH_DIAMOND,
        PATH_NONE,
        PATH_RASTER,
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_DIAMOND,
        PATH_WIDE,
    ],
    // B
    [
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_SPIRAL,
        PATH_DIAMOND,
        PATH_WIDE,
    ],
];

/// Super-combine distance per target usage.
pub const SUPER_COMBINE_DIST: [u8; 9] = [0, 1, 1, 5, 5, 5, 9, 9, 0];

/// Search-path thoroughness per target usage.
pub const ME_METHOD: [u8; 9] = [0, 4, 4, 6, 6, 6, 6, 4, 7];

/// Search path row for `bucket` at `thoroughness` (clamped to the table).
pub fn search_path(bucket: KernelBucket, thoroughness: u8) -> &'static SearchPath {
    let method = (thoroughness as usize).min(SEARCH_PATH_METHODS - 1);
    &SEARCH_PATHS[bucket.index()][method]
}

pub fn super_combine_dist(target_usage: u8) -> u8 {
    SUPER_COMBINE_DIST[(target_usage as usize).min(SUPER_COMBINE_DIST.len() - 1)]
}

pub fn me_method_for_target_usage(target_usage: u8) -> u8 {
    ME_METHOD[(target_usage as usize).min(ME_METHOD.len() - 1)]
}

/// Maximum vertical MV length for an AVC `level_idc` (Annex A, Table A-1).
///
/// Unknown levels fall back to 127.
pub fn max_mv_len_for_level(level_idc: u8) -> u32 {
    match level_idc {
        9 | 10 => 63,
        11 | 12 | 13 | 20 => 127,
        21 | 22 | 30 => 255,
        31 | 32 | 40 | 41 | 42 | 50 | 51 | 52 => 511,
        _ => 127,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thoroughness_zero_rows() {
        assert_eq!(search_path(KernelBucket::Predicted, 0)[0], 0x120FF10F);
        assert_eq!(search_path(KernelBucket::BiPredicted, 0)[0], 0x0101F00F);
    }

    #[test]
    fn test_copied_prefix_covers_all_data() {
        for bucket in SEARCH_PATHS.iter() {
            for row in bucket.iter() {
                assert!(row[SEARCH_PATH_COPIED..].iter().all(|&d| d == 0));
            }
        }
    }

    #[test]
    fn test_target_usage_tables() {
        assert_eq!(super_combine_dist(0), 0);
        assert_eq!(super_combine_dist(4), 5);
        assert_eq!(super_combine_dist(7), 9);
        assert_eq!(me_method_for_target_usage(1), 4);
        assert_eq!(me_method_for_target_usage(3), 6);
    }

    #[test]
    fn test_max_mv_len() {
        assert_eq!(max_mv_len_for_level(10), 63);
        assert_eq!(max_mv_len_for_level(9), 63);
        assert_eq!(max_mv_len_for_level(20), 127);
        assert_eq!(max_mv_len_for_level(30), 255);
        assert_eq!(max_mv_len_for_level(41), 511);
        assert_eq!(max_mv_len_for_level(99), 127);
    }
}
