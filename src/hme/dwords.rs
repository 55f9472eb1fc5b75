//! Fixed-size dword block with explicit bit-field packing.

use crate::error::{MotionForgeError, Result};

/// A block of `N` little-endian 32-bit words written field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DwordBlock<const N: usize> {
    dwords: [u32; N],
}

impl<const N: usize> DwordBlock<N> {
    pub fn new(init: [u32; N]) -> Self {
        Self { dwords: init }
    }

    /// Write `value` into bits `lsb..lsb + width` of dword `dw`.
    ///
    /// Values wider than the field are rejected rather than truncated.
    pub fn set_bits(&mut self, dw: usize, lsb: u32, width: u32, value: u32) -> Result<()> {
        debug_assert!(width > 0 && lsb + width <= 32);
        let mask = if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        if value & !mask != 0 {
            return Err(MotionForgeError::InvalidInput(format!(
                "value {value:#x} does not fit DW{dw} bits {lsb}..{}",
                lsb + width
            )));
        }
        let word = self.dwords.get_mut(dw).ok_or_else(|| {
            MotionForgeError::InvalidInput(format!("DW{dw} outside a {N}-dword block"))
        })?;
        *word = (*word & !(mask << lsb)) | (value << lsb);
        Ok(())
    }

    /// Write a single-bit flag.
    pub fn set_flag(&mut self, dw: usize, bit: u32, on: bool) -> Result<()> {
        self.set_bits(dw, bit, 1, on as u32)
    }

    /// Read bits `lsb..lsb + width` of dword `dw`.
    pub fn get_bits(&self, dw: usize, lsb: u32, width: u32) -> u32 {
        let mask = if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        (self.dwords[dw] >> lsb) & mask
    }

    /// Overwrite whole dwords starting at `start`.
    pub fn copy_from(&mut self, start: usize, words: &[u32]) -> Result<()> {
        let end = start + words.len();
        let target = self.dwords.get_mut(start..end).ok_or_else(|| {
            MotionForgeError::InvalidInput(format!("DW{start}..DW{end} outside a {N}-dword block"))
        })?;
        target.copy_from_slice(words);
        Ok(())
    }

    pub fn dwords(&self) -> &[u32; N] {
        &self.dwords
    }

    /// Serialize as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.dwords.iter().flat_map(|d| d.to_le_bytes()).collect()
    }
}
