//! Command-stream block encoding.
//!
//! Every block starts with a header dword `opcode << 16 | (len - 1)`, where
//! `len` counts the header. `MI_BATCH_BUFFER_END` fits the same scheme as a
//! one-dword block.

use super::binding::BindingEntry;
use super::curbe::{MeCurbe, CURBE_DWORDS};
use super::dispatch::DispatchGrid;
use super::kernel::KernelStateEntry;
use crate::device::MI_BATCH_BUFFER_END;
use crate::error::{MotionForgeError, Result};

pub const OPCODE_BATCH_BUFFER_END: u16 = (MI_BATCH_BUFFER_END >> 16) as u16;
pub const OPCODE_CURBE_LOAD: u16 = 0x7001;
pub const OPCODE_INTERFACE_DESCRIPTOR_LOAD: u16 = 0x7002;
pub const OPCODE_MEDIA_OBJECT_WALKER: u16 = 0x7103;
pub const OPCODE_SURFACE_STATE: u16 = 0x7810;

pub const INTERFACE_DESCRIPTOR_DWORDS: usize = 7;
pub const CURBE_LOAD_DWORDS: usize = CURBE_DWORDS + 1;
pub const SURFACE_STATE_DWORDS: usize = 8;
pub const MEDIA_WALKER_DWORDS: usize = 4;

/// Upper bound on the dwords one level writes, including the batch-buffer end.
pub fn level_dwords_upper_bound(binding_table_count: u32) -> usize {
    INTERFACE_DESCRIPTOR_DWORDS
        + CURBE_LOAD_DWORDS
        + binding_table_count as usize * SURFACE_STATE_DWORDS
        + MEDIA_WALKER_DWORDS
        + 1
}

fn header(opcode: u16, len: usize) -> u32 {
    ((opcode as u32) << 16) | (len as u32 - 1)
}

/// Load the kernel's interface descriptor.
pub fn interface_descriptor(entry: &KernelStateEntry) -> [u32; INTERFACE_DESCRIPTOR_DWORDS] {
    [
        header(OPCODE_INTERFACE_DESCRIPTOR_LOAD, INTERFACE_DESCRIPTOR_DWORDS),
        entry.bucket.index() as u32,
        entry.program_offset,
        entry.program_size,
        entry.binding_table_count,
        entry.binding_table_size,
        entry.curbe_length,
    ]
}

/// Load the constant buffer.
pub fn curbe_load(curbe: &MeCurbe) -> [u32; CURBE_LOAD_DWORDS] {
    let mut block = [0u32; CURBE_LOAD_DWORDS];
    block[0] = header(OPCODE_CURBE_LOAD, CURBE_LOAD_DWORDS);
    block[1..].copy_from_slice(curbe.dwords());
    block
}

/// Describe one binding-table entry.
///
/// DW1 packs the slot (bits 0..7), surface kind (8..11), writable flag (12)
/// and vertical direction (16..17).
pub fn surface_state(entry: &BindingEntry) -> [u32; SURFACE_STATE_DWORDS] {
    [
        header(OPCODE_SURFACE_STATE, SURFACE_STATE_DWORDS),
        entry.slot
            | (entry.kind.code() << 8)
            | ((entry.writable as u32) << 12)
            | (entry.vdirection.value() << 16),
        entry.buffer.map_or(0, |b| b.raw()),
        entry.offset,
        entry.width,
        entry.height,
        entry.pitch,
        entry.size,
    ]
}

/// Launch the thread grid, one thread per downscaled macroblock.
pub fn media_walker(grid: &DispatchGrid) -> [u32; MEDIA_WALKER_DWORDS] {
    [
        header(OPCODE_MEDIA_OBJECT_WALKER, MEDIA_WALKER_DWORDS),
        grid.width,
        grid.height,
        grid.thread_count(),
    ]
}

/// One decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBlock {
    pub opcode: u16,
    /// Dwords after the header.
    pub payload: Vec<u32>,
}

/// Split a dword stream back into blocks.
pub fn split_blocks(dwords: &[u32]) -> Result<Vec<CommandBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < dwords.len() {
        let head = dwords[pos];
        let len = (head & 0xFFFF) as usize + 1;
        let payload = dwords.get(pos + 1..pos + len).ok_or_else(|| {
            MotionForgeError::CommandStream(format!(
                "block at dword {pos} claims {len} dwords, {} remain",
                dwords.len() - pos
            ))
        })?;
        blocks.push(CommandBlock {
            opcode: (head >> 16) as u16,
            payload: payload.to_vec(),
        });
        pos += len;
    }
    Ok(blocks)
}
