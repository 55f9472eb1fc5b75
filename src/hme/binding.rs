//! Surface binding for one ME level.
//!
//! The binder resolves every surface the kernel touches, fills a binding
//! entry for it and writes the matching `SURFACE_STATE` block into the command
//! stream. Output is a pure function of its inputs; binding the same level
//! twice produces identical streams.

use tracing::{debug, warn};

use super::commands;
use super::kernel::KernelStateEntry;
use super::pool::WorkingBuffer;
use super::{PictureStructure, PyramidLevel, ReferencePicture, SurfaceParameters};
use crate::device::{BufferHandle, CommandStream};
use crate::error::{MotionForgeError, Result};
use crate::tracking::{ReferenceTracker, ScaledSurface};

/// Binding-table slot layout shared by the curbe and the binder.
pub mod slots {
    /// Output MV buffer.
    pub const MV_DATA: u32 = 0;
    /// Coarser-level MV input at 16x (the 32x output).
    pub const MV_DATA_32X: u32 = 1;
    /// Coarser-level MV input at 4x (the 16x output).
    pub const MV_DATA_16X: u32 = 1;
    pub const DISTORTION: u32 = 2;
    pub const BRC_DISTORTION: u32 = 3;
    /// Current picture paired with the forward references.
    pub const CURR_FOR_FWD_REF: u32 = 5;
    pub const FWD_REF: [u32; 8] = [6, 8, 10, 12, 14, 16, 18, 20];
    /// Current picture paired with the backward references.
    pub const CURR_FOR_BWD_REF: u32 = 22;
    pub const BWD_REF: [u32; 2] = [23, 25];
    pub const STREAM_IN: u32 = 26;
    /// Binding-table entries the kernel declares.
    pub const NUM_SURFACES: u32 = 27;
}

/// Vertical access direction of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VDirection {
    Frame,
    TopField,
    BottomField,
}

impl VDirection {
    /// Hardware encoding.
    pub fn value(self) -> u32 {
        match self {
            Self::TopField => 1,
            Self::Frame => 2,
            Self::BottomField => 3,
        }
    }

    fn of(structure: PictureStructure) -> Self {
        match structure {
            PictureStructure::Frame => Self::Frame,
            PictureStructure::TopField => Self::TopField,
            PictureStructure::BottomField => Self::BottomField,
        }
    }
}

/// How the kernel accesses a bound surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Unused slot.
    Null,
    /// 2-D data buffer read or written by media block messages.
    Media2d,
    /// Picture sampled by the motion-search engine.
    Vme,
    /// Linear buffer.
    Linear,
}

impl SurfaceKind {
    pub fn code(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Media2d => 1,
            Self::Vme => 2,
            Self::Linear => 3,
        }
    }
}

/// One binding-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEntry {
    pub slot: u32,
    /// Bound allocation; `None` for placeholders.
    pub buffer: Option<BufferHandle>,
    pub kind: SurfaceKind,
    /// Byte offset into the allocation.
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    /// Size in bytes, linear buffers only.
    pub size: u32,
    pub writable: bool,
    pub vdirection: VDirection,
}

impl BindingEntry {
    /// Entry that keeps `slot` occupied without a surface behind it.
    pub fn placeholder(slot: u32) -> Self {
        Self {
            slot,
            buffer: None,
            kind: SurfaceKind::Null,
            offset: 0,
            width: 0,
            height: 0,
            pitch: 0,
            size: 0,
            writable: false,
            vdirection: VDirection::Frame,
        }
    }

    /// A working buffer, limited to one field's rows for field pictures.
    fn working(
        slot: u32,
        buffer: &WorkingBuffer,
        structure: PictureStructure,
        writable: bool,
    ) -> Self {
        Self {
            slot,
            buffer: Some(buffer.handle),
            kind: SurfaceKind::Media2d,
            offset: if structure.is_bottom_field() {
                buffer.bottom_field_offset
            } else {
                0
            },
            width: buffer.width,
            height: buffer.bound_height(structure),
            pitch: buffer.pitch,
            size: 0,
            writable,
            vdirection: VDirection::Frame,
        }
    }

    /// A motion-search picture. References borrow the current picture's
    /// dimensions so every VME slot shares one layout.
    fn vme(
        slot: u32,
        buffer: BufferHandle,
        layout: &ScaledSurface,
        bottom: bool,
        vdirection: VDirection,
    ) -> Self {
        Self {
            slot,
            buffer: Some(buffer),
            kind: SurfaceKind::Vme,
            offset: if bottom { layout.bottom_field_offset } else { 0 },
            width: layout.width,
            height: layout.height,
            pitch: layout.pitch,
            size: 0,
            writable: false,
            vdirection,
        }
    }
}

/// Working buffers the driver resolved for one level.
#[derive(Debug, Clone, Copy)]
pub struct LevelBuffers<'a> {
    pub mv_output: &'a WorkingBuffer,
    /// Output of the next coarser enabled level.
    pub coarser_mv: Option<&'a WorkingBuffer>,
    /// ME distortion, finest level only.
    pub distortion: Option<&'a WorkingBuffer>,
    /// Rate-control distortion, finest level with rate-control assist only.
    pub brc_distortion: Option<&'a WorkingBuffer>,
}

/// Entries written for one level, in write order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingTable {
    entries: Vec<BindingEntry>,
}

impl BindingTable {
    pub fn get(&self, slot: u32) -> Option<&BindingEntry> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }

    /// Entries backed by a real surface.
    pub fn bound_count(&self) -> usize {
        self.entries.iter().filter(|e| e.buffer.is_some()).count()
    }
}

/// Binds the surfaces of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceBinder {
    pub level: PyramidLevel,
    pub structure: PictureStructure,
}

impl SurfaceBinder {
    pub fn new(level: PyramidLevel, structure: PictureStructure) -> Self {
        Self { level, structure }
    }

    /// Resolve and write every binding for this level.
    pub fn bind(
        &self,
        surfaces: &SurfaceParameters,
        buffers: &LevelBuffers<'_>,
        stream: &mut CommandStream,
        kernel: &KernelStateEntry,
        tracker: &dyn ReferenceTracker,
    ) -> Result<BindingTable> {
        let mut table = BindingTable::default();
        let bottom = self.structure.is_bottom_field();
        let mut write = |entry: BindingEntry| -> Result<()> {
            if entry.slot >= kernel.binding_table_count {
                return Err(MotionForgeError::KernelConfiguration(format!(
                    "slot {} outside a {}-entry binding table",
                    entry.slot, kernel.binding_table_count
                )));
            }
            stream.append(&commands::surface_state(&entry))?;
            table.entries.push(entry);
            Ok(())
        };

        let structure = self.structure;
        write(BindingEntry::working(slots::MV_DATA, buffers.mv_output, structure, true))?;

        write(match buffers.coarser_mv {
            Some(coarser) => BindingEntry::working(slots::MV_DATA_16X, coarser, structure, false),
            None => BindingEntry::placeholder(slots::MV_DATA_16X),
        })?;

        // Stream-in takes the distortion output's place.
        write(match (buffers.distortion, surfaces.stream_in) {
            (Some(distortion), None) => {
                BindingEntry::working(slots::DISTORTION, distortion, structure, true)
            }
            _ => BindingEntry::placeholder(slots::DISTORTION),
        })?;
        if let Some(brc) = buffers.brc_distortion {
            write(BindingEntry::working(slots::BRC_DISTORTION, brc, structure, true))?;
        }

        let current = &surfaces.current;
        let current_vdirection = VDirection::of(self.structure);
        if self.resolves(surfaces.forward_refs.first(), tracker) {
            write(BindingEntry::vme(
                slots::CURR_FOR_FWD_REF,
                current.buffer,
                current,
                bottom,
                current_vdirection,
            ))?;
        }
        if self.resolves(surfaces.backward_refs.first(), tracker) {
            write(BindingEntry::vme(
                slots::CURR_FOR_BWD_REF,
                current.buffer,
                current,
                bottom,
                current_vdirection,
            ))?;
        }

        let lists = [
            (&surfaces.forward_refs, &slots::FWD_REF[..], "L0"),
            (&surfaces.backward_refs, &slots::BWD_REF[..], "L1"),
        ];
        for (refs, list_slots, list) in lists {
            for (index, (reference, &slot)) in refs.iter().zip(list_slots).enumerate() {
                let Some(surface) = self.resolve(reference, tracker, list, index) else {
                    continue;
                };
                let vdirection = if self.structure.is_field() {
                    VDirection::of(reference.structure)
                } else {
                    VDirection::Frame
                };
                write(BindingEntry::vme(
                    slot,
                    surface.buffer,
                    current,
                    reference.structure.is_bottom_field(),
                    vdirection,
                ))?;
            }
        }

        if let Some(stream_in) = surfaces.stream_in {
            write(BindingEntry {
                slot: slots::STREAM_IN,
                buffer: Some(stream_in.buffer),
                kind: SurfaceKind::Linear,
                offset: 0,
                width: 0,
                height: 0,
                pitch: 0,
                size: stream_in.size,
                writable: true,
                vdirection: VDirection::Frame,
            })?;
        }

        debug!(
            "Bound {} surfaces for {} ({} placeholders)",
            table.bound_count(),
            self.level,
            table.entries.len() - table.bound_count()
        );
        Ok(table)
    }

    fn resolves(
        &self,
        reference: Option<&ReferencePicture>,
        tracker: &dyn ReferenceTracker,
    ) -> bool {
        reference.is_some_and(|r| tracker.scaling_slot(r.frame_idx).is_some())
    }

    fn resolve(
        &self,
        reference: &ReferencePicture,
        tracker: &dyn ReferenceTracker,
        list: &str,
        index: usize,
    ) -> Option<ScaledSurface> {
        let Some(slot) = tracker.scaling_slot(reference.frame_idx) else {
            debug!(
                "{}[{}] frame_idx={} is not a valid reference, skipping",
                list, index, reference.frame_idx
            );
            return None;
        };
        let surface = tracker.scaled_surface(slot, self.level);
        if surface.is_none() {
            warn!(
                "{}[{}] frame_idx={} has no {} surface in scaling slot {}, skipping",
                list, index, reference.frame_idx, self.level, slot
            );
        }
        surface
    }
}
