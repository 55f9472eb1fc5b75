//! Per-level dispatch driver.
//!
//! `HmeDispatcher` owns the session state (working-buffer pool, kernel-state
//! cache, device handle and any open batched command stream) and sequences one
//! pyramid level at a time:
//!
//! ```text
//! Idle -> KernelSelected -> CurbeBuilt -> SurfacesBound -> GridComputed
//!      -> Dispatched -> Batched | Submitted
//! ```
//!
//! Levels of a frame must be dispatched coarsest first, each exactly once.

use std::fmt;

use tracing::{debug, info, warn};

use super::binding::{BindingTable, LevelBuffers};
use super::commands;
use super::kernel::{KernelStateCache, KernelStateEntry};
use super::pool::{BufferSpec, WorkingBufferId, WorkingBufferPool};
use super::{
    CurbeParameters, FrameGeometry, HmeConfig, PictureStructure, PyramidLevel, SurfaceParameters,
};
use crate::device::{CommandStream, Device};
use crate::error::{MotionForgeError, Result};
use crate::tracking::ReferenceTracker;

/// Thread grid of one level, in downscaled macroblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub width: u32,
    pub height: u32,
}

impl DispatchGrid {
    pub fn thread_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Progress of a single level dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    KernelSelected,
    CurbeBuilt,
    SurfacesBound,
    GridComputed,
    Dispatched,
    /// Recorded into an open stream that a later level submits.
    Batched,
    /// Stream closed and handed to the device.
    Submitted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one successful level dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub level: PyramidLevel,
    pub grid: DispatchGrid,
    pub bindings: BindingTable,
    /// `Batched` or `Submitted`.
    pub state: DispatchState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameProgress {
    structure: PictureStructure,
    /// Next level due, `None` once the pyramid is complete.
    next: Option<PyramidLevel>,
}

/// Drives the ME kernels of one encode session.
pub struct HmeDispatcher<D: Device> {
    config: HmeConfig,
    geometry: FrameGeometry,
    device: D,
    pool: WorkingBufferPool,
    kernels: KernelStateCache,
    open_stream: Option<CommandStream>,
    frame: Option<FrameProgress>,
    state: DispatchState,
    transitions: Vec<DispatchState>,
}

impl<D: Device> HmeDispatcher<D> {
    /// Create a dispatcher for a validated configuration.
    pub fn new(config: HmeConfig, device: D, kernel_blob: Vec<u8>) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating HME dispatcher: generation={}, {}x{}, levels={:?}, single_task_phase={}",
            config.generation,
            config.width,
            config.height,
            config.enabled_levels(),
            config.single_task_phase
        );
        Ok(Self {
            geometry: config.geometry(),
            kernels: KernelStateCache::new(kernel_blob, config.kernel_id),
            config,
            device,
            pool: WorkingBufferPool::new(),
            open_stream: None,
            frame: None,
            state: DispatchState::Idle,
            transitions: Vec::new(),
        })
    }

    pub fn config(&self) -> &HmeConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pool(&self) -> &WorkingBufferPool {
        &self.pool
    }

    pub fn kernels(&self) -> &KernelStateCache {
        &self.kernels
    }

    /// State reached by the most recent dispatch.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// States visited by the most recent dispatch, starting at `Idle`.
    pub fn transitions(&self) -> &[DispatchState] {
        &self.transitions
    }

    /// Whether a batched phase is waiting for its last task.
    pub fn has_open_phase(&self) -> bool {
        self.open_stream.is_some()
    }

    /// Start a new frame. The next dispatch must be the coarsest enabled level.
    pub fn begin_frame(&mut self, structure: PictureStructure) {
        if let Some(FrameProgress {
            next: Some(level), ..
        }) = self.frame
        {
            debug!("Previous frame abandoned before {}", level);
        }
        self.frame = Some(FrameProgress {
            structure,
            next: self.config.coarsest_level(),
        });
    }

    /// Dispatch one pyramid level of the current frame.
    pub fn dispatch_level(
        &mut self,
        level: PyramidLevel,
        curbe: &CurbeParameters,
        surfaces: &SurfaceParameters,
        tracker: &dyn ReferenceTracker,
        last_task_in_phase: bool,
    ) -> Result<DispatchOutcome> {
        self.state = DispatchState::Idle;
        self.transitions.clear();
        self.transitions.push(DispatchState::Idle);

        if self.device.was_reset() {
            return Err(self.recover_from_reset());
        }
        self.check_order(level, curbe)?;
        curbe.validate()?;
        surfaces.validate_against(curbe)?;

        let kernel = self
            .config
            .generation
            .select_kernel_state(&mut self.kernels, curbe.coding_type)?;
        self.advance(level, DispatchState::KernelSelected);

        let needed = commands::level_dwords_upper_bound(kernel.binding_table_count);
        let mut stream = match self.open_stream.take() {
            Some(open) if open.has_space(needed) => open,
            Some(open) => {
                let available = open.remaining();
                self.open_stream = Some(open);
                return Err(MotionForgeError::CommandStreamExhausted { needed, available });
            }
            None => self.device.acquire_command_stream(needed)?,
        };
        let start = stream.len();

        let (grid, bindings) =
            match self.record_level(&mut stream, level, &kernel, curbe, surfaces, tracker) {
                Ok(recorded) => recorded,
                Err(e) => {
                    // Earlier levels of a batched phase stay intact.
                    if start > 0 {
                        stream.rewind(start);
                        self.open_stream = Some(stream);
                    }
                    return Err(e);
                }
            };

        let state = if self.config.single_task_phase && !last_task_in_phase {
            self.open_stream = Some(stream);
            DispatchState::Batched
        } else {
            stream.close()?;
            self.device.submit(stream, last_task_in_phase)?;
            DispatchState::Submitted
        };
        self.advance(level, state);

        let next = self.next_enabled_after(level);
        if let Some(frame) = self.frame.as_mut() {
            frame.next = next;
        }
        Ok(DispatchOutcome {
            level,
            grid,
            bindings,
            state,
        })
    }

    /// Dispatch every enabled level of one frame, coarsest first.
    ///
    /// `surfaces_for` supplies the per-level surfaces; the finest level closes
    /// the phase.
    pub fn dispatch_pyramid<F>(
        &mut self,
        curbe: &CurbeParameters,
        tracker: &dyn ReferenceTracker,
        mut surfaces_for: F,
    ) -> Result<Vec<DispatchOutcome>>
    where
        F: FnMut(PyramidLevel) -> Result<SurfaceParameters>,
    {
        self.begin_frame(curbe.structure);
        let levels = self.config.enabled_levels();
        let finest = self.config.finest_level();
        let mut outcomes = Vec::with_capacity(levels.len());
        for level in levels {
            let surfaces = surfaces_for(level)?;
            outcomes.push(self.dispatch_level(
                level,
                curbe,
                &surfaces,
                tracker,
                Some(level) == finest,
            )?);
        }
        Ok(outcomes)
    }

    /// Close and submit a batched phase left open by an abandoned frame.
    pub fn flush_phase(&mut self) -> Result<bool> {
        let Some(mut stream) = self.open_stream.take() else {
            return Ok(false);
        };
        stream.close()?;
        self.device.submit(stream, true)?;
        Ok(true)
    }

    /// Switch to a new input resolution.
    ///
    /// Working buffers are resized on their next use.
    pub fn set_frame_size(&mut self, width: u32, height: u32) -> Result<()> {
        let config = HmeConfig {
            width,
            height,
            ..self.config.clone()
        };
        config.validate()?;
        info!(
            "HME frame size change: {}x{} -> {}x{}",
            self.config.width, self.config.height, width, height
        );
        self.geometry = config.geometry();
        self.config = config;
        self.frame = None;
        Ok(())
    }

    /// Release every session resource. The dispatcher can be reused afterwards.
    pub fn teardown(&mut self) {
        if self.open_stream.take().is_some() {
            warn!("Dropping unsubmitted HME command stream at teardown");
        }
        self.pool.release_all(&mut self.device);
        self.kernels.clear();
        self.frame = None;
        self.state = DispatchState::Idle;
    }

    fn recover_from_reset(&mut self) -> MotionForgeError {
        warn!("Device reset detected, dropping HME session state");
        self.open_stream = None;
        self.kernels.clear();
        self.pool.release_all(&mut self.device);
        self.frame = None;
        MotionForgeError::DeviceReset(
            "device was reset; working buffers and kernel state were released".to_string(),
        )
    }

    fn check_order(&self, level: PyramidLevel, curbe: &CurbeParameters) -> Result<()> {
        if !self.config.is_enabled(level) {
            return Err(MotionForgeError::LevelNotEnabled(format!(
                "{level} is not enabled for this session"
            )));
        }
        let frame = self.frame.ok_or_else(|| {
            MotionForgeError::DispatchOrder(format!("{level} dispatched before begin_frame"))
        })?;
        match frame.next {
            Some(expected) if expected == level => {}
            Some(expected) => {
                return Err(MotionForgeError::DispatchOrder(format!(
                    "{level} dispatched while {expected} is due"
                )))
            }
            None => {
                return Err(MotionForgeError::DispatchOrder(format!(
                    "{level} dispatched after the pyramid completed"
                )))
            }
        }
        if frame.structure != curbe.structure {
            return Err(MotionForgeError::InvalidInput(format!(
                "frame began as {:?} but curbe describes {:?}",
                frame.structure, curbe.structure
            )));
        }
        Ok(())
    }

    fn record_level(
        &mut self,
        stream: &mut CommandStream,
        level: PyramidLevel,
        kernel: &KernelStateEntry,
        curbe: &CurbeParameters,
        surfaces: &SurfaceParameters,
        tracker: &dyn ReferenceTracker,
    ) -> Result<(DispatchGrid, BindingTable)> {
        let generation = self.config.generation;
        stream.append(&commands::interface_descriptor(kernel))?;

        let me_curbe = generation.build_curbe(&self.config, level, curbe)?;
        stream.append(&commands::curbe_load(&me_curbe))?;
        self.advance(level, DispatchState::CurbeBuilt);

        let is_finest = self.config.finest_level() == Some(level);
        let rate_control = is_finest && curbe.rate_control_assist;
        self.ensure_level_buffers(level, is_finest, rate_control)?;
        let buffers = self.level_buffers(level, is_finest, rate_control)?;
        let bindings = generation.bind_surfaces(
            level,
            is_finest,
            curbe.structure,
            surfaces,
            &buffers,
            stream,
            kernel,
            tracker,
        )?;
        self.advance(level, DispatchState::SurfacesBound);

        let grid = generation.dispatch_grid(&self.geometry, level, curbe.structure);
        self.advance(level, DispatchState::GridComputed);

        stream.append(&commands::media_walker(&grid))?;
        self.advance(level, DispatchState::Dispatched);
        debug!(
            "Dispatched {} ME: grid={}x{}, bound={}",
            level,
            grid.width,
            grid.height,
            bindings.bound_count()
        );
        Ok((grid, bindings))
    }

    fn ensure_level_buffers(
        &mut self,
        level: PyramidLevel,
        is_finest: bool,
        rate_control: bool,
    ) -> Result<()> {
        let mut ids = vec![WorkingBufferId::MvData(level)];
        if is_finest {
            ids.push(WorkingBufferId::Distortion);
        }
        if rate_control {
            ids.push(WorkingBufferId::BrcDistortion);
        }
        for id in ids {
            self.pool
                .ensure(&mut self.device, id, BufferSpec::for_id(id, &self.geometry))?;
        }
        Ok(())
    }

    fn level_buffers(
        &self,
        level: PyramidLevel,
        is_finest: bool,
        rate_control: bool,
    ) -> Result<LevelBuffers<'_>> {
        let coarser_mv = match level.coarser() {
            Some(coarser) if self.config.uses_coarser_mv(level) => {
                Some(self.pool.get(WorkingBufferId::MvData(coarser))?)
            }
            _ => None,
        };
        Ok(LevelBuffers {
            mv_output: self.pool.get(WorkingBufferId::MvData(level))?,
            coarser_mv,
            distortion: if is_finest {
                Some(self.pool.get(WorkingBufferId::Distortion)?)
            } else {
                None
            },
            brc_distortion: if rate_control {
                Some(self.pool.get(WorkingBufferId::BrcDistortion)?)
            } else {
                None
            },
        })
    }

    fn next_enabled_after(&self, level: PyramidLevel) -> Option<PyramidLevel> {
        PyramidLevel::ALL
            .into_iter()
            .skip(level.index() + 1)
            .find(|&l| self.config.is_enabled(l))
    }

    fn advance(&mut self, level: PyramidLevel, state: DispatchState) {
        debug!("{} ME: {} -> {}", level, self.state, state);
        self.state = state;
        self.transitions.push(state);
    }
}

impl<D: Device> Drop for HmeDispatcher<D> {
    fn drop(&mut self) {
        self.pool.release_all(&mut self.device);
    }
}
