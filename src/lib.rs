//! Hierarchical motion-estimation dispatch for hardware video encoders.
//!
//! motionforge prepares and submits the GPU work for the 32x/16x/4x motion
//! search that runs ahead of a hardware AVC encode. For every pyramid level it
//! selects the kernel, builds the 39-dword constant buffer, binds the working
//! buffers and reference surfaces, sizes the thread grid and submits (or
//! batches) the command stream.
//!
//! ```no_run
//! use motionforge::{
//!     build_kernel_blob, CurbeParameters, HmeConfig, HmeDispatcher, HostDevice,
//!     PictureCodingType, ReferencePicture, ScalingTable, SurfaceParameters,
//! };
//!
//! # fn example(tracker: ScalingTable, surfaces: SurfaceParameters) -> motionforge::Result<()> {
//! let config = HmeConfig::new(1920, 1080).with_32x(true);
//! let blob = build_kernel_blob(&[[&[0u8; 64], &[0u8; 64]]]);
//! let mut dispatcher = HmeDispatcher::new(config, HostDevice::new(), blob)?;
//!
//! let curbe = CurbeParameters::new(PictureCodingType::P, 26, 511)
//!     .with_references(&[ReferencePicture::frame(0)], &[]);
//! let outcomes = dispatcher.dispatch_pyramid(&curbe, &tracker, |_level| Ok(surfaces.clone()))?;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod hme;
pub mod tracking;

pub use device::{BufferHandle, CommandStream, Device, HostDevice, HostDeviceBuilder};
pub use error::{MotionForgeError, Result};
pub use hme::binding::{BindingEntry, BindingTable, SurfaceKind, VDirection};
pub use hme::curbe::MeCurbe;
pub use hme::dispatch::{DispatchGrid, DispatchOutcome, DispatchState, HmeDispatcher};
pub use hme::kernel::{build_kernel_blob, KernelStateCache, KernelStateEntry};
pub use hme::pool::{WorkingBuffer, WorkingBufferId, WorkingBufferPool};
pub use hme::{
    CurbeParameters, FrameGeometry, Generation, HmeConfig, KernelBucket, PictureCodingType,
    PictureStructure, PyramidLevel, ReferencePicture, StreamIn, SurfaceParameters,
};
pub use tracking::{ReferenceTracker, ScaledSurface, ScalingTable};
