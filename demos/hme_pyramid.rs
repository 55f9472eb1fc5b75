//! Example: HME pyramid dispatch
//!
//! Runs the 32x/16x/4x motion search setup for a short IPBB sequence on the
//! in-memory device and prints what was recorded for each level.

use motionforge::hme::commands::{self, split_blocks};
use motionforge::hme::tables;
use motionforge::{
    build_kernel_blob, CurbeParameters, Device, FrameGeometry, HmeConfig, HmeDispatcher,
    HostDevice, MotionForgeError, PictureCodingType, PyramidLevel, ReferencePicture,
    ReferenceTracker, ScaledSurface, ScalingTable, SurfaceParameters,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const QP: u8 = 26;
const LEVEL_IDC: u8 = 31;

/// Downscaled copies of one reconstructed picture, as the scaling stage would produce.
fn produce_scaled(
    device: &mut HostDevice,
    table: &mut ScalingTable,
    geometry: &FrameGeometry,
    slot: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    for level in PyramidLevel::ALL {
        let width = geometry.frame_width / level.scale_factor();
        let height = geometry.frame_height / level.scale_factor();
        let pitch = width.div_ceil(64) * 64;
        let buffer = device.allocate_2d(&format!("scaled {level} slot {slot}"), pitch, height)?;
        table.set_surface(
            slot,
            level,
            ScaledSurface {
                buffer,
                width,
                height,
                pitch,
                bottom_field_offset: pitch * (height / 2),
            },
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    println!("MotionForge HME Pyramid Example\n");

    let config = HmeConfig::new(WIDTH, HEIGHT)
        .with_32x(true)
        .with_single_task_phase(true)
        .with_search_thoroughness_for_target_usage(4);
    let geometry = config.geometry();
    println!(
        "Config: {}x{}, generation={}, levels={:?}, thoroughness={}\n",
        WIDTH,
        HEIGHT,
        config.generation,
        config.enabled_levels(),
        config.search_thoroughness
    );

    let blob = build_kernel_blob(&[[&[0x4d; 512], &[0x42; 768]]]);
    let mut dispatcher = HmeDispatcher::new(config, HostDevice::new(), blob)?;
    let mut table = ScalingTable::new();
    let max_mv_len = tables::max_mv_len_for_level(LEVEL_IDC);

    // Display order I0 B1 B2 P3, coded as I0 P3 B1 B2.
    let coded: [(u8, PictureCodingType); 4] = [
        (0, PictureCodingType::I),
        (3, PictureCodingType::P),
        (1, PictureCodingType::B),
        (2, PictureCodingType::B),
    ];

    for (frame_idx, coding_type) in coded {
        let slot = frame_idx % 4;
        produce_scaled(dispatcher.device_mut(), &mut table, &geometry, slot)?;

        let (forward, backward) = match coding_type {
            PictureCodingType::I => (vec![], vec![]),
            PictureCodingType::P => (vec![ReferencePicture::frame(0)], vec![]),
            PictureCodingType::B => (
                vec![ReferencePicture::frame(0)],
                vec![ReferencePicture::frame(3)],
            ),
        };

        if coding_type == PictureCodingType::I {
            println!("Frame {frame_idx} ({coding_type:?}): no motion search");
        } else {
            let curbe = CurbeParameters::new(coding_type, QP, max_mv_len)
                .with_references(&forward, &backward)
                .with_rate_control_assist(coding_type == PictureCodingType::P);
            let outcomes = dispatcher.dispatch_pyramid(&curbe, &table, |level| {
                let current = table.scaled_surface(slot, level).ok_or_else(|| {
                    MotionForgeError::InvalidInput(format!("no {level} surface in slot {slot}"))
                })?;
                Ok(SurfaceParameters::new(current)
                    .with_references(forward.clone(), backward.clone()))
            })?;
            for outcome in &outcomes {
                println!(
                    "Frame {frame_idx} ({coding_type:?}) {}: grid {}x{}, {} surfaces bound, {:?}",
                    outcome.level,
                    outcome.grid.width,
                    outcome.grid.height,
                    outcome.bindings.bound_count(),
                    outcome.state
                );
            }
        }

        // Every picture in this short sequence stays a reference.
        table.register_picture(frame_idx, slot);
    }

    println!();
    for (i, submission) in dispatcher.device().submissions().iter().enumerate() {
        let blocks = split_blocks(&submission.dwords)?;
        let walkers = blocks
            .iter()
            .filter(|b| b.opcode == commands::OPCODE_MEDIA_OBJECT_WALKER)
            .count();
        println!(
            "Submission {i}: {} dwords, {} blocks, {walkers} walkers",
            submission.dwords.len(),
            blocks.len()
        );
    }

    dispatcher.teardown();
    println!(
        "\nKernel header reads: {}, working buffers after teardown: {}",
        dispatcher.kernels().header_reads(),
        dispatcher.pool().len()
    );
    Ok(())
}
