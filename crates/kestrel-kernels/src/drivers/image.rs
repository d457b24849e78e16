//! Image copy: read a single-channel float image and write it to another.

use super::{build_program, report, DriverOptions, DriverReport};
use crate::sources;
use crate::verify::compare_sample;
use anyhow::Result;
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, ImageFormat, NdRange, Session};

/// Default image side.
pub const DEFAULT_SIDE: u32 = 16;

/// Texel `i` of the input gradient.
pub fn gradient(i: usize) -> f32 {
    (255 - (i % 256)) as f32
}

/// Copy a `width` x `height` gradient image through the device.
#[tracing::instrument(skip_all, fields(width, height))]
pub fn run(
    session: &mut Session,
    width: u32,
    height: u32,
    options: &DriverOptions,
) -> Result<DriverReport> {
    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(session, "image_copy", sources::IMAGE_COPY, options)?;
    let mut kernel = program.kernel("read_write_image")?;
    watch.lap("initialization");

    let texels = width as usize * height as usize;
    let input_host: Vec<f32> = (0..texels).map(gradient).collect();
    if session.config().verbose {
        tracing::info!("input image: {:?}", &input_host[..texels.min(32)]);
    }
    watch.lap("host buffers");

    let input = session.allocate_image(
        AccessMode::ReadOnly,
        ImageFormat::R32Float,
        width,
        height,
        Some(&input_host),
    )?;
    let output = session.allocate_image(
        AccessMode::WriteOnly,
        ImageFormat::R32Float,
        width,
        height,
        None,
    )?;
    watch.lap("host >> device");

    kernel.set_arg(0, &input)?;
    kernel.set_arg(1, &output)?;
    session
        .dispatch(&kernel, NdRange::d2(width, height), options.local.clone())?
        .wait()?;
    watch.lap("kernel");

    let output_host = session.read_image(&output, output.full_region())?;
    watch.lap("device >> host");
    if session.config().verbose {
        tracing::info!("output image: {:?}", &output_host[..texels.min(32)]);
    }

    let verification = session.config().verify.then(|| {
        let reference: Vec<(usize, f32)> = input_host
            .iter()
            .copied()
            .enumerate()
            .take(options.sample)
            .collect();
        compare_sample(&reference, &output_host, 0.0)
    });
    let probe = output_host.first().map(|&v| (0, v as f64));
    Ok(report("image_copy", session, texels, probe, verification, watch))
}
