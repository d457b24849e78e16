//! Double-precision vector add on a device that supports it.

use super::{build_program, report, DriverOptions, DriverReport};
use crate::sources;
use anyhow::{ensure, Result};
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, NdRange, Session};

/// Default problem size.
pub const DEFAULT_LEN: u32 = 1 << 20;

/// Index reported as the probe value.
const PROBE: usize = 134_224;

/// Add two `f64` vectors (1.0 and 2.0 everywhere) on the device.
///
/// # Errors
/// Fails before building anything if the session's device lacks
/// double-precision support.
#[tracing::instrument(skip_all, fields(len))]
pub fn run(session: &mut Session, len: u32, options: &DriverOptions) -> Result<DriverReport> {
    ensure!(
        session.device().info().supports_f64(),
        "device '{}' does not support double precision",
        session.device().name()
    );

    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(session, "hello", sources::HELLO_F64, options)?;
    let mut kernel = program.kernel("add")?;
    watch.lap("initialization");

    let n = len as usize;
    let a = session.upload(AccessMode::ReadOnly, &vec![1.0f64; n])?;
    let b = session.upload(AccessMode::ReadOnly, &vec![2.0f64; n])?;
    let c = session.allocate::<f64>(AccessMode::ReadWrite, n, None)?;
    watch.lap("host >> device");

    kernel.set_arg(0, len)?;
    kernel.set_args_from(1, [&a, &b, &c])?;
    session
        .dispatch(&kernel, NdRange::d1(len), options.local.clone())?
        .wait()?;
    watch.lap("kernel");

    let c_host = session.read_all(&c)?;
    watch.lap("device >> host");

    let verification = session.config().verify.then(|| {
        let reference: Vec<(usize, f32)> =
            (0..n.min(options.sample)).map(|i| (i, 3.0)).collect();
        let device: Vec<f32> = c_host
            .iter()
            .take(options.sample)
            .map(|&v| v as f32)
            .collect();
        crate::verify::compare_sample(&reference, &device, options.tolerance)
    });
    let probe = c_host.get(PROBE).map(|&v| (PROBE, v));
    Ok(report("hello", session, n, probe, verification, watch))
}
