//! Vector add: c = a + b with a = 1 and b = 2 everywhere.

use super::{build_program, report, DriverOptions, DriverReport};
use crate::sources;
use crate::verify::{compare_sample, reference_elementwise};
use anyhow::Result;
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, NdRange, Session};

/// Default problem size.
pub const DEFAULT_LEN: u32 = 1 << 20;

/// Index reported as the probe value.
const PROBE: usize = 134_224;

/// Add two vectors of `len` elements on the device.
#[tracing::instrument(skip_all, fields(len))]
pub fn run(session: &mut Session, len: u32, options: &DriverOptions) -> Result<DriverReport> {
    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(session, "vector_add", sources::VECTOR_ADD, options)?;
    let mut kernel = program.kernel("vector_add")?;
    watch.lap("initialization");

    let n = len as usize;
    let a_host = vec![1.0f32; n];
    let b_host = vec![2.0f32; n];
    watch.lap("host buffers");

    let a = session.upload(AccessMode::ReadOnly, &a_host)?;
    let b = session.upload(AccessMode::ReadOnly, &b_host)?;
    let c = session.allocate::<f32>(AccessMode::ReadWrite, n, None)?;
    watch.lap("host >> device");

    kernel.set_arg(0, len)?;
    kernel.set_arg(1, &a)?;
    kernel.set_arg(2, &b)?;
    kernel.set_arg(3, &c)?;
    session
        .dispatch(&kernel, NdRange::d1(len), options.local.clone())?
        .wait()?;
    watch.lap("kernel");

    let c_host = session.read_all(&c)?;
    watch.lap("device >> host");

    let verification = session.config().verify.then(|| {
        let reference = reference_elementwise(&a_host, &b_host, options.sample, |a, b| a + b);
        compare_sample(&reference, &c_host, options.tolerance)
    });
    let probe = c_host.get(PROBE).map(|&v| (PROBE, v as f64));
    Ok(report("vector_add", session, n, probe, verification, watch))
}
