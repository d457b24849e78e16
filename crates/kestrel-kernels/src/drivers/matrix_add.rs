//! Matrix add over random inputs, one work-item per element.

use super::{build_program, log_matrix, random_values, report, rng, DriverOptions, DriverReport};
use crate::sources;
use crate::verify::{compare_sample, reference_elementwise};
use anyhow::{Context, Result};
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, NdRange, Session};

/// Add two random `m` x `n` matrices on the device.
#[tracing::instrument(skip_all, fields(m, n))]
pub fn run(session: &mut Session, m: u32, n: u32, options: &DriverOptions) -> Result<DriverReport> {
    let elements = m
        .checked_mul(n)
        .with_context(|| format!("matrix of {m} x {n} elements is too large"))?;

    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(session, "matrix_add", sources::MATRIX_ADD, options)?;
    let mut kernel = program.kernel("matrix_add")?;
    watch.lap("initialization");

    let mut rng = rng(options.seed);
    let len = elements as usize;
    let a_host = random_values(&mut rng, len);
    let b_host = random_values(&mut rng, len);
    log_matrix(session, "Matrix A", &a_host, m as usize, n as usize);
    log_matrix(session, "Matrix B", &b_host, m as usize, n as usize);
    watch.lap("host buffers");

    let a = session.upload(AccessMode::ReadOnly, &a_host)?;
    let b = session.upload(AccessMode::ReadOnly, &b_host)?;
    let c = session.allocate::<f32>(AccessMode::ReadWrite, len, None)?;
    watch.lap("host >> device");

    kernel.set_arg(0, m)?;
    kernel.set_arg(1, n)?;
    kernel.set_args_from(2, [&a, &b, &c])?;
    session
        .dispatch(&kernel, NdRange::d1(elements), options.local.clone())?
        .wait()?;
    watch.lap("kernel");

    let c_host = session.read_all(&c)?;
    watch.lap("device >> host");
    log_matrix(session, "Matrix C", &c_host, m as usize, n as usize);

    let verification = session.config().verify.then(|| {
        let reference = reference_elementwise(&a_host, &b_host, options.sample, |a, b| a + b);
        compare_sample(&reference, &c_host, options.tolerance)
    });
    let probe = c_host.first().map(|&v| (0, v as f64));
    Ok(report("matrix_add", session, len, probe, verification, watch))
}
