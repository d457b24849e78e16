//! Matrix-vector multiply: c = A * b for a row-major m x n matrix.

use super::{build_program, log_matrix, random_values, report, rng, DriverOptions, DriverReport};
use crate::sources;
use crate::verify::{compare_sample, reference_matvec};
use anyhow::Result;
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, NdRange, Session};

/// Multiply a random matrix by a random vector on the device.
#[tracing::instrument(skip_all, fields(m, n))]
pub fn run(session: &mut Session, m: u32, n: u32, options: &DriverOptions) -> Result<DriverReport> {
    let (rows, cols) = (m as usize, n as usize);

    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(
        session,
        "matrix_vector_mul",
        sources::MATRIX_VECTOR_MUL,
        options,
    )?;
    let mut kernel = program.kernel("matrix_vector_mul")?;
    watch.lap("initialization");

    let mut rng = rng(options.seed);
    let a_host = random_values(&mut rng, rows * cols);
    let b_host = random_values(&mut rng, cols);
    log_matrix(session, "Matrix A", &a_host, rows, cols);
    log_matrix(session, "Vector B", &b_host, 1, cols);
    watch.lap("host buffers");

    let a = session.upload(AccessMode::ReadOnly, &a_host)?;
    let b = session.upload(AccessMode::ReadOnly, &b_host)?;
    let c = session.allocate::<f32>(AccessMode::ReadWrite, rows, None)?;
    watch.lap("host >> device");

    kernel.set_args([m, n])?;
    kernel.set_args_from(2, [&a, &b, &c])?;
    session
        .dispatch(&kernel, NdRange::d1(m), options.local.clone())?
        .wait()?;
    watch.lap("kernel");

    let c_host = session.read_all(&c)?;
    watch.lap("device >> host");
    log_matrix(session, "Vector C", &c_host, 1, rows);

    let verification = session.config().verify.then(|| {
        let reference = reference_matvec(rows, cols, &a_host, &b_host, options.sample);
        compare_sample(&reference, &c_host, options.tolerance)
    });
    let probe = c_host.first().map(|&v| (0, v as f64));
    Ok(report("matrix_vector_mul", session, rows, probe, verification, watch))
}
