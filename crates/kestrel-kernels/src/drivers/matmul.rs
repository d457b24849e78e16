//! Matrix multiply, column-major: C (m x n) = A (m x k) * B (k x n).

use super::{build_program, log_matrix, random_values, report, rng, DriverOptions, DriverReport};
use crate::sources;
use crate::verify::{compare_sample, reference_matmul, Layout, MatmulShape};
use anyhow::{bail, Context, Result};
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{AccessMode, NdRange, Session};
use std::fmt;
use std::str::FromStr;

/// Largest tile side the tiled kernel's shared arrays can hold.
pub const MAX_TILE: u32 = 16;

/// Tile side used when no work-group size is given.
const DEFAULT_TILE: u32 = 8;

/// Kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatmulVariant {
    /// One work-item per output entry, reading straight from device memory.
    #[default]
    Naive,
    /// Square tiles staged in work-group memory.
    Tiled,
}

impl MatmulVariant {
    /// Entry point implementing this variant.
    pub fn entry_point(self) -> &'static str {
        match self {
            MatmulVariant::Naive => "matrix_mul",
            MatmulVariant::Tiled => "matrix_mul_tiled",
        }
    }
}

impl fmt::Display for MatmulVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatmulVariant::Naive => "naive",
            MatmulVariant::Tiled => "tiled",
        })
    }
}

impl FromStr for MatmulVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "naive" => Ok(MatmulVariant::Naive),
            "tiled" => Ok(MatmulVariant::Tiled),
            other => bail!("unknown matmul variant '{other}' (expected 'naive' or 'tiled')"),
        }
    }
}

/// Launch shape for `variant`: the global extent and work-group size.
///
/// The tiled kernel needs square tiles, so its global extent is rounded up
/// to whole tiles; the kernel skips entries outside C.
pub fn launch_shape(
    variant: MatmulVariant,
    shape: MatmulShape,
    local: Option<&NdRange>,
) -> Result<(NdRange, Option<NdRange>)> {
    let m = u32::try_from(shape.m).context("m does not fit in u32")?;
    let n = u32::try_from(shape.n).context("n does not fit in u32")?;
    match variant {
        MatmulVariant::Naive => Ok((NdRange::d2(m, n), local.cloned())),
        MatmulVariant::Tiled => {
            let tile = match local.map(NdRange::dims) {
                None => DEFAULT_TILE,
                Some(&[x, y]) if x == y && x <= MAX_TILE => x,
                Some(dims) => bail!(
                    "tiled matmul needs a square 2-D work-group of at most {MAX_TILE}x{MAX_TILE}, got {dims:?}"
                ),
            };
            Ok((
                NdRange::d2(m.next_multiple_of(tile), n.next_multiple_of(tile)),
                Some(NdRange::d2(tile, tile)),
            ))
        }
    }
}

/// Multiply two random matrices on the device.
#[tracing::instrument(skip_all, fields(m = shape.m, n = shape.n, k = shape.k, %variant))]
pub fn run(
    session: &mut Session,
    shape: MatmulShape,
    variant: MatmulVariant,
    options: &DriverOptions,
) -> Result<DriverReport> {
    let MatmulShape { m, n, k } = shape;
    let (global, local) = launch_shape(variant, shape, options.local.as_ref())?;

    let mut watch = Stopwatch::new(session.config().profile);
    let program = build_program(session, "matrix_mul", sources::MATRIX_MUL, options)?;
    let mut kernel = program.kernel(variant.entry_point())?;
    watch.lap("initialization");

    let mut rng = rng(options.seed);
    let a_host = random_values(&mut rng, m * k);
    let b_host = random_values(&mut rng, k * n);
    log_matrix(session, "Matrix A (column-major storage)", &a_host, k, m);
    log_matrix(session, "Matrix B (column-major storage)", &b_host, n, k);
    watch.lap("host buffers");

    let a = session.upload(AccessMode::ReadOnly, &a_host)?;
    let b = session.upload(AccessMode::ReadOnly, &b_host)?;
    let c = session.allocate::<f32>(AccessMode::ReadWrite, m * n, None)?;
    watch.lap("host >> device");

    kernel.set_args([m as u32, n as u32, k as u32])?;
    kernel.set_args_from(3, [&a, &b, &c])?;
    session.dispatch(&kernel, global, local)?.wait()?;
    watch.lap("kernel");

    let c_host = session.read_all(&c)?;
    watch.lap("device >> host");
    log_matrix(session, "Matrix C (column-major storage)", &c_host, n, m);

    let verification = session.config().verify.then(|| {
        let reference =
            reference_matmul(Layout::ColumnMajor, shape, &a_host, &b_host, options.sample);
        compare_sample(&reference, &c_host, options.tolerance)
    });
    let probe = c_host.first().map(|&v| (0, v as f64));
    Ok(report("matrix_mul", session, m * n, probe, verification, watch))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: MatmulShape = MatmulShape { m: 100, n: 30, k: 7 };

    #[test]
    fn test_variant_parsing() {
        assert_eq!("naive".parse::<MatmulVariant>().unwrap(), MatmulVariant::Naive);
        assert_eq!("tiled".parse::<MatmulVariant>().unwrap(), MatmulVariant::Tiled);
        assert!("blocked".parse::<MatmulVariant>().is_err());
        assert_eq!(MatmulVariant::Tiled.to_string(), "tiled");
    }

    #[test]
    fn test_naive_launch_passes_local_through() {
        let (global, local) = launch_shape(MatmulVariant::Naive, SHAPE, None).unwrap();
        assert_eq!(global, NdRange::d2(100, 30));
        assert_eq!(local, None);

        let requested = NdRange::d2(10, 10);
        let (_, local) = launch_shape(MatmulVariant::Naive, SHAPE, Some(&requested)).unwrap();
        assert_eq!(local, Some(requested));
    }

    #[test]
    fn test_tiled_launch_rounds_up() {
        let (global, local) = launch_shape(MatmulVariant::Tiled, SHAPE, None).unwrap();
        assert_eq!(global, NdRange::d2(104, 32));
        assert_eq!(local, Some(NdRange::d2(8, 8)));

        let (global, _) =
            launch_shape(MatmulVariant::Tiled, SHAPE, Some(&NdRange::d2(16, 16))).unwrap();
        assert_eq!(global, NdRange::d2(112, 32));
    }

    #[test]
    fn test_tiled_launch_rejects_bad_tiles() {
        for local in [NdRange::d2(8, 4), NdRange::d2(32, 32), NdRange::d1(8)] {
            assert!(launch_shape(MatmulVariant::Tiled, SHAPE, Some(&local)).is_err());
        }
    }
}
