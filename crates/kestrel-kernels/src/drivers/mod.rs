//! Example drivers.
//!
//! Each driver builds its kernel, prepares host data, moves it to the
//! device, dispatches, reads the result back and, when the session's
//! configuration asks for it, checks a sample against a host reference.
//! Stage timings go through [`Stopwatch`] and are logged when profiling is
//! enabled.

pub mod hello;
pub mod image;
pub mod matmul;
pub mod matrix_add;
pub mod matvec;
pub mod vector_add;

use crate::sources;
use crate::verify::VerifyReport;
use anyhow::{Context, Result};
use kestrel_runtime::profile::Stopwatch;
use kestrel_runtime::{NdRange, Program, Session};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Options shared by all drivers.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Kernel source replacing the bundled one.
    pub source: Option<String>,
    /// Work-group size; chosen automatically when `None`.
    pub local: Option<NdRange>,
    /// Seed for random inputs; drawn from entropy when `None`.
    pub seed: Option<u64>,
    /// Largest accepted absolute difference during verification.
    pub tolerance: f32,
    /// Number of output entries recomputed on the host.
    pub sample: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            source: None,
            local: None,
            seed: None,
            tolerance: 1e-5,
            sample: 100,
        }
    }
}

/// What a driver run produced.
#[derive(Debug, Clone)]
pub struct DriverReport {
    /// Driver name.
    pub name: &'static str,
    /// Device the kernel ran on.
    pub device: String,
    /// Number of output elements.
    pub elements: usize,
    /// One output entry, for a quick sanity check.
    pub probe: Option<(usize, f64)>,
    /// Verification outcome, when verification was requested.
    pub verification: Option<VerifyReport>,
    /// Stage timings.
    pub laps: Vec<(String, Duration)>,
}

impl DriverReport {
    /// False only if verification ran and found mismatches.
    pub fn passed(&self) -> bool {
        self.verification.as_ref().map_or(true, VerifyReport::passed)
    }
}

pub(crate) fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Uniform values in `[0, 1)`.
pub(crate) fn random_values(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen::<f32>()).collect()
}

pub(crate) fn build_program(
    session: &Session,
    label: &str,
    bundled: &str,
    options: &DriverOptions,
) -> Result<Program> {
    sources::program_source(label, bundled, options.source.as_deref())
        .build(&[session.device()])
        .with_context(|| format!("building {label} for {}", session.device().name()))
}

/// Log a matrix row by row when the session is verbose.
pub(crate) fn log_matrix(session: &Session, title: &str, data: &[f32], rows: usize, cols: usize) {
    const MAX_ROWS: usize = 8;
    const MAX_COLS: usize = 8;
    if !session.config().verbose {
        return;
    }
    tracing::info!("{title} ({rows} x {cols})");
    for row in data.chunks(cols.max(1)).take(rows.min(MAX_ROWS)) {
        let shown: Vec<String> = row
            .iter()
            .take(MAX_COLS)
            .map(|v| format!("{v:.4}"))
            .collect();
        let more = if cols > MAX_COLS { " ..." } else { "" };
        tracing::info!("  {}{more}", shown.join(" "));
    }
}

pub(crate) fn report(
    name: &'static str,
    session: &Session,
    elements: usize,
    probe: Option<(usize, f64)>,
    verification: Option<VerifyReport>,
    watch: Stopwatch,
) -> DriverReport {
    if let Some(verification) = &verification {
        verification.log(name);
    }
    if let Some((index, value)) = probe {
        tracing::info!("{name}: result[{index}] = {value}");
    }
    watch.report();
    DriverReport {
        name,
        device: session.device().name().to_string(),
        elements,
        probe,
        verification,
        laps: watch.laps().to_vec(),
    }
}
