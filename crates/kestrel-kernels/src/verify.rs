//! Host reference computations for checking device results.
//!
//! References are single-threaded and only compute a bounded sample of the
//! output, addressed by storage index. [`compare_sample`] then checks the
//! device read-back at those indices.

/// Storage order of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Element (r, c) of an R x C matrix is at `r * C + c`.
    RowMajor,
    /// Element (r, c) of an R x C matrix is at `c * R + r`.
    ColumnMajor,
}

impl Layout {
    /// Storage index of element (`row`, `col`) in a `rows` x `cols` matrix.
    pub fn index(self, row: usize, col: usize, rows: usize, cols: usize) -> usize {
        match self {
            Layout::RowMajor => row * cols + col,
            Layout::ColumnMajor => col * rows + row,
        }
    }

    /// Inverse of [`Layout::index`].
    pub fn position(self, index: usize, rows: usize, cols: usize) -> (usize, usize) {
        match self {
            Layout::RowMajor => (index / cols, index % cols),
            Layout::ColumnMajor => (index % rows, index / rows),
        }
    }
}

/// Matrix multiply shape: C (m x n) = A (m x k) * B (k x n).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Reference value at one storage index of the output.
pub type Sample = (usize, f32);

/// The first `sample` entries (in storage order) of `a * b`.
pub fn reference_matmul(
    layout: Layout,
    shape: MatmulShape,
    a: &[f32],
    b: &[f32],
    sample: usize,
) -> Vec<Sample> {
    let MatmulShape { m, n, k } = shape;
    assert_eq!(a.len(), m * k, "A must be m x k");
    assert_eq!(b.len(), k * n, "B must be k x n");

    (0..sample.min(m * n))
        .map(|index| {
            let (row, col) = layout.position(index, m, n);
            let value: f32 = (0..k)
                .map(|i| a[layout.index(row, i, m, k)] * b[layout.index(i, col, k, n)])
                .sum();
            (index, value)
        })
        .collect()
}

/// The first `sample` entries of `a * x` for a row-major `m` x `n` matrix.
pub fn reference_matvec(m: usize, n: usize, a: &[f32], x: &[f32], sample: usize) -> Vec<Sample> {
    assert_eq!(a.len(), m * n, "A must be m x n");
    assert_eq!(x.len(), n, "x must have n entries");

    (0..sample.min(m))
        .map(|row| {
            let value: f32 = a[row * n..(row + 1) * n]
                .iter()
                .zip(x)
                .map(|(a, x)| a * x)
                .sum();
            (row, value)
        })
        .collect()
}

/// The first `sample` entries of `op(a[i], b[i])`.
pub fn reference_elementwise(
    a: &[f32],
    b: &[f32],
    sample: usize,
    op: impl Fn(f32, f32) -> f32,
) -> Vec<Sample> {
    a.iter()
        .zip(b)
        .take(sample)
        .enumerate()
        .map(|(i, (&a, &b))| (i, op(a, b)))
        .collect()
}

/// One entry outside tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f32,
    pub actual: f32,
    pub diff: f32,
}

/// Outcome of comparing a device result against a reference sample.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    /// Number of entries compared.
    pub checked: usize,
    /// Largest absolute difference seen.
    pub max_abs_diff: f32,
    /// Entries whose absolute difference exceeds the tolerance.
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    /// True when no entry exceeded the tolerance.
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Log the outcome, one line per mismatch.
    pub fn log(&self, what: &str) {
        for m in &self.mismatches {
            tracing::warn!(
                index = m.index,
                host = m.expected,
                device = m.actual,
                diff = m.diff,
                "{what}: mismatch"
            );
        }
        tracing::info!(
            checked = self.checked,
            max_abs_diff = self.max_abs_diff,
            mismatches = self.mismatches.len(),
            "{what}: verification {}",
            if self.passed() { "passed" } else { "failed" }
        );
    }
}

/// Compare `device` against `reference` at the reference's indices.
///
/// An index past the end of `device` counts as a mismatch with an actual
/// value of NaN.
pub fn compare_sample(reference: &[Sample], device: &[f32], tolerance: f32) -> VerifyReport {
    let mut max_abs_diff = 0.0f32;
    let mut mismatches = Vec::new();
    for &(index, expected) in reference {
        let actual = device.get(index).copied().unwrap_or(f32::NAN);
        let diff = (expected - actual).abs();
        if diff.is_nan() || diff > tolerance {
            mismatches.push(Mismatch {
                index,
                expected,
                actual,
                diff,
            });
        }
        if diff > max_abs_diff {
            max_abs_diff = diff;
        }
    }
    VerifyReport {
        checked: reference.len(),
        max_abs_diff,
        mismatches,
    }
}
