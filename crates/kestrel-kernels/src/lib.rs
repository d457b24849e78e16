//! Bundled WGSL kernels and the drivers that exercise them.
//!
//! - [`sources`] holds the kernel text (vector add, matrix add, matrix
//!   multiply, matrix-vector multiply, image copy, double-precision add)
//! - [`drivers`] runs each kernel end to end through a
//!   [`kestrel_runtime::Session`]
//! - [`verify`] recomputes a sample of each result on the host

pub mod drivers;
pub mod sources;
pub mod verify;

pub use drivers::matmul::MatmulVariant;
pub use drivers::{DriverOptions, DriverReport};
pub use verify::{compare_sample, Layout, MatmulShape, VerifyReport};
