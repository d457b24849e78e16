//! Kernel sources bundled with the crate.
//!
//! Every kernel takes its local size from the `WORKGROUP_SIZE_X/Y/Z` shader
//! defs and bounds-checks its global id, so any launch shape works.

use kestrel_runtime::ProgramSource;

/// `vector_add(n, a, b, c)`
pub const VECTOR_ADD: &str = include_str!("../shaders/vector_add.wgsl");

/// `matrix_add(m, n, a, b, c)`
pub const MATRIX_ADD: &str = include_str!("../shaders/matrix_add.wgsl");

/// `matrix_mul(m, n, k, a, b, c)` and `matrix_mul_tiled(...)`, column-major.
pub const MATRIX_MUL: &str = include_str!("../shaders/matrix_mul.wgsl");

/// `matrix_vector_mul(m, n, a, b, c)`, row-major.
pub const MATRIX_VECTOR_MUL: &str = include_str!("../shaders/matrix_vector_mul.wgsl");

/// `read_write_image(input, output)`
pub const IMAGE_COPY: &str = include_str!("../shaders/image_copy.wgsl");

/// `add(n, a, b, c)` in double precision.
pub const HELLO_F64: &str = include_str!("../shaders/hello_f64.wgsl");

/// Source for `label`: `custom` when given, the bundled text otherwise.
pub fn program_source(label: &str, bundled: &str, custom: Option<&str>) -> ProgramSource {
    ProgramSource::load(label, custom.unwrap_or(bundled))
}
