//! Common test utilities for end-to-end device tests.
//!
//! This module provides session setup and the small kernels shared across
//! the runtime integration test suite.

#![allow(dead_code)]

use kestrel_runtime::{
    discover, predicate, select_device, Program, ProgramSource, Session, SessionConfig,
    WgpuPlatforms,
};

/// Adds `a` and `b` into `c`, one work-item per element.
pub const ADD_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, #{WORKGROUP_SIZE_Y}, #{WORKGROUP_SIZE_Z})
fn add(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&c)) {
        return;
    }
    c[i] = a[i] + b[i];
}
"#;

/// Multiplies every element of `data` by `factor` in place.
pub const SCALE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> factor: f32;
@group(0) @binding(1) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, #{WORKGROUP_SIZE_Y}, #{WORKGROUP_SIZE_Z})
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&data)) {
        data[gid.x] = data[gid.x] * factor;
    }
}
"#;

/// Install a test subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open a session on the first available device.
///
/// Panics when no device can be initialized; callers are `#[ignore]`d
/// tests that need real hardware.
pub fn gpu_session() -> Session {
    init_tracing();
    let config = SessionConfig::default();
    let source = WgpuPlatforms::from_config(&config);
    let platforms = discover(&source).expect("Platform discovery should succeed");
    let device = select_device(&source, &platforms, predicate::any())
        .expect("Device selection should succeed");
    println!("Device: {} on {}", device.name(), device.platform());
    Session::initialize(&device, config).expect("Session initialization should succeed")
}

/// Build `wgsl` for the session's device.
pub fn build(session: &Session, label: &str, wgsl: &str) -> Program {
    ProgramSource::load(label, wgsl)
        .build(&[session.device()])
        .expect("Program build should succeed")
}

/// Assert two f32 slices are element-wise equal within `tolerance`.
pub fn assert_vec_approx_eq(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "mismatch at index {i}: got {a}, expected {e} (tolerance {tolerance})"
        );
    }
}
