//! End-to-end driver runs on real hardware.

use kestrel_kernels::drivers::{hello, image, matmul, matrix_add, matvec, vector_add};
use kestrel_kernels::{DriverOptions, MatmulShape, MatmulVariant};
use kestrel_runtime::{
    discover, predicate, select_device, NdRange, Session, SessionConfig, WgpuPlatforms,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Verifying session on the first device matching `pred`, or `None`.
fn session_where(pred: impl Fn(&kestrel_runtime::Device) -> bool) -> Option<Session> {
    init_tracing();
    let config = SessionConfig::default().with_verify(true);
    let source = WgpuPlatforms::from_config(&config);
    let platforms = discover(&source).expect("Platform discovery should succeed");
    let device = select_device(&source, &platforms, pred).ok()?;
    Some(Session::initialize(&device, config).expect("Session initialization should succeed"))
}

fn gpu_session() -> Session {
    session_where(predicate::any()).expect("A device should be available")
}

fn seeded() -> DriverOptions {
    DriverOptions {
        seed: Some(42),
        ..DriverOptions::default()
    }
}

#[test]
#[ignore] // Requires GPU
fn test_vector_add() {
    let mut session = gpu_session();
    let report = vector_add::run(&mut session, vector_add::DEFAULT_LEN, &seeded())
        .expect("vector add should succeed");
    assert!(report.passed());
    assert_eq!(report.elements, 1 << 20);
    assert_eq!(report.probe, Some((134_224, 3.0)));
}

#[test]
#[ignore] // Requires GPU
fn test_matrix_add_exact() {
    let mut session = gpu_session();
    let options = DriverOptions {
        tolerance: 0.0,
        ..seeded()
    };
    let report = matrix_add::run(&mut session, 5, 5, &options).expect("matrix add should succeed");
    let verification = report.verification.expect("verification should run");
    assert_eq!(verification.checked, 25);
    assert_eq!(verification.max_abs_diff, 0.0);
    assert!(verification.passed());
}

#[test]
#[ignore] // Requires GPU
fn test_matmul_variants() {
    let shape = MatmulShape { m: 64, n: 64, k: 64 };
    for variant in [MatmulVariant::Naive, MatmulVariant::Tiled] {
        let mut session = gpu_session();
        let report = matmul::run(&mut session, shape, variant, &seeded())
            .expect("matmul should succeed");
        let verification = report.verification.expect("verification should run");
        assert_eq!(verification.checked, 100);
        assert!(
            verification.max_abs_diff <= 1e-5,
            "{variant}: max diff {}",
            verification.max_abs_diff
        );
    }
}

#[test]
#[ignore] // Requires GPU
fn test_matmul_odd_shape_tiled() {
    let mut session = gpu_session();
    let options = DriverOptions {
        local: Some(NdRange::d2(4, 4)),
        ..seeded()
    };
    let shape = MatmulShape { m: 13, n: 7, k: 5 };
    let report = matmul::run(&mut session, shape, MatmulVariant::Tiled, &options)
        .expect("tiled matmul should succeed");
    assert!(report.passed());
}

#[test]
#[ignore] // Requires GPU
fn test_matvec() {
    let mut session = gpu_session();
    let report = matvec::run(&mut session, 300, 17, &seeded()).expect("matvec should succeed");
    assert!(report.passed());
    assert_eq!(report.elements, 300);
}

#[test]
#[ignore] // Requires GPU
fn test_image_copy() {
    let mut session = gpu_session();
    let report = image::run(&mut session, image::DEFAULT_SIDE, image::DEFAULT_SIDE, &seeded())
        .expect("image copy should succeed");
    assert!(report.passed());
    assert_eq!(report.probe, Some((0, 255.0)));
}

#[test]
#[ignore] // Requires GPU
fn test_hello_f64() {
    let Some(mut session) = session_where(predicate::supports_f64()) else {
        println!("No double-precision device, skipping");
        return;
    };
    let report =
        hello::run(&mut session, hello::DEFAULT_LEN, &seeded()).expect("hello should succeed");
    assert!(report.passed());
    assert_eq!(report.probe, Some((134_224, 3.0)));
}

#[test]
#[ignore] // Requires GPU
fn test_custom_source_missing_entry_point() {
    let mut session = gpu_session();
    let options = DriverOptions {
        source: Some(
            "@compute @workgroup_size(1) fn other(@builtin(global_invocation_id) gid: vec3<u32>) {}"
                .to_string(),
        ),
        ..seeded()
    };
    let err = vector_add::run(&mut session, 16, &options)
        .expect_err("missing entry point should fail");
    assert!(err.to_string().contains("vector_add"), "{err:#}");
}
