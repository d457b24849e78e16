//! End-to-end tests for sessions, transfers and dispatch.
//!
//! All tests need a compute device and are ignored by default.

mod common;

use common::{assert_vec_approx_eq, build, gpu_session, ADD_WGSL, SCALE_WGSL};
use kestrel_runtime::{AccessMode, ImageFormat, NdRange, Region, RuntimeError};

#[test]
#[ignore] // Requires GPU
fn test_write_read_round_trip() {
    let session = gpu_session();
    let data: Vec<f32> = (0..1000).map(|i| i as f32 * 0.5 - 17.0).collect();

    let buffer = session
        .allocate::<f32>(AccessMode::ReadWrite, data.len(), None)
        .expect("Allocation should succeed");
    assert_eq!(session.read_all(&buffer).unwrap(), vec![0.0; data.len()]);

    session.write(&buffer, 0, &data, true).unwrap();
    assert_eq!(session.read_all(&buffer).unwrap(), data);

    // Partial range, non-blocking write, enqueued read.
    session.write(&buffer, 10, &[1.0, 2.0, 3.0], false).unwrap();
    let pending = session.enqueue_read(&buffer, 9, 5).unwrap();
    assert_eq!(pending.wait().unwrap(), vec![data[9], 1.0, 2.0, 3.0, data[13]]);
}

#[test]
#[ignore] // Requires GPU
fn test_out_of_range_transfer() {
    let session = gpu_session();
    let buffer = session.upload(AccessMode::ReadOnly, &[1u32, 2, 3, 4]).unwrap();

    let err = session.read(&buffer, 2, 3).unwrap_err();
    assert!(matches!(err, RuntimeError::Transfer { .. }));
    let err = session.write(&buffer, 4, &[9], true).unwrap_err();
    assert!(matches!(err, RuntimeError::Transfer { .. }));

    assert_eq!(session.read_all(&buffer).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
#[ignore] // Requires GPU
fn test_zero_length_buffer() {
    let session = gpu_session();
    let buffer = session.allocate::<f32>(AccessMode::ReadWrite, 0, None).unwrap();
    assert!(buffer.is_empty());
    assert!(session.read_all(&buffer).unwrap().is_empty());
}

#[test]
#[ignore] // Requires GPU
fn test_vector_add_one_million() {
    const N: usize = 1_048_576;
    let mut session = gpu_session();
    let program = build(&session, "add", ADD_WGSL);
    let mut kernel = program.kernel("add").unwrap();

    let a = session.upload(AccessMode::ReadOnly, &vec![1.0f32; N]).unwrap();
    let b = session.upload(AccessMode::ReadOnly, &vec![2.0f32; N]).unwrap();
    let c = session.allocate::<f32>(AccessMode::WriteOnly, N, None).unwrap();
    kernel.set_args([&a, &b, &c]).unwrap();

    session
        .dispatch(&kernel, NdRange::d1(N as u32), None)
        .expect("Dispatch should succeed")
        .wait()
        .unwrap();

    let result = session.read_all(&c).unwrap();
    assert_eq!(result.len(), N);
    assert!(result.iter().all(|&v| v == 3.0), "every element should be 3.0");
}

#[test]
#[ignore] // Requires GPU
fn test_padded_launch_covers_odd_extent() {
    // Prime length forces a padded launch; the kernel guards its index.
    const N: usize = 1_048_573;
    let mut session = gpu_session();
    let program = build(&session, "add", ADD_WGSL);
    let mut kernel = program.kernel("add").unwrap();

    let a: Vec<f32> = (0..N).map(|i| (i % 97) as f32).collect();
    let b: Vec<f32> = (0..N).map(|i| (i % 13) as f32).collect();
    let expected: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x + y).collect();

    let a = session.upload(AccessMode::ReadOnly, &a).unwrap();
    let b = session.upload(AccessMode::ReadOnly, &b).unwrap();
    let c = session.allocate::<f32>(AccessMode::WriteOnly, N, None).unwrap();
    kernel.set_args([&a, &b, &c]).unwrap();

    let _handle = session.dispatch(&kernel, N as u32, None).unwrap();
    session.finish().unwrap();
    assert_eq!(session.read_all(&c).unwrap(), expected);
}

#[test]
#[ignore] // Requires GPU
fn test_dispatch_is_deterministic() {
    let mut session = gpu_session();
    let program = build(&session, "add", ADD_WGSL);
    let mut kernel = program.kernel("add").unwrap();

    let a: Vec<f32> = (0..4096).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..4096).map(|i| (i as f32).cos()).collect();
    let a = session.upload(AccessMode::ReadOnly, &a).unwrap();
    let b = session.upload(AccessMode::ReadOnly, &b).unwrap();
    let c = session.allocate::<f32>(AccessMode::WriteOnly, 4096, None).unwrap();
    kernel.set_args([&a, &b, &c]).unwrap();

    session.dispatch(&kernel, 4096u32, None).unwrap().wait().unwrap();
    let first = session.read_all(&c).unwrap();
    session.write(&c, 0, &vec![0.0; 4096], true).unwrap();
    session.dispatch(&kernel, 4096u32, None).unwrap().wait().unwrap();
    let second = session.read_all(&c).unwrap();

    let first_bits: Vec<u32> = first.iter().map(|v| v.to_bits()).collect();
    let second_bits: Vec<u32> = second.iter().map(|v| v.to_bits()).collect();
    assert_eq!(first_bits, second_bits);
}

#[test]
#[ignore] // Requires GPU
fn test_launch_error_leaves_buffers_usable() {
    let mut session = gpu_session();
    let program = build(&session, "scale", SCALE_WGSL);
    let mut kernel = program.kernel("scale").unwrap();

    let data = session.upload(AccessMode::ReadWrite, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    kernel.set_arg(0, 3.0f32).unwrap();
    kernel.set_arg(1, &data).unwrap();

    let too_big = session.device().info().max_work_group_size * 2;
    let err = session
        .dispatch(&kernel, NdRange::d1(too_big), Some(NdRange::d1(too_big)))
        .unwrap_err();
    match err {
        RuntimeError::LaunchConfiguration { kernel, global, local, .. } => {
            assert_eq!(kernel, "scale");
            assert_eq!(global, vec![too_big]);
            assert_eq!(local, Some(vec![too_big]));
        }
        other => panic!("expected launch configuration error, got {other}"),
    }

    assert_eq!(session.read_all(&data).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    session.dispatch(&kernel, 4u32, None).unwrap().wait().unwrap();
    assert_vec_approx_eq(&session.read_all(&data).unwrap(), &[3.0, 6.0, 9.0, 12.0], 0.0);
}

#[test]
#[ignore] // Requires GPU
fn test_unbound_argument_is_rejected() {
    let mut session = gpu_session();
    let program = build(&session, "scale", SCALE_WGSL);
    let mut kernel = program.kernel("scale").unwrap();
    kernel.set_arg(0, 2.0f32).unwrap();

    let err = session.dispatch(&kernel, 4u32, None).unwrap_err();
    assert_eq!(err.code(), Some(kestrel_runtime::ErrorCode::InvalidArgument));
    assert!(err.to_string().contains("global [4], local [4]"), "{err}");
}

#[test]
#[ignore] // Requires GPU
fn test_rejected_binding_reports_extents() {
    let mut session = gpu_session();
    let program = build(&session, "add", ADD_WGSL);
    let mut kernel = program.kernel("add").unwrap();

    let a = session.upload(AccessMode::ReadOnly, &[1.0f32; 8]).unwrap();
    let b = session.upload(AccessMode::ReadOnly, &[2.0f32; 8]).unwrap();
    let read_only_out = session.upload(AccessMode::ReadOnly, &[0.0f32; 8]).unwrap();
    kernel.set_args([&a, &b, &read_only_out]).unwrap();

    let err = session.dispatch(&kernel, 8u32, None).unwrap_err();
    assert_eq!(err.code(), Some(kestrel_runtime::ErrorCode::Validation));
    let message = err.to_string();
    assert!(message.contains("'add'"), "{message}");
    assert!(message.contains("global [8], local [8]"), "{message}");

    let c = session.allocate::<f32>(AccessMode::ReadWrite, 8, None).unwrap();
    kernel.set_arg(2, &c).unwrap();
    session.dispatch(&kernel, 8u32, None).unwrap().wait().unwrap();
    assert_vec_approx_eq(&session.read_all(&c).unwrap(), &[3.0; 8], 0.0);
}

#[test]
#[ignore] // Requires GPU
fn test_image_region_transfer() {
    let session = gpu_session();
    let (w, h) = (37u32, 11u32);
    let texels: Vec<f32> = (0..w * h).map(|i| i as f32).collect();

    let image = session
        .allocate_image(AccessMode::ReadWrite, ImageFormat::R32Float, w, h, Some(&texels))
        .expect("Image allocation should succeed");
    assert_eq!(session.read_image(&image, image.full_region()).unwrap(), texels);

    let region = Region::new([5, 3], [4, 2]);
    let expected: Vec<f32> = (3..5)
        .flat_map(|y| (5..9).map(move |x| (y * w + x) as f32))
        .collect();
    assert_eq!(session.read_image(&image, region).unwrap(), expected);

    session.write_image(&image, region, &[-1.0; 8], true).unwrap();
    let after = session.read_image(&image, region).unwrap();
    assert_eq!(after, vec![-1.0; 8]);

    let outside = Region::new([34, 0], [4, 1]);
    assert!(matches!(
        session.read_image(&image, outside),
        Err(RuntimeError::Transfer { .. })
    ));
}

#[test]
#[ignore] // Requires GPU
#[should_panic(expected = "used in session")]
fn test_foreign_buffer_is_a_programming_error() {
    let mut first = gpu_session();
    let second = gpu_session();
    let program = build(&first, "scale", SCALE_WGSL);
    let mut kernel = program.kernel("scale").unwrap();

    let foreign = second.upload(AccessMode::ReadWrite, &[1.0f32; 4]).unwrap();
    kernel.set_arg(0, 1.0f32).unwrap();
    kernel.set_arg(1, &foreign).unwrap();
    let _ = first.dispatch(&kernel, 4u32, None);
}

#[test]
#[ignore] // Requires GPU
fn test_pipeline_cache_reuses_specializations() {
    let mut session = gpu_session();
    let program = build(&session, "scale", SCALE_WGSL);
    let mut kernel = program.kernel("scale").unwrap();
    let data = session.upload(AccessMode::ReadWrite, &[1.0f32; 64]).unwrap();
    kernel.set_args([1.0f32]).unwrap();
    kernel.set_arg(1, &data).unwrap();

    for _ in 0..3 {
        let _handle = session.dispatch(&kernel, 64u32, Some(NdRange::d1(16))).unwrap();
    }
    let _handle = session.dispatch(&kernel, 64u32, Some(NdRange::d1(32))).unwrap();
    session.finish().unwrap();

    let debug = format!("{session:?}");
    assert!(debug.contains("pipelines: 2"), "{debug}");
}
