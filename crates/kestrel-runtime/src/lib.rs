//! Host-side accelerator session and dispatch layer.
//!
//! This crate finds a compute device, builds kernel programs for it, moves
//! data between host and device memory and launches kernels over 1-3
//! dimensional index spaces. It uses `wgpu` as the hardware abstraction
//! layer and WGSL as the kernel language.
//!
//! # Architecture
//!
//! 1. **Registry** - enumerate platforms and select one device by predicate
//! 2. **Session** - context and in-order queue for the selected device
//! 3. **Program** - validate kernel source, list entry points
//! 4. **Dispatch** - bind arguments positionally and launch
//! 5. **Transfer** - buffers and images, blocking or enqueued reads
//!
//! # Example
//!
//! ```no_run
//! use kestrel_runtime::{
//!     discover, predicate, select_device, AccessMode, NdRange, ProgramSource, Session,
//!     SessionConfig, WgpuPlatforms,
//! };
//!
//! const SCALE: &str = r#"
//! @group(0) @binding(0) var<uniform> factor: f32;
//! @group(0) @binding(1) var<storage, read_write> data: array<f32>;
//!
//! @compute @workgroup_size(#{WORKGROUP_SIZE_X}, #{WORKGROUP_SIZE_Y}, #{WORKGROUP_SIZE_Z})
//! fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
//!     if (gid.x < arrayLength(&data)) {
//!         data[gid.x] = data[gid.x] * factor;
//!     }
//! }
//! "#;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::from_env();
//!     let source = WgpuPlatforms::from_config(&config);
//!     let platforms = discover(&source)?;
//!     let device = select_device(&source, &platforms, predicate::is_gpu())?;
//!     let mut session = Session::initialize(&device, config)?;
//!
//!     let program = ProgramSource::load("scale", SCALE)
//!         .build(&[session.device()])?;
//!     let mut kernel = program.kernel("scale")?;
//!
//!     let data = session.upload(AccessMode::ReadWrite, &[1.0f32, 2.0, 3.0, 4.0])?;
//!     kernel.set_arg(0, 2.0f32)?;
//!     kernel.set_arg(1, &data)?;
//!     session.dispatch(&kernel, NdRange::d1(4), None)?.wait()?;
//!
//!     println!("{:?}", session.read_all(&data)?);
//!     Ok(())
//! }
//! ```

mod buffer;
mod config;
mod dispatch;
mod error;
mod launch;
pub mod profile;
mod program;
pub mod registry;
mod session;

pub use buffer::{AccessMode, DeviceBuffer, DeviceImage, ImageFormat, PendingRead, Region};
pub use config::{parse_backends, SessionConfig};
pub use dispatch::{BufferArg, DispatchHandle, ImageArg, Kernel, KernelArg, Scalar};
pub use error::{ErrorCode, Result, RuntimeError};
pub use launch::{resolve as resolve_launch, Launch, LaunchLimits, NdRange};
pub use naga_oil::compose::ShaderDefValue;
pub use program::{Program, ProgramSource, WORKGROUP_SIZE_DEFS};
pub use registry::{
    describe_platforms, discover, predicate, select_device, Device, DeviceInfo, DeviceKind,
    Platform, PlatformSource, WgpuPlatforms,
};
pub use session::{ContextId, Session};
