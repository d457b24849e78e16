//! Kernel argument binding and dispatch.
//!
//! Arguments are positional: argument `i` is `@group(0) @binding(i)` of the
//! entry point. Scalars travel in a small uniform buffer, buffers as storage
//! buffers and images as sampled or storage textures, depending on their
//! access mode.

use crate::buffer::{AccessMode, DeviceBuffer, DeviceImage, ImageFormat};
use crate::error::{ErrorCode, Result, RuntimeError};
use crate::launch::{self, LaunchLimits, NdRange};
use crate::program::{KernelSignature, Program};
use crate::session::{ContextId, Session};
use bytemuck::Pod;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Uniform buffers are padded to this many bytes.
const UNIFORM_SIZE: usize = 16;

/// A scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// `u32`
    U32(u32),
    /// `i32`
    I32(i32),
    /// `f32`
    F32(f32),
    /// `f64`; needs a device with double-precision support.
    F64(f64),
}

impl Scalar {
    fn to_uniform_bytes(self) -> [u8; UNIFORM_SIZE] {
        let mut bytes = [0u8; UNIFORM_SIZE];
        match self {
            Scalar::U32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::I32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::F32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::F64(v) => bytes[..8].copy_from_slice(&v.to_le_bytes()),
        }
        bytes
    }
}

/// A buffer bound as a kernel argument.
#[derive(Debug, Clone)]
pub struct BufferArg {
    buffer: Arc<wgpu::Buffer>,
    access: AccessMode,
    context: ContextId,
}

/// An image bound as a kernel argument.
#[derive(Debug, Clone)]
pub struct ImageArg {
    view: Arc<wgpu::TextureView>,
    access: AccessMode,
    format: ImageFormat,
    context: ContextId,
}

/// A value bound to one argument slot.
#[derive(Debug, Clone)]
pub enum KernelArg {
    /// Passed by value.
    Scalar(Scalar),
    /// A device buffer.
    Buffer(BufferArg),
    /// A device image.
    Image(ImageArg),
}

impl KernelArg {
    fn binding_kind(&self) -> BindingKind {
        match self {
            KernelArg::Scalar(_) => BindingKind::Uniform,
            KernelArg::Buffer(b) => BindingKind::Storage {
                read_only: b.access == AccessMode::ReadOnly,
            },
            KernelArg::Image(i) => match i.access {
                AccessMode::ReadOnly => BindingKind::SampledImage,
                AccessMode::WriteOnly => BindingKind::StorageImage {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: i.format,
                },
                AccessMode::ReadWrite => BindingKind::StorageImage {
                    access: wgpu::StorageTextureAccess::ReadWrite,
                    format: i.format,
                },
            },
        }
    }

    fn context(&self) -> Option<ContextId> {
        match self {
            KernelArg::Scalar(_) => None,
            KernelArg::Buffer(b) => Some(b.context),
            KernelArg::Image(i) => Some(i.context),
        }
    }
}

impl From<Scalar> for KernelArg {
    fn from(value: Scalar) -> Self {
        KernelArg::Scalar(value)
    }
}

impl From<u32> for KernelArg {
    fn from(value: u32) -> Self {
        KernelArg::Scalar(Scalar::U32(value))
    }
}

impl From<i32> for KernelArg {
    fn from(value: i32) -> Self {
        KernelArg::Scalar(Scalar::I32(value))
    }
}

impl From<f32> for KernelArg {
    fn from(value: f32) -> Self {
        KernelArg::Scalar(Scalar::F32(value))
    }
}

impl From<f64> for KernelArg {
    fn from(value: f64) -> Self {
        KernelArg::Scalar(Scalar::F64(value))
    }
}

impl<T: Pod> From<&DeviceBuffer<T>> for KernelArg {
    fn from(buffer: &DeviceBuffer<T>) -> Self {
        KernelArg::Buffer(BufferArg {
            buffer: Arc::clone(&buffer.buffer),
            access: buffer.access,
            context: buffer.context,
        })
    }
}

impl From<&DeviceImage> for KernelArg {
    fn from(image: &DeviceImage) -> Self {
        KernelArg::Image(ImageArg {
            view: Arc::clone(&image.view),
            access: image.access,
            format: image.format,
            context: image.context,
        })
    }
}

/// Layout-relevant shape of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BindingKind {
    Uniform,
    Storage { read_only: bool },
    SampledImage,
    StorageImage {
        access: wgpu::StorageTextureAccess,
        format: ImageFormat,
    },
}

impl BindingKind {
    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            BindingKind::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Storage { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::SampledImage => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingKind::StorageImage { access, format } => wgpu::BindingType::StorageTexture {
                access,
                format: format.to_wgpu(),
                view_dimension: wgpu::TextureViewDimension::D2,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

/// A named entry point with its argument slots.
///
/// Slots keep their values between dispatches until rebound.
#[derive(Debug, Clone)]
pub struct Kernel {
    program: Program,
    name: String,
    bindings: Vec<u32>,
    args: Vec<Option<KernelArg>>,
}

impl Kernel {
    pub(crate) fn new(program: Program, signature: &KernelSignature) -> Self {
        let slots = signature.bindings.last().map_or(0, |&b| b as usize + 1);
        Self {
            program,
            name: signature.name.clone(),
            bindings: signature.bindings.clone(),
            args: vec![None; slots],
        }
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of argument slots.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Bind argument `index`.
    ///
    /// # Errors
    /// [`RuntimeError::AcceleratorRuntime`] with [`ErrorCode::InvalidArgument`]
    /// if the kernel has no such slot.
    pub fn set_arg(&mut self, index: usize, arg: impl Into<KernelArg>) -> Result<()> {
        let arity = self.args.len();
        let slot = self.args.get_mut(index).ok_or_else(|| {
            RuntimeError::runtime(
                ErrorCode::InvalidArgument,
                format!(
                    "kernel '{}' has {arity} argument slots, cannot bind slot {index}",
                    self.name
                ),
            )
        })?;
        *slot = Some(arg.into());
        Ok(())
    }

    /// Bind arguments `0..args.len()` in order.
    pub fn set_args<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<KernelArg>,
    {
        self.set_args_from(0, args)
    }

    /// Bind consecutive arguments starting at slot `first`.
    pub fn set_args_from<I>(&mut self, first: usize, args: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<KernelArg>,
    {
        for (offset, arg) in args.into_iter().enumerate() {
            self.set_arg(first + offset, arg)?;
        }
        Ok(())
    }

    /// Bound arguments for the bindings the entry point uses. `launch`
    /// describes the extents for error messages.
    fn bound(&self, launch: &str) -> Result<Vec<(u32, &KernelArg)>> {
        self.bindings
            .iter()
            .map(|&binding| {
                self.args[binding as usize]
                    .as_ref()
                    .map(|arg| (binding, arg))
                    .ok_or_else(|| {
                        RuntimeError::runtime(
                            ErrorCode::InvalidArgument,
                            format!(
                                "argument {binding} of kernel '{}' is not bound ({launch})",
                                self.name
                            ),
                        )
                    })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct PipelineCacheKey {
    program: u64,
    entry_point: String,
    local: [u32; 3],
    signature: Vec<(u32, BindingKind)>,
}

struct CachedPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Compute pipelines keyed by program, entry point, work-group size and
/// argument layout. Created lazily on first dispatch.
#[derive(Default)]
pub(crate) struct PipelineCache {
    entries: HashMap<PipelineCacheKey, Arc<CachedPipeline>>,
}

impl PipelineCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle to a submitted dispatch.
#[must_use = "dropping a dispatch handle does not wait for the dispatch"]
#[derive(Debug)]
pub struct DispatchHandle {
    gpu: Arc<wgpu::Device>,
    submission: wgpu::SubmissionIndex,
    kernel: String,
}

impl DispatchHandle {
    /// Block until this dispatch (and all work submitted before it) has
    /// completed.
    pub fn wait(self) -> Result<()> {
        self.gpu
            .poll(wgpu::Maintain::WaitForSubmissionIndex(self.submission));
        tracing::trace!(kernel = %self.kernel, "dispatch completed");
        Ok(())
    }

    /// Kernel that was dispatched.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }
}

impl Session {
    /// Enqueue `kernel` over `global` with an optional work-group size.
    ///
    /// Returns once the work is submitted. Dispatches on one session run in
    /// submission order.
    ///
    /// # Errors
    /// * [`RuntimeError::LaunchConfiguration`] if `global`/`local` cannot be
    ///   launched on this device. Nothing is enqueued and all buffers stay
    ///   usable.
    /// * [`RuntimeError::AcceleratorRuntime`] if an argument is unbound or
    ///   the runtime rejects the dispatch.
    /// * [`RuntimeError::Compile`] if specializing the kernel fails.
    ///
    /// # Panics
    /// If a bound buffer or image belongs to another session.
    #[tracing::instrument(skip_all, fields(kernel = %kernel.name))]
    pub fn dispatch(
        &mut self,
        kernel: &Kernel,
        global: impl Into<NdRange>,
        local: Option<NdRange>,
    ) -> Result<DispatchHandle> {
        let global = global.into();
        if !kernel.program.is_built_for(&self.device) {
            return Err(RuntimeError::runtime(
                ErrorCode::InvalidArgument,
                format!(
                    "program '{}' was not built for device '{}'",
                    kernel.program.label(),
                    self.device.name()
                ),
            ));
        }

        let limits = LaunchLimits::from(self.device.info());
        let launch = launch::resolve(&kernel.name, &global, local.as_ref(), &limits)?;
        tracing::debug!(
            global = ?global.dims(),
            local = ?launch.local,
            workgroups = ?launch.workgroups,
            padded = launch.padded,
            "launch resolved"
        );

        let extents = format!(
            "global {:?}, local {:?}",
            global.dims(),
            &launch.local[..global.rank()]
        );
        let bound = kernel.bound(&extents)?;
        for (_, arg) in &bound {
            if let Some(context) = arg.context() {
                self.check_context(context);
            }
        }

        let signature: Vec<(u32, BindingKind)> = bound
            .iter()
            .map(|(binding, arg)| (*binding, arg.binding_kind()))
            .collect();
        let cached = self.pipeline(kernel, launch.local, signature, &extents)?;

        let [x, y, z] = launch.workgroups;
        let (submission, error) = self.scoped(|| {
            let uniforms: Vec<Option<wgpu::Buffer>> = bound
                .iter()
                .map(|(_, arg)| match arg {
                    KernelArg::Scalar(scalar) => Some(self.gpu.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: Some("scalar argument"),
                            contents: &scalar.to_uniform_bytes(),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                    _ => None,
                })
                .collect();

            let entries: Vec<wgpu::BindGroupEntry> = bound
                .iter()
                .zip(&uniforms)
                .map(|((binding, arg), uniform)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: match (arg, uniform) {
                        (KernelArg::Buffer(b), _) => b.buffer.as_entire_binding(),
                        (KernelArg::Image(i), _) => wgpu::BindingResource::TextureView(&i.view),
                        (KernelArg::Scalar(_), Some(u)) => u.as_entire_binding(),
                        (KernelArg::Scalar(_), None) => unreachable!("scalar without uniform"),
                    },
                })
                .collect();

            let bind_group = self.gpu.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&kernel.name),
                layout: &cached.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = self
                .gpu
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&kernel.name),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&kernel.name),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&cached.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(x, y, z);
            }
            self.queue.submit(Some(encoder.finish()))
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::runtime(
                code,
                format!("dispatch of kernel '{}' ({extents}) failed: {message}", kernel.name),
            ));
        }

        Ok(DispatchHandle {
            gpu: Arc::clone(&self.gpu),
            submission,
            kernel: kernel.name.clone(),
        })
    }

    /// Get or create the pipeline for `kernel` at work-group size `local`.
    fn pipeline(
        &mut self,
        kernel: &Kernel,
        local: [u32; 3],
        signature: Vec<(u32, BindingKind)>,
        extents: &str,
    ) -> Result<Arc<CachedPipeline>> {
        let key = PipelineCacheKey {
            program: kernel.program.id(),
            entry_point: kernel.name.clone(),
            local,
            signature,
        };
        if let Some(cached) = self.pipelines.entries.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let wgsl = kernel.program.specialize(self.device.info(), local)?;
        let label = format!("{}::{} {local:?}", kernel.program.label(), kernel.name);

        let (cached, error) = self.scoped(|| {
            let shader_module = self.gpu.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            });

            let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = key
                .signature
                .iter()
                .map(|(binding, kind)| kind.layout_entry(*binding))
                .collect();
            let bind_group_layout = self
                .gpu
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label} layout")),
                    entries: &layout_entries,
                });

            let pipeline_layout = self
                .gpu
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&format!("{label} pipeline layout")),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });

            let pipeline = self
                .gpu
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&label),
                    layout: Some(&pipeline_layout),
                    module: &shader_module,
                    entry_point: Some(&kernel.name),
                    compilation_options: Default::default(),
                    cache: None,
                });

            CachedPipeline {
                pipeline,
                bind_group_layout,
            }
        });
        if let Some((code, message)) = error {
            return Err(RuntimeError::runtime(
                code,
                format!(
                    "creating pipeline for kernel '{}' ({extents}) failed: {message}",
                    kernel.name
                ),
            ));
        }

        tracing::debug!(pipeline = %label, "pipeline created");
        let cached = Arc::new(cached);
        self.pipelines.entries.insert(key, Arc::clone(&cached));
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramSource;
    use crate::registry::tests::info;
    use crate::registry::{Device, DeviceKind};

    const AXPY: &str = r#"
@group(0) @binding(0) var<uniform> alpha: f32;
@group(0) @binding(1) var<storage, read> x: array<f32>;
@group(0) @binding(2) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, #{WORKGROUP_SIZE_Y}, #{WORKGROUP_SIZE_Z})
fn axpy(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&y)) {
        y[gid.x] = alpha * x[gid.x] + y[gid.x];
    }
}
"#;

    fn kernel() -> Kernel {
        let device = Device::new("test", info("gpu0", DeviceKind::DiscreteGpu, true, false));
        ProgramSource::load("axpy", AXPY)
            .build(&[&device])
            .unwrap()
            .kernel("axpy")
            .unwrap()
    }

    #[test]
    fn test_kernel_slots() {
        let mut kernel = kernel();
        assert_eq!(kernel.name(), "axpy");
        assert_eq!(kernel.arity(), 3);

        let err = kernel.set_arg(3, 1.0f32).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }

    #[test]
    fn test_unbound_argument() {
        let mut kernel = kernel();
        kernel.set_arg(0, 2.0f32).unwrap();

        let err = kernel.bound("global [8], local [8]").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
        assert!(err.to_string().contains("argument 1"));
        assert!(err.to_string().contains("global [8], local [8]"));
    }

    #[test]
    fn test_scalar_uniform_layout() {
        let bytes = Scalar::U32(7).to_uniform_bytes();
        assert_eq!(&bytes[..4], &7u32.to_le_bytes());
        assert!(bytes[4..].iter().all(|&b| b == 0));

        let bytes = Scalar::F64(1.5).to_uniform_bytes();
        assert_eq!(&bytes[..8], &1.5f64.to_le_bytes());
    }

    #[test]
    fn test_binding_kinds() {
        assert_eq!(KernelArg::from(3u32).binding_kind(), BindingKind::Uniform);
        assert_eq!(
            KernelArg::from(Scalar::I32(-1)).binding_kind(),
            BindingKind::Uniform
        );
        let entry = BindingKind::Storage { read_only: true }.layout_entry(4);
        assert_eq!(entry.binding, 4);
        assert_eq!(entry.visibility, wgpu::ShaderStages::COMPUTE);
    }
}
