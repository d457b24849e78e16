//! Program building.
//!
//! Kernel source is WGSL. It goes through naga_oil for preprocessing and
//! shader defs, then through naga validation for each target device. The
//! work-group size is a shader def, so a built program is a template that is
//! specialized per local size when it is dispatched.

use crate::error::{Result, RuntimeError};
use crate::registry::{Device, DeviceInfo};
use naga_oil::compose::{Composer, NagaModuleDescriptor, ShaderDefValue};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shader defs carrying the work-group size, one per dimension.
pub const WORKGROUP_SIZE_DEFS: [&str; 3] =
    ["WORKGROUP_SIZE_X", "WORKGROUP_SIZE_Y", "WORKGROUP_SIZE_Z"];

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Kernel source text plus the shader defs to compile it with.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    label: String,
    text: String,
    defs: HashMap<String, ShaderDefValue>,
}

impl ProgramSource {
    /// Wrap source text. `label` names the program in diagnostics.
    pub fn load(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            defs: HashMap::new(),
        }
    }

    /// Add a shader def visible to `#ifdef` and `#{NAME}` substitution.
    pub fn with_def(mut self, name: impl Into<String>, value: ShaderDefValue) -> Self {
        self.defs.insert(name.into(), value);
        self
    }

    /// Program label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Build the program for every device in `devices`.
    ///
    /// # Errors
    /// [`RuntimeError::Compile`] with one log section per failing device, or
    /// when `devices` is empty.
    #[tracing::instrument(skip_all, fields(program = %self.label))]
    pub fn build(&self, devices: &[&Device]) -> Result<Program> {
        if devices.is_empty() {
            return Err(RuntimeError::Compile {
                program: self.label.clone(),
                log: "no target devices".to_string(),
            });
        }

        let mut log = String::new();
        let mut kernels = None;
        for device in devices {
            match self.compile(device.info(), [1, 1, 1]) {
                Ok((module, info)) => {
                    if kernels.is_none() {
                        kernels = Some(kernel_signatures(&module, &info));
                    }
                }
                Err(diagnostic) => {
                    let _ = writeln!(log, "device '{}':\n{}", device.name(), diagnostic.trim_end());
                }
            }
        }

        if !log.is_empty() {
            tracing::debug!(log = %log, "build failed");
            return Err(RuntimeError::Compile {
                program: self.label.clone(),
                log,
            });
        }
        let kernels = kernels.unwrap_or_default();
        if kernels.is_empty() {
            return Err(RuntimeError::Compile {
                program: self.label.clone(),
                log: "program declares no compute entry points".to_string(),
            });
        }

        let program = Program {
            inner: Arc::new(ProgramInner {
                id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
                source: self.clone(),
                devices: devices.iter().map(|d| d.name().to_string()).collect(),
                kernels,
            }),
        };
        tracing::debug!(
            id = program.inner.id,
            entry_points = ?program.entry_points(),
            "program built"
        );
        Ok(program)
    }

    /// Compose and validate for one device with the given work-group size.
    /// Errors are returned as diagnostic text.
    fn compile(
        &self,
        device: &DeviceInfo,
        local: [u32; 3],
    ) -> std::result::Result<(naga::Module, naga::valid::ModuleInfo), String> {
        let capabilities = capabilities(device);

        let mut shader_defs = self.defs.clone();
        for (name, size) in WORKGROUP_SIZE_DEFS.iter().zip(local) {
            shader_defs.insert(name.to_string(), ShaderDefValue::UInt(size));
        }

        let mut composer = Composer::default().with_capabilities(capabilities);
        let module = composer
            .make_naga_module(NagaModuleDescriptor {
                source: &self.text,
                file_path: &self.label,
                shader_defs,
                ..Default::default()
            })
            .map_err(|e| e.emit_to_string(&composer))?;

        let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), capabilities)
            .validate(&module)
            .map_err(|e| error_chain(&e))?;

        Ok((module, info))
    }
}

/// Validation capabilities a device supports.
fn capabilities(device: &DeviceInfo) -> naga::valid::Capabilities {
    let mut caps = naga::valid::Capabilities::empty();
    if device.supports_f64() {
        caps |= naga::valid::Capabilities::FLOAT64;
    }
    if device.has_extension("shader_int64") {
        caps |= naga::valid::Capabilities::SHADER_INT64;
    }
    caps
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(text, ": {cause}");
        source = cause.source();
    }
    text
}

/// Compute entry point and the `@group(0)` bindings it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSignature {
    pub name: String,
    pub bindings: Vec<u32>,
}

fn kernel_signatures(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
) -> Vec<KernelSignature> {
    module
        .entry_points
        .iter()
        .enumerate()
        .filter(|(_, ep)| ep.stage == naga::ShaderStage::Compute)
        .map(|(index, ep)| {
            let usage = info.get_entry_point(index);
            let mut bindings: Vec<u32> = module
                .global_variables
                .iter()
                .filter(|(handle, _)| !usage[*handle].is_empty())
                .filter_map(|(_, var)| var.binding.as_ref())
                .filter(|binding| binding.group == 0)
                .map(|binding| binding.binding)
                .collect();
            bindings.sort_unstable();
            bindings.dedup();
            KernelSignature {
                name: ep.name.clone(),
                bindings,
            }
        })
        .collect()
}

/// A built program.
///
/// Cheap to clone; kernels keep their program alive.
#[derive(Debug, Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

#[derive(Debug)]
struct ProgramInner {
    id: u64,
    source: ProgramSource,
    devices: Vec<String>,
    kernels: Vec<KernelSignature>,
}

impl Program {
    /// Program label.
    pub fn label(&self) -> &str {
        &self.inner.source.label
    }

    /// Names of the `@compute` entry points, in declaration order.
    pub fn entry_points(&self) -> Vec<&str> {
        self.inner.kernels.iter().map(|k| k.name.as_str()).collect()
    }

    /// Names of the devices this program was built for.
    pub fn devices(&self) -> &[String] {
        &self.inner.devices
    }

    /// Create a kernel for the entry point `name`.
    ///
    /// # Errors
    /// [`RuntimeError::KernelNotFound`] if the program has no such entry point.
    pub fn kernel(&self, name: &str) -> Result<crate::Kernel> {
        let signature = self
            .inner
            .kernels
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| RuntimeError::KernelNotFound {
                name: name.to_string(),
                program: self.label().to_string(),
                available: self
                    .entry_points()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })?;
        Ok(crate::Kernel::new(self.clone(), signature))
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn is_built_for(&self, device: &Device) -> bool {
        self.inner.devices.iter().any(|d| d == device.name())
    }

    /// Specialize for `local` on `device` and emit WGSL for the runtime.
    pub(crate) fn specialize(&self, device: &DeviceInfo, local: [u32; 3]) -> Result<String> {
        let compile_error = |diagnostic: String| RuntimeError::Compile {
            program: self.label().to_string(),
            log: format!("device '{}' (local {local:?}):\n{}", device.name, diagnostic.trim_end()),
        };

        let (module, info) = self.inner.source.compile(device, local).map_err(compile_error)?;
        naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
            .map_err(|e| compile_error(e.to_string()))
    }
}
