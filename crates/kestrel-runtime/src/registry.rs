//! Platform and device discovery.
//!
//! Discovery produces plain values: callers hold the platform list and pass
//! it to [`select_device`] together with a capability predicate. Nothing is
//! kept in process-wide state.
//!
//! Under wgpu a *platform* is a backend (Vulkan, Metal, DX12, GL) that
//! reports at least one adapter, and a *device* is one of its adapters.

use crate::config::SessionConfig;
use crate::error::{Result, RuntimeError};
use std::fmt;
use std::sync::Arc;

/// Backends in the order platforms are reported.
const BACKEND_ORDER: [(wgpu::Backend, wgpu::Backends); 4] = [
    (wgpu::Backend::Vulkan, wgpu::Backends::VULKAN),
    (wgpu::Backend::Metal, wgpu::Backends::METAL),
    (wgpu::Backend::Dx12, wgpu::Backends::DX12),
    (wgpu::Backend::Gl, wgpu::Backends::GL),
];

/// Features reported to predicates as extension names.
const EXTENSIONS: [(wgpu::Features, &str); 5] = [
    (wgpu::Features::SHADER_F64, "shader_f64"),
    (wgpu::Features::SHADER_F16, "shader_f16"),
    (wgpu::Features::SHADER_INT64, "shader_int64"),
    (wgpu::Features::TIMESTAMP_QUERY, "timestamp_query"),
    (wgpu::Features::PUSH_CONSTANTS, "push_constants"),
];

/// Extension name advertised by devices with double-precision support.
pub const EXT_F64: &str = "shader_f64";

/// An accelerator runtime endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Platform name (the backend name under wgpu).
    pub name: String,
    /// Vendor / driver family reported by the platform's first device.
    pub vendor: String,
    /// Driver version string.
    pub version: String,
    /// Backend this platform enumerates, if it is backed by wgpu.
    pub backend: Option<wgpu::Backend>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.vendor, self.version)
    }
}

/// Device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Discrete GPU with its own memory.
    DiscreteGpu,
    /// GPU sharing memory with the host.
    IntegratedGpu,
    /// Virtualised GPU.
    VirtualGpu,
    /// Software rasteriser or CPU implementation.
    Cpu,
    /// Anything else.
    Other,
}

impl DeviceKind {
    /// True for every GPU class.
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            DeviceKind::DiscreteGpu | DeviceKind::IntegratedGpu | DeviceKind::VirtualGpu
        )
    }
}

impl From<wgpu::DeviceType> for DeviceKind {
    fn from(ty: wgpu::DeviceType) -> Self {
        match ty {
            wgpu::DeviceType::DiscreteGpu => DeviceKind::DiscreteGpu,
            wgpu::DeviceType::IntegratedGpu => DeviceKind::IntegratedGpu,
            wgpu::DeviceType::VirtualGpu => DeviceKind::VirtualGpu,
            wgpu::DeviceType::Cpu => DeviceKind::Cpu,
            wgpu::DeviceType::Other => DeviceKind::Other,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::DiscreteGpu => "discrete GPU",
            DeviceKind::IntegratedGpu => "integrated GPU",
            DeviceKind::VirtualGpu => "virtual GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Capabilities of a device, as seen by selection predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name.
    pub name: String,
    /// Vendor name.
    pub vendor: String,
    /// Driver name and version.
    pub driver: String,
    /// Device class.
    pub kind: DeviceKind,
    /// Whether the device can currently be used.
    pub available: bool,
    /// Supported optional extensions (e.g. [`EXT_F64`]).
    pub extensions: Vec<String>,
    /// Maximum number of work-items in one work-group.
    pub max_work_group_size: u32,
    /// Number of index-space dimensions.
    pub max_work_item_dimensions: u32,
    /// Maximum work-group extent per dimension.
    pub max_work_item_sizes: [u32; 3],
    /// Maximum number of work-groups per dimension in one dispatch.
    pub max_work_groups_per_dimension: u32,
    /// Number of compute units, when the runtime reports it.
    pub compute_units: Option<u32>,
}

impl DeviceInfo {
    /// Check whether an extension is advertised.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    /// Check for double-precision support.
    pub fn supports_f64(&self) -> bool {
        self.has_extension(EXT_F64)
    }

    fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let limits = adapter.limits();
        let features = adapter.features();

        let extensions = EXTENSIONS
            .iter()
            .filter(|(feature, _)| features.contains(*feature))
            .map(|(_, name)| name.to_string())
            .collect();

        let driver = match (info.driver.is_empty(), info.driver_info.is_empty()) {
            (false, false) => format!("{} {}", info.driver, info.driver_info),
            (false, true) => info.driver.clone(),
            (true, false) => info.driver_info.clone(),
            (true, true) => "unknown".to_string(),
        };

        Self {
            name: info.name.clone(),
            vendor: vendor_name(info.vendor),
            driver,
            kind: info.device_type.into(),
            available: true,
            extensions,
            max_work_group_size: limits.max_compute_invocations_per_workgroup,
            max_work_item_dimensions: 3,
            max_work_item_sizes: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_work_groups_per_dimension: limits.max_compute_workgroups_per_dimension,
            compute_units: None,
        }
    }
}

fn vendor_name(id: u32) -> String {
    match id {
        0x10DE => "NVIDIA".to_string(),
        0x1002 | 0x1022 => "AMD".to_string(),
        0x8086 => "Intel".to_string(),
        0x106B => "Apple".to_string(),
        0x13B5 => "ARM".to_string(),
        0x5143 => "Qualcomm".to_string(),
        0x10005 => "Mesa".to_string(),
        other => format!("0x{other:04x}"),
    }
}

/// A selectable compute device.
///
/// Devices returned by [`WgpuPlatforms`] carry the adapter needed to open a
/// [`Session`](crate::Session). Devices built with [`Device::new`] only carry
/// capabilities; they can be selected but not initialized.
#[derive(Debug, Clone)]
pub struct Device {
    platform: String,
    info: DeviceInfo,
    adapter: Option<Arc<wgpu::Adapter>>,
}

impl Device {
    /// Describe a device without a runtime handle.
    pub fn new(platform: impl Into<String>, info: DeviceInfo) -> Self {
        Self {
            platform: platform.into(),
            info,
            adapter: None,
        }
    }

    /// Wrap a wgpu adapter.
    pub fn from_adapter(platform: impl Into<String>, adapter: wgpu::Adapter) -> Self {
        Self {
            platform: platform.into(),
            info: DeviceInfo::from_adapter(&adapter),
            adapter: Some(Arc::new(adapter)),
        }
    }

    /// Device capabilities.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Name of the platform this device belongs to.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Whether the device reports itself available.
    pub fn is_available(&self) -> bool {
        self.info.available
    }

    pub(crate) fn adapter(&self) -> Option<&wgpu::Adapter> {
        self.adapter.as_deref()
    }
}

/// Source of platforms and devices.
///
/// [`WgpuPlatforms`] is the real implementation; other sources can stand in
/// for it (e.g. in tests).
pub trait PlatformSource {
    /// Enumerate platforms in a stable order.
    fn platforms(&self) -> Result<Vec<Platform>>;

    /// Enumerate one platform's devices in a stable order.
    fn devices(&self, platform: &Platform) -> Result<Vec<Device>>;
}

/// Platforms and devices exposed by a wgpu instance.
pub struct WgpuPlatforms {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuPlatforms {
    /// Create an instance restricted to `backends`.
    pub fn new(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }

    /// Create an instance using the backends from `config`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.backends)
    }

    fn adapters(&self, backend: wgpu::Backend) -> Vec<wgpu::Adapter> {
        BACKEND_ORDER
            .iter()
            .find(|(b, _)| *b == backend)
            .filter(|(_, flag)| self.backends.contains(*flag))
            .map(|(_, flag)| self.instance.enumerate_adapters(*flag))
            .unwrap_or_default()
    }
}

impl Default for WgpuPlatforms {
    fn default() -> Self {
        Self::new(wgpu::Backends::all())
    }
}

impl PlatformSource for WgpuPlatforms {
    fn platforms(&self) -> Result<Vec<Platform>> {
        let mut platforms = Vec::new();
        for (backend, _) in BACKEND_ORDER {
            let adapters = self.adapters(backend);
            let Some(first) = adapters.first() else {
                continue;
            };
            let info = first.get_info();
            platforms.push(Platform {
                name: backend_name(backend).to_string(),
                vendor: if info.driver.is_empty() {
                    vendor_name(info.vendor)
                } else {
                    info.driver.clone()
                },
                version: info.driver_info.clone(),
                backend: Some(backend),
            });
        }
        Ok(platforms)
    }

    fn devices(&self, platform: &Platform) -> Result<Vec<Device>> {
        let backend = platform.backend.ok_or_else(|| {
            RuntimeError::runtime(
                crate::ErrorCode::Unsupported,
                format!("platform '{}' is not a wgpu backend", platform.name),
            )
        })?;
        Ok(self
            .adapters(backend)
            .into_iter()
            .map(|adapter| Device::from_adapter(platform.name.clone(), adapter))
            .collect())
    }
}

fn backend_name(backend: wgpu::Backend) -> &'static str {
    match backend {
        wgpu::Backend::Vulkan => "Vulkan",
        wgpu::Backend::Metal => "Metal",
        wgpu::Backend::Dx12 => "DirectX 12",
        wgpu::Backend::Gl => "OpenGL",
        _ => "Other",
    }
}

/// Enumerate platforms.
///
/// # Errors
/// Returns [`RuntimeError::NoPlatformFound`] when the runtime reports none;
/// enumeration failures of the runtime itself are passed through unchanged.
pub fn discover(source: &impl PlatformSource) -> Result<Vec<Platform>> {
    let platforms = source.platforms()?;
    if platforms.is_empty() {
        return Err(RuntimeError::NoPlatformFound);
    }
    tracing::debug!(count = platforms.len(), "platforms discovered");
    Ok(platforms)
}

/// Select the first available device satisfying `predicate`.
///
/// Platforms are searched in discovery order and devices in enumeration
/// order; the search stops at the first match. A platform that fails to
/// enumerate its devices contributes no devices.
///
/// # Errors
/// Returns [`RuntimeError::NoMatchingDevice`] when no device matches.
pub fn select_device<S, P>(source: &S, platforms: &[Platform], predicate: P) -> Result<Device>
where
    S: PlatformSource + ?Sized,
    P: Fn(&Device) -> bool,
{
    let mut searched = 0;
    for platform in platforms {
        let devices = match source.devices(platform) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::debug!(
                    platform = %platform.name,
                    error = %e,
                    "platform contributed no devices"
                );
                continue;
            }
        };

        for device in devices {
            searched += 1;
            if device.is_available() && predicate(&device) {
                tracing::info!(
                    platform = %platform.name,
                    device = %device.name(),
                    kind = %device.info().kind,
                    "device selected"
                );
                return Ok(device);
            }
        }
    }
    Err(RuntimeError::NoMatchingDevice { searched })
}

/// Log a summary of every platform and its devices.
///
/// Returns the number of devices found. Platforms that fail to enumerate are
/// reported and skipped.
pub fn describe_platforms<S>(source: &S, platforms: &[Platform]) -> usize
where
    S: PlatformSource + ?Sized,
{
    let mut total = 0;
    for (p, platform) in platforms.iter().enumerate() {
        tracing::info!(
            index = p,
            name = %platform.name,
            vendor = %platform.vendor,
            version = %platform.version,
            "platform"
        );
        let devices = match source.devices(platform) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(platform = %platform.name, error = %e, "device enumeration failed");
                continue;
            }
        };
        for (d, device) in devices.iter().enumerate() {
            let info = device.info();
            tracing::info!(
                index = d,
                name = %info.name,
                vendor = %info.vendor,
                driver = %info.driver,
                kind = %info.kind,
                available = info.available,
                max_work_group_size = info.max_work_group_size,
                max_work_item_sizes = ?info.max_work_item_sizes,
                extensions = ?info.extensions,
                "device"
            );
        }
        total += devices.len();
    }
    total
}

/// Stock selection predicates.
pub mod predicate {
    use super::{Device, DeviceKind};

    /// Match every device.
    pub fn any() -> impl Fn(&Device) -> bool {
        |_| true
    }

    /// Match GPUs of any class.
    pub fn is_gpu() -> impl Fn(&Device) -> bool {
        |d| d.info().kind.is_gpu()
    }

    /// Match devices of exactly this class.
    pub fn kind(kind: DeviceKind) -> impl Fn(&Device) -> bool {
        move |d| d.info().kind == kind
    }

    /// Match devices with double-precision support.
    pub fn supports_f64() -> impl Fn(&Device) -> bool {
        |d| d.info().supports_f64()
    }

    /// Match devices advertising `name`.
    pub fn has_extension(name: impl Into<String>) -> impl Fn(&Device) -> bool {
        let name = name.into();
        move |d| d.info().has_extension(&name)
    }

    /// Both predicates hold.
    pub fn and<A, B>(a: A, b: B) -> impl Fn(&Device) -> bool
    where
        A: Fn(&Device) -> bool,
        B: Fn(&Device) -> bool,
    {
        move |d| a(d) && b(d)
    }

    /// Either predicate holds.
    pub fn or<A, B>(a: A, b: B) -> impl Fn(&Device) -> bool
    where
        A: Fn(&Device) -> bool,
        B: Fn(&Device) -> bool,
    {
        move |d| a(d) || b(d)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::cell::RefCell;

    pub(crate) fn info(name: &str, kind: DeviceKind, available: bool, f64: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            vendor: "Test".to_string(),
            driver: "1.0".to_string(),
            kind,
            available,
            extensions: if f64 { vec![EXT_F64.to_string()] } else { Vec::new() },
            max_work_group_size: 256,
            max_work_item_dimensions: 3,
            max_work_item_sizes: [256, 256, 64],
            max_work_groups_per_dimension: 65535,
            compute_units: Some(8),
        }
    }

    fn platform(name: &str) -> Platform {
        Platform {
            name: name.to_string(),
            vendor: "Test".to_string(),
            version: "1.0".to_string(),
            backend: None,
        }
    }

    /// In-memory source; `None` device lists fail to enumerate.
    struct FakeSource {
        entries: Vec<(Platform, Option<Vec<DeviceInfo>>)>,
        queried: RefCell<Vec<String>>,
    }

    impl FakeSource {
        fn new(entries: Vec<(&str, Option<Vec<DeviceInfo>>)>) -> Self {
            Self {
                entries: entries
                    .into_iter()
                    .map(|(name, devices)| (platform(name), devices))
                    .collect(),
                queried: RefCell::new(Vec::new()),
            }
        }
    }

    impl PlatformSource for FakeSource {
        fn platforms(&self) -> Result<Vec<Platform>> {
            Ok(self.entries.iter().map(|(p, _)| p.clone()).collect())
        }

        fn devices(&self, platform: &Platform) -> Result<Vec<Device>> {
            self.queried.borrow_mut().push(platform.name.clone());
            let (_, devices) = self
                .entries
                .iter()
                .find(|(p, _)| p.name == platform.name)
                .ok_or_else(|| RuntimeError::runtime(ErrorCode::Internal, "unknown platform"))?;
            match devices {
                Some(devices) => Ok(devices
                    .iter()
                    .cloned()
                    .map(|i| Device::new(platform.name.clone(), i))
                    .collect()),
                None => Err(RuntimeError::runtime(ErrorCode::Internal, "enumeration failed")),
            }
        }
    }

    #[test]
    fn test_discover_empty_is_no_platform() {
        let source = FakeSource::new(vec![]);
        assert!(matches!(discover(&source), Err(RuntimeError::NoPlatformFound)));
    }

    #[test]
    fn test_select_first_match_in_order() {
        let source = FakeSource::new(vec![
            ("cpu-only", Some(vec![info("cpu0", DeviceKind::Cpu, true, true)])),
            (
                "gpus",
                Some(vec![
                    info("gpu0", DeviceKind::IntegratedGpu, true, false),
                    info("gpu1", DeviceKind::DiscreteGpu, true, false),
                ]),
            ),
        ]);
        let platforms = discover(&source).unwrap();

        let device = select_device(&source, &platforms, predicate::is_gpu()).unwrap();
        assert_eq!(device.name(), "gpu0");
        assert_eq!(device.platform(), "gpus");
        assert!(device.info().kind.is_gpu());
    }

    #[test]
    fn test_select_skips_unavailable() {
        let source = FakeSource::new(vec![(
            "gpus",
            Some(vec![
                info("busy", DeviceKind::DiscreteGpu, false, true),
                info("free", DeviceKind::DiscreteGpu, true, true),
            ]),
        )]);
        let platforms = discover(&source).unwrap();

        let device = select_device(&source, &platforms, predicate::supports_f64()).unwrap();
        assert_eq!(device.name(), "free");
        assert!(device.is_available());
    }

    #[test]
    fn test_select_short_circuits() {
        let source = FakeSource::new(vec![
            ("first", Some(vec![info("a", DeviceKind::DiscreteGpu, true, false)])),
            ("second", Some(vec![info("b", DeviceKind::DiscreteGpu, true, false)])),
        ]);
        let platforms = discover(&source).unwrap();

        let device = select_device(&source, &platforms, predicate::any()).unwrap();
        assert_eq!(device.name(), "a");
        assert_eq!(*source.queried.borrow(), vec!["first".to_string()]);
    }

    #[test]
    fn test_select_no_match() {
        let source = FakeSource::new(vec![(
            "gpus",
            Some(vec![
                info("gpu0", DeviceKind::DiscreteGpu, true, false),
                info("gpu1", DeviceKind::DiscreteGpu, false, true),
            ]),
        )]);
        let platforms = discover(&source).unwrap();

        let err = select_device(&source, &platforms, predicate::supports_f64()).unwrap_err();
        assert!(matches!(err, RuntimeError::NoMatchingDevice { searched: 2 }));
    }

    #[test]
    fn test_failing_platform_contributes_nothing() {
        let source = FakeSource::new(vec![
            ("broken", None),
            ("gpus", Some(vec![info("gpu0", DeviceKind::DiscreteGpu, true, true)])),
        ]);
        let platforms = discover(&source).unwrap();
        assert_eq!(platforms.len(), 2);

        let device = select_device(&source, &platforms, predicate::is_gpu()).unwrap();
        assert_eq!(device.name(), "gpu0");
        assert_eq!(describe_platforms(&source, &platforms), 1);
    }

    #[test]
    fn test_selected_device_satisfies_predicate() {
        let kinds = [
            DeviceKind::Cpu,
            DeviceKind::IntegratedGpu,
            DeviceKind::DiscreteGpu,
            DeviceKind::Other,
        ];
        let devices: Vec<DeviceInfo> = (0..16)
            .map(|i| {
                info(
                    &format!("d{i}"),
                    kinds[i % kinds.len()],
                    i % 3 != 0,
                    i % 5 == 0,
                )
            })
            .collect();
        let source = FakeSource::new(vec![("mixed", Some(devices))]);
        let platforms = discover(&source).unwrap();

        let pred = predicate::and(predicate::is_gpu(), predicate::supports_f64());
        let device = select_device(&source, &platforms, &pred).unwrap();
        assert!(pred(&device));
        assert!(device.is_available());
        // d5 is the first available integrated GPU with f64.
        assert_eq!(device.name(), "d5");
    }

    #[test]
    fn test_predicate_combinators() {
        let cpu = Device::new("p", info("cpu", DeviceKind::Cpu, true, true));
        let gpu = Device::new("p", info("gpu", DeviceKind::VirtualGpu, true, false));

        let either = predicate::or(predicate::is_gpu(), predicate::has_extension(EXT_F64));
        assert!(either(&cpu));
        assert!(either(&gpu));
        assert!(predicate::kind(DeviceKind::Cpu)(&cpu));
        assert!(!predicate::kind(DeviceKind::Cpu)(&gpu));
        assert!(cpu.adapter().is_none());
    }

    #[test]
    fn test_vendor_names() {
        assert_eq!(vendor_name(0x10DE), "NVIDIA");
        assert_eq!(vendor_name(0x1234), "0x1234");
    }
}
