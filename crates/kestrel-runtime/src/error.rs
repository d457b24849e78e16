//! Error types for the runtime crate.

use std::fmt;
use thiserror::Error;

/// Machine-readable classification of a failure reported by the accelerator
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The device ran out of memory.
    OutOfMemory,
    /// The runtime rejected a call as invalid (bad layout, bad usage, ...).
    Validation,
    /// The driver reported an internal failure.
    Internal,
    /// Mapping a buffer for host access failed.
    MapFailed,
    /// The device was lost or a wait on it failed.
    DeviceLost,
    /// The device or the request is not supported.
    Unsupported,
    /// A kernel argument was missing or malformed.
    InvalidArgument,
}

impl ErrorCode {
    /// Stable identifier for logs and tooling.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::OutOfMemory => "out_of_memory",
            ErrorCode::Validation => "validation",
            ErrorCode::Internal => "internal",
            ErrorCode::MapFailed => "map_failed",
            ErrorCode::DeviceLost => "device_lost",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::InvalidArgument => "invalid_argument",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&wgpu::Error> for ErrorCode {
    fn from(err: &wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            wgpu::Error::Validation { .. } => ErrorCode::Validation,
            _ => ErrorCode::Internal,
        }
    }
}

/// Runtime errors.
///
/// Discovery, selection and initialization failures are terminal for a
/// session. Compile failures only invalidate the program being built, and
/// per-dispatch failures only abort the current operation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The accelerator runtime reported zero platforms.
    #[error("no accelerator platform found")]
    NoPlatformFound,

    /// No available device on any platform satisfied the selection predicate.
    #[error("no available device matches the selection predicate ({searched} devices searched)")]
    NoMatchingDevice {
        /// Number of devices inspected across all platforms.
        searched: usize,
    },

    /// Creating the context or queue for the selected device failed.
    #[error("device initialization failed for '{device}' [{code}]: {message}")]
    DeviceInit {
        /// Name of the device that failed to initialize.
        device: String,
        /// Runtime error code.
        code: ErrorCode,
        /// Runtime error message.
        message: String,
    },

    /// Building a program failed. Carries the full per-device build log.
    #[error("program '{program}' failed to build:\n{log}")]
    Compile {
        /// Program label.
        program: String,
        /// Compiler diagnostics, one section per device.
        log: String,
    },

    /// A program has no compute entry point with the requested name.
    #[error("kernel '{name}' not found in program '{program}' (available: {available:?})")]
    KernelNotFound {
        /// Requested entry point.
        name: String,
        /// Program label.
        program: String,
        /// Entry points the program does declare.
        available: Vec<String>,
    },

    /// Global/local extents are not launchable on this device.
    #[error("invalid launch of kernel '{kernel}' (global {global:?}, local {local:?}): {reason}")]
    LaunchConfiguration {
        /// Kernel name.
        kernel: String,
        /// Requested global extent.
        global: Vec<u32>,
        /// Requested or computed local extent, if any.
        local: Option<Vec<u32>>,
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A host/device transfer failed (bad region, size mismatch, map failure).
    #[error("transfer failed [{code}]: {message}")]
    Transfer {
        /// Runtime error code.
        code: ErrorCode,
        /// Error message.
        message: String,
    },

    /// Any other failure reported by the accelerator runtime.
    #[error("accelerator runtime error [{code}]: {message}")]
    AcceleratorRuntime {
        /// Runtime error code.
        code: ErrorCode,
        /// Error message, including the operation that failed.
        message: String,
    },
}

impl RuntimeError {
    /// Machine-readable code, where the failure came from the runtime.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RuntimeError::DeviceInit { code, .. }
            | RuntimeError::Transfer { code, .. }
            | RuntimeError::AcceleratorRuntime { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for failures after which the session can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeError::NoPlatformFound
                | RuntimeError::NoMatchingDevice { .. }
                | RuntimeError::DeviceInit { .. }
        ) || self.code() == Some(ErrorCode::DeviceLost)
    }

    pub(crate) fn runtime(code: ErrorCode, message: impl Into<String>) -> Self {
        RuntimeError::AcceleratorRuntime {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn transfer(code: ErrorCode, message: impl Into<String>) -> Self {
        RuntimeError::Transfer {
            code,
            message: message.into(),
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
