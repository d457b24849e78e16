//! Session: one device, one context, one in-order queue.

use crate::config::SessionConfig;
use crate::dispatch::PipelineCache;
use crate::error::{ErrorCode, Result, RuntimeError};
use crate::registry::Device;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a session's context.
///
/// Buffers and images remember the context they were created in; binding
/// one to a kernel dispatched in another session is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// An initialized device with its context and command queue.
///
/// Dropping the session releases the context and queue. Buffers created in
/// it keep the underlying allocations alive but must not be dispatched in
/// another session.
pub struct Session {
    pub(crate) device: Device,
    pub(crate) config: SessionConfig,
    pub(crate) context_id: ContextId,
    pub(crate) gpu: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) pipelines: PipelineCache,
}

impl Session {
    /// Create the context and in-order queue for `device`.
    ///
    /// # Errors
    /// [`RuntimeError::DeviceInit`] if the device has no runtime handle or
    /// the runtime refuses to create a context for it.
    #[tracing::instrument(skip_all, fields(device = %device.name()))]
    pub fn initialize(device: &Device, config: SessionConfig) -> Result<Self> {
        let init_error = |code: ErrorCode, message: String| RuntimeError::DeviceInit {
            device: device.name().to_string(),
            code,
            message,
        };

        let adapter = device.adapter().ok_or_else(|| {
            init_error(
                ErrorCode::Unsupported,
                "device was not enumerated by an accelerator runtime".to_string(),
            )
        })?;

        let mut required_features = wgpu::Features::empty();
        if device.info().supports_f64() {
            required_features |= wgpu::Features::SHADER_F64;
        }

        let (gpu, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(&config.label),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| init_error(ErrorCode::Internal, e.to_string()))?;

        gpu.on_uncaptured_error(Box::new(|error| {
            tracing::error!(error = %error, "uncaptured accelerator error");
        }));

        let context_id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        if config.verbose {
            let info = device.info();
            tracing::info!(
                context = %context_id,
                platform = %device.platform(),
                device = %info.name,
                vendor = %info.vendor,
                driver = %info.driver,
                "session initialized"
            );
        } else {
            tracing::debug!(context = %context_id, "session initialized");
        }

        Ok(Self {
            device: device.clone(),
            config,
            context_id,
            gpu: Arc::new(gpu),
            queue: Arc::new(queue),
            pipelines: PipelineCache::default(),
        })
    }

    /// The device this session runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity of this session's context.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Block until all work submitted to the queue has completed.
    pub fn finish(&self) -> Result<()> {
        self.queue.submit(std::iter::empty());
        self.gpu.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    ///
    /// Returns the first error the runtime reported while `f` ran.
    pub(crate) fn scoped<R>(&self, f: impl FnOnce() -> R) -> (R, Option<(ErrorCode, String)>) {
        self.gpu.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.gpu.pop_error_scope());
        let out_of_memory = pollster::block_on(self.gpu.pop_error_scope());
        let error = validation
            .or(out_of_memory)
            .map(|e| (ErrorCode::from(&e), e.to_string()));
        (value, error)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.name())
            .field("context", &self.context_id)
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}
