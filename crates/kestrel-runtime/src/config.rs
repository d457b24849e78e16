//! Session configuration.
//!
//! One value carries the verbose/profile/verify switches. The core never
//! branches on them for control flow; they are read by logging, the
//! profiling stopwatch and the drivers' verification step.

/// Configuration passed once at session construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Log platform/device summaries and transfer details.
    pub verbose: bool,
    /// Record and log stage timings.
    pub profile: bool,
    /// Ask drivers to verify results against a host reference.
    pub verify: bool,
    /// Backends considered during discovery.
    pub backends: wgpu::Backends,
    /// Label attached to device-side objects.
    pub label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            profile: false,
            verify: false,
            backends: wgpu::Backends::all(),
            label: "kestrel".to_string(),
        }
    }
}

impl SessionConfig {
    /// Build a configuration from `KESTREL_*` environment variables.
    ///
    /// * `KESTREL_VERBOSE`, `KESTREL_PROFILE`, `KESTREL_VERIFY`: `1`/`true`/`yes`/`on`
    /// * `KESTREL_BACKENDS`: comma separated list of `vulkan`, `metal`, `dx12`, `gl`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|v| parse_flag(&v));
        let mut config = Self {
            verbose: flag("KESTREL_VERBOSE"),
            profile: flag("KESTREL_PROFILE"),
            verify: flag("KESTREL_VERIFY"),
            ..Self::default()
        };
        if let Some(list) = lookup("KESTREL_BACKENDS") {
            if let Some(backends) = parse_backends(&list) {
                config.backends = backends;
            } else {
                tracing::warn!(value = %list, "ignoring unrecognised KESTREL_BACKENDS");
            }
        }
        config
    }

    /// Enable or disable verbose logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enable or disable stage timing.
    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// Enable or disable host verification in drivers.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Restrict discovery to `backends`.
    pub fn with_backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    /// Set the label used for device-side objects.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a comma separated backend list. Returns `None` if any entry is unknown
/// or the list is empty.
pub fn parse_backends(list: &str) -> Option<wgpu::Backends> {
    let mut backends = wgpu::Backends::empty();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        backends |= match name.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => wgpu::Backends::VULKAN,
            "metal" => wgpu::Backends::METAL,
            "dx12" | "d3d12" => wgpu::Backends::DX12,
            "gl" | "opengl" | "gles" => wgpu::Backends::GL,
            "all" => wgpu::Backends::all(),
            _ => return None,
        };
    }
    (!backends.is_empty()).then_some(backends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!(!config.verbose);
        assert!(!config.profile);
        assert!(!config.verify);
        assert_eq!(config.backends, wgpu::Backends::all());
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KESTREL_VERBOSE", "1"),
            ("KESTREL_PROFILE", "off"),
            ("KESTREL_VERIFY", "Yes"),
            ("KESTREL_BACKENDS", "vulkan, gl"),
        ]);
        let config = SessionConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.verbose);
        assert!(!config.profile);
        assert!(config.verify);
        assert_eq!(config.backends, wgpu::Backends::VULKAN | wgpu::Backends::GL);
    }

    #[test]
    fn test_bad_backend_list_keeps_default() {
        let config = SessionConfig::from_lookup(|k| {
            (k == "KESTREL_BACKENDS").then(|| "vulkan,quantum".to_string())
        });
        assert_eq!(config.backends, wgpu::Backends::all());
    }

    #[test]
    fn test_parse_backends() {
        assert_eq!(parse_backends("metal"), Some(wgpu::Backends::METAL));
        assert_eq!(parse_backends(""), None);
        assert_eq!(parse_backends("dx12,vk"), Some(wgpu::Backends::DX12 | wgpu::Backends::VULKAN));
    }

    #[test]
    fn test_builder_setters() {
        let config = SessionConfig::default()
            .with_verbose(true)
            .with_profile(true)
            .with_verify(true)
            .with_label("bench");
        assert!(config.verbose && config.profile && config.verify);
        assert_eq!(config.label, "bench");
    }
}
