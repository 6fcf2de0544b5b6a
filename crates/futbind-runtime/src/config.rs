//! Session Configuration
//!
//! Options applied to the foreign configuration object before the context
//! is created. Each option is optional; requesting one the library has no
//! setter for fails session construction instead of being ignored.
//!
//! Configurations can be built in code or read from TOML:
//!
//! ```toml
//! device = "NVIDIA"
//! profiling = true
//! cache-path = "/tmp/prog.cache"
//!
//! [tuning]
//! "main.segmap_group_size_1" = 128
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BindError, BindResult};
use crate::naming::{Naming, DEFAULT_PREFIX};

/// Context options for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SessionConfig {
    /// Let the backend prompt for a device
    pub interactive: bool,

    /// Preferred device name, matched by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Preferred platform name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    pub profiling: bool,
    pub debugging: bool,
    pub logging: bool,

    /// File the backend caches compiled kernels in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    /// Tuning parameters by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tuning: BTreeMap<String, u64>,

    /// Prefix shared by the library's symbols
    pub symbol_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interactive: false,
            device: None,
            platform: None,
            profiling: false,
            debugging: false,
            logging: false,
            cache_path: None,
            tuning: BTreeMap::new(),
            symbol_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    pub fn debugging(mut self, enabled: bool) -> Self {
        self.debugging = enabled;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn tuning(mut self, name: impl Into<String>, value: u64) -> Self {
        self.tuning.insert(name.into(), value);
        self
    }

    pub fn symbol_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.symbol_prefix = prefix.into();
        self
    }

    /// Naming convention for the configured prefix
    pub fn naming(&self) -> Naming {
        Naming::new(self.symbol_prefix.as_str())
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(source: &str) -> BindResult<Self> {
        toml::from_str(source).map_err(|e| BindError::configuration(e.to_string()))
    }

    /// Read a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BindResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BindError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> BindResult<String> {
        toml::to_string_pretty(self).map_err(|e| BindError::configuration(e.to_string()))
    }
}
