use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigData, ConfigError, ConfigFormat};

/// Read/write configuration accessor scoped to a single plugin identifier.
///
/// Each plugin owns exactly one file under the config root, named
/// `<plugin_id>.<ext>`. A missing file reads as an empty configuration.
/// The handle is cheap to clone and is injected into plugins granted the
/// `config` capability; the manager itself uses it for persisted
/// enable/disable state.
#[derive(Debug, Clone)]
pub struct PluginConfigScope {
    root: PathBuf,
    plugin_id: String,
    format: ConfigFormat,
}

impl PluginConfigScope {
    pub fn new(root: impl Into<PathBuf>, plugin_id: &str, format: ConfigFormat) -> Self {
        Self {
            root: root.into(),
            plugin_id: plugin_id.to_string(),
            format,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Path of the backing file.
    pub fn path(&self) -> PathBuf {
        self.root
            .join(format!("{}.{}", self.plugin_id, self.format.extension()))
    }

    /// Load the scope's configuration; a missing file yields an empty config.
    pub fn load(&self) -> Result<ConfigData, ConfigError> {
        let path = self.path();
        if !path.exists() {
            return Ok(ConfigData::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::io(e, "read", &path))?;
        ConfigData::deserialize(&text, self.format)
    }

    /// Persist the given configuration, creating the config root if needed.
    pub fn save(&self, data: &ConfigData) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.root).map_err(|e| ConfigError::io(e, "create_dir_all", &self.root))?;
        let serialized = data.serialize(self.format)?;
        let path = self.path();
        fs::write(&path, serialized).map_err(|e| ConfigError::io(e, "write", &path))
    }

    /// Read a single value.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        Ok(self.load()?.get(key))
    }

    /// Write a single value through a load-modify-save cycle.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), ConfigError> {
        let mut data = self.load()?;
        data.set(key, value)?;
        self.save(&data)
    }

    /// Remove the backing file entirely. Missing files are not an error.
    pub fn clear(&self) -> Result<(), ConfigError> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::io(e, "remove_file", &path)),
        }
    }
}
