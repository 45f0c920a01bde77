//! Configuration sources.
//!
//! Values are layered from lowest to highest precedence:
//! - the stack file (`Stack.<stack>.toml`, `[config]` table)
//! - a JSON object in the `STACK_CONFIG` environment variable
//! - explicit `key=value` overrides
//!
//! Bare keys are qualified with the loader's namespace as they are read, so a
//! later layer replaces an earlier one whether or not either spells out the
//! namespace.

use crate::{ConfigError, ConfigResult, ConfigSet, ConfigValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable holding a JSON object of configuration overrides
pub const ENV_OVERRIDES_VAR: &str = "STACK_CONFIG";

#[derive(Debug, Deserialize)]
struct StackFile {
    #[serde(default)]
    config: BTreeMap<String, toml::Value>,
}

/// Path of the stack file for `stack` inside `dir`
pub fn stack_file_path(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("Stack.{}.toml", stack))
}

/// Builder that layers configuration sources into a [`ConfigSet`]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    namespace: String,
    file: Option<PathBuf>,
    use_env: bool,
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            file: None,
            use_env: false,
            overrides: Vec::new(),
        }
    }

    /// Read a stack file. A missing file is an error.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Layer overrides from the `STACK_CONFIG` environment variable
    pub fn with_env_overrides(mut self) -> Self {
        self.use_env = true;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Parse a raw `key=value` override. Whitespace around the key and the
    /// value is dropped.
    pub fn with_raw_override(self, raw: &str) -> ConfigResult<Self> {
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(self.with_override(key.trim(), value.trim()))
            }
            _ => Err(ConfigError::Override {
                raw: raw.to_string(),
            }),
        }
    }

    fn qualify(&self, key: String) -> String {
        if key.contains(':') {
            key
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    pub fn load(self) -> ConfigResult<ConfigSet> {
        let mut values = BTreeMap::new();

        if let Some(path) = &self.file {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let file: StackFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            debug!(
                "Loaded {} configuration keys from {}",
                file.config.len(),
                path.display()
            );
            for (key, value) in file.config {
                let value = ConfigValue::from_toml(&key, value)?;
                values.insert(self.qualify(key), value);
            }
        }

        if self.use_env {
            if let Ok(raw) = std::env::var(ENV_OVERRIDES_VAR) {
                let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
                    .map_err(|source| ConfigError::MalformedJson {
                        key: ENV_OVERRIDES_VAR.to_string(),
                        source,
                    })?;
                debug!(
                    "Applying {} configuration overrides from {}",
                    parsed.len(),
                    ENV_OVERRIDES_VAR
                );
                for (key, value) in parsed {
                    let value = ConfigValue::from_json(&key, value)?;
                    values.insert(self.qualify(key), value);
                }
            }
        }

        for (key, value) in &self.overrides {
            values.insert(self.qualify(key.clone()), ConfigValue::String(value.clone()));
        }

        Ok(ConfigSet::new(self.namespace, values))
    }
}
