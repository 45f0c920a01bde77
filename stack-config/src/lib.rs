//! Typed per-stack configuration for infra-stacks
//!
//! A [`ConfigSet`] is a flat, immutable map from key to [`ConfigValue`] that is
//! loaded once per run by a [`ConfigLoader`]. Keys are looked up inside a
//! namespace (the project name), so `env` resolves `infrastructure-vpc:env`
//! before falling back to a bare `env` entry.

mod source;

pub use source::{stack_file_path, ConfigLoader, ENV_OVERRIDES_VAR};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors related to configuration loading and typed lookups
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration key '{key}' (namespace '{namespace}')")]
    Missing { namespace: String, key: String },

    #[error("Configuration key '{key}' must be {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Configuration key '{key}' is not a JSON array of strings: {source}")]
    MalformedJson {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for configuration key '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to parse stack file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read stack file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid override '{raw}': expected key=value")]
    Override { raw: String },
}

impl ConfigError {
    /// Shorthand for a validation failure on a single key
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Bool(bool),
    List(Vec<String>),
}

impl ConfigValue {
    /// Human-readable name of the value's type, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "a string",
            ConfigValue::Integer(_) => "an integer",
            ConfigValue::Bool(_) => "a boolean",
            ConfigValue::List(_) => "a list",
        }
    }

    pub(crate) fn from_toml(key: &str, value: toml::Value) -> ConfigResult<Self> {
        match value {
            toml::Value::String(s) => Ok(ConfigValue::String(s)),
            toml::Value::Integer(i) => Ok(ConfigValue::Integer(i)),
            toml::Value::Boolean(b) => Ok(ConfigValue::Bool(b)),
            toml::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    toml::Value::String(s) => Ok(s),
                    _ => Err(ConfigError::TypeMismatch {
                        key: key.to_string(),
                        expected: "a list of strings",
                        found: "a list with non-string items",
                    }),
                })
                .collect::<ConfigResult<Vec<_>>>()
                .map(ConfigValue::List),
            toml::Value::Float(_) => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a string, integer, boolean or list",
                found: "a float (quote the value if it is a version)",
            }),
            toml::Value::Datetime(_) => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a string, integer, boolean or list",
                found: "a datetime",
            }),
            toml::Value::Table(_) => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a string, integer, boolean or list",
                found: "a table",
            }),
        }
    }

    pub(crate) fn from_json(key: &str, value: serde_json::Value) -> ConfigResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(ConfigValue::String(s)),
            serde_json::Value::Bool(b) => Ok(ConfigValue::Bool(b)),
            serde_json::Value::Number(n) => {
                n.as_i64()
                    .map(ConfigValue::Integer)
                    .ok_or_else(|| ConfigError::TypeMismatch {
                        key: key.to_string(),
                        expected: "an integer",
                        found: "a non-integer number",
                    })
            }
            serde_json::Value::Array(_) => serde_json::from_value::<Vec<String>>(value)
                .map(ConfigValue::List)
                .map_err(|source| ConfigError::MalformedJson {
                    key: key.to_string(),
                    source,
                }),
            serde_json::Value::Null => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a string, integer, boolean or list",
                found: "null",
            }),
            serde_json::Value::Object(_) => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a string, integer, boolean or list",
                found: "an object",
            }),
        }
    }
}

/// Immutable configuration for one stack run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
    namespace: String,
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigSet {
    pub fn new(namespace: impl Into<String>, values: BTreeMap<String, ConfigValue>) -> Self {
        Self {
            namespace: namespace.into(),
            values,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a key, trying `namespace:key` before the bare key.
    ///
    /// Keys that already contain a `:` (for example `aws:region`) are looked up verbatim.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        if key.contains(':') {
            return self.values.get(key);
        }
        self.values
            .get(&format!("{}:{}", self.namespace, key))
            .or_else(|| self.values.get(key))
    }

    fn require(&self, key: &str) -> ConfigResult<&ConfigValue> {
        self.get(key).ok_or_else(|| ConfigError::Missing {
            namespace: self.namespace.clone(),
            key: key.to_string(),
        })
    }

    pub fn get_string(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get(key).map(|v| as_string(key, v)).transpose()
    }

    pub fn require_string(&self, key: &str) -> ConfigResult<String> {
        as_string(key, self.require(key)?)
    }

    pub fn get_int(&self, key: &str) -> ConfigResult<Option<i64>> {
        self.get(key).map(|v| as_int(key, v)).transpose()
    }

    pub fn require_int(&self, key: &str) -> ConfigResult<i64> {
        as_int(key, self.require(key)?)
    }

    pub fn get_bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        self.get(key).map(|v| as_bool(key, v)).transpose()
    }

    pub fn require_bool(&self, key: &str) -> ConfigResult<bool> {
        as_bool(key, self.require(key)?)
    }

    pub fn get_string_list(&self, key: &str) -> ConfigResult<Option<Vec<String>>> {
        self.get(key).map(|v| as_string_list(key, v)).transpose()
    }

    pub fn require_string_list(&self, key: &str) -> ConfigResult<Vec<String>> {
        as_string_list(key, self.require(key)?)
    }
}

fn as_string(key: &str, value: &ConfigValue) -> ConfigResult<String> {
    match value {
        ConfigValue::String(s) => Ok(s.clone()),
        other => Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "a string",
            found: other.kind(),
        }),
    }
}

fn as_int(key: &str, value: &ConfigValue) -> ConfigResult<i64> {
    match value {
        ConfigValue::Integer(i) => Ok(*i),
        ConfigValue::String(s) => s.trim().parse().map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "an integer",
            found: "a non-numeric string",
        }),
        other => Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "an integer",
            found: other.kind(),
        }),
    }
}

fn as_bool(key: &str, value: &ConfigValue) -> ConfigResult<bool> {
    match value {
        ConfigValue::Bool(b) => Ok(*b),
        ConfigValue::String(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "a boolean",
                found: "a string other than true/false",
            }),
        },
        other => Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "a boolean",
            found: other.kind(),
        }),
    }
}

fn as_string_list(key: &str, value: &ConfigValue) -> ConfigResult<Vec<String>> {
    match value {
        ConfigValue::List(items) => Ok(items.clone()),
        ConfigValue::String(raw) => {
            serde_json::from_str(raw).map_err(|source| ConfigError::MalformedJson {
                key: key.to_string(),
                source,
            })
        }
        other => Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "a JSON array of strings",
            found: other.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, ConfigValue)]) -> ConfigSet {
        let values = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ConfigSet::new("infrastructure-k8s", values)
    }

    #[test]
    fn test_namespaced_key_wins_over_bare_key() {
        let config = set(&[
            ("env", ConfigValue::String("bare".to_string())),
            (
                "infrastructure-k8s:env",
                ConfigValue::String("dev".to_string()),
            ),
        ]);
        assert_eq!(config.require_string("env").unwrap(), "dev");
    }

    #[test]
    fn test_bare_key_fallback_and_verbatim_namespaced_lookup() {
        let config = set(&[
            ("env", ConfigValue::String("prod".to_string())),
            ("aws:region", ConfigValue::String("eu-west-1".to_string())),
        ]);
        assert_eq!(config.require_string("env").unwrap(), "prod");
        assert_eq!(
            config.get_string("aws:region").unwrap().as_deref(),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_missing_required_key() {
        let config = set(&[]);
        let err = config.require_string("k8sVersion").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref key, .. } if key == "k8sVersion"));
        assert!(err.to_string().contains("infrastructure-k8s"));
        assert_eq!(config.get_string("k8sVersion").unwrap(), None);
    }

    #[test]
    fn test_integer_and_boolean_coercion_from_strings() {
        let config = set(&[
            ("defaultMinSize", ConfigValue::String("1".to_string())),
            ("defaultMaxSize", ConfigValue::Integer(3)),
            ("deploy", ConfigValue::String("true".to_string())),
            ("endpointPublicAccess", ConfigValue::Bool(false)),
        ]);
        assert_eq!(config.require_int("defaultMinSize").unwrap(), 1);
        assert_eq!(config.require_int("defaultMaxSize").unwrap(), 3);
        assert!(config.require_bool("deploy").unwrap());
        assert_eq!(config.get_bool("endpointPublicAccess").unwrap(), Some(false));
    }

    #[test]
    fn test_type_mismatch() {
        let config = set(&[
            ("defaultMinSize", ConfigValue::String("one".to_string())),
            ("deploy", ConfigValue::String("yes".to_string())),
            ("env", ConfigValue::Integer(3)),
        ]);
        assert!(matches!(
            config.require_int("defaultMinSize"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            config.require_bool("deploy"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            config.require_string("env"),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_json_encoded_string_list() {
        let config = set(&[
            (
                "eksUsers",
                ConfigValue::String(r#"["alice","bob"]"#.to_string()),
            ),
            (
                "availabilityZoneNames",
                ConfigValue::List(vec!["us-east-1a".to_string()]),
            ),
        ]);
        assert_eq!(
            config.require_string_list("eksUsers").unwrap(),
            vec!["alice", "bob"]
        );
        assert_eq!(
            config.require_string_list("availabilityZoneNames").unwrap(),
            vec!["us-east-1a"]
        );
    }

    #[test]
    fn test_malformed_json_list() {
        let config = set(&[("eksUsers", ConfigValue::String("[alice".to_string()))]);
        let err = config.require_string_list("eksUsers").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedJson { .. }));

        let config = set(&[("eksUsers", ConfigValue::String("[1, 2]".to_string()))]);
        assert!(config.get_string_list("eksUsers").is_err());
    }

    #[test]
    fn test_toml_float_is_rejected() {
        let err = ConfigValue::from_toml("k8sVersion", toml::Value::Float(1.27)).unwrap_err();
        assert!(err.to_string().contains("quote the value"));
    }
}
