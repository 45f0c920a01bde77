//! Cross-stack references.
//!
//! A [`StackReference`] points at another stack's published outputs by its
//! fully-qualified name (`organization/project/stack`). The whole output map
//! is fetched once, lazily, the first time any key is read.

use crate::output::Output;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Referenced stack '{stack}' was not found")]
    StackNotFound { stack: String },

    #[error("Stack '{stack}' has no output named '{key}'")]
    OutputNotFound { stack: String, key: String },

    #[error("Output '{key}' of stack '{stack}' must be {expected}")]
    WrongShape {
        stack: String,
        key: String,
        expected: &'static str,
    },

    #[error("Invalid stack name '{name}': expected organization/project/stack")]
    InvalidName { name: String },

    #[error("Failed to read outputs of stack '{stack}': {message}")]
    Source { stack: String, message: String },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Fully-qualified stack name, serialized as `organization/project/stack`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackName {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackName {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            stack: stack.into(),
        }
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.stack)
    }
}

impl FromStr for StackName {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [organization, project, stack]
                if !organization.is_empty() && !project.is_empty() && !stack.is_empty() =>
            {
                Ok(Self::new(*organization, *project, *stack))
            }
            _ => Err(ResolveError::InvalidName {
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for StackName {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StackName> for String {
    fn from(name: StackName) -> Self {
        name.to_string()
    }
}

/// Where published stack outputs come from
#[async_trait]
pub trait OutputSource: Send + Sync {
    async fn fetch_outputs(&self, name: &StackName) -> ResolveResult<BTreeMap<String, Value>>;
}

#[derive(Clone)]
pub struct StackReference {
    name: StackName,
    outputs: Output<Arc<BTreeMap<String, Value>>>,
}

impl StackReference {
    pub fn new(name: StackName, source: Arc<dyn OutputSource>) -> Self {
        let target = name.clone();
        let outputs = Output::new(async move {
            let outputs = source.fetch_outputs(&target).await?;
            debug!("Fetched {} outputs from {}", outputs.len(), target);
            Ok(Arc::new(outputs))
        });
        Self { name, outputs }
    }

    pub fn name(&self) -> &StackName {
        &self.name
    }

    pub fn get_output(&self, key: &str) -> Output<Value> {
        let stack = self.name.to_string();
        let key = key.to_string();
        self.outputs.try_apply(move |outputs| {
            outputs
                .get(&key)
                .cloned()
                .ok_or(ResolveError::OutputNotFound { stack, key })
        })
    }

    pub fn get_string_output(&self, key: &str) -> Output<String> {
        let stack = self.name.to_string();
        let key = key.to_string();
        self.get_output(&key).try_apply(move |value| match value {
            Value::String(s) => Ok(s),
            _ => Err(ResolveError::WrongShape {
                stack,
                key,
                expected: "a string",
            }),
        })
    }

    pub fn get_string_list_output(&self, key: &str) -> Output<Vec<String>> {
        let stack = self.name.to_string();
        let key = key.to_string();
        self.get_output(&key).try_apply(move |value| {
            serde_json::from_value::<Vec<String>>(value).map_err(|_| ResolveError::WrongShape {
                stack,
                key,
                expected: "a list of strings",
            })
        })
    }
}

impl fmt::Debug for StackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackReference")
            .field("name", &self.name.to_string())
            .field("outputs", &self.outputs)
            .finish()
    }
}
