//! The deployment units this workspace knows how to compose.
//!
//! Each unit parses its own validated configuration, issues its
//! resource-creation calls through a [`provider::ResourceProvider`] and builds
//! the export set downstream stacks consume.

pub mod cluster;
pub mod state;
pub mod vpc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stack_config::{ConfigError, ConfigResult};
use std::fmt;
use std::sync::LazyLock;

/// Organization segment of every stack name
pub const ORGANIZATION: &str = "organization";

static ENV_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,30}[a-z0-9])?$").expect("valid environment name pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Network: VPC with public and private subnets
    Vpc,
    /// Kubernetes control plane, node group and IAM role
    K8s,
    /// Encrypted, versioned state bucket
    State,
}

impl Unit {
    pub fn all() -> [Unit; 3] {
        [Unit::Vpc, Unit::K8s, Unit::State]
    }

    /// Project name, used as the configuration namespace and in stack names
    pub fn project(&self) -> &'static str {
        match self {
            Unit::Vpc => "infrastructure-vpc",
            Unit::K8s => "infrastructure-k8s",
            Unit::State => "infrastructure-state",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Unit::Vpc => "VPC with one public and one private subnet per availability zone",
            Unit::K8s => "EKS cluster, default node group and node IAM role",
            Unit::State => "KMS key and encrypted, versioned state bucket",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Unit::Vpc => "vpc",
            Unit::K8s => "k8s",
            Unit::State => "state",
        };
        write!(f, "{}", name)
    }
}

/// Environment names end up in resource names, so they must be DNS-label safe
pub(crate) fn validate_env(key: &str, env: &str) -> ConfigResult<()> {
    if ENV_NAME.is_match(env) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            key,
            format!(
                "'{}' must be 1-32 lowercase letters, digits or dashes, not starting or ending with a dash",
                env
            ),
        ))
    }
}

pub(crate) fn to_u32(key: &str, value: i64) -> ConfigResult<u32> {
    u32::try_from(value)
        .map_err(|_| ConfigError::invalid(key, format!("{} must be a non-negative integer", value)))
}
