//! The stack run.
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! Unconfigured -> Configured -> Composed -> Exported -> Terminal
//! ```
//!
//! Configuration is parsed and validated in full before any reference is
//! resolved, and every reference a resource needs is resolved before that
//! resource is created. Any error ends the run where it happened; nothing is
//! exported on failure.

use crate::exports::ExportSet;
use crate::reference::{OutputSource, ResolveError, StackName, StackReference};
use crate::store::StoreError;
use crate::units::cluster::{
    self, ClusterConfig, ClusterDeployment, NetworkInputs, ResolvedNetwork,
};
use crate::units::state::{self, StateConfig, StateResources};
use crate::units::vpc::{self, VpcConfig};
use crate::units::{Unit, ORGANIZATION};
use provider::{ProviderConfig, ProviderError, ResourceProvider, VpcHandle};
use serde::{Deserialize, Serialize};
use stack_config::{ConfigError, ConfigResult, ConfigSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reference error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    Unconfigured,
    Configured,
    Composed,
    Exported,
    Terminal,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Provider settings read from the `aws:` namespace
pub fn provider_config(config: &ConfigSet) -> ConfigResult<ProviderConfig> {
    let defaults = ProviderConfig::default();
    let provider = ProviderConfig::new()
        .with_region(
            config
                .get_string("aws:region")?
                .unwrap_or(defaults.region),
        )
        .with_account_id(
            config
                .get_string("aws:accountId")?
                .unwrap_or(defaults.account_id),
        );
    provider
        .validate()
        .map_err(|message| ConfigError::invalid("aws", message))?;
    Ok(provider)
}

/// A unit's validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitConfig {
    Vpc(VpcConfig),
    K8s(ClusterConfig),
    State(StateConfig),
}

impl UnitConfig {
    pub fn parse(unit: Unit, config: &ConfigSet) -> ConfigResult<Self> {
        match unit {
            Unit::Vpc => VpcConfig::from_config(config).map(UnitConfig::Vpc),
            Unit::K8s => ClusterConfig::from_config(config).map(UnitConfig::K8s),
            Unit::State => StateConfig::from_config(config).map(UnitConfig::State),
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            UnitConfig::Vpc(_) => Unit::Vpc,
            UnitConfig::K8s(_) => Unit::K8s,
            UnitConfig::State(_) => Unit::State,
        }
    }
}

/// What a unit created, before it is turned into exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composition {
    Vpc {
        config: VpcConfig,
        vpc: VpcHandle,
    },
    K8s {
        deployment: ClusterDeployment,
        network: ResolvedNetwork,
    },
    State(StateResources),
}

impl Composition {
    pub fn exports(&self) -> ExportSet {
        match self {
            Composition::Vpc { config, vpc } => vpc::exports(config, vpc),
            Composition::K8s {
                deployment,
                network,
            } => cluster::exports(deployment, network),
            Composition::State(resources) => state::exports(resources),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub stack: StackName,
    pub composition: Composition,
    pub exports: ExportSet,
    pub final_state: DeploymentState,
}

pub struct StackRunner {
    provider: Arc<dyn ResourceProvider>,
    outputs: Arc<dyn OutputSource>,
    state: DeploymentState,
}

impl StackRunner {
    pub fn new(provider: Arc<dyn ResourceProvider>, outputs: Arc<dyn OutputSource>) -> Self {
        Self {
            provider,
            outputs,
            state: DeploymentState::Unconfigured,
        }
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    fn transition_to(&mut self, next: DeploymentState) {
        debug!("Stack run: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run `unit` as stack `stack` with the given configuration
    pub async fn run(
        &mut self,
        unit: Unit,
        stack: &str,
        config: &ConfigSet,
    ) -> DeployResult<RunResult> {
        self.state = DeploymentState::Unconfigured;
        let name = StackName::new(ORGANIZATION, unit.project(), stack);
        info!(
            "Running {} with the {} provider",
            name,
            self.provider.provider_name()
        );

        let unit_config = UnitConfig::parse(unit, config)?;
        self.transition_to(DeploymentState::Configured);

        let composition = self.compose(unit_config).await?;
        self.transition_to(DeploymentState::Composed);

        let exports = composition.exports();
        self.transition_to(DeploymentState::Exported);
        info!("{} exports {} outputs", name, exports.len());

        self.transition_to(DeploymentState::Terminal);
        Ok(RunResult {
            stack: name,
            composition,
            exports,
            final_state: self.state,
        })
    }

    async fn compose(&self, unit_config: UnitConfig) -> DeployResult<Composition> {
        let provider = self.provider.as_ref();
        match unit_config {
            UnitConfig::Vpc(config) => {
                let vpc = vpc::deploy(provider, &config).await?;
                Ok(Composition::Vpc { config, vpc })
            }
            UnitConfig::K8s(config) => {
                let reference =
                    StackReference::new(cluster::network_stack(&config.env), self.outputs.clone());
                let network = NetworkInputs::from_reference(&reference).resolve().await?;
                let deployment = cluster::deploy(provider, &config, &network).await?;
                Ok(Composition::K8s {
                    deployment,
                    network,
                })
            }
            UnitConfig::State(config) => {
                let resources = state::deploy(provider, &config).await?;
                Ok(Composition::State(resources))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryOutputs;
    use provider::PlanProvider;
    use stack_config::ConfigValue;
    use std::collections::BTreeMap;

    fn config_set(namespace: &str, entries: &[(&str, &str)]) -> ConfigSet {
        let values: BTreeMap<String, ConfigValue> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), ConfigValue::String(v.to_string())))
            .collect();
        ConfigSet::new(namespace, values)
    }

    #[test]
    fn test_provider_config() {
        let set = config_set(
            "infrastructure-vpc",
            &[("aws:region", "eu-west-1"), ("aws:accountId", "123456789012")],
        );
        let provider = provider_config(&set).unwrap();
        assert_eq!(provider.region, "eu-west-1");
        assert_eq!(provider.account_id, "123456789012");

        assert_eq!(
            provider_config(&config_set("infrastructure-vpc", &[])).unwrap(),
            ProviderConfig::default()
        );

        let bad = config_set("infrastructure-vpc", &[("aws:accountId", "42")]);
        assert!(provider_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let provider = Arc::new(PlanProvider::new(ProviderConfig::default()).unwrap());
        let mut runner = StackRunner::new(provider, Arc::new(InMemoryOutputs::new()));
        assert_eq!(runner.state(), DeploymentState::Unconfigured);

        let result = runner
            .run(
                Unit::State,
                "dev",
                &config_set("infrastructure-state", &[]),
            )
            .await
            .unwrap();
        assert_eq!(result.final_state, DeploymentState::Terminal);
        assert_eq!(runner.state(), DeploymentState::Terminal);
        assert_eq!(
            result.stack.to_string(),
            "organization/infrastructure-state/dev"
        );
    }

    #[tokio::test]
    async fn test_config_failure_stops_before_configured() {
        let provider = Arc::new(PlanProvider::new(ProviderConfig::default()).unwrap());
        let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));

        let err = runner
            .run(Unit::Vpc, "dev", &config_set("infrastructure-vpc", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::Missing { .. })));
        assert_eq!(runner.state(), DeploymentState::Unconfigured);
        assert!(provider.requests().await.is_empty());
    }

    #[test]
    fn test_unit_config_parse() {
        let parsed = UnitConfig::parse(Unit::State, &config_set("infrastructure-state", &[]))
            .unwrap();
        assert_eq!(parsed.unit(), Unit::State);
    }
}
