pub mod exports;
pub mod output;
pub mod reference;
pub mod run;
pub mod store;
pub mod tags;
pub mod units;

pub use exports::{Export, ExportSet, SECRET_MASK};
pub use output::Output;
pub use reference::{OutputSource, ResolveError, ResolveResult, StackName, StackReference};
pub use run::{
    provider_config, Composition, DeployError, DeployResult, DeploymentState, RunResult,
    StackRunner, UnitConfig,
};
pub use store::{InMemoryOutputs, LocalStackStore, StoreError, StoreResult, StoredStack};
pub use units::cluster::{ClusterCapabilities, ClusterConfig, ClusterDeployment};
pub use units::state::StateConfig;
pub use units::vpc::VpcConfig;
pub use units::{Unit, ORGANIZATION};
