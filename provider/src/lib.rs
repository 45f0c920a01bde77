pub mod config;
pub mod plan;
pub mod provider;
pub mod types;

pub use config::ProviderConfig;
pub use plan::PlanProvider;
pub use provider::{ProviderError, ProviderResult, ResourceProvider};
pub use types::{
    BucketArgs, BucketHandle, CallerIdentity, ClusterArgs, ClusterHandle, KmsKeyArgs,
    KmsKeyHandle, NodeGroupArgs, NodeGroupHandle, PublicAccessBlockArgs, PublicAccessBlockHandle,
    ResourceKind, ResourceRequest, RoleArgs, RoleHandle, RoleMapping, ScalingConfig,
    ServerSideEncryption, Tags, VpcArgs, VpcHandle,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::plan::*;
    pub use crate::provider::*;
    pub use crate::types::*;
}
