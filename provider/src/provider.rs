use crate::types::{
    BucketArgs, BucketHandle, CallerIdentity, ClusterArgs, ClusterHandle, KmsKeyArgs,
    KmsKeyHandle, NodeGroupArgs, NodeGroupHandle, PublicAccessBlockArgs, PublicAccessBlockHandle,
    ResourceKind, RoleArgs, RoleHandle, VpcArgs, VpcHandle,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid parameters for {kind} '{name}': {message}")]
    InvalidParameters {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("{kind} '{name}' is already declared in this run")]
    Duplicate { kind: ResourceKind, name: String },

    #[error("Quota exceeded while creating {kind} '{name}'")]
    QuotaExceeded { kind: ResourceKind, name: String },

    #[error("Permission denied while creating {kind} '{name}': {message}")]
    PermissionDenied {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("Caller identity unavailable: {message}")]
    Identity { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Resource-creation calls against a cloud account.
///
/// Every call is fallible and returns a handle describing the created resource.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity>;

    async fn create_vpc(&self, args: VpcArgs) -> ProviderResult<VpcHandle>;

    async fn create_role(&self, args: RoleArgs) -> ProviderResult<RoleHandle>;

    async fn create_cluster(&self, args: ClusterArgs) -> ProviderResult<ClusterHandle>;

    async fn create_node_group(&self, args: NodeGroupArgs) -> ProviderResult<NodeGroupHandle>;

    async fn create_kms_key(&self, args: KmsKeyArgs) -> ProviderResult<KmsKeyHandle>;

    async fn create_bucket(&self, args: BucketArgs) -> ProviderResult<BucketHandle>;

    async fn create_public_access_block(
        &self,
        args: PublicAccessBlockArgs,
    ) -> ProviderResult<PublicAccessBlockHandle>;

    fn provider_name(&self) -> &'static str;
}
