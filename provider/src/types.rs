use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource tags, kept sorted so descriptors compare and serialize deterministically
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Role,
    Cluster,
    NodeGroup,
    KmsKey,
    Bucket,
    PublicAccessBlock,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Role => "iam role",
            ResourceKind::Cluster => "eks cluster",
            ResourceKind::NodeGroup => "node group",
            ResourceKind::KmsKey => "kms key",
            ResourceKind::Bucket => "s3 bucket",
            ResourceKind::PublicAccessBlock => "bucket public access block",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcArgs {
    pub name: String,
    pub cidr_block: String,
    pub availability_zone_names: Vec<String>,
    pub tags: Tags,
}

/// A VPC with one public and one private subnet per availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcHandle {
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone_names: Vec<String>,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleArgs {
    pub name: String,
    pub assume_role_policy: serde_json::Value,
    pub managed_policy_arns: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
}

/// Grants one IAM principal a set of Kubernetes groups on a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    pub role_arn: String,
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterArgs {
    pub name: String,
    pub version: String,
    pub vpc_id: String,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
    pub instance_role_arns: Vec<String>,
    pub role_mappings: Vec<RoleMapping>,
    pub enabled_cluster_log_types: Vec<String>,
    pub endpoint_private_access: bool,
    pub endpoint_public_access: bool,
    pub create_oidc_provider: bool,
    pub fargate: bool,
    pub skip_default_node_group: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub name: String,
    pub version: String,
    pub arn: String,
    pub endpoint: String,
    pub kubeconfig: serde_json::Value,
    pub oidc_provider_arn: Option<String>,
    pub oidc_provider_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupArgs {
    pub name: String,
    pub cluster_name: String,
    pub node_role_arn: String,
    pub instance_type: String,
    pub scaling: ScalingConfig,
    pub root_volume_size_gib: u32,
    pub subnet_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupHandle {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsKeyArgs {
    pub name: String,
    pub deletion_window_in_days: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsKeyHandle {
    pub key_id: String,
    pub arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerSideEncryption {
    #[default]
    #[serde(rename = "AES256")]
    Aes256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketArgs {
    pub name: String,
    pub server_side_encryption: ServerSideEncryption,
    pub versioning: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketHandle {
    pub id: String,
    pub bucket: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessBlockArgs {
    pub name: String,
    pub bucket_id: String,
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlockArgs {
    /// Block every form of public access to `bucket_id`
    pub fn block_all(name: impl Into<String>, bucket_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket_id: bucket_id.into(),
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessBlockHandle {
    pub id: String,
}

/// Any resource-creation request, as recorded by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum ResourceRequest {
    Vpc(VpcArgs),
    Role(RoleArgs),
    Cluster(ClusterArgs),
    NodeGroup(NodeGroupArgs),
    KmsKey(KmsKeyArgs),
    Bucket(BucketArgs),
    PublicAccessBlock(PublicAccessBlockArgs),
}

impl ResourceRequest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRequest::Vpc(_) => ResourceKind::Vpc,
            ResourceRequest::Role(_) => ResourceKind::Role,
            ResourceRequest::Cluster(_) => ResourceKind::Cluster,
            ResourceRequest::NodeGroup(_) => ResourceKind::NodeGroup,
            ResourceRequest::KmsKey(_) => ResourceKind::KmsKey,
            ResourceRequest::Bucket(_) => ResourceKind::Bucket,
            ResourceRequest::PublicAccessBlock(_) => ResourceKind::PublicAccessBlock,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceRequest::Vpc(args) => &args.name,
            ResourceRequest::Role(args) => &args.name,
            ResourceRequest::Cluster(args) => &args.name,
            ResourceRequest::NodeGroup(args) => &args.name,
            ResourceRequest::KmsKey(args) => &args.name,
            ResourceRequest::Bucket(args) => &args.name,
            ResourceRequest::PublicAccessBlock(args) => &args.name,
        }
    }

    /// Tags carried by the request; public access blocks are untaggable
    pub fn tags(&self) -> Option<&Tags> {
        match self {
            ResourceRequest::Vpc(args) => Some(&args.tags),
            ResourceRequest::Role(args) => Some(&args.tags),
            ResourceRequest::Cluster(args) => Some(&args.tags),
            ResourceRequest::NodeGroup(args) => Some(&args.tags),
            ResourceRequest::KmsKey(args) => Some(&args.tags),
            ResourceRequest::Bucket(args) => Some(&args.tags),
            ResourceRequest::PublicAccessBlock(_) => None,
        }
    }
}
