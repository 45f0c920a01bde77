//! A provider that plans instead of applying.
//!
//! [`PlanProvider`] records every resource-creation request it accepts and
//! synthesises handles whose identifiers are derived deterministically from
//! the account, region and resource name, so identical runs yield identical
//! plans. It enforces the same parameter rules the cloud API would reject.

use crate::config::ProviderConfig;
use crate::provider::{ProviderError, ProviderResult, ResourceProvider};
use crate::types::{
    BucketArgs, BucketHandle, CallerIdentity, ClusterArgs, ClusterHandle, KmsKeyArgs,
    KmsKeyHandle, NodeGroupArgs, NodeGroupHandle, PublicAccessBlockArgs, PublicAccessBlockHandle,
    ResourceKind, ResourceRequest, RoleArgs, RoleHandle, VpcArgs, VpcHandle,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct PlanState {
    requests: Vec<ResourceRequest>,
    declared: HashSet<(ResourceKind, String)>,
    identity_lookups: usize,
}

pub struct PlanProvider {
    config: ProviderConfig,
    rejections: HashMap<ResourceKind, String>,
    quotas: HashMap<ResourceKind, usize>,
    identity_failure: Option<String>,
    state: Mutex<PlanState>,
}

impl PlanProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|message| ProviderError::InvalidConfig { message })?;

        Ok(Self {
            config,
            rejections: HashMap::new(),
            quotas: HashMap::new(),
            identity_failure: None,
            state: Mutex::new(PlanState::default()),
        })
    }

    /// Reject every request of `kind` with a permission error
    pub fn with_rejection(mut self, kind: ResourceKind, message: impl Into<String>) -> Self {
        self.rejections.insert(kind, message.into());
        self
    }

    /// Allow at most `limit` resources of `kind` per run
    pub fn with_quota(mut self, kind: ResourceKind, limit: usize) -> Self {
        self.quotas.insert(kind, limit);
        self
    }

    /// Make caller identity lookups fail
    pub fn with_identity_failure(mut self, message: impl Into<String>) -> Self {
        self.identity_failure = Some(message.into());
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Accepted requests, in the order they were issued
    pub async fn requests(&self) -> Vec<ResourceRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn identity_lookups(&self) -> usize {
        self.state.lock().await.identity_lookups
    }

    async fn accept(&self, request: ResourceRequest) -> ProviderResult<()> {
        let kind = request.kind();
        let name = request.name().to_string();

        if let Some(message) = self.rejections.get(&kind) {
            warn!("Rejecting {} '{}': {}", kind, name, message);
            return Err(ProviderError::PermissionDenied {
                kind,
                name,
                message: message.clone(),
            });
        }

        let mut state = self.state.lock().await;
        if state.declared.contains(&(kind, name.clone())) {
            return Err(ProviderError::Duplicate { kind, name });
        }
        if let Some(&limit) = self.quotas.get(&kind) {
            let used = state.requests.iter().filter(|r| r.kind() == kind).count();
            if used >= limit {
                warn!("Quota of {} {} resources reached", limit, kind);
                return Err(ProviderError::QuotaExceeded { kind, name });
            }
        }
        state.declared.insert((kind, name.clone()));

        info!("Planned {} '{}'", kind, name);
        state.requests.push(request);
        Ok(())
    }

    fn hex_id(&self, kind: ResourceKind, name: &str, suffix: &str) -> String {
        let seed = format!(
            "{}/{}/{:?}/{}/{}",
            self.config.account_id, self.config.region, kind, name, suffix
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
            .simple()
            .to_string()
    }

    fn short_id(&self, prefix: &str, kind: ResourceKind, name: &str, suffix: &str) -> String {
        format!("{}-{}", prefix, &self.hex_id(kind, name, suffix)[..17])
    }

    fn invalid(kind: ResourceKind, name: &str, message: impl Into<String>) -> ProviderError {
        ProviderError::InvalidParameters {
            kind,
            name: name.to_string(),
            message: message.into(),
        }
    }

    fn kubeconfig(&self, cluster: &str, endpoint: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": "kubernetes",
                "cluster": {
                    "server": endpoint,
                    "certificate-authority-data": self.hex_id(ResourceKind::Cluster, cluster, "ca"),
                },
            }],
            "contexts": [{
                "name": "aws",
                "context": { "cluster": "kubernetes", "user": "aws" },
            }],
            "current-context": "aws",
            "users": [{
                "name": "aws",
                "user": {
                    "exec": {
                        "apiVersion": "client.authentication.k8s.io/v1beta1",
                        "command": "aws",
                        "args": ["eks", "get-token", "--cluster-name", cluster],
                        "env": [{ "name": "AWS_REGION", "value": self.config.region }],
                    },
                },
            }],
        })
    }
}

#[async_trait]
impl ResourceProvider for PlanProvider {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity> {
        self.state.lock().await.identity_lookups += 1;
        if let Some(message) = &self.identity_failure {
            warn!("Caller identity lookup failed: {}", message);
            return Err(ProviderError::Identity {
                message: message.clone(),
            });
        }
        debug!("Resolved caller identity for account {}", self.config.account_id);

        Ok(CallerIdentity {
            account_id: self.config.account_id.clone(),
            arn: format!(
                "arn:aws:iam::{}:user/{}",
                self.config.account_id, self.config.caller_name
            ),
            user_id: self
                .hex_id(ResourceKind::Role, &self.config.caller_name, "user-id")
                .to_uppercase()[..21]
                .to_string(),
        })
    }

    async fn create_vpc(&self, args: VpcArgs) -> ProviderResult<VpcHandle> {
        let kind = ResourceKind::Vpc;
        if args.cidr_block.is_empty() {
            return Err(Self::invalid(kind, &args.name, "cidr block is required"));
        }
        if args.availability_zone_names.is_empty() {
            return Err(Self::invalid(
                kind,
                &args.name,
                "at least one availability zone is required",
            ));
        }

        let name = args.name.clone();
        let zones = args.availability_zone_names.clone();
        let cidr_block = args.cidr_block.clone();
        self.accept(ResourceRequest::Vpc(args)).await?;

        let subnets = |tier: &str| -> Vec<String> {
            zones
                .iter()
                .map(|zone| self.short_id("subnet", kind, &name, &format!("{}/{}", tier, zone)))
                .collect()
        };

        Ok(VpcHandle {
            vpc_id: self.short_id("vpc", kind, &name, ""),
            cidr_block,
            public_subnet_ids: subnets("public"),
            private_subnet_ids: subnets("private"),
            availability_zone_names: zones,
        })
    }

    async fn create_role(&self, args: RoleArgs) -> ProviderResult<RoleHandle> {
        if !args.assume_role_policy.is_object() {
            return Err(Self::invalid(
                ResourceKind::Role,
                &args.name,
                "assume role policy must be a JSON object",
            ));
        }

        let name = args.name.clone();
        self.accept(ResourceRequest::Role(args)).await?;

        Ok(RoleHandle {
            arn: format!("arn:aws:iam::{}:role/{}", self.config.account_id, name),
            name,
        })
    }

    async fn create_cluster(&self, args: ClusterArgs) -> ProviderResult<ClusterHandle> {
        let kind = ResourceKind::Cluster;
        if args.version.is_empty() {
            return Err(Self::invalid(kind, &args.name, "version is required"));
        }
        if args.public_subnet_ids.is_empty() && args.private_subnet_ids.is_empty() {
            return Err(Self::invalid(kind, &args.name, "at least one subnet is required"));
        }
        if !args.endpoint_private_access && !args.endpoint_public_access {
            return Err(Self::invalid(
                kind,
                &args.name,
                "private and public endpoint access cannot both be disabled",
            ));
        }

        let name = args.name.clone();
        let version = args.version.clone();
        let create_oidc = args.create_oidc_provider;
        self.accept(ResourceRequest::Cluster(args)).await?;

        let issuer_id = self.hex_id(kind, &name, "oidc").to_uppercase();
        let oidc_host = format!(
            "oidc.eks.{}.amazonaws.com/id/{}",
            self.config.region, issuer_id
        );
        let endpoint = format!(
            "https://{}.gr7.{}.eks.amazonaws.com",
            self.hex_id(kind, &name, "endpoint").to_uppercase(),
            self.config.region
        );

        Ok(ClusterHandle {
            arn: format!(
                "arn:aws:eks:{}:{}:cluster/{}",
                self.config.region, self.config.account_id, name
            ),
            kubeconfig: self.kubeconfig(&name, &endpoint),
            endpoint,
            oidc_provider_arn: create_oidc.then(|| {
                format!(
                    "arn:aws:iam::{}:oidc-provider/{}",
                    self.config.account_id, oidc_host
                )
            }),
            oidc_provider_url: create_oidc.then(|| format!("https://{}", oidc_host)),
            name,
            version,
        })
    }

    async fn create_node_group(&self, args: NodeGroupArgs) -> ProviderResult<NodeGroupHandle> {
        let kind = ResourceKind::NodeGroup;
        let scaling = args.scaling;
        if scaling.max_size == 0 {
            return Err(Self::invalid(kind, &args.name, "max size must be at least 1"));
        }
        if scaling.min_size > scaling.desired_size || scaling.desired_size > scaling.max_size {
            return Err(Self::invalid(
                kind,
                &args.name,
                format!(
                    "scaling must satisfy min <= desired <= max (got {}/{}/{})",
                    scaling.min_size, scaling.desired_size, scaling.max_size
                ),
            ));
        }
        if args.subnet_ids.is_empty() {
            return Err(Self::invalid(kind, &args.name, "at least one subnet is required"));
        }

        let name = args.name.clone();
        let cluster_name = args.cluster_name.clone();
        self.accept(ResourceRequest::NodeGroup(args)).await?;

        Ok(NodeGroupHandle {
            arn: format!(
                "arn:aws:eks:{}:{}:nodegroup/{}/{}/{}",
                self.config.region,
                self.config.account_id,
                cluster_name,
                name,
                self.hex_id(kind, &name, "")
            ),
            name,
        })
    }

    async fn create_kms_key(&self, args: KmsKeyArgs) -> ProviderResult<KmsKeyHandle> {
        if !(7..=30).contains(&args.deletion_window_in_days) {
            return Err(Self::invalid(
                ResourceKind::KmsKey,
                &args.name,
                format!(
                    "deletion window must be between 7 and 30 days (got {})",
                    args.deletion_window_in_days
                ),
            ));
        }

        let name = args.name.clone();
        self.accept(ResourceRequest::KmsKey(args)).await?;

        let key_id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            self.hex_id(ResourceKind::KmsKey, &name, "").as_bytes(),
        )
        .hyphenated()
        .to_string();
        Ok(KmsKeyHandle {
            arn: format!(
                "arn:aws:kms:{}:{}:key/{}",
                self.config.region, self.config.account_id, key_id
            ),
            key_id,
        })
    }

    async fn create_bucket(&self, args: BucketArgs) -> ProviderResult<BucketHandle> {
        let name = args.name.clone();
        let valid_name = (3..=63).contains(&name.len())
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if !valid_name {
            return Err(Self::invalid(
                ResourceKind::Bucket,
                &name,
                "bucket names must be 3-63 lowercase letters, digits, dots or dashes",
            ));
        }

        self.accept(ResourceRequest::Bucket(args)).await?;

        // The physical bucket name gets a random-looking suffix, as auto-naming does.
        let bucket = format!(
            "{}-{}",
            name,
            &self.hex_id(ResourceKind::Bucket, &name, "")[..7]
        );
        Ok(BucketHandle {
            id: bucket.clone(),
            arn: format!("arn:aws:s3:::{}", bucket),
            bucket,
        })
    }

    async fn create_public_access_block(
        &self,
        args: PublicAccessBlockArgs,
    ) -> ProviderResult<PublicAccessBlockHandle> {
        if args.bucket_id.is_empty() {
            return Err(Self::invalid(
                ResourceKind::PublicAccessBlock,
                &args.name,
                "bucket id is required",
            ));
        }

        let id = args.bucket_id.clone();
        self.accept(ResourceRequest::PublicAccessBlock(args)).await?;
        Ok(PublicAccessBlockHandle { id })
    }

    fn provider_name(&self) -> &'static str {
        "plan"
    }
}
