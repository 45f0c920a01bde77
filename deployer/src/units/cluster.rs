//! Kubernetes stack: node IAM role, EKS control plane and default node group.
//!
//! The network comes from the VPC stack of the same environment through a
//! stack reference. A single parameterised composer covers every variant;
//! what differs between environments is expressed by [`ClusterCapabilities`].

use crate::exports::ExportSet;
use crate::output::Output;
use crate::reference::{ResolveResult, StackName, StackReference};
use crate::run::DeployResult;
use crate::tags::cluster_tags;
use crate::units::{to_u32, validate_env, Unit, ORGANIZATION};
use provider::{
    ClusterArgs, ClusterHandle, NodeGroupArgs, NodeGroupHandle, ResourceProvider, RoleArgs,
    RoleHandle, RoleMapping, ScalingConfig,
};
use regex::Regex;
use serde_json::json;
use stack_config::{ConfigError, ConfigResult, ConfigSet};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Kubernetes group every permitted user is mapped into
pub const MASTERS_GROUP: &str = "system:masters";

/// Smallest root volume a worker node gets, in GiB
pub const MIN_NODE_ROOT_VOLUME_GIB: u32 = 20;

pub const DEFAULT_LOG_TYPES: [&str; 3] = ["api", "audit", "authenticator"];

const KNOWN_LOG_TYPES: [&str; 5] = [
    "api",
    "audit",
    "authenticator",
    "controllerManager",
    "scheduler",
];

const NODE_MANAGED_POLICIES: [&str; 3] = [
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

static K8S_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("valid kubernetes version pattern"));

static INSTANCE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9-]*\.[a-z0-9]+$").expect("valid instance type pattern")
});

/// Switches that distinguish one cluster variant from another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterCapabilities {
    /// When false nothing is created, only the network pass-through is exported
    pub deploy: bool,
    pub skip_default_node_group: bool,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
}

impl Default for ClusterCapabilities {
    fn default() -> Self {
        Self {
            deploy: true,
            skip_default_node_group: false,
            endpoint_public_access: false,
            endpoint_private_access: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub env: String,
    pub k8s_version: String,
    pub instance_type: String,
    pub scaling: ScalingConfig,
    pub node_root_volume_size_gib: u32,
    pub eks_users: Vec<String>,
    pub enabled_log_types: Vec<String>,
    pub capabilities: ClusterCapabilities,
}

impl ClusterConfig {
    pub fn from_config(config: &ConfigSet) -> ConfigResult<Self> {
        let env = config.require_string("env")?;
        validate_env("env", &env)?;

        let k8s_version = config.require_string("k8sVersion")?;
        if !K8S_VERSION.is_match(&k8s_version) {
            return Err(ConfigError::invalid(
                "k8sVersion",
                format!("'{}' must look like 1.27", k8s_version),
            ));
        }

        let desired_size = to_u32(
            "defaultDesiredCapacity",
            config.require_int("defaultDesiredCapacity")?,
        )?;
        let instance_type = config.require_string("instanceType")?;
        if !INSTANCE_TYPE.is_match(&instance_type) {
            return Err(ConfigError::invalid(
                "instanceType",
                format!("'{}' is not an instance type like t3.medium", instance_type),
            ));
        }
        let min_size = to_u32("defaultMinSize", config.require_int("defaultMinSize")?)?;
        let max_size = to_u32("defaultMaxSize", config.require_int("defaultMaxSize")?)?;
        let scaling = ScalingConfig {
            min_size,
            max_size,
            desired_size,
        };
        validate_scaling(&scaling)?;

        let deploy = config.require_bool("deploy")?;

        let eks_users = config.get_string_list("eksUsers")?.unwrap_or_default();
        if eks_users.iter().any(|user| user.trim().is_empty()) {
            return Err(ConfigError::invalid("eksUsers", "user names cannot be empty"));
        }

        let enabled_log_types = match config.get_string_list("enabledClusterLogTypes")? {
            Some(types) => {
                if let Some(unknown) = types
                    .iter()
                    .find(|t| !KNOWN_LOG_TYPES.contains(&t.as_str()))
                {
                    return Err(ConfigError::invalid(
                        "enabledClusterLogTypes",
                        format!(
                            "unknown log type '{}', expected one of {}",
                            unknown,
                            KNOWN_LOG_TYPES.join(", ")
                        ),
                    ));
                }
                types
            }
            None => DEFAULT_LOG_TYPES.iter().map(|t| t.to_string()).collect(),
        };

        let node_root_volume_size_gib = match config.get_int("nodeRootVolumeSize")? {
            Some(size) => to_u32("nodeRootVolumeSize", size)?,
            None => MIN_NODE_ROOT_VOLUME_GIB,
        };
        if node_root_volume_size_gib < MIN_NODE_ROOT_VOLUME_GIB {
            return Err(ConfigError::invalid(
                "nodeRootVolumeSize",
                format!("must be at least {} GiB", MIN_NODE_ROOT_VOLUME_GIB),
            ));
        }

        let defaults = ClusterCapabilities::default();
        let capabilities = ClusterCapabilities {
            deploy,
            skip_default_node_group: config
                .get_bool("skipDefaultNodeGroup")?
                .unwrap_or(defaults.skip_default_node_group),
            endpoint_public_access: config
                .get_bool("endpointPublicAccess")?
                .unwrap_or(defaults.endpoint_public_access),
            endpoint_private_access: config
                .get_bool("endpointPrivateAccess")?
                .unwrap_or(defaults.endpoint_private_access),
        };
        if !capabilities.endpoint_private_access && !capabilities.endpoint_public_access {
            return Err(ConfigError::invalid(
                "endpointPrivateAccess",
                "private and public endpoint access cannot both be disabled",
            ));
        }

        Ok(Self {
            env,
            k8s_version,
            instance_type,
            scaling,
            node_root_volume_size_gib,
            eks_users,
            enabled_log_types,
            capabilities,
        })
    }
}

fn validate_scaling(scaling: &ScalingConfig) -> ConfigResult<()> {
    if scaling.max_size == 0 {
        return Err(ConfigError::invalid("defaultMaxSize", "must be at least 1"));
    }
    if scaling.min_size > scaling.max_size {
        return Err(ConfigError::invalid(
            "defaultMinSize",
            format!(
                "{} is larger than defaultMaxSize {}",
                scaling.min_size, scaling.max_size
            ),
        ));
    }
    if !(scaling.min_size..=scaling.max_size).contains(&scaling.desired_size) {
        return Err(ConfigError::invalid(
            "defaultDesiredCapacity",
            format!(
                "{} is outside {}..={}",
                scaling.desired_size, scaling.min_size, scaling.max_size
            ),
        ));
    }
    Ok(())
}

/// The VPC stack this environment's cluster lives in
pub fn network_stack(env: &str) -> StackName {
    StackName::new(ORGANIZATION, Unit::Vpc.project(), env)
}

/// Outputs of the network stack, not yet resolved
#[derive(Debug, Clone)]
pub struct NetworkInputs {
    pub vpc_id: Output<String>,
    pub public_subnet_ids: Output<Vec<String>>,
    pub private_subnet_ids: Output<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub vpc_id: String,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
}

impl NetworkInputs {
    pub fn from_reference(reference: &StackReference) -> Self {
        Self {
            vpc_id: reference.get_string_output("vpcId"),
            public_subnet_ids: reference.get_string_list_output("publicSubnetIds"),
            private_subnet_ids: reference.get_string_list_output("privateSubnetIds"),
        }
    }

    /// Wait for every input; the first failure wins
    pub async fn resolve(&self) -> ResolveResult<ResolvedNetwork> {
        let (vpc_id, public_subnet_ids, private_subnet_ids) = futures::try_join!(
            self.vpc_id.get(),
            self.public_subnet_ids.get(),
            self.private_subnet_ids.get()
        )?;
        debug!(
            "Resolved network {} with {} public and {} private subnets",
            vpc_id,
            public_subnet_ids.len(),
            private_subnet_ids.len()
        );
        Ok(ResolvedNetwork {
            vpc_id,
            public_subnet_ids,
            private_subnet_ids,
        })
    }
}

pub fn cluster_role_args(env: &str) -> RoleArgs {
    RoleArgs {
        name: format!("{}-eks-cluster-role", env),
        assume_role_policy: json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ec2.amazonaws.com" },
                "Action": "sts:AssumeRole",
            }],
        }),
        managed_policy_arns: NODE_MANAGED_POLICIES.iter().map(|p| p.to_string()).collect(),
        tags: cluster_tags(env),
    }
}

/// One mapping per user, all in the same account and all cluster admins
pub fn role_mappings(account_id: &str, users: &[String]) -> Vec<RoleMapping> {
    users
        .iter()
        .map(|user| RoleMapping {
            role_arn: format!("arn:aws:iam::{}:user/{}", account_id, user),
            username: user.clone(),
            groups: vec![MASTERS_GROUP.to_string()],
        })
        .collect()
}

pub fn cluster_args(
    config: &ClusterConfig,
    node_role: &RoleHandle,
    role_mappings: Vec<RoleMapping>,
    network: &ResolvedNetwork,
) -> ClusterArgs {
    ClusterArgs {
        name: config.env.clone(),
        version: config.k8s_version.clone(),
        vpc_id: network.vpc_id.clone(),
        public_subnet_ids: network.public_subnet_ids.clone(),
        private_subnet_ids: network.private_subnet_ids.clone(),
        instance_role_arns: vec![node_role.arn.clone()],
        role_mappings,
        enabled_cluster_log_types: config.enabled_log_types.clone(),
        endpoint_private_access: config.capabilities.endpoint_private_access,
        endpoint_public_access: config.capabilities.endpoint_public_access,
        create_oidc_provider: true,
        fargate: false,
        skip_default_node_group: config.capabilities.skip_default_node_group,
        tags: cluster_tags(&config.env),
    }
}

pub fn node_group_args(
    config: &ClusterConfig,
    cluster_name: &str,
    node_role: &RoleHandle,
    network: &ResolvedNetwork,
) -> NodeGroupArgs {
    // Workers go in the private subnets unless the network has none.
    let subnet_ids = if network.private_subnet_ids.is_empty() {
        network.public_subnet_ids.clone()
    } else {
        network.private_subnet_ids.clone()
    };

    NodeGroupArgs {
        name: format!("{}-default-node-group", config.env),
        cluster_name: cluster_name.to_string(),
        node_role_arn: node_role.arn.clone(),
        instance_type: config.instance_type.clone(),
        scaling: config.scaling,
        root_volume_size_gib: config.node_root_volume_size_gib,
        subnet_ids,
        tags: cluster_tags(&config.env),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCluster {
    pub cluster: ClusterHandle,
    pub node_role: RoleHandle,
    pub node_group: Option<NodeGroupHandle>,
    pub role_mappings: Vec<RoleMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterDeployment {
    NotCreated,
    Created(CreatedCluster),
}

impl ClusterDeployment {
    pub fn cluster(&self) -> Option<&ClusterHandle> {
        match self {
            ClusterDeployment::NotCreated => None,
            ClusterDeployment::Created(created) => Some(&created.cluster),
        }
    }
}

pub async fn deploy(
    provider: &dyn ResourceProvider,
    config: &ClusterConfig,
    network: &ResolvedNetwork,
) -> DeployResult<ClusterDeployment> {
    if !config.capabilities.deploy {
        info!("Cluster '{}' is disabled, nothing will be created", config.env);
        return Ok(ClusterDeployment::NotCreated);
    }

    let node_role = provider.create_role(cluster_role_args(&config.env)).await?;

    let mappings = if config.eks_users.is_empty() {
        Vec::new()
    } else {
        let identity = provider.caller_identity().await?;
        role_mappings(&identity.account_id, &config.eks_users)
    };
    info!(
        "Creating cluster '{}' (Kubernetes {}) with {} user mappings",
        config.env,
        config.k8s_version,
        mappings.len()
    );

    let cluster = provider
        .create_cluster(cluster_args(config, &node_role, mappings.clone(), network))
        .await?;

    let node_group = if config.capabilities.skip_default_node_group {
        None
    } else {
        let args = node_group_args(config, &cluster.name, &node_role, network);
        Some(provider.create_node_group(args).await?)
    };

    Ok(ClusterDeployment::Created(CreatedCluster {
        cluster,
        node_role,
        node_group,
        role_mappings: mappings,
    }))
}

pub fn exports(deployment: &ClusterDeployment, network: &ResolvedNetwork) -> ExportSet {
    let mut exports = ExportSet::new();

    match deployment.cluster() {
        Some(cluster) => {
            exports.insert("clusterName", cluster.name.clone());
            exports.insert("clusterVersion", cluster.version.clone());
            exports.insert_secret("clusterKubeConfig", cluster.kubeconfig.clone());
            match &cluster.oidc_provider_arn {
                Some(arn) => exports.insert("clusterOidcArn", arn.clone()),
                None => exports.insert_absent("clusterOidcArn"),
            }
            match &cluster.oidc_provider_url {
                Some(url) => exports.insert("clusterOidcUrl", url.clone()),
                None => exports.insert_absent("clusterOidcUrl"),
            }
        }
        None => {
            for name in [
                "clusterName",
                "clusterVersion",
                "clusterOidcArn",
                "clusterOidcUrl",
            ] {
                exports.insert_absent(name);
            }
            exports.insert_secret("clusterKubeConfig", serde_json::Value::Null);
        }
    }

    exports.insert("vpcId", network.vpc_id.clone());
    exports.insert("publicSubnetIds", network.public_subnet_ids.clone());
    exports.insert("privateSubnetIds", network.private_subnet_ids.clone());
    exports
}
