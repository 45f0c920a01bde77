//! End-to-end runs of the vpc, k8s and state units against the plan provider.

use deployer::{
    Composition, DeployError, DeploymentState, InMemoryOutputs, LocalStackStore, ResolveError,
    StackName, StackRunner, Unit, ORGANIZATION,
};
use provider::{
    PlanProvider, ProviderConfig, ProviderError, ResourceKind, ResourceRequest, Tags,
};
use serde_json::json;
use stack_config::{ConfigError, ConfigLoader, ConfigSet, ConfigValue, ENV_OVERRIDES_VAR};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const ACCOUNT: &str = "123456789012";

fn plan_provider() -> Arc<PlanProvider> {
    Arc::new(PlanProvider::new(ProviderConfig::default().with_account_id(ACCOUNT)).unwrap())
}

fn set(namespace: &str, entries: &[(&str, ConfigValue)]) -> ConfigSet {
    let values: BTreeMap<String, ConfigValue> = entries
        .iter()
        .map(|(k, v)| (format!("{}:{}", namespace, k), v.clone()))
        .collect();
    ConfigSet::new(namespace, values)
}

fn s(value: &str) -> ConfigValue {
    ConfigValue::String(value.to_string())
}

fn vpc_config() -> ConfigSet {
    set(
        "infrastructure-vpc",
        &[
            ("env", s("dev")),
            ("cidr", s("10.0.0.0/16")),
            ("availabilityZoneNames", s(r#"["us-east-1a","us-east-1b"]"#)),
        ],
    )
}

fn k8s_entries(users: &str, deploy: bool) -> Vec<(&'static str, ConfigValue)> {
    vec![
        ("env", s("dev")),
        ("k8sVersion", s("1.27")),
        ("defaultMinSize", ConfigValue::Integer(1)),
        ("defaultMaxSize", ConfigValue::Integer(3)),
        ("defaultDesiredCapacity", ConfigValue::Integer(2)),
        ("instanceType", s("t3.medium")),
        ("deploy", ConfigValue::Bool(deploy)),
        ("eksUsers", s(users)),
    ]
}

fn k8s_config(users: &str, deploy: bool) -> ConfigSet {
    set("infrastructure-k8s", &k8s_entries(users, deploy))
}

fn network_outputs() -> InMemoryOutputs {
    InMemoryOutputs::new().with_stack(
        StackName::new(ORGANIZATION, "infrastructure-vpc", "dev"),
        [
            ("vpcId".to_string(), json!("vpc-0abc")),
            ("publicSubnetIds".to_string(), json!(["subnet-p1", "subnet-p2"])),
            ("privateSubnetIds".to_string(), json!(["subnet-q1", "subnet-q2"])),
        ]
        .into_iter()
        .collect(),
    )
}

fn expected_cluster_tags() -> Tags {
    [("Env", "dev"), ("Environment", "dev"), ("Name", "dev")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_vpc_stack_uses_zones_and_cidr() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));

    let result = runner.run(Unit::Vpc, "dev", &vpc_config()).await.unwrap();

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 1);
    match &requests[0] {
        ResourceRequest::Vpc(args) => {
            assert_eq!(args.cidr_block, "10.0.0.0/16");
            assert_eq!(args.availability_zone_names, vec!["us-east-1a", "us-east-1b"]);
            assert_eq!(args.tags["Env"], "dev");
            assert_eq!(args.tags["Name"], "dev");
        }
        other => panic!("unexpected request {:?}", other),
    }

    let exports = &result.exports;
    assert_eq!(
        exports.value("availabilityZones"),
        Some(&json!(["us-east-1a", "us-east-1b"]))
    );
    assert_eq!(exports.value("vpcCidrBlock"), Some(&json!("10.0.0.0/16")));
    assert_eq!(
        exports.value("publicSubnetIds").unwrap().as_array().unwrap().len(),
        2
    );
    assert!(exports.value("vpcId").unwrap().as_str().unwrap().starts_with("vpc-"));
}

#[tokio::test]
async fn test_k8s_example_run() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let result = runner
        .run(Unit::K8s, "dev", &k8s_config(r#"["alice","bob"]"#, true))
        .await
        .unwrap();
    assert_eq!(result.final_state, DeploymentState::Terminal);

    let requests = provider.requests().await;
    let kinds: Vec<ResourceKind> = requests.iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![ResourceKind::Role, ResourceKind::Cluster, ResourceKind::NodeGroup]
    );

    for request in &requests {
        assert_eq!(request.tags(), Some(&expected_cluster_tags()), "{}", request.name());
    }

    let cluster = requests
        .iter()
        .find_map(|r| match r {
            ResourceRequest::Cluster(args) => Some(args),
            _ => None,
        })
        .unwrap();
    assert_eq!(cluster.role_mappings.len(), 2);
    for (mapping, user) in cluster.role_mappings.iter().zip(["alice", "bob"]) {
        assert_eq!(mapping.groups, vec!["system:masters"]);
        assert_eq!(
            mapping.role_arn,
            format!("arn:aws:iam::{}:user/{}", ACCOUNT, user)
        );
        assert_eq!(mapping.username, user);
    }
    assert_eq!(cluster.vpc_id, "vpc-0abc");
    assert_eq!(cluster.private_subnet_ids, vec!["subnet-q1", "subnet-q2"]);
    assert!(cluster.endpoint_private_access);
    assert!(!cluster.endpoint_public_access);
    assert_eq!(provider.identity_lookups().await, 1);

    let node_group = requests
        .iter()
        .find_map(|r| match r {
            ResourceRequest::NodeGroup(args) => Some(args),
            _ => None,
        })
        .unwrap();
    assert_eq!(node_group.instance_type, "t3.medium");
    assert_eq!(node_group.scaling.min_size, 1);
    assert_eq!(node_group.scaling.max_size, 3);
    assert_eq!(node_group.scaling.desired_size, 2);
    assert_eq!(node_group.root_volume_size_gib, 20);

    let exports = &result.exports;
    assert_eq!(exports.value("clusterVersion"), Some(&json!("1.27")));
    assert_eq!(exports.value("clusterName"), Some(&json!("dev")));
    assert_eq!(exports.value("vpcId"), Some(&json!("vpc-0abc")));
    assert!(exports.get("clusterKubeConfig").unwrap().secret);
    assert!(exports
        .value("clusterOidcUrl")
        .unwrap()
        .as_str()
        .unwrap()
        .starts_with("https://oidc.eks.us-east-1.amazonaws.com/id/"));
}

#[tokio::test]
async fn test_empty_user_list_yields_no_mappings() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let result = runner
        .run(Unit::K8s, "dev", &k8s_config("[]", true))
        .await
        .unwrap();

    match &result.composition {
        Composition::K8s { deployment, .. } => match deployment {
            deployer::ClusterDeployment::Created(created) => {
                assert!(created.role_mappings.is_empty())
            }
            other => panic!("cluster not created: {:?}", other),
        },
        other => panic!("unexpected composition {:?}", other),
    }
    assert_eq!(provider.identity_lookups().await, 0);
}

#[tokio::test]
async fn test_absent_user_list_yields_no_mappings() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let entries: Vec<_> = k8s_entries("[]", true)
        .into_iter()
        .filter(|(k, _)| *k != "eksUsers")
        .collect();
    runner
        .run(Unit::K8s, "dev", &set("infrastructure-k8s", &entries))
        .await
        .unwrap();

    let requests = provider.requests().await;
    let cluster = requests
        .iter()
        .find_map(|r| match r {
            ResourceRequest::Cluster(args) => Some(args),
            _ => None,
        })
        .unwrap();
    assert!(cluster.role_mappings.is_empty());
}

#[tokio::test]
async fn test_missing_key_aborts_before_resolution_or_creation() {
    let provider = plan_provider();
    let outputs = Arc::new(network_outputs());
    let mut runner = StackRunner::new(provider.clone(), outputs.clone());

    let entries: Vec<_> = k8s_entries("[]", true)
        .into_iter()
        .filter(|(k, _)| *k != "k8sVersion")
        .collect();
    let err = runner
        .run(Unit::K8s, "dev", &set("infrastructure-k8s", &entries))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Config(ConfigError::Missing { ref key, .. }) if key == "k8sVersion"
    ));
    assert_eq!(outputs.fetch_count(), 0);
    assert!(provider.requests().await.is_empty());
    assert_eq!(provider.identity_lookups().await, 0);
}

#[tokio::test]
async fn test_malformed_user_list_fails_the_run() {
    let provider = plan_provider();
    let outputs = Arc::new(network_outputs());
    let mut runner = StackRunner::new(provider.clone(), outputs.clone());

    let err = runner
        .run(Unit::K8s, "dev", &k8s_config("[alice", true))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Config(ConfigError::MalformedJson { .. })));
    assert_eq!(outputs.fetch_count(), 0);
    assert!(provider.requests().await.is_empty());
}

#[tokio::test]
async fn test_deploy_false_creates_nothing() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let result = runner
        .run(Unit::K8s, "dev", &k8s_config(r#"["alice"]"#, false))
        .await
        .unwrap();

    assert!(provider.requests().await.is_empty());
    assert_eq!(provider.identity_lookups().await, 0);
    assert!(result.exports.is_absent("clusterName"));
    assert!(result.exports.is_absent("clusterKubeConfig"));
    assert_eq!(result.exports.value("vpcId"), Some(&json!("vpc-0abc")));
    assert_eq!(
        result.exports.value("publicSubnetIds"),
        Some(&json!(["subnet-p1", "subnet-p2"]))
    );
}

#[tokio::test]
async fn test_identical_inputs_issue_identical_calls() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let provider = plan_provider();
        let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));
        let result = runner
            .run(Unit::K8s, "dev", &k8s_config(r#"["alice","bob"]"#, true))
            .await
            .unwrap();
        runs.push((provider.requests().await, result.exports));
    }
    assert_eq!(runs[0].0, runs[1].0);
    assert_eq!(runs[0].1, runs[1].1);
}

#[tokio::test]
async fn test_skipping_the_node_group() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let mut entries = k8s_entries("[]", true);
    entries.push(("skipDefaultNodeGroup", ConfigValue::Bool(true)));
    entries.push(("endpointPublicAccess", ConfigValue::Bool(true)));
    runner
        .run(Unit::K8s, "dev", &set("infrastructure-k8s", &entries))
        .await
        .unwrap();

    let requests = provider.requests().await;
    assert!(requests.iter().all(|r| r.kind() != ResourceKind::NodeGroup));
    let cluster = requests
        .iter()
        .find_map(|r| match r {
            ResourceRequest::Cluster(args) => Some(args),
            _ => None,
        })
        .unwrap();
    assert!(cluster.endpoint_public_access);
    assert!(cluster.skip_default_node_group);
}

#[tokio::test]
async fn test_missing_network_stack_aborts_before_creation() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));

    let err = runner
        .run(Unit::K8s, "dev", &k8s_config("[]", true))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Resolve(ResolveError::StackNotFound { ref stack })
            if stack == "organization/infrastructure-vpc/dev"
    ));
    assert_eq!(runner.state(), DeploymentState::Configured);
    assert!(provider.requests().await.is_empty());
}

#[tokio::test]
async fn test_missing_network_output_aborts_before_creation() {
    let provider = plan_provider();
    let outputs = InMemoryOutputs::new().with_stack(
        StackName::new(ORGANIZATION, "infrastructure-vpc", "dev"),
        [("vpcId".to_string(), json!("vpc-0abc"))].into_iter().collect(),
    );
    let mut runner = StackRunner::new(provider.clone(), Arc::new(outputs));

    let err = runner
        .run(Unit::K8s, "dev", &k8s_config("[]", true))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Resolve(ResolveError::OutputNotFound { .. })));
    assert!(provider.requests().await.is_empty());
}

#[tokio::test]
async fn test_network_stack_is_fetched_once() {
    let outputs = Arc::new(network_outputs());
    let mut runner = StackRunner::new(plan_provider(), outputs.clone());

    runner
        .run(Unit::K8s, "dev", &k8s_config("[]", true))
        .await
        .unwrap();
    assert_eq!(outputs.fetch_count(), 1);
}

#[tokio::test]
async fn test_provider_rejection_aborts_run() {
    let provider = Arc::new(
        PlanProvider::new(ProviderConfig::default().with_account_id(ACCOUNT))
            .unwrap()
            .with_rejection(ResourceKind::Cluster, "eks:CreateCluster denied"),
    );
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let err = runner
        .run(Unit::K8s, "dev", &k8s_config("[]", true))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Provider(ProviderError::PermissionDenied { .. })));
    assert_eq!(runner.state(), DeploymentState::Configured);
    let kinds: Vec<_> = provider.requests().await.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![ResourceKind::Role]);
}

#[tokio::test]
async fn test_identity_failure_aborts_before_cluster() {
    let provider = Arc::new(
        PlanProvider::new(ProviderConfig::default().with_account_id(ACCOUNT))
            .unwrap()
            .with_identity_failure("sts unreachable"),
    );
    let mut runner = StackRunner::new(provider.clone(), Arc::new(network_outputs()));

    let err = runner
        .run(Unit::K8s, "dev", &k8s_config(r#"["alice"]"#, true))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Provider(ProviderError::Identity { .. })));
    let kinds: Vec<_> = provider.requests().await.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![ResourceKind::Role]);
}

#[tokio::test]
async fn test_exhausted_quota_aborts_run() {
    let provider = Arc::new(
        PlanProvider::new(ProviderConfig::default().with_account_id(ACCOUNT))
            .unwrap()
            .with_quota(ResourceKind::Bucket, 0),
    );
    let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));

    let err = runner
        .run(
            Unit::State,
            "dev",
            &ConfigSet::new("infrastructure-state", BTreeMap::new()),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Provider(ProviderError::QuotaExceeded {
            kind: ResourceKind::Bucket,
            ..
        })
    ));
    assert_eq!(runner.state(), DeploymentState::Configured);
    let kinds: Vec<_> = provider.requests().await.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![ResourceKind::KmsKey]);
}

#[tokio::test]
async fn test_state_stack() {
    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));

    let result = runner
        .run(
            Unit::State,
            "dev",
            &ConfigSet::new("infrastructure-state", BTreeMap::new()),
        )
        .await
        .unwrap();

    let requests = provider.requests().await;
    let kinds: Vec<_> = requests.iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::KmsKey,
            ResourceKind::Bucket,
            ResourceKind::PublicAccessBlock
        ]
    );
    match &requests[2] {
        ResourceRequest::PublicAccessBlock(args) => {
            assert!(args.block_public_acls && args.block_public_policy);
            assert!(args.ignore_public_acls && args.restrict_public_buckets);
        }
        other => panic!("unexpected request {:?}", other),
    }

    let bucket = result.exports.value("bucketName").unwrap().as_str().unwrap();
    assert!(bucket.starts_with("pulumi-state-"));
    assert_eq!(
        result.exports.value("kmsKeyId").unwrap().as_str().unwrap().len(),
        36
    );
}

#[tokio::test]
async fn test_vpc_then_k8s_through_the_local_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStackStore::new(dir.path()));

    let vpc_provider = plan_provider();
    let mut vpc_runner = StackRunner::new(vpc_provider, store.clone());
    let vpc = vpc_runner.run(Unit::Vpc, "dev", &vpc_config()).await.unwrap();
    store.save(&vpc.stack, &vpc.exports).await.unwrap();

    let k8s_provider = plan_provider();
    let mut k8s_runner = StackRunner::new(k8s_provider.clone(), store.clone());
    let k8s = k8s_runner
        .run(Unit::K8s, "dev", &k8s_config(r#"["alice"]"#, true))
        .await
        .unwrap();

    assert_eq!(k8s.exports.value("vpcId"), vpc.exports.value("vpcId"));
    assert_eq!(
        k8s.exports.value("privateSubnetIds"),
        vpc.exports.value("privateSubnetIds")
    );
    store.save(&k8s.stack, &k8s.exports).await.unwrap();

    let saved = store.load(&k8s.stack).await.unwrap().unwrap();
    assert!(saved.outputs.get("clusterKubeConfig").unwrap().secret);
}

#[tokio::test]
#[serial_test::serial]
async fn test_config_file_and_overrides_drive_a_run() {
    let dir = TempDir::new().unwrap();
    let path = stack_config::stack_file_path(dir.path(), "dev");
    std::fs::write(
        &path,
        r#"
[config]
"infrastructure-vpc:env" = "dev"
"infrastructure-vpc:cidr" = "10.0.0.0/16"
"infrastructure-vpc:availabilityZoneNames" = ["us-east-1a", "us-east-1b", "us-east-1c"]
"#,
    )
    .unwrap();

    std::env::remove_var(ENV_OVERRIDES_VAR);
    let config = ConfigLoader::new("infrastructure-vpc")
        .with_file(path)
        .with_env_overrides()
        .with_raw_override("cidr=10.20.0.0/16")
        .unwrap()
        .load()
        .unwrap();

    let provider = plan_provider();
    let mut runner = StackRunner::new(provider.clone(), Arc::new(InMemoryOutputs::new()));
    let result = runner.run(Unit::Vpc, "dev", &config).await.unwrap();

    assert_eq!(result.exports.value("vpcCidrBlock"), Some(&json!("10.20.0.0/16")));
    assert_eq!(
        result.exports.value("availabilityZones"),
        Some(&json!(["us-east-1a", "us-east-1b", "us-east-1c"]))
    );
}

#[test]
fn test_sample_stack_files_are_valid() {
    let stacks = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../stacks");
    for unit in Unit::all() {
        let config = ConfigLoader::new(unit.project())
            .with_file(stack_config::stack_file_path(&stacks.join(unit.to_string()), "dev"))
            .load()
            .unwrap();
        deployer::UnitConfig::parse(unit, &config)
            .unwrap_or_else(|e| panic!("sample {} stack is invalid: {}", unit, e));
        deployer::provider_config(&config).unwrap();
    }
}
