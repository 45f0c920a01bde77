//! Tag conventions applied to every created resource.

use provider::Tags;

pub const ENV_TAG: &str = "Env";
pub const ENVIRONMENT_TAG: &str = "Environment";
pub const NAME_TAG: &str = "Name";

/// Tags for cluster-stack resources: the environment under every conventional key
pub fn cluster_tags(env: &str) -> Tags {
    [ENV_TAG, ENVIRONMENT_TAG, NAME_TAG]
        .into_iter()
        .map(|key| (key.to_string(), env.to_string()))
        .collect()
}

pub fn network_tags(env: &str) -> Tags {
    [NAME_TAG, ENV_TAG]
        .into_iter()
        .map(|key| (key.to_string(), env.to_string()))
        .collect()
}

/// State-bucket tags are named after the bucket; the environment is optional there
pub fn state_tags(name: &str, env: Option<&str>) -> Tags {
    let mut tags = Tags::new();
    tags.insert(NAME_TAG.to_string(), name.to_string());
    if let Some(env) = env {
        tags.insert(ENV_TAG.to_string(), env.to_string());
    }
    tags
}
