//! State stack: the encrypted, versioned bucket other stacks keep their state in.

use crate::exports::ExportSet;
use crate::run::DeployResult;
use crate::tags::state_tags;
use crate::units::{to_u32, validate_env};
use provider::{
    BucketArgs, BucketHandle, KmsKeyArgs, KmsKeyHandle, PublicAccessBlockArgs,
    PublicAccessBlockHandle, ResourceProvider, ServerSideEncryption,
};
use stack_config::{ConfigError, ConfigResult, ConfigSet};
use tracing::info;

pub const DEFAULT_BUCKET_NAME: &str = "pulumi-state";
pub const DEFAULT_DELETION_WINDOW_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    pub env: Option<String>,
    pub bucket_name: String,
    pub kms_deletion_window_in_days: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            env: None,
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            kms_deletion_window_in_days: DEFAULT_DELETION_WINDOW_DAYS,
        }
    }
}

impl StateConfig {
    pub fn from_config(config: &ConfigSet) -> ConfigResult<Self> {
        let env = config.get_string("env")?;
        if let Some(env) = &env {
            validate_env("env", env)?;
        }

        let bucket_name = config
            .get_string("bucketName")?
            .unwrap_or_else(|| DEFAULT_BUCKET_NAME.to_string());
        if bucket_name.is_empty() {
            return Err(ConfigError::invalid("bucketName", "cannot be empty"));
        }

        let kms_deletion_window_in_days = match config.get_int("kmsDeletionWindowInDays")? {
            Some(days) => to_u32("kmsDeletionWindowInDays", days)?,
            None => DEFAULT_DELETION_WINDOW_DAYS,
        };
        if !(7..=30).contains(&kms_deletion_window_in_days) {
            return Err(ConfigError::invalid(
                "kmsDeletionWindowInDays",
                "must be between 7 and 30",
            ));
        }

        Ok(Self {
            env,
            bucket_name,
            kms_deletion_window_in_days,
        })
    }

    fn key_name(&self) -> String {
        format!("{}-key", self.bucket_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateResources {
    pub key: KmsKeyHandle,
    pub bucket: BucketHandle,
    pub public_access_block: PublicAccessBlockHandle,
}

pub fn kms_key_args(config: &StateConfig) -> KmsKeyArgs {
    KmsKeyArgs {
        name: config.key_name(),
        deletion_window_in_days: config.kms_deletion_window_in_days,
        tags: state_tags(&config.key_name(), config.env.as_deref()),
    }
}

pub fn bucket_args(config: &StateConfig) -> BucketArgs {
    BucketArgs {
        name: config.bucket_name.clone(),
        server_side_encryption: ServerSideEncryption::Aes256,
        versioning: true,
        tags: state_tags(&config.bucket_name, config.env.as_deref()),
    }
}

pub async fn deploy(
    provider: &dyn ResourceProvider,
    config: &StateConfig,
) -> DeployResult<StateResources> {
    info!("Creating state bucket '{}'", config.bucket_name);

    let key = provider.create_kms_key(kms_key_args(config)).await?;
    let bucket = provider.create_bucket(bucket_args(config)).await?;
    let public_access_block = provider
        .create_public_access_block(PublicAccessBlockArgs::block_all(
            config.bucket_name.clone(),
            bucket.id.clone(),
        ))
        .await?;

    Ok(StateResources {
        key,
        bucket,
        public_access_block,
    })
}

pub fn exports(resources: &StateResources) -> ExportSet {
    let mut exports = ExportSet::new();
    exports.insert("bucketName", resources.bucket.bucket.clone());
    exports.insert("kmsKeyId", resources.key.key_id.clone());
    exports
}
