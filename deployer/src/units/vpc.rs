//! Network stack: one VPC spread over the configured availability zones.

use crate::exports::ExportSet;
use crate::run::DeployResult;
use crate::tags::network_tags;
use crate::units::validate_env;
use provider::{ResourceProvider, VpcArgs, VpcHandle};
use stack_config::{ConfigError, ConfigResult, ConfigSet};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcConfig {
    pub env: String,
    pub cidr: String,
    pub availability_zones: Vec<String>,
}

impl VpcConfig {
    pub fn from_config(config: &ConfigSet) -> ConfigResult<Self> {
        let env = config.require_string("env")?;
        validate_env("env", &env)?;

        let cidr = config.require_string("cidr")?;
        validate_cidr("cidr", &cidr)?;

        let availability_zones = config.require_string_list("availabilityZoneNames")?;
        if availability_zones.is_empty() {
            return Err(ConfigError::invalid(
                "availabilityZoneNames",
                "at least one availability zone is required",
            ));
        }
        let mut seen = HashSet::new();
        for zone in &availability_zones {
            if zone.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "availabilityZoneNames",
                    "zone names cannot be empty",
                ));
            }
            if !seen.insert(zone.as_str()) {
                return Err(ConfigError::invalid(
                    "availabilityZoneNames",
                    format!("zone '{}' is listed more than once", zone),
                ));
            }
        }

        Ok(Self {
            env,
            cidr,
            availability_zones,
        })
    }
}

/// Accept IPv4 network blocks between /16 and /28 with no host bits set
fn validate_cidr(key: &str, cidr: &str) -> ConfigResult<()> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| ConfigError::invalid(key, format!("'{}' is not in a.b.c.d/n form", cidr)))?;

    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not an IPv4 address", addr)))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a prefix length", prefix)))?;

    if !(16..=28).contains(&prefix) {
        return Err(ConfigError::invalid(
            key,
            format!("prefix /{} must be between /16 and /28", prefix),
        ));
    }

    let host_mask = u32::MAX >> prefix;
    if u32::from(addr) & host_mask != 0 {
        return Err(ConfigError::invalid(key, format!("'{}' has host bits set", cidr)));
    }

    Ok(())
}

pub fn vpc_args(config: &VpcConfig) -> VpcArgs {
    VpcArgs {
        name: config.env.clone(),
        cidr_block: config.cidr.clone(),
        availability_zone_names: config.availability_zones.clone(),
        tags: network_tags(&config.env),
    }
}

pub async fn deploy(
    provider: &dyn ResourceProvider,
    config: &VpcConfig,
) -> DeployResult<VpcHandle> {
    info!(
        "Creating VPC '{}' ({}) across {} zones",
        config.env,
        config.cidr,
        config.availability_zones.len()
    );
    Ok(provider.create_vpc(vpc_args(config)).await?)
}

pub fn exports(config: &VpcConfig, vpc: &VpcHandle) -> ExportSet {
    let mut exports = ExportSet::new();
    exports.insert("availabilityZones", config.availability_zones.clone());
    exports.insert("privateSubnetIds", vpc.private_subnet_ids.clone());
    exports.insert("publicSubnetIds", vpc.public_subnet_ids.clone());
    exports.insert("vpcId", vpc.vpc_id.clone());
    exports.insert("vpcCidrBlock", vpc.cidr_block.clone());
    exports
}
