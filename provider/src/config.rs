use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub region: String,
    pub account_id: String,
    pub caller_name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            caller_name: "deployer".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_caller_name(mut self, caller_name: impl Into<String>) -> Self {
        self.caller_name = caller_name.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.region.is_empty() {
            return Err("Region cannot be empty".to_string());
        }

        if !self
            .region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!(
                "Region '{}' must contain only lowercase letters, digits and dashes",
                self.region
            ));
        }

        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!(
                "Account id '{}' must be exactly 12 digits",
                self.account_id
            ));
        }

        if self.caller_name.is_empty() {
            return Err("Caller name cannot be empty".to_string());
        }

        Ok(())
    }
}
