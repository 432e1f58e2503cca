use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TPM-backed key storage provider.
pub const PROVIDER_PLATFORM: &str = "Microsoft Platform Crypto Provider";
/// Software key storage provider; its machine keys live under the data root.
pub const PROVIDER_SOFTWARE: &str = "Microsoft Software Key Storage Provider";

/// Everything needed to bind a [`Store`](crate::Store) to a provider and a
/// key container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub container: String,
    /// Trusted leaf issuers, most preferred first.
    pub issuers: Vec<String>,
    /// Trusted intermediate issuers, most preferred first.
    #[serde(default)]
    pub intermediate_issuers: Vec<String>,
}

fn default_provider() -> String {
    PROVIDER_PLATFORM.to_string()
}

impl StoreConfig {
    pub fn new(
        provider: impl Into<String>,
        container: impl Into<String>,
        issuers: Vec<String>,
        intermediate_issuers: Vec<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            container: container.into(),
            issuers,
            intermediate_issuers,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(Error::Config("provider name is empty".into()));
        }
        if self.container.is_empty() {
            return Err(Error::Config("key container name is empty".into()));
        }
        Ok(())
    }

    pub fn is_software_provider(&self) -> bool {
        self.provider == PROVIDER_SOFTWARE
    }
}
