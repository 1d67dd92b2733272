//! Platform configuration
//!
//! One section per component, each with defaults matching the production
//! platform. [`PlatformConfig::load`] layers an optional file and
//! `PROPTY__`-prefixed environment variables on top of the defaults.

use crate::{models::AccountId, LedgerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Property registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyConfig {
    /// Listings an owner may create without a subscription
    pub free_upload_limit: u32,
    /// Highest accepted asking price in minor units
    pub max_price: u64,
}

impl Default for PropertyConfig {
    fn default() -> Self {
        Self {
            free_upload_limit: 2,
            max_price: u64::MAX,
        }
    }
}

/// Escrow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Length of the inspection window in seconds
    pub inspection_period_secs: u64,
    /// Smallest deal amount accepted in minor units
    pub min_deal_amount: u64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            inspection_period_secs: 7 * 24 * 60 * 60, // 1 week
            min_deal_amount: 1,
        }
    }
}

/// Review registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub max_comment_len: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_comment_len: 2000,
        }
    }
}

/// Input validation limits shared by all registries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_name_len: usize,
    pub max_text_len: usize,
    pub max_hash_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_name_len: 200,
            max_text_len: 4000,
            max_hash_len: 256,
        }
    }
}

/// Administration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Identifiers holding admin authority without a user record
    pub genesis_admins: Vec<AccountId>,
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before it starts lagging
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Configuration for the whole platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub properties: PropertyConfig,
    pub escrow: EscrowConfig,
    pub reviews: ReviewConfig,
    pub validation: ValidationConfig,
    pub admin: AdminConfig,
    pub events: EventsConfig,
}

impl PlatformConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("PROPTY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admin.genesis_admins")
                    .try_parsing(true),
            )
            .build()?;

        let config: PlatformConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> LedgerResult<()> {
        if self.events.channel_capacity == 0 {
            return Err(crate::error::LedgerError::config(
                "events.channel_capacity must be greater than 0",
            ));
        }

        if self.escrow.min_deal_amount == 0 {
            return Err(crate::error::LedgerError::config(
                "escrow.min_deal_amount must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Whether the identifier is a configured bootstrap admin
    pub fn is_genesis_admin(&self, account: &AccountId) -> bool {
        self.admin.genesis_admins.contains(account)
    }

    /// Convenience for tests and embedders
    pub fn with_genesis_admin<A: Into<AccountId>>(mut self, admin: A) -> Self {
        self.admin.genesis_admins.push(admin.into());
        self
    }
}
