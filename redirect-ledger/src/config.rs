//! Configuration for the ledger

use crate::hats::MAX_HAT_RECIPIENTS;
use crate::math;
use crate::types::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Address the ledger holds custody under (base asset, strategy, rewards)
    pub ledger_address: String,

    /// Initial administrator
    pub owner: String,

    /// Persist every committed operation to RocksDB
    pub persistence_enabled: bool,

    /// Fee configuration
    pub fees: FeeConfig,

    /// Hat limits
    pub hats: HatConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Actor configuration
    pub actor: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "redirect-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger_address: "redirect-ledger".to_string(),
            owner: "admin".to_string(),
            persistence_enabled: true,
            fees: FeeConfig::default(),
            hats: HatConfig::default(),
            rocksdb: RocksDBConfig::default(),
            actor: ActorConfig::default(),
        }
    }
}

/// Fees applied when a fresh ledger is created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Cut of realized interest, in [0, 1)
    pub interest_fee: Decimal,

    /// Cut of collected rewards, in [0, 1)
    pub rewards_fee: Decimal,

    /// Fee recipient (owner when unset)
    pub fee_recipient: Option<String>,
}

/// Hat limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HatConfig {
    /// Maximum recipients per hat
    pub max_hat_recipients: usize,
}

impl Default for HatConfig {
    fn default() -> Self {
        Self {
            max_hat_recipients: MAX_HAT_RECIPIENTS,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync every committed operation
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(address) = std::env::var("LEDGER_ADDRESS") {
            config.ledger_address = address;
        }

        if let Ok(owner) = std::env::var("LEDGER_OWNER") {
            config.owner = owner;
        }

        if let Ok(persist) = std::env::var("LEDGER_PERSIST") {
            config.persistence_enabled = match persist.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(crate::Error::Config(format!(
                        "LEDGER_PERSIST must be a boolean, got {:?}",
                        other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        math::validate_fee(self.fees.interest_fee)?;
        math::validate_fee(self.fees.rewards_fee)?;
        if self.ledger_address.is_empty() {
            return Err(crate::Error::Config("ledger_address cannot be empty".to_string()));
        }
        if self.owner.is_empty() {
            return Err(crate::Error::Config("owner cannot be empty".to_string()));
        }
        if self.hats.max_hat_recipients == 0 {
            return Err(crate::Error::Config(
                "max_hat_recipients must be positive".to_string(),
            ));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Custody address as an account
    pub fn ledger_account(&self) -> AccountId {
        AccountId::new(self.ledger_address.clone())
    }

    /// Owner as an account
    pub fn owner_account(&self) -> AccountId {
        AccountId::new(self.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "redirect-ledger");
        assert_eq!(config.hats.max_hat_recipients, 50);
        assert!(config.persistence_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            owner = "treasury"
            persistence_enabled = false

            [fees]
            interest_fee = "0.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.owner, "treasury");
        assert!(!config.persistence_enabled);
        assert_eq!(config.fees.interest_fee, Decimal::new(1, 1));
        assert_eq!(config.actor.mailbox_capacity, 1_000);
    }

    #[test]
    fn test_rejects_fee_of_one() {
        let mut config = Config::default();
        config.fees.rewards_fee = Decimal::ONE;
        assert!(matches!(config.validate(), Err(crate::Error::FeeOutOfRange(_))));
    }
}
