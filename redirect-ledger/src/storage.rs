//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account records (key: account id)
//! - `hats` - Hat definitions (key: hat id, big endian)
//! - `hat_stats` - Per-hat aggregates (key: hat id, big endian)
//! - `global` - Global aggregate (single key)
//! - `reward_epochs` - Reward epochs, archived and active (key: epoch number)
//! - `allowances` - Claim-token allowances (key: owner || 0x00 || spender)
//! - `params` - Administrative parameters (single key)
//!
//! Each committed operation is written as one `WriteBatch`.

use crate::{
    error::{Error, Result},
    hats::HatRegistry,
    state::{AllowanceKey, ChangeSet, LedgerState},
    types::{Account, AccountId, GlobalStats, Hat, HatId, HatStats, Params, RewardBook, RewardEpoch},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_HATS: &str = "hats";
const CF_HAT_STATS: &str = "hat_stats";
const CF_GLOBAL: &str = "global";
const CF_REWARD_EPOCHS: &str = "reward_epochs";
const CF_ALLOWANCES: &str = "allowances";
const CF_PARAMS: &str = "params";

const ALL_CFS: [&str; 7] = [
    CF_ACCOUNTS,
    CF_HATS,
    CF_HAT_STATS,
    CF_GLOBAL,
    CF_REWARD_EPOCHS,
    CF_ALLOWANCES,
    CF_PARAMS,
];

const SINGLETON_KEY: &[u8] = b"current";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            "Opened RocksDB at {:?} with {} column families",
            path,
            ALL_CFS.iter().filter(|name| db.cf_handle(name).is_some()).count()
        );

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Hot, point-read records
            CF_ACCOUNTS | CF_ALLOWANCES => {
                opts.set_compression_type(DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            CF_REWARD_EPOCHS | CF_HATS => {
                opts.set_compression_type(DBCompressionType::Zstd);
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn allowance_key(key: &AllowanceKey) -> Vec<u8> {
        let mut bytes = key.0.as_str().as_bytes().to_vec();
        bytes.push(0);
        bytes.extend_from_slice(key.1.as_str().as_bytes());
        bytes
    }

    /// Write a transaction's records atomically
    pub fn apply(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        for (id, account) in &changes.accounts {
            batch.put_cf(&cf_accounts, id.as_str().as_bytes(), bincode::serialize(&(id, account))?);
        }

        let cf_hats = self.cf_handle(CF_HATS)?;
        for hat in &changes.hats {
            batch.put_cf(&cf_hats, hat.id.0.to_be_bytes(), bincode::serialize(hat)?);
        }

        let cf_hat_stats = self.cf_handle(CF_HAT_STATS)?;
        for (id, stats) in &changes.hat_stats {
            batch.put_cf(&cf_hat_stats, id.0.to_be_bytes(), bincode::serialize(stats)?);
        }

        let cf_allowances = self.cf_handle(CF_ALLOWANCES)?;
        for (key, amount) in &changes.allowances {
            batch.put_cf(
                &cf_allowances,
                Self::allowance_key(key),
                bincode::serialize(&(&key.0, &key.1, amount))?,
            );
        }

        if let Some(global) = &changes.global {
            let cf = self.cf_handle(CF_GLOBAL)?;
            batch.put_cf(&cf, SINGLETON_KEY, bincode::serialize(global)?);
        }

        if let Some(book) = &changes.rewards {
            let cf = self.cf_handle(CF_REWARD_EPOCHS)?;
            for epoch in book.archived.iter().chain(book.active.iter()) {
                batch.put_cf(&cf, epoch.number.to_be_bytes(), bincode::serialize(epoch)?);
            }
        }

        if let Some(params) = &changes.params {
            let cf = self.cf_handle(CF_PARAMS)?;
            batch.put_cf(&cf, SINGLETON_KEY, bincode::serialize(params)?);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(
            accounts = changes.accounts.len(),
            hats = changes.hats.len(),
            "Change set persisted"
        );

        Ok(())
    }

    /// Rebuild the ledger state; `None` for a fresh database
    pub fn load(&self) -> Result<Option<LedgerState>> {
        let cf_params = self.cf_handle(CF_PARAMS)?;
        let Some(raw_params) = self.db.get_cf(&cf_params, SINGLETON_KEY)? else {
            return Ok(None);
        };
        let params: Params = bincode::deserialize(&raw_params)?;

        let mut accounts = HashMap::new();
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let (id, account): (AccountId, Account) = bincode::deserialize(&value)?;
            accounts.insert(id, account);
        }

        let mut hats = Vec::new();
        let cf = self.cf_handle(CF_HATS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let hat: Hat = bincode::deserialize(&value)?;
            hats.push(hat);
        }

        let mut hat_stats = HashMap::new();
        let cf = self.cf_handle(CF_HAT_STATS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("malformed hat_stats key".to_string()))?;
            let stats: HatStats = bincode::deserialize(&value)?;
            hat_stats.insert(HatId(u64::from_be_bytes(id)), stats);
        }

        let mut allowances = HashMap::new();
        let cf = self.cf_handle(CF_ALLOWANCES)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let (owner, spender, amount): (AccountId, AccountId, Decimal) = bincode::deserialize(&value)?;
            allowances.insert((owner, spender), amount);
        }

        let cf = self.cf_handle(CF_GLOBAL)?;
        let global: GlobalStats = match self.db.get_cf(&cf, SINGLETON_KEY)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => GlobalStats::default(),
        };

        // Big-endian keys iterate in epoch order.
        let mut rewards = RewardBook::default();
        let cf = self.cf_handle(CF_REWARD_EPOCHS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let epoch: RewardEpoch = bincode::deserialize(&value)?;
            if epoch.archived_at.is_some() {
                rewards.archived.push(epoch);
            } else {
                rewards.active = Some(epoch);
            }
        }

        tracing::info!(
            accounts = accounts.len(),
            hats = hats.len(),
            epochs = rewards.archived.len() + rewards.active.iter().count(),
            "Ledger state loaded"
        );

        Ok(Some(LedgerState {
            accounts,
            hats: HatRegistry::from_hats(hats),
            hat_stats,
            global,
            rewards,
            allowances,
            params,
        }))
    }

    /// Approximate number of persisted accounts
    pub fn approximate_accounts(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let count = self
            .db
            .property_int_value_cf(&cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Txn;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_fresh_database_loads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(&test_config(&temp_dir)).unwrap();
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let mut state = LedgerState::new(Params::new(AccountId::new("admin")));
        {
            let mut txn = Txn::begin(&mut state);
            let alice = AccountId::new("alice");
            txn.account_mut(&alice).balance = Decimal::from(7);
            txn.set_allowance(&alice, &AccountId::new("bob"), Decimal::from(3));
            txn.insert_hat(Hat {
                id: HatId(1),
                recipients: vec![AccountId::new("bob")],
                proportions: vec![1],
            });
            crate::rewards::replace_asset(&mut txn, crate::types::AssetId::new("COMP"));
            crate::rewards::replace_asset(&mut txn, crate::types::AssetId::new("AAVE"));
            txn.commit();
        }

        {
            let storage = Storage::open(&config).unwrap();
            storage.apply(&state.snapshot()).unwrap();
            storage.close().unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(
            loaded.account(&AccountId::new("alice")).map(|a| a.balance),
            Some(Decimal::from(7))
        );
        assert_eq!(loaded.allowance(&AccountId::new("alice"), &AccountId::new("bob")), Decimal::from(3));
        assert_eq!(loaded.hats().max_hat_id(), HatId(1));
        assert_eq!(loaded.hat_stats(HatId::DEFAULT).use_count, 1);
        assert_eq!(loaded.rewards().archived.len(), 1);
        assert_eq!(
            loaded.rewards().active.as_ref().map(|e| e.asset.as_str()),
            Some("AAVE")
        );
        assert_eq!(loaded.params(), state.params());
    }

    #[test]
    fn test_empty_change_set_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(&test_config(&temp_dir)).unwrap();
        storage.apply(&ChangeSet::default()).unwrap();
        assert!(storage.load().unwrap().is_none());
    }
}
