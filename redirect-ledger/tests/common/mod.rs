//! Shared fixtures for integration tests

#![allow(dead_code)]

use redirect_ledger::simulation::{SimulatedAsset, SimulatedStrategy};
use redirect_ledger::{AccountId, AssetId, Config, Engine, Error, FungibleAsset, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn acct(name: &str) -> AccountId {
    AccountId::new(name)
}

/// In-memory configuration
pub fn memory_config() -> Config {
    Config {
        persistence_enabled: false,
        ..Config::default()
    }
}

/// RocksDB-backed configuration rooted at `dir`
pub fn persistent_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.rocksdb.sync_writes = false;
    config
}

/// Engine wired to simulated collaborators
pub struct Fixture {
    pub engine: Engine,
    pub base: SimulatedAsset,
    pub strategy: SimulatedStrategy,
    pub owner: AccountId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(&memory_config())
    }

    pub fn with_config(config: &Config) -> Self {
        let base = SimulatedAsset::new("DAI");
        let strategy = SimulatedStrategy::new(acct("strategy"), base.clone(), Decimal::ONE);
        Self::with_parts(config, base, strategy)
    }

    pub fn with_parts(config: &Config, base: SimulatedAsset, strategy: SimulatedStrategy) -> Self {
        let handle = Box::new(base.clone());
        Self::with_base_handle(config, base, strategy, handle)
    }

    /// Engine that reaches the base asset through `handle`
    pub fn with_base_handle(
        config: &Config,
        base: SimulatedAsset,
        strategy: SimulatedStrategy,
        handle: Box<dyn FungibleAsset>,
    ) -> Self {
        let engine = Engine::open(config, Box::new(strategy.clone()), handle).unwrap();
        Self {
            engine,
            base,
            strategy,
            owner: config.owner_account(),
        }
    }

    /// Give `who` base asset and an unlimited approval for the ledger
    pub fn fund(&mut self, who: &AccountId, amount: Decimal) {
        self.base.mint(who, amount);
        let mut base = self.base.clone();
        base.approve(who, self.engine.address(), Decimal::MAX).unwrap();
    }

    /// Fund and mint in one step
    pub fn deposit(&mut self, who: &AccountId, amount: Decimal) {
        self.fund(who, amount);
        self.engine.mint(who, amount).unwrap();
    }

    pub fn assert_consistent(&self) {
        let report = self.engine.verify_invariants().unwrap();
        assert!(report.is_ok(), "violations: {:?}", report.violations);
    }
}

/// Asset handle whose outgoing transfers can be switched off
///
/// Balances are shared with the wrapped asset, so the strategy keeps
/// moving funds while only this handle rejects.
#[derive(Debug, Clone)]
pub struct SwitchableAsset {
    inner: SimulatedAsset,
    rejecting: Arc<AtomicBool>,
}

impl SwitchableAsset {
    pub fn new(inner: SimulatedAsset) -> Self {
        Self {
            inner,
            rejecting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn reject(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(Error::Asset("transfers switched off".to_string()));
        }
        Ok(())
    }
}

impl FungibleAsset for SwitchableAsset {
    fn id(&self) -> AssetId {
        self.inner.id()
    }

    fn balance_of(&self, account: &AccountId) -> Decimal {
        self.inner.balance_of(account)
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Decimal {
        self.inner.allowance(owner, spender)
    }

    fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Decimal) -> Result<()> {
        self.inner.approve(owner, spender, amount)
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Decimal) -> Result<()> {
        self.check()?;
        self.inner.transfer(from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<()> {
        self.check()?;
        self.inner.transfer_from(spender, owner, to, amount)
    }
}
