//! Main ledger orchestration layer
//!
//! Opens the engine (loading persisted state when enabled), spawns the
//! single-writer actor and exposes an async API over it.
//!
//! # Example
//!
//! ```no_run
//! use redirect_ledger::simulation::{SimulatedAsset, SimulatedStrategy};
//! use redirect_ledger::{AccountId, Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> redirect_ledger::Result<()> {
//!     let config = Config::default();
//!     let base = SimulatedAsset::new("DAI");
//!     let strategy = SimulatedStrategy::new(AccountId::new("strategy"), base.clone(), Decimal::ONE);
//!     let ledger = Ledger::open(config, Box::new(strategy), Box::new(base)).await?;
//!
//!     // ledger.mint(AccountId::new("alice"), Decimal::from(100)).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    adapter::{FungibleAsset, StrategyAdapter},
    engine::Engine,
    stats::InvariantReport,
    types::{AccountStats, GlobalStatsView, HatId, RewardCollection},
    AccountId, Config, Result,
};
use rust_decimal::Decimal;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for async operations
    handle: LedgerHandle,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(
        config: Config,
        strategy: Box<dyn StrategyAdapter>,
        base: Box<dyn FungibleAsset>,
    ) -> Result<Self> {
        let engine = Engine::open(&config, strategy, base)?;
        Ok(Self::from_engine(engine, config))
    }

    /// Wrap an engine that is already set up (reward assets registered, etc.)
    pub fn from_engine(engine: Engine, config: Config) -> Self {
        let handle = spawn_ledger_actor(engine, config.actor.mailbox_capacity);
        tracing::info!(
            service = %config.service_name,
            address = %config.ledger_address,
            "Ledger actor started"
        );
        Self { handle, config }
    }

    /// Handle for the full operation set
    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Custody address
    pub fn address(&self) -> AccountId {
        self.config.ledger_account()
    }

    /// Deposit and mint under the current hat
    pub async fn mint(&self, account: AccountId, amount: Decimal) -> Result<()> {
        self.handle.mint(account, amount).await
    }

    /// Burn `amount` and receive base asset
    pub async fn redeem(&self, account: AccountId, amount: Decimal) -> Result<Decimal> {
        self.handle.redeem(account, amount).await
    }

    /// Move claim tokens
    pub async fn transfer(&self, src: AccountId, dst: AccountId, amount: Decimal) -> Result<Decimal> {
        self.handle.transfer(src, dst, amount).await
    }

    /// Register a hat and switch `caller` to it
    pub async fn create_and_select_hat(
        &self,
        caller: AccountId,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
    ) -> Result<HatId> {
        self.handle.create_hat(caller, recipients, proportions, true).await
    }

    /// Switch hat
    pub async fn change_hat(&self, account: AccountId, hat_id: HatId) -> Result<()> {
        self.handle.change_hat(account, hat_id).await
    }

    /// Realize payable interest
    pub async fn pay_interest(&self, account: AccountId) -> Result<Decimal> {
        self.handle.pay_interest(account).await
    }

    /// Claim and distribute strategy rewards
    pub async fn collect_rewards(&self) -> Result<RewardCollection> {
        self.handle.collect_rewards().await
    }

    /// Pay out active-epoch rewards
    pub async fn withdraw_rewards(&self, account: AccountId) -> Result<Decimal> {
        self.handle.withdraw_rewards(account).await
    }

    /// Account view
    pub async fn account_stats(&self, account: AccountId) -> Result<AccountStats> {
        self.handle.account_stats(account).await
    }

    /// Global view
    pub async fn global_stats(&self) -> Result<GlobalStatsView> {
        self.handle.global_stats().await
    }

    /// Check conservation of every aggregate
    ///
    /// Fails with [`crate::Error::InvariantViolation`] naming the first broken relation.
    pub async fn check_conservation(&self) -> Result<InvariantReport> {
        let report = self.handle.verify_invariants().await?;
        if !report.is_ok() {
            tracing::error!(violations = report.violations.len(), "Conservation violated");
        }
        report.into_result()
    }

    /// Graceful shutdown (closes storage)
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down ledger");
        self.handle.shutdown().await
    }
}
