//! In-process collaborators
//!
//! [`SimulatedAsset`] and [`SimulatedStrategy`] implement the collaborator
//! traits over shared state, so a test (or the simulator binary) keeps a
//! clone to drive yield accrual, fund rewards or inject failures while
//! the engine owns another clone.

use crate::adapter::{FungibleAsset, StrategyAdapter};
use crate::math;
use crate::types::{AccountId, AssetId};
use crate::{Error, Result};
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct AssetBook {
    balances: HashMap<AccountId, Decimal>,
    allowances: HashMap<(AccountId, AccountId), Decimal>,
    total_supply: Decimal,
    fail_transfers: bool,
}

/// Fungible asset with shared balances
#[derive(Debug, Clone)]
pub struct SimulatedAsset {
    id: AssetId,
    book: Arc<Mutex<AssetBook>>,
}

impl SimulatedAsset {
    /// Create an empty asset
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AssetId::new(id),
            book: Arc::new(Mutex::new(AssetBook::default())),
        }
    }

    /// Create `amount` out of thin air for `to`
    pub fn mint(&self, to: &AccountId, amount: Decimal) {
        let mut book = self.book.lock();
        *book.balances.entry(to.clone()).or_default() += amount;
        book.total_supply += amount;
    }

    /// Total minted
    pub fn total_supply(&self) -> Decimal {
        self.book.lock().total_supply
    }

    /// Make every transfer fail (or stop failing)
    pub fn set_fail_transfers(&self, fail: bool) {
        self.book.lock().fail_transfers = fail;
    }

    fn move_funds(book: &mut AssetBook, from: &AccountId, to: &AccountId, amount: Decimal) -> Result<()> {
        if book.fail_transfers {
            return Err(Error::Asset("transfer rejected".to_string()));
        }
        let available = book.balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Err(Error::InsufficientBalance {
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        *book.balances.entry(from.clone()).or_default() -= amount;
        *book.balances.entry(to.clone()).or_default() += amount;
        Ok(())
    }
}

impl FungibleAsset for SimulatedAsset {
    fn id(&self) -> AssetId {
        self.id.clone()
    }

    fn balance_of(&self, account: &AccountId) -> Decimal {
        self.book.lock().balances.get(account).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Decimal {
        self.book
            .lock()
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Decimal) -> Result<()> {
        self.book
            .lock()
            .allowances
            .insert((owner.clone(), spender.clone()), amount);
        Ok(())
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Decimal) -> Result<()> {
        let mut book = self.book.lock();
        Self::move_funds(&mut book, from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<()> {
        let mut book = self.book.lock();
        let key = (owner.clone(), spender.clone());
        let available = book.allowances.get(&key).copied().unwrap_or_default();
        if available < amount {
            return Err(Error::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                available,
                requested: amount,
            });
        }
        Self::move_funds(&mut book, owner, to, amount)?;
        book.allowances.insert(key, available - amount);
        Ok(())
    }
}

#[derive(Debug)]
struct StrategyBook {
    address: AccountId,
    base: SimulatedAsset,
    exchange_rate: Decimal,
    units: Decimal,
    withdraw_address: Option<AccountId>,
    reward_assets: HashMap<AssetId, SimulatedAsset>,
    liquidity_cap: Option<Decimal>,
    deposits_paused: bool,
}

/// Yield strategy whose exchange rate is driven by the caller
#[derive(Debug, Clone)]
pub struct SimulatedStrategy {
    book: Arc<Mutex<StrategyBook>>,
}

impl SimulatedStrategy {
    /// New strategy custodied at `address`
    pub fn new(address: AccountId, base: SimulatedAsset, initial_rate: Decimal) -> Self {
        Self {
            book: Arc::new(Mutex::new(StrategyBook {
                address,
                base,
                exchange_rate: initial_rate,
                units: Decimal::ZERO,
                withdraw_address: None,
                reward_assets: HashMap::new(),
                liquidity_cap: None,
                deposits_paused: false,
            })),
        }
    }

    /// Custody address
    pub fn address(&self) -> AccountId {
        self.book.lock().address.clone()
    }

    /// Current rate
    pub fn exchange_rate(&self) -> Decimal {
        self.book.lock().exchange_rate
    }

    /// Strategy units outstanding
    pub fn units(&self) -> Decimal {
        self.book.lock().units
    }

    /// Grow the rate by `factor` and mint the base asset backing the growth
    pub fn accrue(&self, factor: Decimal) {
        let mut book = self.book.lock();
        let previous = book.exchange_rate;
        book.exchange_rate = previous * factor;
        let growth = (book.units * (book.exchange_rate - previous))
            .round_dp_with_strategy(math::AMOUNT_DECIMALS, RoundingStrategy::AwayFromZero);
        if growth > Decimal::ZERO {
            let address = book.address.clone();
            book.base.mint(&address, growth);
        }
        debug!(rate = %book.exchange_rate, growth = %growth, "Simulated interest accrued");
    }

    /// Force the rate (tests of rate regressions)
    pub fn set_exchange_rate(&self, rate: Decimal) {
        self.book.lock().exchange_rate = rate;
    }

    /// Credit `amount` of a reward asset to the strategy
    pub fn fund_rewards(&self, asset: &SimulatedAsset, amount: Decimal) {
        let mut book = self.book.lock();
        let address = book.address.clone();
        asset.mint(&address, amount);
        book.reward_assets
            .entry(asset.id())
            .or_insert_with(|| asset.clone());
    }

    /// Reject every deposit (or accept them again)
    pub fn set_deposits_paused(&self, paused: bool) {
        self.book.lock().deposits_paused = paused;
    }

    /// Limit how much a single withdrawal may take (None = unlimited)
    pub fn set_liquidity_cap(&self, cap: Option<Decimal>) {
        self.book.lock().liquidity_cap = cap;
    }
}

impl StrategyAdapter for SimulatedStrategy {
    fn current_exchange_rate(&self) -> Result<Decimal> {
        Ok(self.book.lock().exchange_rate)
    }

    fn total_value(&self) -> Result<Decimal> {
        let book = self.book.lock();
        math::to_value(book.units, book.exchange_rate)
    }

    fn deposit(&mut self, from: &AccountId, amount: Decimal) -> Result<()> {
        let mut book = self.book.lock();
        if book.deposits_paused {
            return Err(Error::Strategy("deposits are paused".to_string()));
        }
        let units = math::to_internal(amount, book.exchange_rate)?;
        let address = book.address.clone();
        book.base.transfer(from, &address, amount)?;
        book.units += units;
        Ok(())
    }

    fn withdraw(&mut self, to: &AccountId, amount: Decimal) -> Result<Decimal> {
        let mut book = self.book.lock();
        if let Some(cap) = book.liquidity_cap {
            if amount > cap {
                warn!(amount = %amount, cap = %cap, "Simulated strategy lacks liquidity");
                return Err(Error::StrategyWithdrawFailed(format!(
                    "requested {} but only {} is liquid",
                    amount, cap
                )));
            }
        }
        let units = math::to_internal(amount, book.exchange_rate)?;
        let address = book.address.clone();
        book.base
            .transfer(&address, to, amount)
            .map_err(|e| Error::StrategyWithdrawFailed(e.to_string()))?;
        book.units = math::gentle_sub(book.units, units);
        Ok(amount)
    }

    fn pending_reward_balance(&self, asset: &AssetId) -> Result<Decimal> {
        let book = self.book.lock();
        Ok(book
            .reward_assets
            .get(asset)
            .map(|a| a.balance_of(&book.address))
            .unwrap_or_default())
    }

    fn withdraw_address(&self) -> Option<AccountId> {
        self.book.lock().withdraw_address.clone()
    }

    fn set_withdraw_address(&mut self, address: AccountId) -> Result<()> {
        self.book.lock().withdraw_address = Some(address);
        Ok(())
    }

    fn claim_rewards(
        &mut self,
        caller: &AccountId,
        asset: &AssetId,
        to: &AccountId,
    ) -> Result<Decimal> {
        let book = self.book.lock();
        if book.withdraw_address.as_ref() != Some(caller) {
            return Err(Error::NotWithdrawAddress(caller.clone()));
        }
        let Some(reward) = book.reward_assets.get(asset) else {
            return Ok(Decimal::ZERO);
        };
        let mut reward = reward.clone();
        let amount = reward.balance_of(&book.address);
        if amount > Decimal::ZERO {
            reward.transfer(&book.address, to, amount)?;
        }
        Ok(amount)
    }
}
