//! Ledger engine
//!
//! Owns the bookkeeping state and the external collaborators. Every
//! public operation runs through [`Engine::transact`]: effects are booked
//! in a journaled [`Txn`] first, collaborators are called last, and any
//! failure (including persisting the change set) rolls the state back.
//!
//! Rolling back the journal cannot undo a collaborator call. When a later
//! call fails after an earlier one moved funds, the earlier one is
//! compensated (a refund, a reinvestment) before the error is returned,
//! and payouts that may be retried later stay booked as owed.

use crate::accounts;
use crate::adapter::{FungibleAsset, StrategyAdapter};
use crate::hats::HatRegistry;
use crate::interest;
use crate::math;
use crate::metrics::Metrics;
use crate::oracle::ExchangeRateOracle;
use crate::rewards;
use crate::state::{LedgerState, Txn};
use crate::stats::{self, InvariantReport};
use crate::storage::Storage;
use crate::types::{
    AccountId, AccountStats, AssetId, GlobalStatsView, Hat, HatId, HatStatsView, Params,
    RewardCollection, RewardEpoch,
};
use crate::{Config, Error, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// External collaborators and fixed settings
pub struct Context {
    address: AccountId,
    max_hat_recipients: usize,
    oracle: ExchangeRateOracle,
    base: Box<dyn FungibleAsset>,
    reward_assets: HashMap<AssetId, Box<dyn FungibleAsset>>,
    // Gross interest realized by the running transaction
    realized: Decimal,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("address", &self.address)
            .field("max_hat_recipients", &self.max_hat_recipients)
            .field("oracle", &self.oracle)
            .field("base", &self.base.id())
            .field("reward_assets", &self.reward_assets.keys().collect::<Vec<_>>())
            .field("realized", &self.realized)
            .finish()
    }
}

impl Context {
    // Ledger units -> base asset
    fn rate(&mut self, conversion: Decimal) -> Result<Decimal> {
        let strategy_rate = self.oracle.refresh()?;
        math::mul(strategy_rate, conversion)
    }

    fn pay_interest(
        &mut self,
        txn: &mut Txn<'_>,
        account: &AccountId,
        rate: Decimal,
    ) -> Result<interest::InterestPayment> {
        let paid = interest::pay_interest(txn, account, rate)?;
        self.realized = math::add(self.realized, paid.gross)?;
        Ok(paid)
    }

    fn reward_asset(&mut self, asset: &AssetId) -> Result<&mut Box<dyn FungibleAsset>> {
        self.reward_assets
            .get_mut(asset)
            .ok_or_else(|| Error::Asset(format!("reward asset {} is not registered", asset)))
    }
}

/// Single-writer ledger engine
#[derive(Debug)]
pub struct Engine {
    state: LedgerState,
    ctx: Context,
    storage: Option<Storage>,
    metrics: Metrics,
}

impl Engine {
    /// Open the ledger described by `config`
    ///
    /// With persistence enabled the state is loaded from RocksDB, or a
    /// fresh ledger is created and persisted.
    pub fn open(
        config: &Config,
        strategy: Box<dyn StrategyAdapter>,
        base: Box<dyn FungibleAsset>,
    ) -> Result<Self> {
        config.validate()?;

        let storage = if config.persistence_enabled {
            Some(Storage::open(config)?)
        } else {
            None
        };

        let loaded = match &storage {
            Some(storage) => storage.load()?,
            None => None,
        };

        let state = match loaded {
            Some(state) => {
                let estimated = match &storage {
                    Some(storage) => storage.approximate_accounts()?,
                    None => 0,
                };
                info!(
                    owner = %state.params().owner,
                    accounts = state.accounts().count(),
                    estimated_keys = estimated,
                    "Resuming persisted ledger"
                );
                state
            }
            None => {
                let state = LedgerState::new(Self::initial_params(config));
                if let Some(storage) = &storage {
                    storage.apply(&state.snapshot())?;
                }
                info!(owner = %state.params().owner, "Created fresh ledger");
                state
            }
        };

        let metrics = Metrics::new()?;
        metrics.set_accounts(state.accounts().count());

        Ok(Self {
            state,
            ctx: Context {
                address: config.ledger_account(),
                max_hat_recipients: config.hats.max_hat_recipients,
                oracle: ExchangeRateOracle::new(strategy),
                base,
                reward_assets: HashMap::new(),
                realized: Decimal::ZERO,
            },
            storage,
            metrics,
        })
    }

    fn initial_params(config: &Config) -> Params {
        let mut params = Params::new(config.owner_account());
        params.interest_fee = config.fees.interest_fee;
        params.rewards_fee = config.fees.rewards_fee;
        params.fee_recipient = config.fees.fee_recipient.clone().map(AccountId::new);
        params
    }

    /// Run `op` atomically
    fn transact<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Txn<'_>, &mut Context) -> Result<T>,
    ) -> Result<T> {
        let tx_id = Uuid::now_v7();
        let span = info_span!("ledger_tx", %tx_id, op);
        let _enter = span.enter();
        let started = Instant::now();

        self.ctx.realized = Decimal::ZERO;
        let mut txn = Txn::begin(&mut self.state);
        let result = f(&mut txn, &mut self.ctx).and_then(|value| {
            if let Some(storage) = &self.storage {
                storage.apply(&txn.change_set())?;
            }
            Ok(value)
        });

        match result {
            Ok(value) => {
                txn.commit();
                self.metrics
                    .record_operation(op, started.elapsed().as_secs_f64());
                let realized = std::mem::take(&mut self.ctx.realized);
                if !realized.is_zero() {
                    self.metrics.record_interest(realized);
                }
                self.metrics.set_accounts(self.state.accounts().count());
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                self.ctx.realized = Decimal::ZERO;
                warn!(error = %err, "Transaction rolled back");
                self.metrics.record_failure(op, err.kind());
                Err(err)
            }
        }
    }

    // Deposits

    /// Deposit `amount` of base asset and mint claim tokens under the current hat
    pub fn mint(&mut self, account: &AccountId, amount: Decimal) -> Result<()> {
        self.transact("mint", |txn, ctx| mint_in(txn, ctx, account, amount))
    }

    /// Switch to an existing hat, then mint
    pub fn mint_with_selected_hat(
        &mut self,
        account: &AccountId,
        amount: Decimal,
        hat_id: HatId,
    ) -> Result<()> {
        self.transact("mint_with_selected_hat", |txn, ctx| {
            change_hat_in(txn, ctx, account, hat_id)?;
            mint_in(txn, ctx, account, amount)
        })
    }

    /// Create a hat, switch to it, then mint
    pub fn mint_with_new_hat(
        &mut self,
        account: &AccountId,
        amount: Decimal,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
    ) -> Result<HatId> {
        self.transact("mint_with_new_hat", |txn, ctx| {
            let hat_id = create_hat_in(txn, ctx, account, recipients, proportions, true)?;
            mint_in(txn, ctx, account, amount)?;
            Ok(hat_id)
        })
    }

    // Withdrawals

    /// Burn `amount` claim tokens and deliver base asset to the caller
    pub fn redeem(&mut self, account: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.transact("redeem", |txn, ctx| redeem_in(txn, ctx, account, Some(amount), account))
    }

    /// Burn the whole balance (after realizing interest)
    pub fn redeem_all(&mut self, account: &AccountId) -> Result<Decimal> {
        self.transact("redeem_all", |txn, ctx| redeem_in(txn, ctx, account, None, account))
    }

    /// Burn `amount` and deliver base asset to `to`
    pub fn redeem_and_transfer(
        &mut self,
        account: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<Decimal> {
        self.transact("redeem_and_transfer", |txn, ctx| {
            redeem_in(txn, ctx, account, Some(amount), to)
        })
    }

    /// Burn the whole balance and deliver base asset to `to`
    pub fn redeem_and_transfer_all(&mut self, account: &AccountId, to: &AccountId) -> Result<Decimal> {
        self.transact("redeem_and_transfer_all", |txn, ctx| {
            redeem_in(txn, ctx, account, None, to)
        })
    }

    // Transfers

    /// Move `amount` claim tokens from `src` to `dst` (caller is `src`)
    pub fn transfer(&mut self, src: &AccountId, dst: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.transact("transfer", |txn, ctx| transfer_in(txn, ctx, src, src, dst, Some(amount)))
    }

    /// Move the whole balance of `src` to `dst`
    pub fn transfer_all(&mut self, src: &AccountId, dst: &AccountId) -> Result<Decimal> {
        self.transact("transfer_all", |txn, ctx| transfer_in(txn, ctx, src, src, dst, None))
    }

    /// Move `amount` claim tokens from `src` to `dst` on `spender`'s allowance
    pub fn transfer_from(
        &mut self,
        spender: &AccountId,
        src: &AccountId,
        dst: &AccountId,
        amount: Decimal,
    ) -> Result<Decimal> {
        self.transact("transfer_from", |txn, ctx| {
            transfer_in(txn, ctx, spender, src, dst, Some(amount))
        })
    }

    /// Move the whole balance of `src` on `spender`'s allowance
    pub fn transfer_all_from(
        &mut self,
        spender: &AccountId,
        src: &AccountId,
        dst: &AccountId,
    ) -> Result<Decimal> {
        self.transact("transfer_all_from", |txn, ctx| {
            transfer_in(txn, ctx, spender, src, dst, None)
        })
    }

    /// Let `spender` move up to `amount` of `owner`'s claim tokens
    ///
    /// `Decimal::MAX` never decreases.
    pub fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Decimal) -> Result<()> {
        self.transact("approve", |txn, _ctx| {
            if amount < Decimal::ZERO {
                return Err(Error::Other(format!("negative allowance {}", amount)));
            }
            txn.set_allowance(owner, spender, amount);
            debug!(owner = %owner, spender = %spender, amount = %amount, "Allowance set");
            Ok(())
        })
    }

    // Hats

    /// Register a hat; optionally switch the caller to it
    pub fn create_hat(
        &mut self,
        caller: &AccountId,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
        do_change_hat: bool,
    ) -> Result<HatId> {
        self.transact("create_hat", |txn, ctx| {
            create_hat_in(txn, ctx, caller, recipients, proportions, do_change_hat)
        })
    }

    /// Redirect the caller's whole balance through another hat
    pub fn change_hat(&mut self, account: &AccountId, hat_id: HatId) -> Result<()> {
        self.transact("change_hat", |txn, ctx| change_hat_in(txn, ctx, account, hat_id))
    }

    // Interest

    /// Realize `account`'s payable interest; returns the net amount credited
    pub fn pay_interest(&mut self, account: &AccountId) -> Result<Decimal> {
        let paid = self.transact("pay_interest", |txn, ctx| {
            let rate = ctx.rate(txn.state().params.savings_conversion_rate)?;
            ctx.pay_interest(txn, account, rate)
        })?;
        Ok(paid.net)
    }

    // Rewards

    /// Claim pending strategy rewards and distribute them by loan weight
    pub fn collect_rewards(&mut self) -> Result<RewardCollection> {
        let collection = self.transact("collect_rewards", collect_rewards_in)?;
        self.metrics.record_rewards(collection.gross);
        Ok(collection)
    }

    /// Pay out `account`'s active-epoch rewards
    pub fn withdraw_rewards(&mut self, account: &AccountId) -> Result<Decimal> {
        self.transact("withdraw_rewards", |txn, ctx| {
            if txn.state().rewards.active.is_none() {
                return Err(Error::RewardsTokenUnset);
            }
            let Some((asset, amount)) = rewards::take_owed(txn, account)? else {
                return Ok(Decimal::ZERO);
            };
            let address = ctx.address.clone();
            ctx.reward_asset(&asset)?.transfer(&address, account, amount)?;
            info!(account = %account, asset = %asset, amount = %amount, "Rewards withdrawn");
            Ok(amount)
        })
    }

    /// Pay out `account`'s rewards of an archived asset
    pub fn withdraw_past_rewards(&mut self, account: &AccountId, asset: &AssetId) -> Result<Decimal> {
        self.transact("withdraw_past_rewards", |txn, ctx| {
            let amount = rewards::take_past_owed(txn, account, asset)?;
            if amount.is_zero() {
                return Ok(Decimal::ZERO);
            }
            let address = ctx.address.clone();
            ctx.reward_asset(asset)?.transfer(&address, account, amount)?;
            info!(account = %account, asset = %asset, amount = %amount, "Past rewards withdrawn");
            Ok(amount)
        })
    }

    /// Make `asset` the active reward asset, archiving the previous one (owner only)
    pub fn set_rewards_token(&mut self, caller: &AccountId, asset: Box<dyn FungibleAsset>) -> Result<()> {
        self.transact("set_rewards_token", |txn, ctx| {
            ensure_owner(txn, caller)?;
            let id = asset.id();
            rewards::replace_asset(txn, id.clone());
            ctx.reward_assets.insert(id, asset);
            Ok(())
        })
    }

    /// Re-attach a reward asset handle after a restart
    ///
    /// The state is untouched; the asset must be active or archived.
    pub fn register_reward_asset(&mut self, asset: Box<dyn FungibleAsset>) -> Result<()> {
        let id = asset.id();
        let book = self.state.rewards();
        let known = book.active.as_ref().map(|e| e.asset == id).unwrap_or(false)
            || book.archived_for(&id).is_some();
        if !known {
            return Err(Error::NotPastToken(id));
        }
        self.ctx.reward_assets.insert(id, asset);
        Ok(())
    }

    // Administration

    /// Change the interest fee (owner only)
    pub fn set_interest_fee(&mut self, caller: &AccountId, fee: Decimal) -> Result<()> {
        self.transact("set_interest_fee", |txn, _ctx| {
            ensure_owner(txn, caller)?;
            math::validate_fee(fee)?;
            txn.params_mut().interest_fee = fee;
            info!(fee = %fee, "Interest fee changed");
            Ok(())
        })
    }

    /// Change the rewards fee (owner only)
    pub fn set_rewards_fee(&mut self, caller: &AccountId, fee: Decimal) -> Result<()> {
        self.transact("set_rewards_fee", |txn, _ctx| {
            ensure_owner(txn, caller)?;
            math::validate_fee(fee)?;
            txn.params_mut().rewards_fee = fee;
            info!(fee = %fee, "Rewards fee changed");
            Ok(())
        })
    }

    /// Change the fee recipient (owner only)
    pub fn set_fee_recipient(&mut self, caller: &AccountId, recipient: AccountId) -> Result<()> {
        self.transact("set_fee_recipient", |txn, _ctx| {
            ensure_owner(txn, caller)?;
            if recipient.is_zero() {
                return Err(Error::Other("fee recipient cannot be the zero account".to_string()));
            }
            info!(recipient = %recipient, "Fee recipient changed");
            txn.params_mut().fee_recipient = Some(recipient);
            Ok(())
        })
    }

    /// Point the strategy's reward claims at `address` (owner only)
    pub fn set_withdraw_address(&mut self, caller: &AccountId, address: AccountId) -> Result<()> {
        self.transact("set_withdraw_address", |txn, ctx| {
            ensure_owner(txn, caller)?;
            ctx.oracle.set_withdraw_address(address.clone())?;
            info!(address = %address, "Withdraw address changed");
            Ok(())
        })
    }

    /// Hand administration to `new_owner` (owner only)
    pub fn transfer_ownership(&mut self, caller: &AccountId, new_owner: AccountId) -> Result<()> {
        self.transact("transfer_ownership", |txn, _ctx| {
            ensure_owner(txn, caller)?;
            if new_owner.is_zero() {
                return Err(Error::Other("owner cannot be the zero account".to_string()));
            }
            info!(from = %caller, to = %new_owner, "Ownership transferred");
            txn.params_mut().owner = new_owner;
            Ok(())
        })
    }

    /// Move all custody to `strategy`, keeping every account's value (owner only)
    pub fn change_allocation_strategy(
        &mut self,
        caller: &AccountId,
        strategy: Box<dyn StrategyAdapter>,
    ) -> Result<()> {
        self.transact("change_allocation_strategy", |txn, ctx| {
            ensure_owner(txn, caller)?;
            change_strategy_in(txn, ctx, strategy)
        })
    }

    // Views

    fn view_rate(&self) -> Result<Decimal> {
        let strategy_rate = self.ctx.oracle.current_rate()?;
        math::mul(strategy_rate, self.state.params().savings_conversion_rate)
    }

    /// Effective rate of one internal savings unit in base asset
    pub fn current_rate(&self) -> Result<Decimal> {
        self.view_rate()
    }

    /// Claim tokens owned
    pub fn balance_of(&self, account: &AccountId) -> Decimal {
        self.state.account(account).map(|a| a.balance).unwrap_or_default()
    }

    /// Loan value directed to `account`
    pub fn received_loan_of(&self, account: &AccountId) -> Decimal {
        self.state.account(account).map(|a| a.received_loan).unwrap_or_default()
    }

    /// Savings value held by `account` at the current rate
    pub fn received_savings_of(&self, account: &AccountId) -> Result<Decimal> {
        let units = self.state.account(account).map(|a| a.savings_internal).unwrap_or_default();
        math::to_value(units, self.view_rate()?)
    }

    /// Interest `account` could realize now
    pub fn interest_payable_of(&self, account: &AccountId) -> Result<Decimal> {
        match self.state.account(account) {
            Some(a) => interest::interest_payable(a, self.view_rate()?),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Full bookkeeping view of `account`
    pub fn account_stats(&self, account: &AccountId) -> Result<AccountStats> {
        stats::account_stats(&self.state, account, self.view_rate()?)
    }

    /// Hat of `account` and its definition (`None` for the reserved hats)
    pub fn hat_of(&self, account: &AccountId) -> Result<(HatId, Option<Hat>)> {
        let hat_id = self.state.account(account).map(|a| a.hat_id).unwrap_or_default();
        let hat = self.state.hats().get(hat_id)?.cloned();
        Ok((hat_id, hat))
    }

    /// Hat definition (`None` for the reserved hats)
    pub fn hat(&self, hat_id: HatId) -> Result<Option<Hat>> {
        Ok(self.state.hats().get(hat_id)?.cloned())
    }

    /// Hat aggregate at the current rate
    pub fn hat_stats(&self, hat_id: HatId) -> Result<HatStatsView> {
        stats::hat_view(&self.state, hat_id, self.view_rate()?)
    }

    /// Global aggregate at the current rate
    pub fn global_stats(&self) -> Result<GlobalStatsView> {
        stats::global_view(&self.state, self.view_rate()?)
    }

    /// Highest hat ID created so far
    pub fn max_hat_id(&self) -> HatId {
        self.state.hats().max_hat_id()
    }

    /// Σ balance
    pub fn total_supply(&self) -> Decimal {
        self.state.global().total_supply
    }

    /// Current administrator
    pub fn owner(&self) -> &AccountId {
        &self.state.params().owner
    }

    /// Interest fee
    pub fn interest_fee(&self) -> Decimal {
        self.state.params().interest_fee
    }

    /// Rewards fee
    pub fn rewards_fee(&self) -> Decimal {
        self.state.params().rewards_fee
    }

    /// Account receiving fees
    pub fn fee_recipient(&self) -> &AccountId {
        self.state.params().fee_recipient()
    }

    /// Ledger units -> strategy units
    pub fn savings_conversion_rate(&self) -> Decimal {
        self.state.params().savings_conversion_rate
    }

    /// Active reward asset
    pub fn rewards_token(&self) -> Option<&AssetId> {
        self.state.rewards().active.as_ref().map(|e| &e.asset)
    }

    /// Active epoch followed by nothing; archived epochs oldest first
    pub fn reward_epochs(&self) -> (Option<&RewardEpoch>, &[RewardEpoch]) {
        let book = self.state.rewards();
        (book.active.as_ref(), &book.archived)
    }

    /// Active-epoch rewards owed to `account`
    pub fn rewards_owed(&self, account: &AccountId) -> Result<Decimal> {
        match self.state.account(account) {
            Some(a) => rewards::owed(self.state.rewards(), &a.rewards, a.directed_total),
            None => Ok(Decimal::ZERO),
        }
    }

    /// Archived rewards of `asset` owed to `account`
    pub fn past_rewards_owed(&self, account: &AccountId, asset: &AssetId) -> Result<Decimal> {
        let account = self.state.account(account).cloned().unwrap_or_default();
        rewards::past_owed(self.state.rewards(), &account.rewards, account.directed_total, asset)
    }

    /// Remaining claim-token allowance
    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Decimal {
        self.state.allowance(owner, spender)
    }

    /// Custody address
    pub fn address(&self) -> &AccountId {
        &self.ctx.address
    }

    /// Hat registry
    pub fn hats(&self) -> &HatRegistry {
        self.state.hats()
    }

    /// Recompute every aggregate and compare with the recorded ones
    pub fn verify_invariants(&self) -> Result<InvariantReport> {
        let report = stats::verify(&self.state, self.view_rate()?)?;
        if !report.is_ok() {
            warn!(violations = report.violations.len(), "Invariant check failed");
        }
        Ok(report)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Flush and close storage
    pub fn close(self) -> Result<()> {
        match self.storage {
            Some(storage) => storage.close(),
            None => Ok(()),
        }
    }
}

fn ensure_owner(txn: &Txn<'_>, caller: &AccountId) -> Result<()> {
    if &txn.state().params.owner != caller {
        return Err(Error::NotOwner(caller.clone()));
    }
    Ok(())
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

fn mint_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    account: &AccountId,
    amount: Decimal,
) -> Result<()> {
    ensure_positive(amount)?;
    let allowance = ctx.base.allowance(account, &ctx.address);
    if allowance < amount {
        return Err(Error::InsufficientAllowance {
            owner: account.clone(),
            spender: ctx.address.clone(),
            available: allowance,
            requested: amount,
        });
    }
    let available = ctx.base.balance_of(account);
    if available < amount {
        return Err(Error::InsufficientBalance {
            account: account.clone(),
            available,
            requested: amount,
        });
    }

    let rate = ctx.rate(txn.state().params.savings_conversion_rate)?;
    let units = math::to_internal(amount, rate)?;
    {
        let holder = txn.account_mut(account);
        holder.balance = math::add(holder.balance, amount)?;
    }
    {
        let global = txn.global_mut();
        global.total_supply = math::add(global.total_supply, amount)?;
    }
    accounts::distribute_loans(txn, account, amount, units)?;

    let address = ctx.address.clone();
    ctx.base.transfer_from(&address, account, &address, amount)?;
    if let Err(err) = ctx.oracle.deposit(&address, amount) {
        warn!(error = %err, account = %account, "Strategy rejected deposit; refunding");
        if let Err(refund) = ctx.base.transfer(&address, account, amount) {
            error!(error = %refund, account = %account, amount = %amount, "Refund failed");
        }
        return Err(err);
    }

    info!(account = %account, amount = %amount, units = %units, "Minted");
    Ok(())
}

fn redeem_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    account: &AccountId,
    amount: Option<Decimal>,
    to: &AccountId,
) -> Result<Decimal> {
    if let Some(amount) = amount {
        ensure_positive(amount)?;
    }
    let rate = ctx.rate(txn.state().params.savings_conversion_rate)?;
    ctx.pay_interest(txn, account, rate)?;

    let balance = txn.account(account).map(|a| a.balance).unwrap_or_default();
    let amount = match amount {
        Some(amount) => amount,
        None if balance.is_zero() => return Err(Error::ZeroAmount),
        None => balance,
    };
    if balance < amount {
        return Err(Error::InsufficientBalance {
            account: account.clone(),
            available: balance,
            requested: amount,
        });
    }

    accounts::recollect_loans(txn, account, amount, rate)?;
    {
        let holder = txn.account_mut(account);
        holder.balance = math::sub(holder.balance, amount)?;
    }
    {
        let global = txn.global_mut();
        global.total_supply = math::sub(global.total_supply, amount)?;
    }
    let payout = rewards::take_owed(txn, account)?;

    let address = ctx.address.clone();
    ctx.oracle.withdraw(&address, amount)?;
    if let Err(err) = ctx.base.transfer(&address, to, amount) {
        warn!(error = %err, account = %account, "Payout rejected; reinvesting");
        if let Err(reinvest) = ctx.oracle.deposit(&address, amount) {
            error!(error = %reinvest, amount = %amount, "Reinvesting withdrawn funds failed");
        }
        return Err(err);
    }

    // The redemption has settled; rewards that cannot be sent stay owed.
    if let Some((asset, owed)) = payout {
        match ctx
            .reward_asset(&asset)
            .and_then(|reward| reward.transfer(&address, account, owed))
        {
            Ok(()) => {
                debug!(account = %account, asset = %asset, amount = %owed, "Rewards paid on redeem")
            }
            Err(err) => {
                warn!(error = %err, account = %account, asset = %asset, "Reward payout deferred");
                rewards::restore_owed(txn, account, owed)?;
            }
        }
    }

    info!(account = %account, to = %to, amount = %amount, "Redeemed");
    Ok(amount)
}

fn transfer_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    spender: &AccountId,
    src: &AccountId,
    dst: &AccountId,
    amount: Option<Decimal>,
) -> Result<Decimal> {
    if src == dst {
        return Err(Error::SameAccount(src.clone()));
    }
    if let Some(amount) = amount {
        ensure_positive(amount)?;
    }
    let rate = ctx.rate(txn.state().params.savings_conversion_rate)?;
    ctx.pay_interest(txn, src, rate)?;

    let balance = txn.account(src).map(|a| a.balance).unwrap_or_default();
    let amount = match amount {
        Some(amount) => amount,
        None if balance.is_zero() => return Err(Error::ZeroAmount),
        None => balance,
    };
    if balance < amount {
        return Err(Error::InsufficientBalance {
            account: src.clone(),
            available: balance,
            requested: amount,
        });
    }

    if spender != src {
        let allowance = txn.state().allowance(src, spender);
        if allowance < amount {
            return Err(Error::InsufficientAllowance {
                owner: src.clone(),
                spender: spender.clone(),
                available: allowance,
                requested: amount,
            });
        }
        if allowance != Decimal::MAX {
            txn.set_allowance(src, spender, math::sub(allowance, amount)?);
        }
    }

    let units = accounts::recollect_loans(txn, src, amount, rate)?;
    {
        let holder = txn.account_mut(src);
        holder.balance = math::sub(holder.balance, amount)?;
    }

    ctx.pay_interest(txn, dst, rate)?;
    {
        let holder = txn.account_mut(dst);
        holder.balance = math::add(holder.balance, amount)?;
    }
    accounts::distribute_loans(txn, dst, amount, units)?;

    info!(src = %src, dst = %dst, amount = %amount, "Transferred");
    Ok(amount)
}

fn create_hat_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    caller: &AccountId,
    recipients: Vec<AccountId>,
    proportions: Vec<u32>,
    do_change_hat: bool,
) -> Result<HatId> {
    HatRegistry::validate(&recipients, &proportions, ctx.max_hat_recipients)?;
    let hat_id = txn.state().hats.next_id();
    info!(hat_id = %hat_id, recipients = recipients.len(), "Hat created");
    txn.insert_hat(Hat {
        id: hat_id,
        recipients,
        proportions,
    });
    if do_change_hat {
        change_hat_in(txn, ctx, caller, hat_id)?;
    }
    Ok(hat_id)
}

fn change_hat_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    account: &AccountId,
    hat_id: HatId,
) -> Result<()> {
    if !txn.state().hats.exists(hat_id) {
        return Err(Error::UnknownHat(hat_id));
    }
    let rate = ctx.rate(txn.state().params.savings_conversion_rate)?;
    let old_hat = txn.account_mut(account).hat_id;
    ctx.pay_interest(txn, account, rate)?;

    let balance = txn.account(account).map(|a| a.balance).unwrap_or_default();
    let units = if balance.is_zero() {
        Decimal::ZERO
    } else {
        accounts::recollect_loans(txn, account, balance, rate)?
    };

    txn.account_mut(account).hat_id = hat_id;
    {
        let old = txn.hat_stats_mut(old_hat);
        old.use_count = old.use_count.saturating_sub(1);
    }
    txn.hat_stats_mut(hat_id).use_count += 1;

    if !balance.is_zero() {
        accounts::distribute_loans(txn, account, balance, units)?;
    }

    info!(account = %account, from = %old_hat, to = %hat_id, "Hat changed");
    Ok(())
}

fn collect_rewards_in(txn: &mut Txn<'_>, ctx: &mut Context) -> Result<RewardCollection> {
    let asset = txn
        .state()
        .rewards
        .active
        .as_ref()
        .map(|e| e.asset.clone())
        .ok_or(Error::RewardsTokenUnset)?;
    if ctx.oracle.withdraw_address().as_ref() != Some(&ctx.address) {
        return Err(Error::NotWithdrawAddress(ctx.address.clone()));
    }

    let pending = ctx.oracle.pending_reward_balance(&asset)?;
    let total_loans = txn.state().global.total_loans;
    if pending.is_zero() || total_loans.is_zero() {
        debug!(pending = %pending, total_loans = %total_loans, "Nothing to collect");
        return Ok(RewardCollection::default());
    }

    // Book what the claim delivered.
    let address = ctx.address.clone();
    let claimed = ctx.oracle.claim_rewards(&address, &asset, &address)?;
    if claimed != pending {
        warn!(asset = %asset, pending = %pending, claimed = %claimed, "Claim differs from pending balance");
    }
    if claimed.is_zero() {
        return Ok(RewardCollection::default());
    }

    let fee = math::mul(claimed, txn.state().params.rewards_fee)?;
    let net = math::sub(claimed, fee)?;
    let fee_recipient = txn.state().params.fee_recipient().clone();
    rewards::distribute(txn, net, fee)?;

    if !fee.is_zero() {
        if let Err(err) = ctx
            .reward_asset(&asset)
            .and_then(|reward| reward.transfer(&address, &fee_recipient, fee))
        {
            warn!(error = %err, recipient = %fee_recipient, fee = %fee, "Fee payout deferred to rewards owed");
            rewards::credit_unpaid_fee(txn, &fee_recipient, fee)?;
        }
    }

    info!(asset = %asset, gross = %claimed, fee = %fee, net = %net, "Rewards collected");
    Ok(RewardCollection {
        gross: claimed,
        fee,
        distributed: net,
    })
}

fn change_strategy_in(
    txn: &mut Txn<'_>,
    ctx: &mut Context,
    mut strategy: Box<dyn StrategyAdapter>,
) -> Result<()> {
    let value = ctx.oracle.total_value()?;
    let total_units = txn.state().global.total_savings_internal;
    let new_rate = strategy.current_exchange_rate()?;
    if new_rate <= Decimal::ZERO {
        return Err(Error::Strategy(format!("non-positive exchange rate {}", new_rate)));
    }

    let conversion = if total_units.is_zero() || value.is_zero() {
        Decimal::ONE
    } else {
        let strategy_units = math::to_internal(value, new_rate)?;
        math::div(strategy_units, total_units)?
    };
    if conversion.is_zero() {
        return Err(Error::Arithmetic(format!(
            "conversion rate underflow moving {} over {} units",
            value, total_units
        )));
    }
    txn.params_mut().savings_conversion_rate = conversion;

    let address = ctx.address.clone();
    if !value.is_zero() {
        let withdrawn = ctx.oracle.withdraw(&address, value)?;
        if let Err(err) = strategy.deposit(&address, withdrawn) {
            warn!(error = %err, "New strategy rejected deposit; reinvesting in the old one");
            ctx.oracle.deposit(&address, withdrawn)?;
            return Err(err);
        }
    }
    ctx.oracle.replace(strategy);

    info!(value = %value, conversion = %conversion, "Allocation strategy changed");
    Ok(())
}
