//! Exchange-rate oracle
//!
//! Wraps the strategy adapter, remembers the last observed rate and
//! refuses to continue when the strategy reports a lower one.

use crate::adapter::StrategyAdapter;
use crate::types::{AccountId, AssetId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Strategy adapter with a monotonic rate check
pub struct ExchangeRateOracle {
    strategy: Box<dyn StrategyAdapter>,
    last_rate: Option<Decimal>,
}

impl std::fmt::Debug for ExchangeRateOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRateOracle")
            .field("last_rate", &self.last_rate)
            .finish_non_exhaustive()
    }
}

impl ExchangeRateOracle {
    /// Wrap a strategy
    pub fn new(strategy: Box<dyn StrategyAdapter>) -> Self {
        Self {
            strategy,
            last_rate: None,
        }
    }

    /// Query the strategy without recording the result
    pub fn current_rate(&self) -> Result<Decimal> {
        let rate = self.strategy.current_exchange_rate()?;
        if rate <= Decimal::ZERO {
            return Err(Error::Strategy(format!("non-positive exchange rate {}", rate)));
        }
        if let Some(previous) = self.last_rate {
            if rate < previous {
                return Err(Error::ExchangeRateDecreased {
                    previous,
                    current: rate,
                });
            }
        }
        Ok(rate)
    }

    /// Query the strategy and record the rate
    pub fn refresh(&mut self) -> Result<Decimal> {
        let rate = self.current_rate().map_err(|e| {
            warn!(error = %e, "Exchange rate rejected");
            e
        })?;
        if self.last_rate != Some(rate) {
            debug!(rate = %rate, "Exchange rate observed");
        }
        self.last_rate = Some(rate);
        Ok(rate)
    }

    /// Last recorded rate
    pub fn last_rate(&self) -> Option<Decimal> {
        self.last_rate
    }

    /// Strategy value held for the ledger
    pub fn total_value(&self) -> Result<Decimal> {
        self.strategy.total_value()
    }

    /// Invest `amount` pulled from `from`
    pub fn deposit(&mut self, from: &AccountId, amount: Decimal) -> Result<()> {
        self.strategy.deposit(from, amount)
    }

    /// Divest exactly `amount` to `to`
    pub fn withdraw(&mut self, to: &AccountId, amount: Decimal) -> Result<Decimal> {
        let delivered = self.strategy.withdraw(to, amount).map_err(|e| match e {
            Error::StrategyWithdrawFailed(_) => e,
            other => Error::StrategyWithdrawFailed(other.to_string()),
        })?;
        if delivered < amount {
            return Err(Error::StrategyWithdrawFailed(format!(
                "delivered {} of {}",
                delivered, amount
            )));
        }
        Ok(delivered)
    }

    /// Rewards of `asset` waiting in the strategy
    pub fn pending_reward_balance(&self, asset: &AssetId) -> Result<Decimal> {
        self.strategy.pending_reward_balance(asset)
    }

    /// Address allowed to claim rewards
    pub fn withdraw_address(&self) -> Option<AccountId> {
        self.strategy.withdraw_address()
    }

    /// Change the claim address
    pub fn set_withdraw_address(&mut self, address: AccountId) -> Result<()> {
        self.strategy.set_withdraw_address(address)
    }

    /// Claim all pending `asset` rewards to `to`
    pub fn claim_rewards(
        &mut self,
        caller: &AccountId,
        asset: &AssetId,
        to: &AccountId,
    ) -> Result<Decimal> {
        self.strategy.claim_rewards(caller, asset, to)
    }

    /// Swap in a new strategy and forget the old rate
    pub fn replace(&mut self, strategy: Box<dyn StrategyAdapter>) -> Box<dyn StrategyAdapter> {
        self.last_rate = None;
        std::mem::replace(&mut self.strategy, strategy)
    }
}
