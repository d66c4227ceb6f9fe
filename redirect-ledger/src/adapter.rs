//! Collaborator interfaces
//!
//! The ledger never moves value itself. It books claims and delegates
//! custody to a yield strategy and to fungible assets behind these
//! traits. Implementations are untrusted: the engine finishes its own
//! bookkeeping before calling them and rolls back if a call fails.

use crate::types::{AccountId, AssetId};
use crate::Result;
use rust_decimal::Decimal;

/// External yield-bearing strategy
pub trait StrategyAdapter: Send {
    /// Value of one strategy unit in base asset (non-decreasing)
    fn current_exchange_rate(&self) -> Result<Decimal>;

    /// Base-asset value currently held on the ledger's behalf
    fn total_value(&self) -> Result<Decimal>;

    /// Pull `amount` of base asset from `from` and invest it
    fn deposit(&mut self, from: &AccountId, amount: Decimal) -> Result<()>;

    /// Divest `amount` of base asset and deliver it to `to`
    ///
    /// Fails with [`crate::Error::StrategyWithdrawFailed`] on missing liquidity.
    fn withdraw(&mut self, to: &AccountId, amount: Decimal) -> Result<Decimal>;

    /// Reward asset accrued by the strategy and not yet claimed
    fn pending_reward_balance(&self, asset: &AssetId) -> Result<Decimal>;

    /// Address allowed to claim rewards
    fn withdraw_address(&self) -> Option<AccountId>;

    /// Change the address allowed to claim rewards
    fn set_withdraw_address(&mut self, address: AccountId) -> Result<()>;

    /// Move all pending rewards of `asset` to `to`; `caller` must be the withdraw address
    fn claim_rewards(&mut self, caller: &AccountId, asset: &AssetId, to: &AccountId)
        -> Result<Decimal>;
}

/// Fungible asset (base or reward)
pub trait FungibleAsset: Send {
    /// Asset identity
    fn id(&self) -> AssetId;

    /// Balance of `account`
    fn balance_of(&self, account: &AccountId) -> Decimal;

    /// Remaining approval of `spender` over `owner`'s funds
    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Decimal;

    /// Approve `spender` to move up to `amount` of `owner`'s funds
    fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Decimal) -> Result<()>;

    /// Move `amount` from `from` to `to`
    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Decimal) -> Result<()>;

    /// Move `amount` from `owner` to `to` using `spender`'s approval
    fn transfer_from(
        &mut self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<()>;
}
