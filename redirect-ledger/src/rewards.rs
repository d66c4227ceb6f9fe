//! Reward distribution
//!
//! Rewards are shared by loan weight (`directed_total`) through a
//! reward-per-share accumulator. Each account keeps a checkpoint and is
//! settled lazily: before every change of its weight and whenever it
//! withdraws. Replacing the reward asset archives the active epoch with
//! its accumulator frozen, so accounts settle into archived epochs
//! whenever they are next touched.

use crate::math;
use crate::state::Txn;
use crate::types::{AccountId, AssetId, RewardBook, RewardCheckpoint, RewardEpoch};
use crate::{Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Checkpoint of an account with `weight` after settling against `book`
pub fn settled(book: &RewardBook, checkpoint: &RewardCheckpoint, weight: Decimal) -> Result<RewardCheckpoint> {
    let mut cp = checkpoint.clone();
    let Some(active) = &book.active else {
        return Ok(cp);
    };

    if cp.epoch < active.number {
        for number in cp.epoch..active.number {
            let epoch = book.archived.get(number as usize).ok_or_else(|| {
                Error::InvariantViolation(format!("reward epoch {} missing", number))
            })?;
            let (start, carried) = if number == cp.epoch {
                (cp.checkpoint, cp.owed)
            } else {
                (Decimal::ZERO, Decimal::ZERO)
            };
            let accrued = math::mul(weight, math::sub(epoch.reward_per_share, start)?)?;
            let total = math::add(carried, accrued)?;
            if total > Decimal::ZERO {
                let past = cp.past_owed.entry(epoch.asset.clone()).or_default();
                *past = math::add(*past, total)?;
            }
        }
        cp.epoch = active.number;
        cp.checkpoint = Decimal::ZERO;
        cp.owed = Decimal::ZERO;
    }

    let accrued = math::mul(weight, math::sub(active.reward_per_share, cp.checkpoint)?)?;
    cp.owed = math::add(cp.owed, accrued)?;
    cp.checkpoint = active.reward_per_share;
    Ok(cp)
}

/// Settle an existing account; untouched accounts have nothing to settle
pub(crate) fn settle(txn: &mut Txn<'_>, account: &AccountId) -> Result<()> {
    let Some(current) = txn.account(account) else {
        return Ok(());
    };
    let next = settled(&txn.state().rewards, &current.rewards, current.directed_total)?;
    if next != current.rewards {
        txn.account_mut(account).rewards = next;
    }
    Ok(())
}

/// Active-epoch rewards owed to `account`
pub fn owed(book: &RewardBook, checkpoint: &RewardCheckpoint, weight: Decimal) -> Result<Decimal> {
    Ok(settled(book, checkpoint, weight)?.owed)
}

/// Archived-epoch rewards of `asset` owed to `account`
pub fn past_owed(
    book: &RewardBook,
    checkpoint: &RewardCheckpoint,
    weight: Decimal,
    asset: &AssetId,
) -> Result<Decimal> {
    ensure_past_token(book, asset)?;
    let cp = settled(book, checkpoint, weight)?;
    Ok(cp.past_owed.get(asset).copied().unwrap_or_default())
}

fn ensure_past_token(book: &RewardBook, asset: &AssetId) -> Result<()> {
    let is_active = book.active.as_ref().map(|e| &e.asset == asset).unwrap_or(false);
    if is_active || book.archived_for(asset).is_none() {
        return Err(Error::NotPastToken(asset.clone()));
    }
    Ok(())
}

/// Credit `net` rewards to every unit of loan weight
pub(crate) fn distribute(txn: &mut Txn<'_>, net: Decimal, fee: Decimal) -> Result<Decimal> {
    let total_loans = txn.state().global.total_loans;
    let per_share = math::div_dp(net, total_loans, math::ACCUMULATOR_DECIMALS)?;
    let epoch = active_mut(txn)?;
    epoch.reward_per_share = math::add(epoch.reward_per_share, per_share)?;
    epoch.total_collected = math::add(epoch.total_collected, net)?;
    epoch.total_fees = math::add(epoch.total_fees, fee)?;
    debug!(
        asset = %epoch.asset,
        per_share = %per_share,
        reward_per_share = %epoch.reward_per_share,
        "Rewards distributed"
    );
    Ok(per_share)
}

/// Zero the settled active-epoch rewards of `account` and return them
pub(crate) fn take_owed(txn: &mut Txn<'_>, account: &AccountId) -> Result<Option<(AssetId, Decimal)>> {
    let Some(asset) = txn.state().rewards.active.as_ref().map(|e| e.asset.clone()) else {
        return Ok(None);
    };
    settle(txn, account)?;
    let amount = txn.account(account).map(|a| a.rewards.owed).unwrap_or_default();
    if amount.is_zero() {
        return Ok(None);
    }
    txn.account_mut(account).rewards.owed = Decimal::ZERO;
    let epoch = active_mut(txn)?;
    epoch.total_withdrawn = math::add(epoch.total_withdrawn, amount)?;
    Ok(Some((asset, amount)))
}

/// Book `amount` taken by [`take_owed`] back as owed to `account`
pub(crate) fn restore_owed(txn: &mut Txn<'_>, account: &AccountId, amount: Decimal) -> Result<()> {
    {
        let rewards = &mut txn.account_mut(account).rewards;
        rewards.owed = math::add(rewards.owed, amount)?;
    }
    let epoch = active_mut(txn)?;
    epoch.total_withdrawn = math::sub(epoch.total_withdrawn, amount)?;
    Ok(())
}

/// Owe a collection fee that could not be sent to `recipient`
///
/// The fee is held by the ledger and withdrawn like any other reward.
pub(crate) fn credit_unpaid_fee(txn: &mut Txn<'_>, recipient: &AccountId, fee: Decimal) -> Result<()> {
    // Bring the checkpoint to the active epoch before crediting it.
    txn.account_mut(recipient);
    settle(txn, recipient)?;
    {
        let rewards = &mut txn.account_mut(recipient).rewards;
        rewards.owed = math::add(rewards.owed, fee)?;
    }
    let epoch = active_mut(txn)?;
    epoch.total_fees = math::sub(epoch.total_fees, fee)?;
    epoch.total_collected = math::add(epoch.total_collected, fee)?;
    Ok(())
}

/// Zero the settled past rewards of `asset` for `account` and return them
pub(crate) fn take_past_owed(txn: &mut Txn<'_>, account: &AccountId, asset: &AssetId) -> Result<Decimal> {
    ensure_past_token(&txn.state().rewards, asset)?;
    settle(txn, account)?;
    let amount = txn
        .account(account)
        .and_then(|a| a.rewards.past_owed.get(asset).copied())
        .unwrap_or_default();
    if amount.is_zero() {
        return Ok(Decimal::ZERO);
    }
    txn.account_mut(account).rewards.past_owed.remove(asset);
    // Several archived epochs may share an asset; book against the latest.
    if let Some(epoch) = txn
        .rewards_mut()
        .archived
        .iter_mut()
        .rev()
        .find(|e| &e.asset == asset)
    {
        epoch.total_withdrawn = math::add(epoch.total_withdrawn, amount)?;
    }
    Ok(amount)
}

/// Archive the active epoch (if any) and open one for `asset`
///
/// Setting the asset that is already active changes nothing.
pub(crate) fn replace_asset(txn: &mut Txn<'_>, asset: AssetId) -> bool {
    if txn.state().rewards.active.as_ref().map(|e| e.asset == asset).unwrap_or(false) {
        return false;
    }
    let book = txn.rewards_mut();
    if let Some(mut previous) = book.active.take() {
        previous.archived_at = Some(Utc::now());
        info!(asset = %previous.asset, epoch = previous.number, "Reward epoch archived");
        book.archived.push(previous);
    }
    let number = book.active_number();
    info!(asset = %asset, epoch = number, "Reward epoch started");
    book.active = Some(RewardEpoch::new(number, asset));
    true
}

fn active_mut<'t>(txn: &'t mut Txn<'_>) -> Result<&'t mut RewardEpoch> {
    txn.rewards_mut().active.as_mut().ok_or(Error::RewardsTokenUnset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with(rps: &[(&str, i64)], active: (&str, i64)) -> RewardBook {
        let mut book = RewardBook::default();
        for (i, (asset, per_share)) in rps.iter().enumerate() {
            let mut epoch = RewardEpoch::new(i as u32, AssetId::new(*asset));
            epoch.reward_per_share = Decimal::from(*per_share);
            book.archived.push(epoch);
        }
        let mut epoch = RewardEpoch::new(rps.len() as u32, AssetId::new(active.0));
        epoch.reward_per_share = Decimal::from(active.1);
        book.active = Some(epoch);
        book
    }

    #[test]
    fn test_settle_active_epoch() {
        let book = book_with(&[], ("COMP", 3));
        let cp = RewardCheckpoint {
            checkpoint: Decimal::ONE,
            ..Default::default()
        };
        let next = settled(&book, &cp, Decimal::from(10)).unwrap();
        assert_eq!(next.owed, Decimal::from(20));
        assert_eq!(next.checkpoint, Decimal::from(3));

        // settling twice accrues nothing more
        let again = settled(&book, &next, Decimal::from(10)).unwrap();
        assert_eq!(again, next);
    }

    #[test]
    fn test_settle_across_archived_epochs() {
        let book = book_with(&[("COMP", 4), ("AAVE", 2)], ("UNI", 1));
        let cp = RewardCheckpoint {
            epoch: 0,
            checkpoint: Decimal::ONE,
            owed: Decimal::from(5),
            past_owed: Default::default(),
        };
        let next = settled(&book, &cp, Decimal::from(10)).unwrap();

        assert_eq!(next.past_owed.get(&AssetId::new("COMP")), Some(&Decimal::from(35)));
        assert_eq!(next.past_owed.get(&AssetId::new("AAVE")), Some(&Decimal::from(20)));
        assert_eq!(next.epoch, 2);
        assert_eq!(next.owed, Decimal::from(10));
    }

    #[test]
    fn test_no_active_asset_settles_nothing() {
        let book = RewardBook::default();
        let cp = RewardCheckpoint::default();
        assert_eq!(settled(&book, &cp, Decimal::from(10)).unwrap(), cp);
    }

    #[test]
    fn test_past_owed_rejects_active_and_unknown_assets() {
        let book = book_with(&[("COMP", 1)], ("AAVE", 0));
        let cp = RewardCheckpoint::default();
        assert!(matches!(
            past_owed(&book, &cp, Decimal::ONE, &AssetId::new("AAVE")),
            Err(Error::NotPastToken(_))
        ));
        assert!(matches!(
            past_owed(&book, &cp, Decimal::ONE, &AssetId::new("UNI")),
            Err(Error::NotPastToken(_))
        ));
        assert_eq!(
            past_owed(&book, &cp, Decimal::ONE, &AssetId::new("COMP")).unwrap(),
            Decimal::ONE
        );
    }
}
