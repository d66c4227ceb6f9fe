//! Loan distribution and recollection
//!
//! Distribution routes a deposit through the owner's hat; recollection
//! takes loans back from the recipients in proportion to what each
//! currently holds for this owner. Both settle the owner's rewards first
//! and book the amounts actually moved on the account, hat and global
//! aggregates alike.

use crate::math;
use crate::rewards;
use crate::state::Txn;
use crate::types::AccountId;
use crate::{Error, Result};
use rust_decimal::Decimal;
use tracing::debug;

/// Direct `amount` of loan value and `units` of savings through `owner`'s hat
pub(crate) fn distribute_loans(
    txn: &mut Txn<'_>,
    owner: &AccountId,
    amount: Decimal,
    units: Decimal,
) -> Result<()> {
    rewards::settle(txn, owner)?;
    let hat_id = txn.account_mut(owner).hat_id;
    let shares = txn.state().hats.split(hat_id, owner, amount, units)?;

    for share in shares {
        {
            let recipient = txn.account_mut(&share.recipient);
            recipient.received_loan = math::add(recipient.received_loan, share.loan)?;
            recipient.savings_internal = math::add(recipient.savings_internal, share.units)?;
        }
        if !share.loan.is_zero() {
            let held = txn
                .account_mut(owner)
                .loan_recipients
                .entry(share.recipient.clone())
                .or_default();
            *held = math::add(*held, share.loan)?;
        }
        let stats = txn.hat_stats_mut(hat_id);
        stats.total_loans = math::add(stats.total_loans, share.loan)?;
        stats.total_savings_internal = math::add(stats.total_savings_internal, share.units)?;
        debug!(
            owner = %owner,
            recipient = %share.recipient,
            loan = %share.loan,
            units = %share.units,
            "Loan distributed"
        );
    }

    {
        let account = txn.account_mut(owner);
        account.directed_total = math::add(account.directed_total, amount)?;
    }
    let global = txn.global_mut();
    global.total_loans = math::add(global.total_loans, amount)?;
    global.total_savings_internal = math::add(global.total_savings_internal, units)?;
    Ok(())
}

/// Take `amount` of `owner`'s balance out of circulation at `rate`
///
/// Directed loans are recollected first; whatever exceeds them consumes
/// realized interest and the owner's own savings. The caller checks the
/// balance (`amount <= directed_total + realized_interest`). Returns the
/// savings units removed.
pub(crate) fn recollect_loans(
    txn: &mut Txn<'_>,
    owner: &AccountId,
    amount: Decimal,
    rate: Decimal,
) -> Result<Decimal> {
    rewards::settle(txn, owner)?;
    let (hat_id, directed_total, holdings) = {
        let account = txn.account_mut(owner);
        let holdings: Vec<(AccountId, Decimal)> = account
            .loan_recipients
            .iter()
            .filter(|(_, held)| !held.is_zero())
            .map(|(r, held)| (r.clone(), *held))
            .collect();
        (account.hat_id, account.directed_total, holdings)
    };

    let principal = amount.min(directed_total);
    let debt_free = math::sub(amount, principal)?;
    let mut collected = Decimal::ZERO;

    if principal > Decimal::ZERO {
        let takes = proportional_takes(&holdings, principal, directed_total)?;
        let target_units = math::to_internal(principal, rate)?;
        let last = takes.len().saturating_sub(1);
        let mut units_left = target_units;

        for (i, (recipient, loan)) in takes.into_iter().enumerate() {
            let share_units = if i == last {
                units_left
            } else {
                math::mul_div(target_units, loan, principal)?
            };
            units_left = math::sub(units_left, share_units)?;

            {
                let account = txn.account_mut(owner);
                let held = account.loan_recipients.get(&recipient).copied().unwrap_or_default();
                let remaining = math::sub(held, loan)?;
                if remaining.is_zero() {
                    account.loan_recipients.remove(&recipient);
                } else {
                    account.loan_recipients.insert(recipient.clone(), remaining);
                }
            }
            // Floors taken at distribution and recollection differ by dust;
            // never take more than the hat still accounts for.
            let hat_units = txn.state().hat_stats(hat_id).total_savings_internal;
            let removed_units = {
                let holder = txn.account_mut(&recipient);
                let removed = holder.savings_internal.min(share_units).min(hat_units);
                holder.received_loan = math::sub(holder.received_loan, loan)?;
                holder.savings_internal = math::sub(holder.savings_internal, removed)?;
                removed
            };
            let stats = txn.hat_stats_mut(hat_id);
            stats.total_loans = math::sub(stats.total_loans, loan)?;
            stats.total_savings_internal = math::sub(stats.total_savings_internal, removed_units)?;
            collected = math::add(collected, removed_units)?;

            debug!(
                owner = %owner,
                recipient = %recipient,
                loan = %loan,
                units = %removed_units,
                "Loan recollected"
            );
        }

        {
            let account = txn.account_mut(owner);
            account.directed_total = math::sub(account.directed_total, principal)?;
        }
        let global = txn.global_mut();
        global.total_loans = math::sub(global.total_loans, principal)?;
    }

    if debt_free > Decimal::ZERO {
        let units = math::to_internal(debt_free, rate)?;
        let removed = {
            let account = txn.account_mut(owner);
            if account.realized_interest < debt_free {
                return Err(Error::InvariantViolation(format!(
                    "{} needs {} of realized interest but has {}",
                    owner, debt_free, account.realized_interest
                )));
            }
            let removed = account.savings_internal.min(units);
            account.realized_interest = math::sub(account.realized_interest, debt_free)?;
            account.savings_internal = math::sub(account.savings_internal, removed)?;
            removed
        };
        let global = txn.global_mut();
        global.debt_free_savings_collected = math::add(global.debt_free_savings_collected, removed)?;
        collected = math::add(collected, removed)?;
    }

    let global = txn.global_mut();
    global.total_savings_internal = math::gentle_sub(global.total_savings_internal, collected);
    Ok(collected)
}

/// Split `principal` over `holdings` (summing to `total`) so that no
/// recipient gives back more than it holds
fn proportional_takes(
    holdings: &[(AccountId, Decimal)],
    principal: Decimal,
    total: Decimal,
) -> Result<Vec<(AccountId, Decimal)>> {
    if principal == total {
        return Ok(holdings.to_vec());
    }

    let last = holdings.len().saturating_sub(1);
    let mut takes = Vec::with_capacity(holdings.len());
    let mut taken = Decimal::ZERO;
    for (i, (recipient, held)) in holdings.iter().enumerate() {
        let share = if i == last {
            principal - taken
        } else {
            math::mul_div(principal, *held, total)?
        };
        let share = share.min(*held);
        taken += share;
        takes.push((recipient.clone(), share));
    }

    // The last recipient may have been capped; spread the rest.
    let mut shortfall = principal - taken;
    for ((_, share), (_, held)) in takes.iter_mut().zip(holdings) {
        if shortfall.is_zero() {
            break;
        }
        let extra = (*held - *share).min(shortfall);
        *share += extra;
        shortfall -= extra;
    }
    if shortfall > Decimal::ZERO {
        return Err(Error::InvariantViolation(format!(
            "recipients hold {} less than the principal {}",
            shortfall, principal
        )));
    }

    Ok(takes.into_iter().filter(|(_, share)| !share.is_zero()).collect())
}
