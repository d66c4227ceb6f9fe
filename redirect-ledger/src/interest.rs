//! Interest accrual
//!
//! An account's savings grow with the exchange rate while its received
//! loan stays fixed. The difference, less interest already realized, is
//! payable. Paying it mints claim tokens that are debt-free: they sit in
//! `realized_interest` and are not redirected by the account's hat.

use crate::math;
use crate::state::Txn;
use crate::types::{Account, AccountId};
use crate::Result;
use rust_decimal::Decimal;
use tracing::info;

/// Outcome of one interest payment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestPayment {
    /// Interest payable before the fee
    pub gross: Decimal,
    /// Fee credited to the fee recipient
    pub fee: Decimal,
    /// Interest credited to the account
    pub net: Decimal,
}

/// `max(0, floor(units * rate) - received_loan - realized_interest)`
pub fn interest_payable(account: &Account, rate: Decimal) -> Result<Decimal> {
    let savings = math::to_value(account.savings_internal, rate)?;
    Ok(math::gentle_sub(
        savings,
        math::add(account.received_loan, account.realized_interest)?,
    ))
}

/// Realize `owner`'s payable interest at `rate`
pub(crate) fn pay_interest(txn: &mut Txn<'_>, owner: &AccountId, rate: Decimal) -> Result<InterestPayment> {
    let Some(account) = txn.account(owner) else {
        return Ok(InterestPayment::default());
    };
    let gross = interest_payable(account, rate)?;
    if gross.is_zero() {
        return Ok(InterestPayment::default());
    }

    let params = &txn.state().params;
    let fee_recipient = params.fee_recipient().clone();
    let fee = if params.interest_fee.is_zero() || &fee_recipient == owner {
        Decimal::ZERO
    } else {
        math::mul(gross, params.interest_fee)?
    };
    let net = math::sub(gross, fee)?;

    let fee_units = if fee.is_zero() {
        Decimal::ZERO
    } else {
        math::to_internal(fee, rate)?
    };
    let moved_units = {
        let account = txn.account_mut(owner);
        credit_realized(account, net)?;
        let moved = account.savings_internal.min(fee_units);
        account.savings_internal = math::sub(account.savings_internal, moved)?;
        moved
    };
    if !fee.is_zero() {
        let recipient = txn.account_mut(&fee_recipient);
        recipient.savings_internal = math::add(recipient.savings_internal, moved_units)?;
        credit_realized(recipient, fee)?;
    }
    let global = txn.global_mut();
    global.total_supply = math::add(global.total_supply, gross)?;

    info!(account = %owner, gross = %gross, fee = %fee, net = %net, "Interest paid");
    Ok(InterestPayment { gross, fee, net })
}

fn credit_realized(account: &mut Account, amount: Decimal) -> Result<()> {
    account.balance = math::add(account.balance, amount)?;
    account.realized_interest = math::add(account.realized_interest, amount)?;
    account.cumulative_interest = math::add(account.cumulative_interest, amount)?;
    Ok(())
}
