//! Aggregates and their verification
//!
//! The global and per-hat aggregates are maintained incrementally by the
//! operations. [`verify`] recomputes them from the accounts and reports
//! every relation that does not hold.

use crate::interest;
use crate::math;
use crate::rewards;
use crate::state::LedgerState;
use crate::types::{AccountStats, GlobalStatsView, HatId, HatStatsView};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of a full invariant check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvariantReport {
    /// Accounts examined
    pub accounts_checked: usize,
    /// Hats examined
    pub hats_checked: usize,
    /// Rewards of the active epoch lost to rounding
    pub reward_dust: Decimal,
    /// Violated relations, human readable
    pub violations: Vec<String>,
}

impl InvariantReport {
    /// True when nothing was violated
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// `Err` carrying the first violation
    pub fn into_result(self) -> Result<Self> {
        match self.violations.first() {
            Some(first) => Err(Error::InvariantViolation(first.clone())),
            None => Ok(self),
        }
    }
}

/// Bookkeeping view of one account at `rate`
pub fn account_stats(state: &LedgerState, id: &crate::types::AccountId, rate: Decimal) -> Result<AccountStats> {
    let account = state.account(id).cloned().unwrap_or_default();
    Ok(AccountStats {
        balance: account.balance,
        received_loan: account.received_loan,
        received_savings: math::to_value(account.savings_internal, rate)?,
        interest_payable: interest::interest_payable(&account, rate)?,
        cumulative_interest: account.cumulative_interest,
        realized_interest: account.realized_interest,
        directed_total: account.directed_total,
        savings_internal: account.savings_internal,
        hat_id: account.hat_id,
    })
}

/// Hat aggregate at `rate`
pub fn hat_view(state: &LedgerState, id: HatId, rate: Decimal) -> Result<HatStatsView> {
    if !state.hats().exists(id) {
        return Err(Error::UnknownHat(id));
    }
    let stats = state.hat_stats(id);
    Ok(HatStatsView {
        use_count: stats.use_count,
        total_loans: stats.total_loans,
        total_savings: math::to_value(stats.total_savings_internal, rate)?,
    })
}

/// Global aggregate at `rate`
pub fn global_view(state: &LedgerState, rate: Decimal) -> Result<GlobalStatsView> {
    let global = state.global();
    Ok(GlobalStatsView {
        total_supply: global.total_supply,
        total_savings_amount: math::to_value(global.total_savings_internal, rate)?,
        total_loans: global.total_loans,
    })
}

/// Recompute every aggregate and compare
pub fn verify(state: &LedgerState, rate: Decimal) -> Result<InvariantReport> {
    let mut report = InvariantReport::default();
    let mut supply = Decimal::ZERO;
    let mut directed = Decimal::ZERO;
    let mut received = Decimal::ZERO;
    let mut units = Decimal::ZERO;
    let mut savings_value = Decimal::ZERO;
    let mut owed = Decimal::ZERO;
    let mut users_per_hat: HashMap<HatId, u64> = HashMap::new();

    for (id, account) in state.accounts() {
        report.accounts_checked += 1;

        if account.balance != account.directed_total + account.realized_interest {
            report.violations.push(format!(
                "{}: balance {} != directed {} + realized {}",
                id, account.balance, account.directed_total, account.realized_interest
            ));
        }
        let per_recipient: Decimal = account.loan_recipients.values().copied().sum();
        if per_recipient != account.directed_total {
            report.violations.push(format!(
                "{}: loans per recipient sum to {} but {} is directed",
                id, per_recipient, account.directed_total
            ));
        }
        if !state.hats().exists(account.hat_id) {
            report.violations.push(format!("{}: unknown hat {}", id, account.hat_id));
        }

        supply += account.balance;
        directed += account.directed_total;
        received += account.received_loan;
        units += account.savings_internal;
        savings_value += math::to_value(account.savings_internal, rate)?;
        owed += rewards::owed(state.rewards(), &account.rewards, account.directed_total)?;
        *users_per_hat.entry(account.hat_id).or_default() += 1;
    }

    let global = state.global();
    check(&mut report, "total supply", supply, global.total_supply);
    check(&mut report, "total loans", directed, global.total_loans);
    check(&mut report, "received loans", received, global.total_loans);
    check(&mut report, "savings units", units, global.total_savings_internal);

    let mut hat_loans = Decimal::ZERO;
    let mut hat_units = Decimal::ZERO;
    for (id, stats) in state.all_hat_stats() {
        report.hats_checked += 1;
        hat_loans += stats.total_loans;
        hat_units += stats.total_savings_internal;
        let users = users_per_hat.get(id).copied().unwrap_or_default();
        if users != stats.use_count {
            report.violations.push(format!(
                "hat {}: use count {} but {} accounts use it",
                id, stats.use_count, users
            ));
        }
    }
    check(&mut report, "hat loans", hat_loans, global.total_loans);
    check(
        &mut report,
        "hat savings units",
        hat_units,
        global.total_savings_internal + global.debt_free_savings_collected,
    );

    // Each account value is floored separately.
    let total_value = math::to_value(global.total_savings_internal, rate)?;
    let tolerance = Decimal::new(1, math::AMOUNT_DECIMALS) * Decimal::from(report.accounts_checked as u64 + 1);
    if savings_value > total_value || total_value - savings_value > tolerance {
        report.violations.push(format!(
            "savings value: accounts hold {} but the aggregate is worth {}",
            savings_value, total_value
        ));
    }

    if let Some(epoch) = &state.rewards().active {
        let accounted = owed + epoch.total_withdrawn;
        if accounted > epoch.total_collected {
            report.violations.push(format!(
                "rewards: {} owed or paid exceeds {} collected",
                accounted, epoch.total_collected
            ));
        } else {
            report.reward_dust = epoch.total_collected - accounted;
        }
    }

    Ok(report)
}

fn check(report: &mut InvariantReport, what: &str, computed: Decimal, recorded: Decimal) {
    if computed != recorded {
        report
            .violations
            .push(format!("{}: accounts sum to {} but {} is recorded", what, computed, recorded));
    }
}
