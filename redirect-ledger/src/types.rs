//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money, see [`crate::math`])
//! - Cheap cloning into the transaction journal

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Account identifier (address, handle, etc.)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The empty identifier, never a valid hat recipient
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fungible asset identity (base asset or a reward asset)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    /// Create new asset ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hat identifier
///
/// Created hats are numbered from 1. Two reserved identifiers route
/// everything back to the owner: [`HatId::DEFAULT`] (never selected a
/// hat) and [`HatId::SELF`] (explicitly chose to keep everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HatId(pub u64);

impl HatId {
    /// Hat of accounts that never selected one
    pub const DEFAULT: HatId = HatId(0);

    /// 100% to the originating account
    pub const SELF: HatId = HatId(u64::MAX);

    /// True for the reserved identifiers
    pub fn is_self_directed(&self) -> bool {
        *self == Self::DEFAULT || *self == Self::SELF
    }
}

impl Default for HatId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for HatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SELF {
            write!(f, "self")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Redirection policy
///
/// Immutable once created. Proportions are raw weights normalized by
/// their sum when amounts are split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hat {
    /// Hat ID
    pub id: HatId,
    /// Recipients, in split order
    pub recipients: Vec<AccountId>,
    /// Positive weights, same length as `recipients`
    pub proportions: Vec<u32>,
}

impl Hat {
    /// Sum of all proportions
    pub fn total_proportion(&self) -> u64 {
        self.proportions.iter().map(|p| u64::from(*p)).sum()
    }
}

/// Per-account reward accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardCheckpoint {
    /// Epoch number the checkpoint refers to
    pub epoch: u32,
    /// Accumulator value at last settlement
    pub checkpoint: Decimal,
    /// Settled but not withdrawn rewards of `epoch`
    pub owed: Decimal,
    /// Settled rewards of archived epochs, by asset
    pub past_owed: BTreeMap<AssetId, Decimal>,
}

/// Account state
///
/// Invariant: `balance == directed_total + realized_interest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Claim tokens owned
    pub balance: Decimal,
    /// Part of `balance` realized as interest and not directed as loans
    pub realized_interest: Decimal,
    /// Interest ever paid into this account
    pub cumulative_interest: Decimal,
    /// Loan value this account directs through its hat
    pub directed_total: Decimal,
    /// `directed_total` broken down per recipient
    pub loan_recipients: BTreeMap<AccountId, Decimal>,
    /// Loan value directed to this account as a recipient
    pub received_loan: Decimal,
    /// Internal savings units held as a recipient
    pub savings_internal: Decimal,
    /// Hat governing this account's own deposits
    pub hat_id: HatId,
    /// Reward checkpoint
    pub rewards: RewardCheckpoint,
}

/// Per-hat aggregate, keyed by the owner's hat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HatStats {
    /// Accounts currently assigned this hat
    pub use_count: u64,
    /// Loans distributed under this hat
    pub total_loans: Decimal,
    /// Savings units distributed under this hat
    pub total_savings_internal: Decimal,
}

/// Process-wide aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Σ balance
    pub total_supply: Decimal,
    /// Σ directed_total (the reward weight denominator)
    pub total_loans: Decimal,
    /// Σ savings_internal
    pub total_savings_internal: Decimal,
    /// Units removed from owners' own savings for debt-free balance
    pub debt_free_savings_collected: Decimal,
}

/// Reward accounting for one reward asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEpoch {
    /// Sequential epoch number
    pub number: u32,
    /// Reward asset identity
    pub asset: AssetId,
    /// Reward per unit of loan weight (24 fractional digits)
    pub reward_per_share: Decimal,
    /// Rewards collected net of fee
    pub total_collected: Decimal,
    /// Fees taken at collection
    pub total_fees: Decimal,
    /// Rewards paid out to holders
    pub total_withdrawn: Decimal,
    /// Epoch start
    pub started_at: DateTime<Utc>,
    /// Set once the asset is replaced
    pub archived_at: Option<DateTime<Utc>>,
}

impl RewardEpoch {
    /// Fresh epoch for `asset`
    pub fn new(number: u32, asset: AssetId) -> Self {
        Self {
            number,
            asset,
            reward_per_share: Decimal::ZERO,
            total_collected: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            started_at: Utc::now(),
            archived_at: None,
        }
    }
}

/// Reward asset configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBook {
    /// Active epoch
    pub active: Option<RewardEpoch>,
    /// Archived epochs, indexed by epoch number
    pub archived: Vec<RewardEpoch>,
}

impl RewardBook {
    /// Number the next (or current) active epoch carries
    pub fn active_number(&self) -> u32 {
        self.archived.len() as u32
    }

    /// Latest archived epoch for `asset`
    pub fn archived_for(&self, asset: &AssetId) -> Option<&RewardEpoch> {
        self.archived.iter().rev().find(|e| &e.asset == asset)
    }
}

/// Administrative parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Administrator
    pub owner: AccountId,
    /// Cut of realized interest, in [0, 1)
    pub interest_fee: Decimal,
    /// Cut of collected rewards, in [0, 1)
    pub rewards_fee: Decimal,
    /// Fee recipient (defaults to owner)
    pub fee_recipient: Option<AccountId>,
    /// Ledger units -> strategy units
    pub savings_conversion_rate: Decimal,
}

impl Params {
    /// Parameters with no fees
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            interest_fee: Decimal::ZERO,
            rewards_fee: Decimal::ZERO,
            fee_recipient: None,
            savings_conversion_rate: Decimal::ONE,
        }
    }

    /// Account receiving fees
    pub fn fee_recipient(&self) -> &AccountId {
        self.fee_recipient.as_ref().unwrap_or(&self.owner)
    }
}

/// Full bookkeeping view of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    /// Claim tokens owned
    pub balance: Decimal,
    /// Loan value directed to this account
    pub received_loan: Decimal,
    /// Savings value at the current rate
    pub received_savings: Decimal,
    /// Interest not yet realized
    pub interest_payable: Decimal,
    /// Interest ever paid
    pub cumulative_interest: Decimal,
    /// Realized, debt-free part of the balance
    pub realized_interest: Decimal,
    /// Loan value directed through the hat
    pub directed_total: Decimal,
    /// Internal savings units
    pub savings_internal: Decimal,
    /// Own hat
    pub hat_id: HatId,
}

/// Hat aggregate valued at the current rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HatStatsView {
    /// Accounts using the hat
    pub use_count: u64,
    /// Loans distributed under the hat
    pub total_loans: Decimal,
    /// Savings value distributed under the hat
    pub total_savings: Decimal,
}

/// Global aggregate valued at the current rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatsView {
    /// Σ balance
    pub total_supply: Decimal,
    /// Σ savings value
    pub total_savings_amount: Decimal,
    /// Σ directed loans
    pub total_loans: Decimal,
}

/// Outcome of a reward collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardCollection {
    /// Amount claimed from the strategy
    pub gross: Decimal,
    /// Fee sent to the fee recipient
    pub fee: Decimal,
    /// Amount distributed to holders
    pub distributed: Decimal,
}
