//! Redirect Ledger
//!
//! Interest-redirecting deposit ledger: accounts deposit a base asset
//! into a yield strategy, receive claim tokens one-for-one, and route the
//! interest their deposits earn to recipients named by a "hat".
//!
//! # Architecture
//!
//! - **Single Writer**: One actor task owns the engine; operations never interleave
//! - **Journaled Transactions**: Every operation commits fully or rolls back
//! - **Effects Before Interactions**: Collaborators are called after bookkeeping
//! - **Lazy Rewards**: Reward-per-share accumulator with per-account checkpoints
//!
//! # Invariants
//!
//! - Per account: `balance == directed_total + realized_interest`
//! - Supply: Σ(balance) == total supply
//! - Loans: Σ(directed) == Σ(received loan) == Σ(hat loans)
//! - Savings: Σ(hat savings units) == Σ(account savings units) + debt-free units collected

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod math;
pub mod error;
pub mod adapter;
pub mod hats;
pub mod oracle;
pub mod state;
pub mod accounts;
pub mod interest;
pub mod rewards;
pub mod stats;
pub mod engine;
pub mod storage;
pub mod actor;
pub mod ledger;
pub mod config;
pub mod metrics;
pub mod simulation;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Account, AccountId, AccountStats, AssetId, GlobalStatsView, Hat, HatId, HatStatsView,
    RewardCollection, RewardEpoch,
};
pub use adapter::{FungibleAsset, StrategyAdapter};
pub use engine::Engine;
pub use ledger::Ledger;
pub use actor::{AdminCommand, LedgerHandle};
pub use config::Config;
pub use stats::InvariantReport;
pub use storage::Storage;
