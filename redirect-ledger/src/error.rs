//! Error types for the ledger

use crate::types::{AccountId, AssetId, HatId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every failure aborts the whole operation; the engine rolls back all
/// in-memory changes made before the failure was detected.
#[derive(Error, Debug)]
pub enum Error {
    /// Amount must be strictly positive
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Account does not hold enough claim tokens (or base asset)
    #[error("Insufficient balance: {account} has {available}, needs {requested}")]
    InsufficientBalance {
        /// Account being debited
        account: AccountId,
        /// Balance available
        available: Decimal,
        /// Amount requested
        requested: Decimal,
    },

    /// Spender lacks a prior approval
    #[error("Insufficient allowance: {spender} may spend {available} of {owner}, needs {requested}")]
    InsufficientAllowance {
        /// Owner of the funds
        owner: AccountId,
        /// Spender
        spender: AccountId,
        /// Remaining allowance
        available: Decimal,
        /// Amount requested
        requested: Decimal,
    },

    /// Source and destination are the same account
    #[error("Source and destination must differ: {0}")]
    SameAccount(AccountId),

    /// Malformed hat
    #[error("Invalid hat definition: {0}")]
    InvalidHatDefinition(String),

    /// Hat was never created
    #[error("Unknown hat: {0}")]
    UnknownHat(HatId),

    /// Fee rate outside [0, 1)
    #[error("Fee out of range: {0} (must satisfy 0 <= fee < 1)")]
    FeeOutOfRange(Decimal),

    /// No reward asset configured
    #[error("Rewards token not set")]
    RewardsTokenUnset,

    /// Strategy withdraw address is not this ledger (or caller is not the withdraw address)
    #[error("Not the withdraw address: {0}")]
    NotWithdrawAddress(AccountId),

    /// Asset is the active reward asset or was never archived
    #[error("Not a past rewards token: {0}")]
    NotPastToken(AssetId),

    /// Caller is not the administrator
    #[error("Caller is not the owner: {0}")]
    NotOwner(AccountId),

    /// Strategy could not deliver the requested withdrawal
    #[error("Strategy withdraw failed: {0}")]
    StrategyWithdrawFailed(String),

    /// Strategy reported something inconsistent with the ledger's bookkeeping
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// External exchange rate went down
    #[error("Exchange rate decreased from {previous} to {current}")]
    ExchangeRateDecreased {
        /// Last observed rate
        previous: Decimal,
        /// Newly reported rate
        current: Decimal,
    },

    /// Fungible asset transfer failed
    #[error("Asset error: {0}")]
    Asset(String),

    /// Decimal overflow or division by zero
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Invariant violation (conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ZeroAmount => "zero_amount",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::InsufficientAllowance { .. } => "insufficient_allowance",
            Error::SameAccount(_) => "same_account",
            Error::InvalidHatDefinition(_) => "invalid_hat_definition",
            Error::UnknownHat(_) => "unknown_hat",
            Error::FeeOutOfRange(_) => "fee_out_of_range",
            Error::RewardsTokenUnset => "rewards_token_unset",
            Error::NotWithdrawAddress(_) => "not_withdraw_address",
            Error::NotPastToken(_) => "not_past_token",
            Error::NotOwner(_) => "not_owner",
            Error::StrategyWithdrawFailed(_) => "strategy_withdraw_failed",
            Error::Strategy(_) => "strategy",
            Error::ExchangeRateDecreased { .. } => "exchange_rate_decreased",
            Error::Asset(_) => "asset",
            Error::Arithmetic(_) => "arithmetic",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
