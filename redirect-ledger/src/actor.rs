//! Actor-based concurrency for the ledger
//!
//! The engine is single-writer: one Tokio task owns it and processes
//! messages in arrival order, so every operation runs to completion
//! before the next one starts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │        Engine::transact → journal → RocksDB          │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::adapter::{FungibleAsset, StrategyAdapter};
use crate::engine::Engine;
use crate::stats::InvariantReport;
use crate::types::{
    AccountId, AccountStats, AssetId, GlobalStatsView, HatId, HatStatsView, RewardCollection,
};
use crate::{Error, Result};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Owner-gated commands
pub enum AdminCommand {
    /// New interest fee
    SetInterestFee(Decimal),
    /// New rewards fee
    SetRewardsFee(Decimal),
    /// New fee recipient
    SetFeeRecipient(AccountId),
    /// New strategy claim address
    SetWithdrawAddress(AccountId),
    /// New administrator
    TransferOwnership(AccountId),
    /// New active reward asset
    SetRewardsToken(Box<dyn FungibleAsset>),
    /// New yield strategy
    ChangeAllocationStrategy(Box<dyn StrategyAdapter>),
}

impl std::fmt::Debug for AdminCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminCommand::SetInterestFee(fee) => f.debug_tuple("SetInterestFee").field(fee).finish(),
            AdminCommand::SetRewardsFee(fee) => f.debug_tuple("SetRewardsFee").field(fee).finish(),
            AdminCommand::SetFeeRecipient(a) => f.debug_tuple("SetFeeRecipient").field(a).finish(),
            AdminCommand::SetWithdrawAddress(a) => f.debug_tuple("SetWithdrawAddress").field(a).finish(),
            AdminCommand::TransferOwnership(a) => f.debug_tuple("TransferOwnership").field(a).finish(),
            AdminCommand::SetRewardsToken(asset) => {
                f.debug_tuple("SetRewardsToken").field(&asset.id()).finish()
            }
            AdminCommand::ChangeAllocationStrategy(_) => f.write_str("ChangeAllocationStrategy"),
        }
    }
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Deposit and mint under the current hat
    Mint {
        account: AccountId,
        amount: Decimal,
        response: Reply<()>,
    },

    /// Switch hat, then mint
    MintWithSelectedHat {
        account: AccountId,
        amount: Decimal,
        hat_id: HatId,
        response: Reply<()>,
    },

    /// Create a hat, switch to it, then mint
    MintWithNewHat {
        account: AccountId,
        amount: Decimal,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
        response: Reply<HatId>,
    },

    /// Burn and deliver base asset to `to` (`amount: None` burns everything)
    Redeem {
        account: AccountId,
        to: AccountId,
        amount: Option<Decimal>,
        response: Reply<Decimal>,
    },

    /// Move claim tokens (`amount: None` moves everything)
    Transfer {
        spender: AccountId,
        src: AccountId,
        dst: AccountId,
        amount: Option<Decimal>,
        response: Reply<Decimal>,
    },

    /// Set a claim-token allowance
    Approve {
        owner: AccountId,
        spender: AccountId,
        amount: Decimal,
        response: Reply<()>,
    },

    /// Register a hat
    CreateHat {
        caller: AccountId,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
        do_change_hat: bool,
        response: Reply<HatId>,
    },

    /// Switch hat
    ChangeHat {
        account: AccountId,
        hat_id: HatId,
        response: Reply<()>,
    },

    /// Realize payable interest
    PayInterest {
        account: AccountId,
        response: Reply<Decimal>,
    },

    /// Claim and distribute strategy rewards
    CollectRewards {
        response: Reply<RewardCollection>,
    },

    /// Pay out active-epoch rewards
    WithdrawRewards {
        account: AccountId,
        response: Reply<Decimal>,
    },

    /// Pay out archived-epoch rewards
    WithdrawPastRewards {
        account: AccountId,
        asset: AssetId,
        response: Reply<Decimal>,
    },

    /// Owner-gated command
    Admin {
        caller: AccountId,
        command: AdminCommand,
        response: Reply<()>,
    },

    /// Account view
    GetAccountStats {
        account: AccountId,
        response: Reply<AccountStats>,
    },

    /// Hat view
    GetHatStats {
        hat_id: HatId,
        response: Reply<HatStatsView>,
    },

    /// Global view
    GetGlobalStats {
        response: Reply<GlobalStatsView>,
    },

    /// Active-epoch rewards owed
    GetRewardsOwed {
        account: AccountId,
        response: Reply<Decimal>,
    },

    /// Archived-epoch rewards owed
    GetPastRewardsOwed {
        account: AccountId,
        asset: AssetId,
        response: Reply<Decimal>,
    },

    /// Full invariant check
    VerifyInvariants {
        response: Reply<InvariantReport>,
    },

    /// Close storage and stop the actor
    Shutdown {
        response: Reply<()>,
    },
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Ledger engine
    engine: Engine,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(engine: Engine, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { engine, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    let result = self.engine.close();
                    if let Err(e) = &result {
                        tracing::error!("Error closing ledger: {}", e);
                    }
                    let _ = response.send(result);
                    return;
                }
                other => self.handle_message(other),
            }
        }

        // Mailbox closed
        if let Err(e) = self.engine.close() {
            tracing::error!("Error closing ledger: {}", e);
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        let engine = &mut self.engine;
        match msg {
            LedgerMessage::Mint {
                account,
                amount,
                response,
            } => {
                let _ = response.send(engine.mint(&account, amount));
            }

            LedgerMessage::MintWithSelectedHat {
                account,
                amount,
                hat_id,
                response,
            } => {
                let _ = response.send(engine.mint_with_selected_hat(&account, amount, hat_id));
            }

            LedgerMessage::MintWithNewHat {
                account,
                amount,
                recipients,
                proportions,
                response,
            } => {
                let result = engine.mint_with_new_hat(&account, amount, recipients, proportions);
                let _ = response.send(result);
            }

            LedgerMessage::Redeem {
                account,
                to,
                amount,
                response,
            } => {
                let result = match amount {
                    Some(amount) => engine.redeem_and_transfer(&account, &to, amount),
                    None => engine.redeem_and_transfer_all(&account, &to),
                };
                let _ = response.send(result);
            }

            LedgerMessage::Transfer {
                spender,
                src,
                dst,
                amount,
                response,
            } => {
                let result = match amount {
                    Some(amount) => engine.transfer_from(&spender, &src, &dst, amount),
                    None => engine.transfer_all_from(&spender, &src, &dst),
                };
                let _ = response.send(result);
            }

            LedgerMessage::Approve {
                owner,
                spender,
                amount,
                response,
            } => {
                let _ = response.send(engine.approve(&owner, &spender, amount));
            }

            LedgerMessage::CreateHat {
                caller,
                recipients,
                proportions,
                do_change_hat,
                response,
            } => {
                let result = engine.create_hat(&caller, recipients, proportions, do_change_hat);
                let _ = response.send(result);
            }

            LedgerMessage::ChangeHat {
                account,
                hat_id,
                response,
            } => {
                let _ = response.send(engine.change_hat(&account, hat_id));
            }

            LedgerMessage::PayInterest { account, response } => {
                let _ = response.send(engine.pay_interest(&account));
            }

            LedgerMessage::CollectRewards { response } => {
                let _ = response.send(engine.collect_rewards());
            }

            LedgerMessage::WithdrawRewards { account, response } => {
                let _ = response.send(engine.withdraw_rewards(&account));
            }

            LedgerMessage::WithdrawPastRewards {
                account,
                asset,
                response,
            } => {
                let _ = response.send(engine.withdraw_past_rewards(&account, &asset));
            }

            LedgerMessage::Admin {
                caller,
                command,
                response,
            } => {
                let result = match command {
                    AdminCommand::SetInterestFee(fee) => engine.set_interest_fee(&caller, fee),
                    AdminCommand::SetRewardsFee(fee) => engine.set_rewards_fee(&caller, fee),
                    AdminCommand::SetFeeRecipient(recipient) => {
                        engine.set_fee_recipient(&caller, recipient)
                    }
                    AdminCommand::SetWithdrawAddress(address) => {
                        engine.set_withdraw_address(&caller, address)
                    }
                    AdminCommand::TransferOwnership(owner) => {
                        engine.transfer_ownership(&caller, owner)
                    }
                    AdminCommand::SetRewardsToken(asset) => engine.set_rewards_token(&caller, asset),
                    AdminCommand::ChangeAllocationStrategy(strategy) => {
                        engine.change_allocation_strategy(&caller, strategy)
                    }
                };
                let _ = response.send(result);
            }

            LedgerMessage::GetAccountStats { account, response } => {
                let _ = response.send(engine.account_stats(&account));
            }

            LedgerMessage::GetHatStats { hat_id, response } => {
                let _ = response.send(engine.hat_stats(hat_id));
            }

            LedgerMessage::GetGlobalStats { response } => {
                let _ = response.send(engine.global_stats());
            }

            LedgerMessage::GetRewardsOwed { account, response } => {
                let _ = response.send(engine.rewards_owed(&account));
            }

            LedgerMessage::GetPastRewardsOwed {
                account,
                asset,
                response,
            } => {
                let _ = response.send(engine.past_rewards_owed(&account, &asset));
            }

            LedgerMessage::VerifyInvariants { response } => {
                let _ = response.send(engine.verify_invariants());
            }

            LedgerMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Deposit and mint
    pub async fn mint(&self, account: AccountId, amount: Decimal) -> Result<()> {
        self.request(|response| LedgerMessage::Mint {
            account,
            amount,
            response,
        })
        .await
    }

    /// Switch to `hat_id`, then mint
    pub async fn mint_with_selected_hat(
        &self,
        account: AccountId,
        amount: Decimal,
        hat_id: HatId,
    ) -> Result<()> {
        self.request(|response| LedgerMessage::MintWithSelectedHat {
            account,
            amount,
            hat_id,
            response,
        })
        .await
    }

    /// Create a hat, switch to it, then mint
    pub async fn mint_with_new_hat(
        &self,
        account: AccountId,
        amount: Decimal,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
    ) -> Result<HatId> {
        self.request(|response| LedgerMessage::MintWithNewHat {
            account,
            amount,
            recipients,
            proportions,
            response,
        })
        .await
    }

    /// Burn `amount` and deliver base asset to the account itself
    pub async fn redeem(&self, account: AccountId, amount: Decimal) -> Result<Decimal> {
        let to = account.clone();
        self.redeem_and_transfer(account, to, Some(amount)).await
    }

    /// Burn `amount` (or everything) and deliver base asset to `to`
    pub async fn redeem_and_transfer(
        &self,
        account: AccountId,
        to: AccountId,
        amount: Option<Decimal>,
    ) -> Result<Decimal> {
        self.request(|response| LedgerMessage::Redeem {
            account,
            to,
            amount,
            response,
        })
        .await
    }

    /// Move claim tokens from the caller
    pub async fn transfer(&self, src: AccountId, dst: AccountId, amount: Decimal) -> Result<Decimal> {
        let spender = src.clone();
        self.transfer_from(spender, src, dst, Some(amount)).await
    }

    /// Move claim tokens on `spender`'s allowance (`None` moves everything)
    pub async fn transfer_from(
        &self,
        spender: AccountId,
        src: AccountId,
        dst: AccountId,
        amount: Option<Decimal>,
    ) -> Result<Decimal> {
        self.request(|response| LedgerMessage::Transfer {
            spender,
            src,
            dst,
            amount,
            response,
        })
        .await
    }

    /// Set a claim-token allowance
    pub async fn approve(&self, owner: AccountId, spender: AccountId, amount: Decimal) -> Result<()> {
        self.request(|response| LedgerMessage::Approve {
            owner,
            spender,
            amount,
            response,
        })
        .await
    }

    /// Register a hat
    pub async fn create_hat(
        &self,
        caller: AccountId,
        recipients: Vec<AccountId>,
        proportions: Vec<u32>,
        do_change_hat: bool,
    ) -> Result<HatId> {
        self.request(|response| LedgerMessage::CreateHat {
            caller,
            recipients,
            proportions,
            do_change_hat,
            response,
        })
        .await
    }

    /// Switch hat
    pub async fn change_hat(&self, account: AccountId, hat_id: HatId) -> Result<()> {
        self.request(|response| LedgerMessage::ChangeHat {
            account,
            hat_id,
            response,
        })
        .await
    }

    /// Realize payable interest
    pub async fn pay_interest(&self, account: AccountId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::PayInterest { account, response })
            .await
    }

    /// Claim and distribute strategy rewards
    pub async fn collect_rewards(&self) -> Result<RewardCollection> {
        self.request(|response| LedgerMessage::CollectRewards { response })
            .await
    }

    /// Pay out active-epoch rewards
    pub async fn withdraw_rewards(&self, account: AccountId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::WithdrawRewards { account, response })
            .await
    }

    /// Pay out archived-epoch rewards
    pub async fn withdraw_past_rewards(&self, account: AccountId, asset: AssetId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::WithdrawPastRewards {
            account,
            asset,
            response,
        })
        .await
    }

    /// Run an owner-gated command
    pub async fn admin(&self, caller: AccountId, command: AdminCommand) -> Result<()> {
        self.request(|response| LedgerMessage::Admin {
            caller,
            command,
            response,
        })
        .await
    }

    /// Account view
    pub async fn account_stats(&self, account: AccountId) -> Result<AccountStats> {
        self.request(|response| LedgerMessage::GetAccountStats { account, response })
            .await
    }

    /// Hat view
    pub async fn hat_stats(&self, hat_id: HatId) -> Result<HatStatsView> {
        self.request(|response| LedgerMessage::GetHatStats { hat_id, response })
            .await
    }

    /// Global view
    pub async fn global_stats(&self) -> Result<GlobalStatsView> {
        self.request(|response| LedgerMessage::GetGlobalStats { response })
            .await
    }

    /// Active-epoch rewards owed
    pub async fn rewards_owed(&self, account: AccountId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::GetRewardsOwed { account, response })
            .await
    }

    /// Archived-epoch rewards owed
    pub async fn past_rewards_owed(&self, account: AccountId, asset: AssetId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::GetPastRewardsOwed {
            account,
            asset,
            response,
        })
        .await
    }

    /// Full invariant check
    pub async fn verify_invariants(&self) -> Result<InvariantReport> {
        self.request(|response| LedgerMessage::VerifyInvariants { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| LedgerMessage::Shutdown { response })
            .await
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(engine: Engine, mailbox_capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(engine, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
