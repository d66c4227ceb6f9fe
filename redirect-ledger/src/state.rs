//! In-memory ledger state and the transaction journal
//!
//! Every mutating operation runs inside a [`Txn`]. The first time a txn
//! touches a record it saves the prior value, so a failure anywhere in
//! the operation (including in an external collaborator or in the
//! RocksDB write) restores the state as it was before the operation.

use crate::hats::HatRegistry;
use crate::types::{
    Account, AccountId, GlobalStats, Hat, HatId, HatStats, Params, RewardBook,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Allowance key: (owner, spender)
pub type AllowanceKey = (AccountId, AccountId);

/// Complete bookkeeping state
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub(crate) accounts: HashMap<AccountId, Account>,
    pub(crate) hats: HatRegistry,
    pub(crate) hat_stats: HashMap<HatId, HatStats>,
    pub(crate) global: GlobalStats,
    pub(crate) rewards: RewardBook,
    pub(crate) allowances: HashMap<AllowanceKey, Decimal>,
    pub(crate) params: Params,
}

impl LedgerState {
    /// Empty state administered by `params.owner`
    pub fn new(params: Params) -> Self {
        Self {
            accounts: HashMap::new(),
            hats: HatRegistry::new(),
            hat_stats: HashMap::new(),
            global: GlobalStats::default(),
            rewards: RewardBook::default(),
            allowances: HashMap::new(),
            params,
        }
    }

    /// Account record, if the account was ever touched
    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// All accounts
    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &Account)> {
        self.accounts.iter()
    }

    /// Hat registry
    pub fn hats(&self) -> &HatRegistry {
        &self.hats
    }

    /// Aggregate of one hat (zero when never used)
    pub fn hat_stats(&self, id: HatId) -> HatStats {
        self.hat_stats.get(&id).cloned().unwrap_or_default()
    }

    /// All hat aggregates
    pub fn all_hat_stats(&self) -> impl Iterator<Item = (&HatId, &HatStats)> {
        self.hat_stats.iter()
    }

    /// Global aggregate
    pub fn global(&self) -> &GlobalStats {
        &self.global
    }

    /// Reward epochs
    pub fn rewards(&self) -> &RewardBook {
        &self.rewards
    }

    /// Remaining claim-token allowance
    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Decimal {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Administrative parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Every record, for an initial persist
    pub fn snapshot(&self) -> ChangeSet {
        ChangeSet {
            accounts: self.accounts.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            hats: self.hats.iter().cloned().collect(),
            hat_stats: self.hat_stats.iter().map(|(k, v)| (*k, v.clone())).collect(),
            allowances: self.allowances.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            global: Some(self.global.clone()),
            rewards: Some(self.rewards.clone()),
            params: Some(self.params.clone()),
        }
    }
}

/// Records written by one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Updated accounts
    pub accounts: Vec<(AccountId, Account)>,
    /// Created hats
    pub hats: Vec<Hat>,
    /// Updated hat aggregates
    pub hat_stats: Vec<(HatId, HatStats)>,
    /// Updated allowances
    pub allowances: Vec<(AllowanceKey, Decimal)>,
    /// Global aggregate, if touched
    pub global: Option<GlobalStats>,
    /// Reward epochs, if touched
    pub rewards: Option<RewardBook>,
    /// Parameters, if touched
    pub params: Option<Params>,
}

impl ChangeSet {
    /// True when nothing was written
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.hats.is_empty()
            && self.hat_stats.is_empty()
            && self.allowances.is_empty()
            && self.global.is_none()
            && self.rewards.is_none()
            && self.params.is_none()
    }
}

// Prior values; `None` means the record did not exist.
#[derive(Debug, Default)]
struct Journal {
    accounts: HashMap<AccountId, Option<Account>>,
    hats_created: Vec<HatId>,
    hat_stats: HashMap<HatId, Option<HatStats>>,
    allowances: HashMap<AllowanceKey, Option<Decimal>>,
    global: Option<GlobalStats>,
    rewards: Option<RewardBook>,
    params: Option<Params>,
}

/// Journaled view over [`LedgerState`]
#[derive(Debug)]
pub struct Txn<'a> {
    state: &'a mut LedgerState,
    journal: Journal,
}

impl<'a> Txn<'a> {
    /// Start a transaction
    pub fn begin(state: &'a mut LedgerState) -> Self {
        Self {
            state,
            journal: Journal::default(),
        }
    }

    /// Read access to the working state
    pub fn state(&self) -> &LedgerState {
        &*self.state
    }

    /// Account record without creating it
    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.state.accounts.get(id)
    }

    /// Account record, created on first touch under the default hat
    pub fn account_mut(&mut self, id: &AccountId) -> &mut Account {
        if !self.journal.accounts.contains_key(id) {
            let prior = self.state.accounts.get(id).cloned();
            self.journal.accounts.insert(id.clone(), prior);
        }
        if !self.state.accounts.contains_key(id) {
            self.hat_stats_mut(HatId::DEFAULT).use_count += 1;
            debug!(account = %id, "Account created");
        }
        self.state.accounts.entry(id.clone()).or_default()
    }

    /// Hat aggregate, created on first touch
    pub fn hat_stats_mut(&mut self, id: HatId) -> &mut HatStats {
        if !self.journal.hat_stats.contains_key(&id) {
            let prior = self.state.hat_stats.get(&id).cloned();
            self.journal.hat_stats.insert(id, prior);
        }
        self.state.hat_stats.entry(id).or_default()
    }

    /// Global aggregate
    pub fn global_mut(&mut self) -> &mut GlobalStats {
        if self.journal.global.is_none() {
            self.journal.global = Some(self.state.global.clone());
        }
        &mut self.state.global
    }

    /// Reward epochs
    pub fn rewards_mut(&mut self) -> &mut RewardBook {
        if self.journal.rewards.is_none() {
            self.journal.rewards = Some(self.state.rewards.clone());
        }
        &mut self.state.rewards
    }

    /// Parameters
    pub fn params_mut(&mut self) -> &mut Params {
        if self.journal.params.is_none() {
            self.journal.params = Some(self.state.params.clone());
        }
        &mut self.state.params
    }

    /// Overwrite an allowance
    pub fn set_allowance(&mut self, owner: &AccountId, spender: &AccountId, amount: Decimal) {
        let key = (owner.clone(), spender.clone());
        if !self.journal.allowances.contains_key(&key) {
            let prior = self.state.allowances.get(&key).copied();
            self.journal.allowances.insert(key.clone(), prior);
        }
        self.state.allowances.insert(key, amount);
    }

    /// Register a new hat
    pub fn insert_hat(&mut self, hat: Hat) {
        self.journal.hats_created.push(hat.id);
        self.state.hats.insert(hat);
    }

    /// Current values of every record written so far
    pub fn change_set(&self) -> ChangeSet {
        let state = &*self.state;
        ChangeSet {
            accounts: self
                .journal
                .accounts
                .keys()
                .filter_map(|id| state.accounts.get(id).map(|a| (id.clone(), a.clone())))
                .collect(),
            hats: self
                .journal
                .hats_created
                .iter()
                .filter_map(|id| state.hats.get(*id).ok().flatten().cloned())
                .collect(),
            hat_stats: self
                .journal
                .hat_stats
                .keys()
                .filter_map(|id| state.hat_stats.get(id).map(|s| (*id, s.clone())))
                .collect(),
            allowances: self
                .journal
                .allowances
                .keys()
                .filter_map(|k| state.allowances.get(k).map(|v| (k.clone(), *v)))
                .collect(),
            global: self.journal.global.as_ref().map(|_| state.global.clone()),
            rewards: self.journal.rewards.as_ref().map(|_| state.rewards.clone()),
            params: self.journal.params.as_ref().map(|_| state.params.clone()),
        }
    }

    /// Keep every change
    pub fn commit(self) {}

    /// Undo every change
    pub fn rollback(self) {
        let Txn { state, journal } = self;

        for (id, prior) in journal.accounts {
            match prior {
                Some(account) => {
                    state.accounts.insert(id, account);
                }
                None => {
                    state.accounts.remove(&id);
                }
            }
        }
        for id in journal.hats_created {
            state.hats.remove(id);
        }
        for (id, prior) in journal.hat_stats {
            match prior {
                Some(stats) => {
                    state.hat_stats.insert(id, stats);
                }
                None => {
                    state.hat_stats.remove(&id);
                }
            }
        }
        for (key, prior) in journal.allowances {
            match prior {
                Some(amount) => {
                    state.allowances.insert(key, amount);
                }
                None => {
                    state.allowances.remove(&key);
                }
            }
        }
        if let Some(global) = journal.global {
            state.global = global;
        }
        if let Some(rewards) = journal.rewards {
            state.rewards = rewards;
        }
        if let Some(params) = journal.params {
            state.params = params;
        }
    }
}
