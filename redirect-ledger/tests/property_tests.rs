//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Account balance: balance == directed + realized interest
//! - Conservation: supply, loans and savings units match their aggregates
//! - Atomicity: a rejected operation changes nothing
//! - Hat splits are exact
//! - Payable interest never shrinks while the rate does not fall

mod common;

use common::{acct, Fixture};
use proptest::prelude::*;
use redirect_ledger::simulation::SimulatedAsset;
use redirect_ledger::{AccountId, HatId};
use rust_decimal::Decimal;

const ACCOUNTS: [&str; 4] = ["alice", "bob", "carol", "dave"];

#[derive(Debug, Clone)]
enum Op {
    Mint(usize, Decimal),
    Redeem(usize, Decimal),
    RedeemAll(usize),
    Transfer(usize, usize, Decimal),
    CreateHat(usize, Vec<(usize, u32)>),
    ChangeHat(usize, u64),
    PayInterest(usize),
    Accrue(u32),
    Rewards(Decimal),
    WithdrawRewards(usize),
}

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..50_000u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

fn account_strategy() -> impl Strategy<Value = usize> {
    0..ACCOUNTS.len()
}

/// Strategy for generating ledger operations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (account_strategy(), amount_strategy()).prop_map(|(a, x)| Op::Mint(a, x)),
        2 => (account_strategy(), amount_strategy()).prop_map(|(a, x)| Op::Redeem(a, x)),
        1 => account_strategy().prop_map(Op::RedeemAll),
        2 => (account_strategy(), account_strategy(), amount_strategy())
            .prop_map(|(a, b, x)| Op::Transfer(a, b, x)),
        1 => (
            account_strategy(),
            prop::collection::vec((account_strategy(), 1u32..100), 1..4)
        )
            .prop_map(|(a, r)| Op::CreateHat(a, r)),
        1 => (account_strategy(), 0u64..4).prop_map(|(a, h)| Op::ChangeHat(a, h)),
        1 => account_strategy().prop_map(Op::PayInterest),
        2 => (1u32..500).prop_map(Op::Accrue),
        1 => amount_strategy().prop_map(Op::Rewards),
        1 => account_strategy().prop_map(Op::WithdrawRewards),
    ]
}

fn ids() -> Vec<AccountId> {
    ACCOUNTS.iter().map(|name| acct(name)).collect()
}

/// Fixture with funded accounts and a reward asset wired up
fn setup() -> (Fixture, SimulatedAsset) {
    let mut fx = Fixture::new();
    for id in ids() {
        fx.fund(&id, Decimal::from(1_000_000));
    }
    let comp = SimulatedAsset::new("COMP");
    let owner = fx.owner.clone();
    let address = fx.engine.address().clone();
    fx.engine.set_rewards_token(&owner, Box::new(comp.clone())).unwrap();
    fx.engine.set_withdraw_address(&owner, address).unwrap();
    (fx, comp)
}

/// Apply `op`, ignoring rejections
fn apply(fx: &mut Fixture, comp: &SimulatedAsset, op: &Op) {
    let ids = ids();
    let _ = match op {
        Op::Mint(a, x) => fx.engine.mint(&ids[*a], *x).map(|_| ()),
        Op::Redeem(a, x) => fx.engine.redeem(&ids[*a], *x).map(|_| ()),
        Op::RedeemAll(a) => fx.engine.redeem_all(&ids[*a]).map(|_| ()),
        Op::Transfer(a, b, x) => fx.engine.transfer(&ids[*a], &ids[*b], *x).map(|_| ()),
        Op::CreateHat(a, recipients) => {
            let (who, weights): (Vec<_>, Vec<_>) =
                recipients.iter().map(|(r, w)| (ids[*r].clone(), *w)).unzip();
            fx.engine.create_hat(&ids[*a], who, weights, true).map(|_| ())
        }
        Op::ChangeHat(a, 0) => fx.engine.change_hat(&ids[*a], HatId::SELF),
        Op::ChangeHat(a, h) => fx.engine.change_hat(&ids[*a], HatId(*h)),
        Op::PayInterest(a) => fx.engine.pay_interest(&ids[*a]).map(|_| ()),
        Op::Accrue(bp) => {
            fx.strategy.accrue(Decimal::ONE + Decimal::new(*bp as i64, 5));
            Ok(())
        }
        Op::Rewards(x) => {
            fx.strategy.fund_rewards(comp, *x);
            fx.engine.collect_rewards().map(|_| ())
        }
        Op::WithdrawRewards(a) => fx.engine.withdraw_rewards(&ids[*a]).map(|_| ()),
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every aggregate matches the accounts after any sequence
    #[test]
    fn prop_conservation_holds(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut fx, comp) = setup();
        for op in &ops {
            apply(&mut fx, &comp, op);
            let report = fx.engine.verify_invariants().unwrap();
            prop_assert!(report.is_ok(), "after {:?}: {:?}", op, report.violations);
        }
    }

    /// Property: claim tokens are always backed by the strategy
    #[test]
    fn prop_supply_is_backed(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut fx, comp) = setup();
        for op in &ops {
            apply(&mut fx, &comp, op);
        }
        let global = fx.engine.global_stats().unwrap();
        prop_assert!(global.total_supply <= global.total_savings_amount + Decimal::new(1, 12));
    }

    /// Property: a rejected redemption leaves the account untouched
    #[test]
    fn prop_rejected_redeem_is_atomic(
        ops in prop::collection::vec(op_strategy(), 1..20),
        who in account_strategy(),
        extra in amount_strategy(),
    ) {
        let (mut fx, comp) = setup();
        for op in &ops {
            apply(&mut fx, &comp, op);
        }
        let id = &ids()[who];
        let before = fx.engine.account_stats(id).unwrap();
        let supply = fx.engine.total_supply();

        let too_much = before.balance + before.interest_payable + extra;
        prop_assert!(fx.engine.redeem(id, too_much).is_err());

        prop_assert_eq!(fx.engine.account_stats(id).unwrap(), before);
        prop_assert_eq!(fx.engine.total_supply(), supply);
    }

    /// Property: hat splits hand out exactly the minted amount
    #[test]
    fn prop_hat_split_is_exact(
        weights in prop::collection::vec(1u32..1_000, 1..8),
        amount in amount_strategy(),
    ) {
        let mut fx = Fixture::new();
        let owner = acct("owner");
        let recipients: Vec<AccountId> = (0..weights.len()).map(|i| acct(&format!("r{}", i))).collect();
        fx.fund(&owner, amount);
        fx.engine
            .mint_with_new_hat(&owner, amount, recipients.clone(), weights.clone())
            .unwrap();

        let received: Decimal = recipients.iter().map(|r| fx.engine.received_loan_of(r)).sum();
        prop_assert_eq!(received, amount);
        prop_assert_eq!(fx.engine.account_stats(&owner).unwrap().directed_total, amount);
        fx.assert_consistent();
    }

    /// Property: between payments, payable interest only grows with the rate
    #[test]
    fn prop_interest_payable_is_monotone(
        weights in prop::collection::vec(1u32..100, 1..4),
        steps in prop::collection::vec((0u32..500, prop::option::of(amount_strategy())), 1..30),
    ) {
        let mut fx = Fixture::new();
        let ids = ids();
        let (alice, erin) = (ids[0].clone(), acct("erin"));
        let recipients: Vec<AccountId> = ids[1..=weights.len()].to_vec();
        fx.fund(&alice, Decimal::from(1_000));
        fx.fund(&erin, Decimal::from(1_000_000));
        fx.engine
            .mint_with_new_hat(&alice, Decimal::from(1_000), recipients, weights)
            .unwrap();
        fx.deposit(&ids[3], Decimal::from(250));

        let mut previous: Vec<Decimal> = ids
            .iter()
            .map(|id| fx.engine.interest_payable_of(id).unwrap())
            .collect();
        for (bp, deposit) in &steps {
            fx.strategy.accrue(Decimal::ONE + Decimal::new(*bp as i64, 5));
            // Deposits by others leave these accounts alone
            if let Some(amount) = deposit {
                fx.engine.mint(&erin, *amount).unwrap();
            }
            for (i, id) in ids.iter().enumerate() {
                let payable = fx.engine.interest_payable_of(id).unwrap();
                prop_assert!(payable >= previous[i], "{} fell from {} to {}", id, previous[i], payable);
                previous[i] = payable;
            }
        }
        fx.assert_consistent();
    }
}
